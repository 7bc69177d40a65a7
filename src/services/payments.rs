use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    error::{AppError, AppResult},
    models::{round_money, Invoice, InvoicePatch, InvoiceStatus},
    services::billing_engine::BillingEngine,
};

/// Applies a payment to an invoice. A full settlement marks it paid,
/// anything less leaves it partial.
pub async fn record_payment(
    engine: &BillingEngine,
    invoice_id: &str,
    amount: Decimal,
    paid_on: Option<NaiveDate>,
) -> AppResult<Invoice> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(
            "Payment amount must be greater than zero.".to_string(),
        ));
    }
    let today = engine.today();
    let paid_on = paid_on.unwrap_or(today);
    if paid_on > today {
        return Err(AppError::BadRequest(
            "paid_on cannot be in the future.".to_string(),
        ));
    }

    let invoice = engine
        .invoices
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;

    if matches!(invoice.status, InvoiceStatus::Draft) || invoice.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Cannot record a payment on a {} invoice.",
            invoice.status.as_str()
        )));
    }

    let amount_paid = invoice.amount_paid + amount;
    if amount_paid > invoice.amount {
        return Err(AppError::UnprocessableEntity(format!(
            "Payment of {amount} exceeds the outstanding balance of {}.",
            invoice.outstanding()
        )));
    }

    let next_status = if amount_paid == invoice.amount {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    };
    if !invoice.status.can_transition_to(next_status) {
        return Err(AppError::Conflict(format!(
            "Invoice cannot move from {} to {}.",
            invoice.status.as_str(),
            next_status.as_str()
        )));
    }

    // A backdated payment never moves the recorded payment date backwards.
    let last_payment_date = invoice
        .last_payment_date
        .map_or(paid_on, |previous| previous.max(paid_on));

    let updated = engine
        .invoices
        .update_invoice(
            &invoice.id,
            &InvoicePatch {
                status: Some(next_status),
                amount_paid: Some(amount_paid),
                last_payment_date: Some(last_payment_date),
                reminder: None,
            },
        )
        .await?;

    tracing::info!(
        invoice_id = %updated.id,
        %amount,
        %paid_on,
        late = paid_on > invoice.due_date,
        status = next_status.as_str(),
        "Payment recorded"
    );
    Ok(updated)
}
