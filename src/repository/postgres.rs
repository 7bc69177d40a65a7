use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::{
    table_service::{
        create_row, get_row, list_rows, update_row, val_str, FilterOperator, OrderBy, RowFilter,
    },
    InvoiceQuery, InvoiceRepository, LeaseQuery, LeaseRepository,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        BillingCycle, Decoded, Invoice, InvoicePatch, InvoiceStatus, InvoiceType, Lease,
        LeaseStatus, NewInvoice, RecordError, ReminderKind, ReminderState,
    },
};

#[derive(Clone)]
pub struct PgLeaseRepository {
    pool: PgPool,
}

impl PgLeaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseRepository for PgLeaseRepository {
    async fn list_leases(&self, query: &LeaseQuery) -> AppResult<Vec<Decoded<Lease>>> {
        let mut filter = RowFilter::new().any_text(
            "status",
            query.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
        if let Some(before) = query.end_date_before {
            filter = filter.date("end_date", FilterOperator::Lt, before);
        }

        let rows = list_rows(
            &self.pool,
            "leases",
            &filter,
            OrderBy::asc("end_date"),
            query.limit,
            query.offset,
        )
        .await?;
        Ok(rows.iter().map(decode_lease).collect())
    }

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        match get_row(&self.pool, "leases", lease_id).await? {
            Some(row) => decode_lease(&row).map(Some).map_err(record_to_app_error),
            None => Ok(None),
        }
    }

    async fn update_lease_status(&self, lease_id: &str, status: LeaseStatus) -> AppResult<Lease> {
        let mut patch = Map::new();
        patch.insert("status".to_string(), Value::String(status.as_str().to_string()));
        let row = update_row(&self.pool, "leases", lease_id, &patch).await?;
        decode_lease(&row).map_err(record_to_app_error)
    }
}

#[derive(Clone)]
pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn list_invoices(&self, query: &InvoiceQuery) -> AppResult<Vec<Decoded<Invoice>>> {
        let mut filter = RowFilter::new().any_text(
            "status",
            query.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
        if let Some(from) = query.due_from {
            filter = filter.date("due_date", FilterOperator::Gte, from);
        }
        if let Some(to) = query.due_to {
            filter = filter.date("due_date", FilterOperator::Lte, to);
        }
        if let Some(before) = query.due_before {
            filter = filter.date("due_date", FilterOperator::Lt, before);
        }

        let rows = list_rows(
            &self.pool,
            "invoices",
            &filter,
            OrderBy::asc("due_date"),
            query.limit,
            query.offset,
        )
        .await?;
        Ok(rows.iter().map(decode_invoice).collect())
    }

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        match get_row(&self.pool, "invoices", invoice_id).await? {
            Some(row) => decode_invoice(&row).map(Some).map_err(record_to_app_error),
            None => Ok(None),
        }
    }

    async fn latest_lease_invoice(
        &self,
        lease_id: &str,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>> {
        let filter = RowFilter::new()
            .eq_id("lease_id", lease_id)
            .eq_text("invoice_type", invoice_type.as_str());
        let rows = list_rows(&self.pool, "invoices", &filter, OrderBy::desc("due_date"), 1, 0).await?;
        rows.first()
            .map(|row| decode_invoice(row).map_err(record_to_app_error))
            .transpose()
    }

    async fn find_lease_invoice(
        &self,
        lease_id: &str,
        due_date: NaiveDate,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>> {
        let filter = RowFilter::new()
            .eq_id("lease_id", lease_id)
            .eq_text("invoice_type", invoice_type.as_str())
            .date("due_date", FilterOperator::Eq, due_date);
        let rows = list_rows(&self.pool, "invoices", &filter, OrderBy::asc("due_date"), 1, 0).await?;
        rows.first()
            .map(|row| decode_invoice(row).map_err(record_to_app_error))
            .transpose()
    }

    async fn create_invoice(&self, invoice: &NewInvoice) -> AppResult<Invoice> {
        let row = create_row(&self.pool, "invoices", &new_invoice_payload(invoice)).await?;
        decode_invoice(&row).map_err(record_to_app_error)
    }

    async fn update_invoice(&self, invoice_id: &str, patch: &InvoicePatch) -> AppResult<Invoice> {
        let row = update_row(&self.pool, "invoices", invoice_id, &invoice_patch_payload(patch)).await?;
        decode_invoice(&row).map_err(record_to_app_error)
    }
}

fn new_invoice_payload(invoice: &NewInvoice) -> Map<String, Value> {
    let mut payload = Map::new();
    if let Some(lease_id) = &invoice.lease_id {
        payload.insert("lease_id".to_string(), Value::String(lease_id.clone()));
    }
    payload.insert("tenant_id".to_string(), Value::String(invoice.tenant_id.clone()));
    payload.insert(
        "invoice_type".to_string(),
        Value::String(invoice.invoice_type.as_str().to_string()),
    );
    payload.insert("description".to_string(), Value::String(invoice.description.clone()));
    payload.insert("amount".to_string(), decimal_value(invoice.amount));
    payload.insert("amount_paid".to_string(), decimal_value(Decimal::ZERO));
    payload.insert("due_date".to_string(), Value::String(invoice.due_date.to_string()));
    payload.insert(
        "status".to_string(),
        Value::String(invoice.status.as_str().to_string()),
    );
    if let Some(owner_amount) = invoice.owner_amount {
        payload.insert("owner_amount".to_string(), decimal_value(owner_amount));
    }
    if let Some(fee) = invoice.management_fee {
        payload.insert("management_fee".to_string(), decimal_value(fee));
    }
    payload
}

fn invoice_patch_payload(patch: &InvoicePatch) -> Map<String, Value> {
    let mut payload = Map::new();
    if let Some(status) = patch.status {
        payload.insert("status".to_string(), Value::String(status.as_str().to_string()));
    }
    if let Some(amount_paid) = patch.amount_paid {
        payload.insert("amount_paid".to_string(), decimal_value(amount_paid));
    }
    if let Some(paid_on) = patch.last_payment_date {
        payload.insert("last_payment_date".to_string(), Value::String(paid_on.to_string()));
    }
    if let Some(reminder) = &patch.reminder {
        payload.insert(
            "last_reminder_sent_at".to_string(),
            reminder
                .last_reminder_sent_at
                .map(|at| Value::String(at.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "reminder_date".to_string(),
            reminder
                .reminder_date
                .map(|date| Value::String(date.to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "last_reminder_kind".to_string(),
            reminder
                .last_reminder_kind
                .map(|kind| Value::String(kind.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "reminder_count".to_string(),
            Value::Number(reminder.reminder_count.into()),
        );
    }
    payload
}

fn decimal_value(amount: Decimal) -> Value {
    Value::String(amount.to_string())
}

fn record_to_app_error(error: RecordError) -> AppError {
    AppError::UnprocessableEntity(format!("Record {} is malformed: {}", error.id, error.reason))
}

pub(crate) fn decode_lease(row: &Value) -> Decoded<Lease> {
    let id = val_str(row, "id");
    let fail = |reason: String| RecordError {
        id: id.clone(),
        reason,
    };
    if id.is_empty() {
        return Err(fail("missing id".to_string()));
    }

    let billing_cycle = BillingCycle::parse(&val_str(row, "billing_cycle"))
        .ok_or_else(|| fail(format!("unknown billing_cycle '{}'", val_str(row, "billing_cycle"))))?;
    let status = LeaseStatus::parse(&val_str(row, "status"))
        .ok_or_else(|| fail(format!("unknown status '{}'", val_str(row, "status"))))?;

    Ok(Lease {
        id: id.clone(),
        tenant_id: val_str(row, "tenant_id"),
        unit_id: val_str(row, "unit_id"),
        start_date: required_date(row, "start_date").map_err(&fail)?,
        end_date: required_date(row, "end_date").map_err(&fail)?,
        billing_cycle,
        rent_amount: required_decimal(row, "rent_amount").map_err(&fail)?,
        status,
        management_fee_percent: optional_decimal(row, "management_fee_percent").map_err(&fail)?,
    })
}

pub(crate) fn decode_invoice(row: &Value) -> Decoded<Invoice> {
    let id = val_str(row, "id");
    let fail = |reason: String| RecordError {
        id: id.clone(),
        reason,
    };
    if id.is_empty() {
        return Err(fail("missing id".to_string()));
    }

    let invoice_type = InvoiceType::parse(&val_str(row, "invoice_type"))
        .ok_or_else(|| fail(format!("unknown invoice_type '{}'", val_str(row, "invoice_type"))))?;
    let status = InvoiceStatus::parse(&val_str(row, "status"))
        .ok_or_else(|| fail(format!("unknown status '{}'", val_str(row, "status"))))?;
    let lease_id = Some(val_str(row, "lease_id")).filter(|value| !value.is_empty());

    let last_reminder_sent_at = match val_str(row, "last_reminder_sent_at") {
        raw if raw.is_empty() => None,
        raw => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|_| fail(format!("invalid last_reminder_sent_at '{raw}'")))?,
        ),
    };
    let reminder_count = match row.get("reminder_count") {
        None | Some(Value::Null) => 0,
        Some(raw) => raw
            .as_u64()
            .and_then(|count| u32::try_from(count).ok())
            .ok_or_else(|| fail(format!("invalid reminder_count '{raw}'")))?,
    };

    Ok(Invoice {
        id: id.clone(),
        lease_id,
        tenant_id: val_str(row, "tenant_id"),
        invoice_type,
        description: val_str(row, "description"),
        amount: required_decimal(row, "amount").map_err(&fail)?,
        amount_paid: optional_decimal(row, "amount_paid")
            .map_err(&fail)?
            .unwrap_or(Decimal::ZERO),
        last_payment_date: optional_date(row, "last_payment_date").map_err(&fail)?,
        due_date: required_date(row, "due_date").map_err(&fail)?,
        status,
        owner_amount: optional_decimal(row, "owner_amount").map_err(&fail)?,
        management_fee: optional_decimal(row, "management_fee").map_err(&fail)?,
        reminder: ReminderState {
            last_reminder_sent_at,
            reminder_date: optional_date(row, "reminder_date").map_err(&fail)?,
            last_reminder_kind: ReminderKind::parse(&val_str(row, "last_reminder_kind")),
            reminder_count,
        },
    })
}

/// Numeric columns arrive as JSON numbers or numeric strings.
fn optional_decimal(row: &Value, key: &str) -> Result<Option<Decimal>, String> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .to_string()
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| format!("invalid decimal {key} '{number}'")),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => text
            .trim()
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(text.trim()))
            .map(Some)
            .map_err(|_| format!("invalid decimal {key} '{text}'")),
        Some(other) => Err(format!("invalid decimal {key} '{other}'")),
    }
}

fn required_decimal(row: &Value, key: &str) -> Result<Decimal, String> {
    optional_decimal(row, key)?.ok_or_else(|| format!("missing {key}"))
}

fn optional_date(row: &Value, key: &str) -> Result<Option<NaiveDate>, String> {
    let raw = val_str(row, key);
    if raw.is_empty() {
        return Ok(None);
    }
    // Dates may come back as timestamps from loosely typed columns.
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| format!("invalid date {key} '{raw}'"))
}

fn required_date(row: &Value, key: &str) -> Result<NaiveDate, String> {
    optional_date(row, key)?.ok_or_else(|| format!("missing {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn decodes_lease_with_numeric_or_string_rent() {
        let row = json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "tenant_id": "t-1",
            "unit_id": "u-1",
            "start_date": "2024-01-01",
            "end_date": "2024-12-31",
            "billing_cycle": "monthly",
            "rent_amount": 100000.5,
            "status": "active",
        });
        let lease = decode_lease(&row).expect("valid lease");
        assert_eq!(lease.rent_amount, Decimal::from_str("100000.5").unwrap());
        assert_eq!(lease.billing_cycle, BillingCycle::Monthly);
        assert_eq!(lease.management_fee_percent, None);

        let mut as_string = row.clone();
        as_string["rent_amount"] = json!("100000.50");
        let lease = decode_lease(&as_string).expect("valid lease");
        assert_eq!(lease.rent_amount, Decimal::from_str("100000.50").unwrap());
    }

    #[test]
    fn malformed_lease_reports_its_id() {
        let row = json!({
            "id": "lease-9",
            "start_date": "2024-01-01",
            "end_date": "2024-12-31",
            "billing_cycle": "fortnightly",
            "rent_amount": "10",
            "status": "active",
        });
        let error = decode_lease(&row).unwrap_err();
        assert_eq!(error.id, "lease-9");
        assert!(error.reason.contains("fortnightly"));
    }

    #[test]
    fn decodes_invoice_reminder_columns() {
        let row = json!({
            "id": "inv-1",
            "lease_id": null,
            "tenant_id": "t-1",
            "invoice_type": "rent",
            "description": "Rent for January 2024",
            "amount": "250.00",
            "amount_paid": 0,
            "due_date": "2024-01-01",
            "status": "overdue",
            "last_reminder_sent_at": "2024-01-02T08:00:00+00:00",
            "reminder_date": "2024-01-02",
            "last_reminder_kind": "overdue",
            "reminder_count": 2,
        });
        let invoice = decode_invoice(&row).expect("valid invoice");
        assert_eq!(invoice.lease_id, None);
        assert_eq!(invoice.amount_paid, Decimal::ZERO);
        assert_eq!(invoice.reminder.last_reminder_kind, Some(ReminderKind::Overdue));
        assert_eq!(invoice.reminder.reminder_count, 2);
        assert_eq!(
            invoice.reminder.reminder_date,
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
    }

    #[test]
    fn out_of_range_reminder_count_is_a_decode_error() {
        let mut row = json!({
            "id": "inv-2",
            "tenant_id": "t-1",
            "invoice_type": "rent",
            "amount": "250.00",
            "due_date": "2024-01-01",
            "status": "pending",
            "last_payment_date": "2024-01-03",
            "reminder_count": null,
        });
        let invoice = decode_invoice(&row).expect("valid invoice");
        assert_eq!(invoice.reminder.reminder_count, 0);
        assert_eq!(invoice.last_payment_date, NaiveDate::from_ymd_opt(2024, 1, 3));

        row["reminder_count"] = json!(u64::from(u32::MAX) + 1);
        let error = decode_invoice(&row).unwrap_err();
        assert_eq!(error.id, "inv-2");
        assert!(error.reason.contains("reminder_count"));

        row["reminder_count"] = json!(-1);
        assert!(decode_invoice(&row).is_err());
    }

    #[test]
    fn patch_payload_only_carries_set_fields() {
        let payload = invoice_patch_payload(&InvoicePatch::status(InvoiceStatus::Overdue));
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("status"), Some(&json!("overdue")));

        let payment = invoice_patch_payload(&InvoicePatch {
            amount_paid: Some(Decimal::from(500)),
            last_payment_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..InvoicePatch::default()
        });
        assert_eq!(payment.get("last_payment_date"), Some(&json!("2024-02-01")));
        assert_eq!(payment.get("amount_paid"), Some(&json!("500")));
    }
}
