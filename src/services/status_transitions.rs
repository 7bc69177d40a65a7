use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::AppResult,
    models::{InvoicePatch, InvoiceStatus, ItemError, LeaseStatus},
    repository::{InvoiceQuery, LeaseQuery},
    services::billing_engine::{BillingEngine, RunControl},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionSummary {
    pub as_of_date: NaiveDate,
    pub updated: u32,
    pub skipped: u32,
    pub errors: Vec<ItemError>,
    pub interrupted: bool,
}

impl TransitionSummary {
    fn new(as_of_date: NaiveDate) -> Self {
        Self {
            as_of_date,
            updated: 0,
            skipped: 0,
            errors: Vec::new(),
            interrupted: false,
        }
    }
}

fn overdue_candidate(status: InvoiceStatus, due_date: NaiveDate, as_of: NaiveDate) -> bool {
    matches!(status, InvoiceStatus::Pending | InvoiceStatus::Partial) && due_date < as_of
}

/// Marks pending and partially paid invoices past their due date as overdue.
/// `amount_paid` is left as is.
pub async fn update_overdue_invoices(
    engine: &BillingEngine,
    as_of: NaiveDate,
    control: &RunControl,
) -> AppResult<TransitionSummary> {
    let mut summary = TransitionSummary::new(as_of);

    let (invoices, malformed) = engine
        .snapshot_invoices(InvoiceQuery {
            statuses: vec![InvoiceStatus::Pending, InvoiceStatus::Partial],
            due_before: Some(as_of),
            ..InvoiceQuery::default()
        })
        .await?;
    summary.errors.extend(malformed);

    for candidate in invoices {
        if control.should_stop() {
            summary.interrupted = true;
            break;
        }

        let current = match engine.invoices.get_invoice(&candidate.id).await {
            Ok(Some(invoice)) => invoice,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(error) => {
                summary.errors.push(ItemError::new(&candidate.id, error));
                continue;
            }
        };

        // A payment may have landed since the snapshot.
        if !overdue_candidate(current.status, current.due_date, as_of)
            || !current.status.can_transition_to(InvoiceStatus::Overdue)
        {
            summary.skipped += 1;
            continue;
        }

        match engine
            .invoices
            .update_invoice(&current.id, &InvoicePatch::status(InvoiceStatus::Overdue))
            .await
        {
            Ok(_) => {
                tracing::info!(
                    invoice_id = %current.id,
                    from = current.status.as_str(),
                    due_date = %current.due_date,
                    "Invoice marked overdue"
                );
                summary.updated += 1;
            }
            Err(error) => {
                tracing::warn!(invoice_id = %current.id, error = %error, "Failed to mark invoice overdue");
                summary.errors.push(ItemError::new(&current.id, error));
            }
        }
    }

    Ok(summary)
}

/// Expires active leases whose end date has passed. Invoices under the
/// lease keep their own status.
pub async fn update_expired_leases(
    engine: &BillingEngine,
    as_of: NaiveDate,
    control: &RunControl,
) -> AppResult<TransitionSummary> {
    let mut summary = TransitionSummary::new(as_of);

    let (leases, malformed) = engine
        .snapshot_leases(LeaseQuery {
            statuses: vec![LeaseStatus::Active],
            end_date_before: Some(as_of),
            ..LeaseQuery::default()
        })
        .await?;
    summary.errors.extend(malformed);

    for candidate in leases {
        if control.should_stop() {
            summary.interrupted = true;
            break;
        }

        let current = match engine.leases.get_lease(&candidate.id).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(error) => {
                summary.errors.push(ItemError::new(&candidate.id, error));
                continue;
            }
        };

        if current.status != LeaseStatus::Active
            || current.end_date >= as_of
            || !current.status.can_transition_to(LeaseStatus::Expired)
        {
            summary.skipped += 1;
            continue;
        }

        match engine
            .leases
            .update_lease_status(&current.id, LeaseStatus::Expired)
            .await
        {
            Ok(_) => {
                tracing::info!(lease_id = %current.id, end_date = %current.end_date, "Lease expired");
                summary.updated += 1;
            }
            Err(error) => {
                tracing::warn!(lease_id = %current.id, error = %error, "Failed to expire lease");
                summary.errors.push(ItemError::new(&current.id, error));
            }
        }
    }

    Ok(summary)
}
