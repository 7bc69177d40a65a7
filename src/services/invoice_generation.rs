use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::AppResult,
    models::{
        split_management_fee, InvoiceStatus, InvoiceType, ItemError, Lease, LeaseStatus,
        NewInvoice,
    },
    repository::LeaseQuery,
    services::{
        billing_engine::{BillingEngine, RunControl},
        recurrence::{is_due_for_generation, rent_description, upcoming_due_date},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub as_of_date: NaiveDate,
    pub created: u32,
    pub skipped: u32,
    pub errors: Vec<ItemError>,
    pub interrupted: bool,
}

impl GenerationSummary {
    fn new(as_of_date: NaiveDate) -> Self {
        Self {
            as_of_date,
            created: 0,
            skipped: 0,
            errors: Vec::new(),
            interrupted: false,
        }
    }
}

#[derive(Debug, PartialEq)]
enum LeaseOutcome {
    Created { invoice_id: String, due_date: NaiveDate },
    NotDue,
    PastLeaseEnd,
    NoLongerActive,
    AlreadyBilled,
}

/// Creates every missing rent invoice for each active lease, from the
/// latest billed period up to `as_of`. Running twice on the same date
/// creates nothing the second time.
pub async fn generate_recurring_invoices(
    engine: &BillingEngine,
    as_of: NaiveDate,
    control: &RunControl,
) -> AppResult<GenerationSummary> {
    let mut summary = GenerationSummary::new(as_of);

    let (leases, malformed) = engine
        .snapshot_leases(LeaseQuery {
            statuses: vec![LeaseStatus::Active],
            ..LeaseQuery::default()
        })
        .await?;
    summary.errors.extend(malformed);

    'leases: for lease in leases {
        if control.should_stop() {
            summary.interrupted = true;
            break;
        }

        if let Err(reason) = lease.validate() {
            tracing::warn!(lease_id = %lease.id, %reason, "Skipping invalid lease");
            summary.errors.push(ItemError::new(&lease.id, reason));
            continue;
        }

        let mut created_for_lease = 0u32;
        loop {
            match generate_for_lease(engine, &lease, as_of).await {
                Ok(LeaseOutcome::Created {
                    invoice_id,
                    due_date,
                }) => {
                    tracing::info!(
                        lease_id = %lease.id,
                        %invoice_id,
                        %due_date,
                        cycle = lease.billing_cycle.as_str(),
                        "Created rent invoice"
                    );
                    summary.created += 1;
                    created_for_lease += 1;
                }
                Ok(outcome) => {
                    tracing::debug!(lease_id = %lease.id, ?outcome, "No further invoice generated");
                    if created_for_lease == 0 {
                        summary.skipped += 1;
                    }
                    break;
                }
                Err(error) => {
                    tracing::warn!(lease_id = %lease.id, error = %error, "Invoice generation failed");
                    summary.errors.push(ItemError::new(&lease.id, error));
                    break;
                }
            }

            if control.should_stop() {
                summary.interrupted = true;
                break 'leases;
            }
        }
    }

    Ok(summary)
}

async fn generate_for_lease(
    engine: &BillingEngine,
    lease: &Lease,
    as_of: NaiveDate,
) -> AppResult<LeaseOutcome> {
    let last_due = engine
        .invoices
        .latest_lease_invoice(&lease.id, InvoiceType::Rent)
        .await?
        .map(|invoice| invoice.due_date);

    if !is_due_for_generation(lease, as_of, last_due) {
        return Ok(LeaseOutcome::NotDue);
    }
    let due_date = upcoming_due_date(lease, last_due);
    if due_date >= lease.end_date {
        return Ok(LeaseOutcome::PastLeaseEnd);
    }

    // Termination may have landed after the snapshot.
    let current = engine.leases.get_lease(&lease.id).await?;
    if current.map(|lease| lease.status) != Some(LeaseStatus::Active) {
        return Ok(LeaseOutcome::NoLongerActive);
    }

    if engine
        .invoices
        .find_lease_invoice(&lease.id, due_date, InvoiceType::Rent)
        .await?
        .is_some()
    {
        return Ok(LeaseOutcome::AlreadyBilled);
    }

    let (owner_amount, management_fee) = match lease.management_fee_percent {
        Some(percent) => {
            let (owner, fee) = split_management_fee(lease.rent_amount, percent);
            (Some(owner), Some(fee))
        }
        None => (None, None),
    };

    let new_invoice = NewInvoice {
        lease_id: Some(lease.id.clone()),
        tenant_id: lease.tenant_id.clone(),
        invoice_type: InvoiceType::Rent,
        description: rent_description(due_date, lease.billing_cycle),
        amount: lease.rent_amount,
        due_date,
        status: InvoiceStatus::Pending,
        owner_amount,
        management_fee,
    };

    match engine.invoices.create_invoice(&new_invoice).await {
        Ok(invoice) => Ok(LeaseOutcome::Created {
            invoice_id: invoice.id,
            due_date,
        }),
        // Another generator won the race; the unique index kept us at one invoice.
        Err(error) if error.is_conflict() => Ok(LeaseOutcome::AlreadyBilled),
        Err(error) => Err(error),
    }
}
