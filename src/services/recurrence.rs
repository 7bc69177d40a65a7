use chrono::{Datelike, Months, NaiveDate};

use crate::models::{BillingCycle, Lease, LeaseStatus};

/// Adds one billing cycle to `last_due_date`.
///
/// chrono clamps the day of month when the target month is shorter, so
/// Jan 31 + 1 month is the last day of February.
pub fn next_due_date(last_due_date: NaiveDate, billing_cycle: BillingCycle) -> NaiveDate {
    add_cycles(last_due_date, billing_cycle, 1)
}

/// Next due date after `last_due_date` on the schedule anchored at `anchor`.
///
/// Every due date is `anchor + k cycles`, which keeps a Jan 31 anchor on
/// month ends (Feb 29, Mar 31, Apr 30) instead of sticking to the clamped day.
pub fn next_due_date_from_anchor(
    anchor: NaiveDate,
    last_due_date: NaiveDate,
    billing_cycle: BillingCycle,
) -> NaiveDate {
    if last_due_date < anchor {
        return anchor;
    }

    let elapsed_months = (last_due_date.year() - anchor.year()) * 12
        + last_due_date.month() as i32
        - anchor.month() as i32;
    let step = billing_cycle.months() as i32;
    let mut cycles = (elapsed_months.max(0) / step) as u32;

    loop {
        let candidate = add_cycles(anchor, billing_cycle, cycles);
        if candidate > last_due_date {
            return candidate;
        }
        cycles += 1;
    }
}

/// First due date the lease has not been billed for yet.
pub fn upcoming_due_date(lease: &Lease, last_invoice_due_date: Option<NaiveDate>) -> NaiveDate {
    match last_invoice_due_date {
        Some(last) => next_due_date_from_anchor(lease.start_date, last, lease.billing_cycle),
        None => lease.start_date,
    }
}

/// True when a new rent invoice should be created for `lease` on `as_of`.
pub fn is_due_for_generation(
    lease: &Lease,
    as_of: NaiveDate,
    last_invoice_due_date: Option<NaiveDate>,
) -> bool {
    if lease.status != LeaseStatus::Active {
        return false;
    }
    as_of >= upcoming_due_date(lease, last_invoice_due_date)
}

/// Inclusive (start, end) of the period billed by an invoice due on `due_date`.
pub fn billing_period(due_date: NaiveDate, billing_cycle: BillingCycle) -> (NaiveDate, NaiveDate) {
    let end = next_due_date(due_date, billing_cycle)
        .pred_opt()
        .unwrap_or(due_date);
    (due_date, end)
}

pub fn rent_description(due_date: NaiveDate, billing_cycle: BillingCycle) -> String {
    let (start, end) = billing_period(due_date, billing_cycle);
    match billing_cycle {
        BillingCycle::Monthly => format!("Rent for {}", start.format("%B %Y")),
        _ => format!(
            "Rent for {} - {}",
            start.format("%b %Y"),
            end.format("%b %Y")
        ),
    }
}

fn add_cycles(date: NaiveDate, billing_cycle: BillingCycle, cycles: u32) -> NaiveDate {
    date.checked_add_months(Months::new(billing_cycle.months() * cycles))
        .unwrap_or(NaiveDate::MAX)
}
