use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    error::AppResult,
    models::{Invoice, InvoicePatch, InvoiceStatus, ItemError, ReminderKind, ReminderState},
    repository::InvoiceQuery,
    services::{
        billing_engine::{BillingEngine, BillingPolicy, RunControl},
        notifications::{NotificationTemplate, Recipient},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderSummary {
    pub as_of_date: NaiveDate,
    pub sent: u32,
    pub skipped: u32,
    pub failed: Vec<ItemError>,
    pub interrupted: bool,
}

impl ReminderSummary {
    fn new(as_of_date: NaiveDate) -> Self {
        Self {
            as_of_date,
            sent: 0,
            skipped: 0,
            failed: Vec::new(),
            interrupted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlannedReminder {
    kind: ReminderKind,
    template: NotificationTemplate,
}

/// Decides whether `invoice` is owed a reminder on `as_of`.
fn plan_reminder(
    invoice: &Invoice,
    as_of: NaiveDate,
    policy: &BillingPolicy,
) -> Option<PlannedReminder> {
    let state = &invoice.reminder;
    match invoice.status {
        InvoiceStatus::Pending => {
            let window_end = as_of + Duration::days(policy.reminder_lookahead_days);
            let in_window = invoice.due_date >= as_of && invoice.due_date <= window_end;
            (in_window && state.last_reminder_kind.is_none()).then_some(PlannedReminder {
                kind: ReminderKind::DueSoon,
                template: NotificationTemplate::RentDueSoon,
            })
        }
        InvoiceStatus::Overdue => {
            if (as_of - invoice.due_date).num_days() < 1 {
                return None;
            }
            let partial = invoice.is_partially_paid();
            if partial && !policy.remind_partial_overdue {
                return None;
            }
            if state.last_reminder_kind == Some(ReminderKind::Overdue) {
                let overdue_sent = state.reminder_count;
                if policy
                    .overdue_max_reminders
                    .is_some_and(|max| overdue_sent >= max)
                {
                    return None;
                }
                let interval_elapsed = state.reminder_date.map_or(true, |last| {
                    (as_of - last).num_days() >= policy.overdue_interval_days
                });
                if !interval_elapsed {
                    return None;
                }
            }
            Some(PlannedReminder {
                kind: ReminderKind::Overdue,
                template: if partial {
                    NotificationTemplate::RentOverduePartial
                } else {
                    NotificationTemplate::RentOverdue
                },
            })
        }
        _ => None,
    }
}

/// Overdue reminders restart the counter so the cap applies to overdue
/// notices only.
fn next_reminder_state(
    previous: &ReminderState,
    kind: ReminderKind,
    as_of: NaiveDate,
    sent_at: chrono::DateTime<chrono::Utc>,
) -> ReminderState {
    let reminder_count = if previous.last_reminder_kind == Some(kind) {
        previous.reminder_count + 1
    } else {
        1
    };
    ReminderState {
        last_reminder_sent_at: Some(sent_at),
        reminder_date: Some(as_of),
        last_reminder_kind: Some(kind),
        reminder_count,
    }
}

fn reminder_payload(invoice: &Invoice, as_of: NaiveDate, reminder_number: u32) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("invoice_id".to_string(), json!(invoice.id));
    payload.insert("description".to_string(), json!(invoice.description));
    payload.insert("due_date".to_string(), json!(invoice.due_date.to_string()));
    payload.insert("amount".to_string(), json!(format!("{:.2}", invoice.amount)));
    payload.insert(
        "amount_paid".to_string(),
        json!(format!("{:.2}", invoice.amount_paid)),
    );
    payload.insert(
        "outstanding".to_string(),
        json!(format!("{:.2}", invoice.outstanding())),
    );
    let days_overdue = (as_of - invoice.due_date).num_days();
    if days_overdue > 0 {
        payload.insert("days_overdue".to_string(), json!(days_overdue));
    }
    payload.insert("reminder_number".to_string(), json!(reminder_number));
    payload
}

/// Sends due-soon and overdue reminders. The reminder marker is stored only
/// after the notifier confirms delivery, so failed sends are retried on the
/// next run.
pub async fn send_pending_reminders(
    engine: &BillingEngine,
    as_of: NaiveDate,
    control: &RunControl,
) -> AppResult<ReminderSummary> {
    let mut summary = ReminderSummary::new(as_of);
    let policy = &engine.policy;

    let (mut candidates, mut malformed) = engine
        .snapshot_invoices(InvoiceQuery {
            statuses: vec![InvoiceStatus::Pending],
            due_from: Some(as_of),
            due_to: Some(as_of + Duration::days(policy.reminder_lookahead_days)),
            ..InvoiceQuery::default()
        })
        .await?;
    let (overdue, overdue_malformed) = engine
        .snapshot_invoices(InvoiceQuery {
            statuses: vec![InvoiceStatus::Overdue],
            due_before: Some(as_of),
            ..InvoiceQuery::default()
        })
        .await?;
    candidates.extend(overdue);
    malformed.extend(overdue_malformed);
    summary.failed.extend(malformed);

    for candidate in candidates {
        if control.should_stop() {
            summary.interrupted = true;
            break;
        }

        let invoice = match engine.invoices.get_invoice(&candidate.id).await {
            Ok(Some(invoice)) => invoice,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(error) => {
                summary.failed.push(ItemError::new(&candidate.id, error));
                continue;
            }
        };

        let Some(plan) = plan_reminder(&invoice, as_of, policy) else {
            summary.skipped += 1;
            continue;
        };

        let next_state = next_reminder_state(&invoice.reminder, plan.kind, as_of, engine.clock.now());
        let recipient = Recipient {
            tenant_id: invoice.tenant_id.clone(),
            lease_id: invoice.lease_id.clone(),
        };
        let payload = reminder_payload(&invoice, as_of, next_state.reminder_count);

        let receipt = match engine.notifier.send(plan.template, &recipient, &payload).await {
            Ok(receipt) => receipt,
            Err(error) => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    template = plan.template.as_str(),
                    error = %error,
                    "Reminder delivery failed"
                );
                summary.failed.push(ItemError::new(&invoice.id, error));
                continue;
            }
        };

        let patch = InvoicePatch {
            reminder: Some(next_state),
            ..InvoicePatch::default()
        };
        if let Err(error) = engine.invoices.update_invoice(&invoice.id, &patch).await {
            // Delivered but unrecorded: the next run may send it again.
            tracing::error!(
                invoice_id = %invoice.id,
                error = %error,
                "Reminder sent but marker could not be stored"
            );
            summary
                .failed
                .push(ItemError::new(&invoice.id, format!("reminder marker not stored: {error}")));
            continue;
        }

        tracing::info!(
            invoice_id = %invoice.id,
            template = plan.template.as_str(),
            channel = receipt.channel,
            provider_id = receipt.provider_id.as_deref().unwrap_or_default(),
            "Reminder sent"
        );
        summary.sent += 1;
    }

    Ok(summary)
}
