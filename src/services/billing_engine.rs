use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Notify;

use crate::{
    clock::Clock,
    config::AppConfig,
    error::AppResult,
    models::{Decoded, Invoice, ItemError, Lease},
    repository::{InvoiceQuery, InvoiceRepository, LeaseQuery, LeaseRepository},
    services::{
        invoice_generation::{generate_recurring_invoices, GenerationSummary},
        notifications::Notifier,
        reminders::{send_pending_reminders, ReminderSummary},
        status_transitions::{update_expired_leases, update_overdue_invoices, TransitionSummary},
    },
};

/// Tunables for the sweeps. Reminder cadence lives here rather than in code
/// because it is a product decision.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingPolicy {
    pub batch_size: i64,
    pub reminder_lookahead_days: i64,
    pub overdue_interval_days: i64,
    pub overdue_max_reminders: Option<u32>,
    pub remind_partial_overdue: bool,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            batch_size: 200,
            reminder_lookahead_days: 3,
            overdue_interval_days: 7,
            overdue_max_reminders: None,
            remind_partial_overdue: true,
        }
    }
}

impl BillingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.billing_batch_size.clamp(1, 1000),
            reminder_lookahead_days: config.reminder_lookahead_days.max(0),
            overdue_interval_days: config.overdue_reminder_interval_days.max(1),
            overdue_max_reminders: Some(config.overdue_reminder_max).filter(|max| *max > 0),
            remind_partial_overdue: config.remind_partial_overdue,
        }
    }
}

/// Cooperative stop signal for one batch run: a shared cancel flag plus an
/// optional deadline.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
    deadline: Option<tokio::time::Instant>,
}

impl RunControl {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Shares the cancel flag with `self`, adding a deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            notify: Arc::clone(&self.notify),
            deadline: Some(tokio::time::Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once `cancel` has been called. Deadlines are not awaited.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self
                .deadline
                .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingJob {
    GenerateRecurringInvoices,
    UpdateOverdueInvoices,
    UpdateExpiredLeases,
    SendReminders,
}

impl BillingJob {
    /// Order used by the daily run: overdue classification happens before
    /// reminders so newly overdue invoices get their first notice the same day.
    pub const DAILY_ORDER: [BillingJob; 4] = [
        Self::GenerateRecurringInvoices,
        Self::UpdateOverdueInvoices,
        Self::UpdateExpiredLeases,
        Self::SendReminders,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateRecurringInvoices => "generate-recurring-invoices",
            Self::UpdateOverdueInvoices => "update-overdue-invoices",
            Self::UpdateExpiredLeases => "update-expired-leases",
            Self::SendReminders => "send-reminders",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::DAILY_ORDER
            .into_iter()
            .find(|job| job.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobSummary {
    Generation(GenerationSummary),
    Transition(TransitionSummary),
    Reminders(ReminderSummary),
}

impl JobSummary {
    pub fn interrupted(&self) -> bool {
        match self {
            Self::Generation(summary) => summary.interrupted,
            Self::Transition(summary) => summary.interrupted,
            Self::Reminders(summary) => summary.interrupted,
        }
    }

    pub fn log(&self, job: BillingJob) {
        match self {
            Self::Generation(s) => tracing::info!(
                job = job.as_str(),
                as_of = %s.as_of_date,
                created = s.created,
                skipped = s.skipped,
                errors = s.errors.len(),
                interrupted = s.interrupted,
                "Billing job completed"
            ),
            Self::Transition(s) => tracing::info!(
                job = job.as_str(),
                as_of = %s.as_of_date,
                updated = s.updated,
                skipped = s.skipped,
                errors = s.errors.len(),
                interrupted = s.interrupted,
                "Billing job completed"
            ),
            Self::Reminders(s) => tracing::info!(
                job = job.as_str(),
                as_of = %s.as_of_date,
                sent = s.sent,
                skipped = s.skipped,
                failed = s.failed.len(),
                interrupted = s.interrupted,
                "Billing job completed"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job: BillingJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRunReport {
    pub as_of_date: NaiveDate,
    pub jobs: Vec<JobOutcome>,
    pub interrupted: bool,
}

impl DailyRunReport {
    pub fn failed_jobs(&self) -> usize {
        self.jobs.iter().filter(|outcome| outcome.error.is_some()).count()
    }
}

/// Everything the lifecycle sweeps need, built once at startup.
pub struct BillingEngine {
    pub leases: Arc<dyn LeaseRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub policy: BillingPolicy,
}

impl BillingEngine {
    pub fn new(
        leases: Arc<dyn LeaseRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            leases,
            invoices,
            notifier,
            clock,
            policy,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn run_job(
        &self,
        job: BillingJob,
        as_of: NaiveDate,
        control: &RunControl,
    ) -> AppResult<JobSummary> {
        let summary = match job {
            BillingJob::GenerateRecurringInvoices => {
                JobSummary::Generation(generate_recurring_invoices(self, as_of, control).await?)
            }
            BillingJob::UpdateOverdueInvoices => {
                JobSummary::Transition(update_overdue_invoices(self, as_of, control).await?)
            }
            BillingJob::UpdateExpiredLeases => {
                JobSummary::Transition(update_expired_leases(self, as_of, control).await?)
            }
            BillingJob::SendReminders => {
                JobSummary::Reminders(send_pending_reminders(self, as_of, control).await?)
            }
        };
        summary.log(job);
        Ok(summary)
    }

    /// Runs every job in `DAILY_ORDER`. A failing job is reported and the
    /// next one still runs; cancellation stops the sequence.
    pub async fn run_daily(&self, as_of: NaiveDate, control: &RunControl) -> DailyRunReport {
        let mut report = DailyRunReport {
            as_of_date: as_of,
            jobs: Vec::with_capacity(BillingJob::DAILY_ORDER.len()),
            interrupted: false,
        };
        for job in BillingJob::DAILY_ORDER {
            if control.should_stop() {
                report.interrupted = true;
                break;
            }
            let outcome = match self.run_job(job, as_of, control).await {
                Ok(summary) => {
                    report.interrupted |= summary.interrupted();
                    JobOutcome {
                        job,
                        summary: Some(summary),
                        error: None,
                    }
                }
                Err(error) => {
                    tracing::error!(job = job.as_str(), error = %error, "Billing job failed");
                    JobOutcome {
                        job,
                        summary: None,
                        error: Some(error.to_string()),
                    }
                }
            };
            report.jobs.push(outcome);
        }
        report
    }

    /// Snapshots every lease matching `query`, one page at a time.
    pub(crate) async fn snapshot_leases(
        &self,
        mut query: LeaseQuery,
    ) -> AppResult<(Vec<Lease>, Vec<ItemError>)> {
        query.limit = self.policy.batch_size;
        query.offset = 0;
        let mut records = Vec::new();
        loop {
            let page = self.leases.list_leases(&query).await?;
            let page_len = page.len() as i64;
            records.extend(page);
            if page_len < query.limit {
                break;
            }
            query.offset += query.limit;
        }
        Ok(split_decoded("lease", records))
    }

    pub(crate) async fn snapshot_invoices(
        &self,
        mut query: InvoiceQuery,
    ) -> AppResult<(Vec<Invoice>, Vec<ItemError>)> {
        query.limit = self.policy.batch_size;
        query.offset = 0;
        let mut records = Vec::new();
        loop {
            let page = self.invoices.list_invoices(&query).await?;
            let page_len = page.len() as i64;
            records.extend(page);
            if page_len < query.limit {
                break;
            }
            query.offset += query.limit;
        }
        Ok(split_decoded("invoice", records))
    }
}

/// Malformed rows are logged and reported, never processed.
fn split_decoded<T>(kind: &str, records: Vec<Decoded<T>>) -> (Vec<T>, Vec<ItemError>) {
    let mut valid = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for record in records {
        match record {
            Ok(item) => valid.push(item),
            Err(error) => {
                tracing::warn!(kind, id = %error.id, reason = %error.reason, "Skipping malformed record");
                errors.push(ItemError::from(error));
            }
        }
    }
    (valid, errors)
}
