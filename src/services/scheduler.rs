use std::{sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Timelike};
use chrono_tz::Tz;
use tokio::time::sleep;

use crate::{
    services::billing_engine::{BillingEngine, RunControl},
    state::AppState,
};

/// Background loop that runs the daily billing jobs once per calendar day
/// in the configured timezone.
///
/// Jobs run in sequence because reminders depend on the overdue sweep.
/// Cancelling `shutdown` stops the loop and any run in progress at the next
/// item boundary.
pub async fn run_background_scheduler(state: AppState, shutdown: RunControl) {
    let Some(engine) = state.engine.clone() else {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    };

    let tick = Duration::from_secs(state.config.scheduler_tick_seconds.max(1));
    let timezone = state.config.scheduler_timezone;
    let daily_hour = state.config.scheduler_daily_hour;
    let run_timeout = Duration::from_secs(state.config.billing_run_timeout_seconds.max(1));

    tracing::info!(
        timezone = %timezone,
        daily_hour,
        tick_seconds = tick.as_secs(),
        "Background scheduler started"
    );

    let mut last_daily_run: Option<NaiveDate> = None;

    loop {
        tokio::select! {
            _ = sleep(tick) => {}
            _ = shutdown.cancelled() => break,
        }

        let local_now = engine.clock.now().with_timezone(&timezone);
        let Some(today) = daily_run_due(local_now, daily_hour, last_daily_run) else {
            continue;
        };
        last_daily_run = Some(today);

        tracing::info!("Scheduler: running daily billing jobs for {today}");
        run_daily_jobs(&engine, today, shutdown.with_timeout(run_timeout)).await;
    }

    tracing::info!("Background scheduler stopped");
}

async fn run_daily_jobs(engine: &Arc<BillingEngine>, today: NaiveDate, control: RunControl) {
    let report = engine.run_daily(today, &control).await;
    if report.interrupted {
        tracing::warn!(as_of = %today, "Scheduler: daily billing run interrupted");
    }
    if report.failed_jobs() > 0 {
        tracing::error!(
            as_of = %today,
            failed_jobs = report.failed_jobs(),
            "Scheduler: daily billing run had failing jobs"
        );
    }
}

/// Returns the local date to run for, if the daily run has not happened yet
/// today and the configured hour has been reached.
fn daily_run_due(
    local_now: DateTime<Tz>,
    daily_hour: u32,
    last_daily_run: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let today = local_now.date_naive();
    if last_daily_run == Some(today) || local_now.hour() < daily_hour {
        return None;
    }
    Some(today)
}
