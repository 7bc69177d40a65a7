use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.db_pool {
        // Short timeout so the healthcheck answers even when the first
        // connection hangs.
        Some(pool) => match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(pool),
        )
        .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Health check DB query failed");
                false
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                false
            }
        },
        None => true,
    };

    let status = if db_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "db": db_ok,
        "billing_engine": state.engine.is_some(),
        "scheduler": {
            "enabled": state.config.scheduler_enabled,
            "timezone": state.config.scheduler_timezone.name(),
            "daily_hour": state.config.scheduler_daily_hour,
        },
    }))
}
