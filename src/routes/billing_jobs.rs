use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    schemas::{validate_input, InvoicePath, JobPath, RecordPaymentInput, RunJobInput},
    services::{
        billing_engine::{BillingEngine, BillingJob, RunControl},
        payments::record_payment,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/billing/jobs/{job}", post(run_billing_job))
        .route("/billing/run-daily", post(run_daily_billing))
        .route("/invoices/{invoice_id}/payments", post(create_invoice_payment))
}

async fn run_billing_job(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let job = BillingJob::parse(&path.job)
        .ok_or_else(|| AppError::NotFound(format!("Unknown billing job '{}'.", path.job)))?;
    let payload: RunJobInput = optional_json(&body)?;
    validate_input(&payload)?;

    let engine = billing_engine(&state)?;
    let as_of = payload.as_of()?.unwrap_or_else(|| engine.today());
    let summary = engine.run_job(job, as_of, &request_control(&state)).await?;

    Ok(Json(json!({
        "job": job.as_str(),
        "as_of_date": as_of.to_string(),
        "summary": summary,
    })))
}

async fn run_daily_billing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let payload: RunJobInput = optional_json(&body)?;
    validate_input(&payload)?;

    let engine = billing_engine(&state)?;
    let as_of = payload.as_of()?.unwrap_or_else(|| engine.today());
    let report = engine.run_daily(as_of, &request_control(&state)).await;

    serde_json::to_value(report)
        .map(Json)
        .map_err(|error| AppError::Internal(error.to_string()))
}

async fn create_invoice_payment(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;

    let engine = billing_engine(&state)?;
    let amount = payload.amount.to_decimal()?;
    let invoice = record_payment(&engine, &path.invoice_id, amount, payload.paid_on()?).await?;

    serde_json::to_value(invoice)
        .map(Json)
        .map_err(|error| AppError::Internal(error.to_string()))
}

fn require_internal_key(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let provided = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    validate_internal_api_key(
        state.config.is_production(),
        state.config.internal_api_key.as_deref(),
        provided,
    )
}

fn validate_internal_api_key(
    is_production: bool,
    expected_key: Option<&str>,
    provided_key: &str,
) -> AppResult<()> {
    let expected = expected_key.map(str::trim).unwrap_or_default();

    if is_production && expected.is_empty() {
        return Err(AppError::Dependency(
            "INTERNAL_API_KEY must be set in production to run billing jobs.".to_string(),
        ));
    }

    if !expected.is_empty() && provided_key != expected {
        return Err(AppError::Unauthorized(
            "Invalid or missing API key.".to_string(),
        ));
    }

    Ok(())
}

fn billing_engine(state: &AppState) -> AppResult<Arc<BillingEngine>> {
    state.engine.clone().ok_or_else(|| {
        AppError::Dependency(
            "Database is not configured. Set DATABASE_URL to run billing jobs.".to_string(),
        )
    })
}

/// Keeps a manual run inside the HTTP request timeout.
fn request_control(state: &AppState) -> RunControl {
    let seconds = state
        .config
        .billing_run_timeout_seconds
        .min(state.config.request_timeout_seconds.saturating_sub(5))
        .max(1);
    RunControl::unbounded().with_timeout(Duration::from_secs(seconds))
}

/// An empty body means "all defaults".
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| AppError::BadRequest(format!("Invalid JSON body: {error}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        models::InvoiceStatus,
        services::billing_engine::testing::{date, harness, invoice, lease, Harness},
    };

    fn app(h: Harness) -> (Router, Arc<crate::repository::memory::MemoryStore>) {
        let store = h.store.clone();
        let state = AppState::for_tests(AppConfig::for_tests(), Arc::new(h.engine));
        (crate::routes::v1_router().with_state(state), store)
    }

    fn post_json(uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn production_without_key_is_rejected() {
        assert!(matches!(
            validate_internal_api_key(true, None, "anything"),
            Err(AppError::Dependency(_))
        ));
        assert!(validate_internal_api_key(false, None, "").is_ok());
        assert!(matches!(
            validate_internal_api_key(false, Some("secret"), "wrong"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthorized() {
        let (app, _) = app(harness(date(2024, 1, 15)));
        let response = app
            .oneshot(post_json("/billing/jobs/update-overdue-invoices", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (app, _) = app(harness(date(2024, 1, 15)));
        let response = app
            .oneshot(post_json("/billing/jobs/purge", Some("test-key"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn runs_job_for_requested_date() {
        let h = harness(date(2024, 1, 1));
        h.store
            .insert_invoice(invoice("I1", None, date(2024, 1, 10), InvoiceStatus::Pending));
        let (app, store) = app(h);

        let response = app
            .oneshot(post_json(
                "/billing/jobs/update-overdue-invoices",
                Some("test-key"),
                r#"{"as_of_date":"2024-01-15"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["as_of_date"], "2024-01-15");
        assert_eq!(body["summary"]["updated"], 1);
        assert_eq!(store.invoice("I1").unwrap().status, InvoiceStatus::Overdue);
    }

    #[tokio::test]
    async fn empty_body_defaults_to_today() {
        let h = harness(date(2024, 1, 1));
        h.store
            .insert_lease(lease("L1", date(2024, 1, 1), date(2025, 1, 1)));
        let (app, store) = app(h);

        let response = app
            .oneshot(post_json(
                "/billing/jobs/generate-recurring-invoices",
                Some("test-key"),
                "",
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["as_of_date"], "2024-01-01");
        assert_eq!(body["summary"]["created"], 1);
        assert_eq!(store.invoices_for_lease("L1").len(), 1);
    }

    #[tokio::test]
    async fn daily_run_lists_every_job() {
        let (app, _) = app(harness(date(2024, 1, 1)));
        let response = app
            .oneshot(post_json("/billing/run-daily", Some("test-key"), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let jobs = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|outcome| outcome["job"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            jobs,
            vec![
                "generate-recurring-invoices",
                "update-overdue-invoices",
                "update-expired-leases",
                "send-reminders"
            ]
        );
    }

    #[tokio::test]
    async fn records_payment_through_the_api() {
        let h = harness(date(2024, 2, 1));
        h.store
            .insert_invoice(invoice("I1", None, date(2024, 1, 10), InvoiceStatus::Overdue));
        let (app, store) = app(h);

        let response = app
            .oneshot(post_json(
                "/invoices/I1/payments",
                Some("test-key"),
                r#"{"amount":"1000.00"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "paid");
        assert_eq!(store.invoice("I1").unwrap().status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn overpayment_is_unprocessable() {
        let h = harness(date(2024, 2, 1));
        h.store
            .insert_invoice(invoice("I1", None, date(2024, 1, 10), InvoiceStatus::Pending));
        let (app, _) = app(h);

        let response = app
            .oneshot(post_json("/invoices/I1/payments", Some("test-key"), r#"{"amount":5000}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("exceeds"));
    }
}
