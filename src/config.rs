use std::env;

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub internal_api_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from_address: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub app_public_url: String,
    pub scheduler_enabled: bool,
    pub scheduler_tick_seconds: u64,
    pub scheduler_timezone: Tz,
    pub scheduler_daily_hour: u32,
    pub billing_run_timeout_seconds: u64,
    pub billing_batch_size: i64,
    pub reminder_lookahead_days: i64,
    pub overdue_reminder_interval_days: i64,
    /// Zero disables the cap.
    pub overdue_reminder_max: u32,
    pub remind_partial_overdue: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Casaora Billing Engine"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 300),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL").or_else(|| env_opt("SUPABASE_DB_URL")),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            resend_api_key: env_opt("RESEND_API_KEY"),
            email_from_address: env_or("EMAIL_FROM_ADDRESS", "noreply@casaora.co"),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: env_opt("TWILIO_PHONE_NUMBER"),
            app_public_url: env_or("APP_PUBLIC_URL", "http://localhost:3000"),
            scheduler_enabled: env_parse_bool_or("SCHEDULER_ENABLED", true),
            scheduler_tick_seconds: env_parse_or("SCHEDULER_TICK_SECONDS", 60),
            scheduler_timezone: parse_timezone(env_opt("SCHEDULER_TIMEZONE").as_deref()),
            scheduler_daily_hour: env_parse_or("SCHEDULER_DAILY_HOUR", 5_u32).min(23),
            billing_run_timeout_seconds: env_parse_or("BILLING_RUN_TIMEOUT_SECONDS", 900),
            billing_batch_size: env_parse_or("BILLING_BATCH_SIZE", 200),
            reminder_lookahead_days: env_parse_or("REMINDER_LOOKAHEAD_DAYS", 3),
            overdue_reminder_interval_days: env_parse_or("OVERDUE_REMINDER_INTERVAL_DAYS", 7),
            overdue_reminder_max: env_parse_or("OVERDUE_REMINDER_MAX", 0),
            remind_partial_overdue: env_parse_bool_or("REMIND_PARTIAL_OVERDUE", true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Production refuses to serve admin routes without an API key.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_production() && self.internal_api_key.is_none() {
            return Err("INTERNAL_API_KEY is required when ENVIRONMENT=production".to_string());
        }
        if self.database_url.is_none() && self.is_production() {
            return Err("DATABASE_URL is required when ENVIRONMENT=production".to_string());
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            app_name: "Casaora Billing Engine".to_string(),
            environment: "test".to_string(),
            api_prefix: "/v1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_seconds: 30,
            rate_limit_enabled: false,
            rate_limit_per_second: 10,
            rate_limit_burst_size: 100,
            database_url: None,
            db_pool_max_connections: 1,
            db_pool_min_connections: 0,
            db_pool_acquire_timeout_seconds: 1,
            db_pool_idle_timeout_seconds: 60,
            internal_api_key: Some("test-key".to_string()),
            resend_api_key: None,
            email_from_address: "noreply@casaora.co".to_string(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_phone_number: None,
            app_public_url: "http://localhost:3000".to_string(),
            scheduler_enabled: false,
            scheduler_tick_seconds: 60,
            scheduler_timezone: Tz::UTC,
            scheduler_daily_hour: 5,
            billing_run_timeout_seconds: 900,
            billing_batch_size: 200,
            reminder_lookahead_days: 3,
            overdue_reminder_interval_days: 7,
            overdue_reminder_max: 0,
            remind_partial_overdue: true,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_timezone(raw: Option<&str>) -> Tz {
    match raw {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = name, "Unknown SCHEDULER_TIMEZONE, falling back to UTC");
            Tz::UTC
        }),
        None => Tz::UTC,
    }
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}
