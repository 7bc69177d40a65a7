use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::{error::AppError, models::parse_decimal};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("{field} must be a YYYY-MM-DD date.")))
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RunJobInput {
    #[validate(length(equal = 10))]
    pub as_of_date: Option<String>,
}

impl RunJobInput {
    pub fn as_of(&self) -> Result<Option<NaiveDate>, AppError> {
        self.as_of_date
            .as_deref()
            .map(|raw| parse_date(raw, "as_of_date"))
            .transpose()
    }
}

/// Amounts arrive either as JSON numbers or decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    pub fn to_decimal(&self) -> Result<Decimal, AppError> {
        match self {
            Self::Text(raw) => parse_decimal(raw),
            Self::Number(number) => parse_decimal(&number.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub amount: AmountInput,
    #[validate(length(equal = 10))]
    pub paid_on: Option<String>,
}

impl RecordPaymentInput {
    pub fn paid_on(&self) -> Result<Option<NaiveDate>, AppError> {
        self.paid_on
            .as_deref()
            .map(|raw| parse_date(raw, "paid_on"))
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobPath {
    pub job: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePath {
    pub invoice_id: String,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_numeric_and_string_amounts() {
        let numeric: RecordPaymentInput =
            serde_json::from_value(json!({ "amount": 125.5 })).unwrap();
        assert_eq!(numeric.amount.to_decimal().unwrap(), Decimal::from_str("125.5").unwrap());

        let text: RecordPaymentInput =
            serde_json::from_value(json!({ "amount": "99.99", "paid_on": "2024-02-01" })).unwrap();
        assert_eq!(text.amount.to_decimal().unwrap(), Decimal::from_str("99.99").unwrap());
        assert_eq!(
            text.paid_on().unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        let input = RunJobInput {
            as_of_date: Some("2024-1-5".to_string()),
        };
        assert!(validate_input(&input).is_err());

        let input = RunJobInput {
            as_of_date: Some("2024-13-01".to_string()),
        };
        assert!(validate_input(&input).is_ok());
        assert!(matches!(input.as_of(), Err(AppError::BadRequest(_))));
    }
}
