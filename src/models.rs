use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Biannually,
    Annually,
}

impl BillingCycle {
    pub fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Biannually => 6,
            Self::Annually => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Biannually => "biannually",
            Self::Annually => "annually",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "biannually" | "semiannually" => Some(Self::Biannually),
            "annually" | "yearly" => Some(Self::Annually),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Draft,
    Pending,
    Active,
    Terminated,
    Expired,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Terminated => "terminated",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "terminated" => Some(Self::Terminated),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Renewal creates a new lease, so expired and terminated never move again.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Draft => matches!(next, Self::Pending),
            Self::Pending => matches!(next, Self::Active),
            Self::Active => matches!(next, Self::Expired | Self::Terminated),
            Self::Terminated | Self::Expired => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Rent,
    ServiceCharge,
    LegalFee,
    AgencyFee,
    CautionFee,
    Maintenance,
    Penalty,
}

impl InvoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rent => "rent",
            Self::ServiceCharge => "service_charge",
            Self::LegalFee => "legal_fee",
            Self::AgencyFee => "agency_fee",
            Self::CautionFee => "caution_fee",
            Self::Maintenance => "maintenance",
            Self::Penalty => "penalty",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rent" => Some(Self::Rent),
            "service_charge" => Some(Self::ServiceCharge),
            "legal_fee" => Some(Self::LegalFee),
            "agency_fee" => Some(Self::AgencyFee),
            "caution_fee" => Some(Self::CautionFee),
            "maintenance" => Some(Self::Maintenance),
            "penalty" => Some(Self::Penalty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Partial,
    Overdue,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Overdue => "overdue",
            Self::Void => "void",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "partial" => Some(Self::Partial),
            "overdue" => Some(Self::Overdue),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    /// Partial invoices past their due date are surfaced as overdue so
    /// collections can act on them.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Draft => matches!(next, Self::Pending),
            Self::Pending => matches!(
                next,
                Self::Paid | Self::Partial | Self::Overdue | Self::Void
            ),
            Self::Overdue => matches!(next, Self::Paid | Self::Partial),
            Self::Partial => matches!(next, Self::Paid | Self::Partial | Self::Overdue),
            Self::Paid | Self::Void => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Void)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DueSoon,
    Overdue,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "due_soon" => Some(Self::DueSoon),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lease {
    pub id: String,
    pub tenant_id: String,
    pub unit_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub billing_cycle: BillingCycle,
    pub rent_amount: Decimal,
    pub status: LeaseStatus,
    pub management_fee_percent: Option<Decimal>,
}

impl Lease {
    /// Rejects leases the generator cannot bill safely.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_date <= self.start_date {
            return Err(format!(
                "end_date {} must be after start_date {}",
                self.end_date, self.start_date
            ));
        }
        if self.rent_amount <= Decimal::ZERO {
            return Err(format!("rent_amount {} must be positive", self.rent_amount));
        }
        if let Some(percent) = self.management_fee_percent {
            if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
                return Err(format!(
                    "management_fee_percent {percent} must be between 0 and 100"
                ));
            }
        }
        Ok(())
    }
}

/// Reminder bookkeeping stored on the invoice row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReminderState {
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_date: Option<NaiveDate>,
    pub last_reminder_kind: Option<ReminderKind>,
    pub reminder_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub lease_id: Option<String>,
    pub tenant_id: String,
    pub invoice_type: InvoiceType,
    pub description: String,
    pub amount: Decimal,
    pub amount_paid: Decimal,
    pub last_payment_date: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub owner_amount: Option<Decimal>,
    pub management_fee: Option<Decimal>,
    #[serde(flatten)]
    pub reminder: ReminderState,
}

impl Invoice {
    pub fn outstanding(&self) -> Decimal {
        (self.amount - self.amount_paid).max(Decimal::ZERO)
    }

    pub fn is_partially_paid(&self) -> bool {
        self.amount_paid > Decimal::ZERO && self.amount_paid < self.amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInvoice {
    pub lease_id: Option<String>,
    pub tenant_id: String,
    pub invoice_type: InvoiceType,
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub owner_amount: Option<Decimal>,
    pub management_fee: Option<Decimal>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub amount_paid: Option<Decimal>,
    pub last_payment_date: Option<NaiveDate>,
    pub reminder: Option<ReminderState>,
}

impl InvoicePatch {
    pub fn status(status: InvoiceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A stored row that could not be decoded into a domain record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub id: String,
    pub reason: String,
}

pub type Decoded<T> = Result<T, RecordError>;

/// Per-item failure reported in batch summaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub id: String,
    pub reason: String,
}

impl ItemError {
    pub fn new(id: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<RecordError> for ItemError {
    fn from(value: RecordError) -> Self {
        Self {
            id: value.id,
            reason: value.reason,
        }
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Splits an invoice amount into (owner_amount, management_fee).
pub fn split_management_fee(amount: Decimal, fee_percent: Decimal) -> (Decimal, Decimal) {
    let fee = round_money(amount * fee_percent / Decimal::ONE_HUNDRED);
    (amount - fee, fee)
}

pub fn parse_decimal(raw: &str) -> Result<Decimal, AppError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid decimal amount.")))
}
