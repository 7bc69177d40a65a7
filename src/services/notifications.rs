use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::{
    config::AppConfig,
    repository::table_service::{get_row, val_str},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    RentDueSoon,
    RentOverdue,
    RentOverduePartial,
}

impl NotificationTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RentDueSoon => "rent_due_soon",
            Self::RentOverdue => "rent_overdue",
            Self::RentOverduePartial => "rent_overdue_partial",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            Self::RentDueSoon => "Your rent is due soon",
            Self::RentOverdue => "Your rent payment is overdue",
            Self::RentOverduePartial => "Your rent balance is overdue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub tenant_id: String,
    pub lease_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub channel: &'static str,
    pub provider_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no contact details for tenant {0}")]
    MissingContact(String),
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Delivers tenant notifications. The engine decides whether and what to
/// send; implementations decide how.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipient: &Recipient,
        payload: &Map<String, Value>,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone, Default)]
struct TenantContact {
    full_name: String,
    email: String,
    phone: String,
    preferred: Option<Channel>,
}

impl TenantContact {
    fn channel(&self) -> Option<Channel> {
        match self.preferred {
            Some(Channel::Sms) if !self.phone.is_empty() => Some(Channel::Sms),
            _ if !self.email.is_empty() => Some(Channel::Email),
            _ if !self.phone.is_empty() => Some(Channel::Sms),
            _ => None,
        }
    }
}

/// Sends email through Resend and SMS through Twilio, looking tenant
/// contact details up in the `tenants` table.
pub struct HttpNotifier {
    pool: PgPool,
    http_client: Client,
    config: std::sync::Arc<AppConfig>,
}

impl HttpNotifier {
    pub fn new(pool: PgPool, http_client: Client, config: std::sync::Arc<AppConfig>) -> Self {
        Self {
            pool,
            http_client,
            config,
        }
    }

    async fn load_contact(&self, tenant_id: &str) -> Result<TenantContact, NotifyError> {
        let row = get_row(&self.pool, "tenants", tenant_id)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .ok_or_else(|| NotifyError::MissingContact(tenant_id.to_string()))?;

        Ok(TenantContact {
            full_name: val_str(&row, "full_name"),
            email: val_str(&row, "email"),
            phone: val_str(&row, "phone_e164"),
            preferred: match val_str(&row, "preferred_channel").as_str() {
                "sms" => Some(Channel::Sms),
                "email" => Some(Channel::Email),
                _ => None,
            },
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<Option<String>, NotifyError> {
        let api_key = self
            .config
            .resend_api_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::NotConfigured("RESEND_API_KEY"))?;

        let payload = json!({
            "from": self.config.email_from_address,
            "to": [to],
            "subject": subject,
            "html": format!("<div style=\"font-family: sans-serif; max-width: 600px; margin: 0 auto;\">{}</div>", body.replace('\n', "<br>")),
        });

        let response = self
            .http_client
            .post("https://api.resend.com/emails")
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Resend API request failed");
                NotifyError::Transport("Resend API request failed.".to_string())
            })?;

        read_provider_response(response, "message").await
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<Option<String>, NotifyError> {
        let account_sid = self
            .config
            .twilio_account_sid
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::NotConfigured("TWILIO_ACCOUNT_SID"))?;
        let auth_token = self
            .config
            .twilio_auth_token
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::NotConfigured("TWILIO_AUTH_TOKEN"))?;
        let from_number = self
            .config
            .twilio_phone_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::NotConfigured("TWILIO_PHONE_NUMBER"))?;

        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json");
        let response = self
            .http_client
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[("To", to), ("From", from_number), ("Body", body)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Twilio API request failed");
                NotifyError::Transport("Twilio API request failed.".to_string())
            })?;

        read_provider_response(response, "message").await
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipient: &Recipient,
        payload: &Map<String, Value>,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let contact = self.load_contact(&recipient.tenant_id).await?;
        tracing::debug!(
            tenant_id = %recipient.tenant_id,
            lease_id = recipient.lease_id.as_deref().unwrap_or_default(),
            template = template.as_str(),
            "Delivering tenant notification"
        );
        let body = render_body(template, &contact.full_name, payload, &self.config.app_public_url);

        match contact.channel() {
            Some(Channel::Email) => {
                let provider_id = self.send_email(&contact.email, template.subject(), &body).await?;
                Ok(DeliveryReceipt {
                    channel: "email",
                    provider_id,
                })
            }
            Some(Channel::Sms) => {
                let provider_id = self.send_sms(&contact.phone, &body).await?;
                Ok(DeliveryReceipt {
                    channel: "sms",
                    provider_id,
                })
            }
            None => Err(NotifyError::MissingContact(recipient.tenant_id.clone())),
        }
    }
}

async fn read_provider_response(
    response: reqwest::Response,
    error_key: &str,
) -> Result<Option<String>, NotifyError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        let provider_id = body
            .get("id")
            .or_else(|| body.get("sid"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        return Ok(provider_id);
    }

    let message = body
        .get(error_key)
        .and_then(Value::as_str)
        .unwrap_or("Unknown provider error")
        .to_string();
    Err(NotifyError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn render_body(
    template: NotificationTemplate,
    tenant_name: &str,
    payload: &Map<String, Value>,
    app_public_url: &str,
) -> String {
    let field = |key: &str| {
        payload
            .get(key)
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    let greeting = if tenant_name.is_empty() {
        "Hello".to_string()
    } else {
        format!("Hello {tenant_name}")
    };
    let description = field("description");
    let due_date = field("due_date");

    match template {
        NotificationTemplate::RentDueSoon => format!(
            "{greeting},\n\n\
             This is a reminder that {description} ({amount}) is due on {due_date}.\n\n\
             You can review and pay at {app_public_url}/tenant/payments\n\n\
             Thank you for paying on time.",
            amount = field("amount"),
        ),
        NotificationTemplate::RentOverdue => format!(
            "{greeting},\n\n\
             {description} ({amount}) was due on {due_date} and is now {days} day(s) overdue.\n\n\
             Please settle it as soon as possible at {app_public_url}/tenant/payments\n\n\
             If you have already paid, please send your receipt.",
            amount = field("outstanding"),
            days = field("days_overdue"),
        ),
        NotificationTemplate::RentOverduePartial => format!(
            "{greeting},\n\n\
             Thank you for your partial payment of {paid} towards {description}.\n\
             A balance of {outstanding} remains {days} day(s) past the due date ({due_date}).\n\n\
             Please settle the balance at {app_public_url}/tenant/payments",
            paid = field("amount_paid"),
            outstanding = field("outstanding"),
            days = field("days_overdue"),
        ),
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct SentNotification {
        pub template: NotificationTemplate,
        pub recipient: Recipient,
        pub payload: Map<String, Value>,
    }

    /// Records every send; tenants listed in `failing` get a provider error.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<SentNotification>>,
        failing: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn fail_for_tenant(&self, tenant_id: &str) {
            self.failing.lock().unwrap().push(tenant_id.to_string());
        }

        pub fn recover_tenant(&self, tenant_id: &str) {
            self.failing.lock().unwrap().retain(|id| id != tenant_id);
        }

        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            template: NotificationTemplate,
            recipient: &Recipient,
            payload: &Map<String, Value>,
        ) -> Result<DeliveryReceipt, NotifyError> {
            if self.failing.lock().unwrap().contains(&recipient.tenant_id) {
                return Err(NotifyError::Rejected {
                    status: 503,
                    message: "provider unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(SentNotification {
                template,
                recipient: recipient.clone(),
                payload: payload.clone(),
            });
            Ok(DeliveryReceipt {
                channel: "test",
                provider_id: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_sms_only_when_phone_present() {
        let contact = TenantContact {
            email: "ana@example.com".to_string(),
            preferred: Some(Channel::Sms),
            ..TenantContact::default()
        };
        assert_eq!(contact.channel(), Some(Channel::Email));

        let contact = TenantContact {
            phone: "+595981000000".to_string(),
            ..TenantContact::default()
        };
        assert_eq!(contact.channel(), Some(Channel::Sms));
        assert_eq!(TenantContact::default().channel(), None);
    }

    #[test]
    fn renders_overdue_body_with_balance() {
        let mut payload = Map::new();
        payload.insert("description".to_string(), json!("Rent for January 2024"));
        payload.insert("due_date".to_string(), json!("2024-01-01"));
        payload.insert("outstanding".to_string(), json!("400.00"));
        payload.insert("amount_paid".to_string(), json!("600.00"));
        payload.insert("days_overdue".to_string(), json!(5));

        let body = render_body(
            NotificationTemplate::RentOverduePartial,
            "Ana",
            &payload,
            "https://app.example.com",
        );
        assert!(body.starts_with("Hello Ana"));
        assert!(body.contains("A balance of 400.00 remains 5 day(s)"));
        assert!(body.contains("https://app.example.com/tenant/payments"));
    }
}
