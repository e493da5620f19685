//! Brevo transactional SMS / email adapter.
//!
//! Speaks the Brevo v3 HTTP API: `POST /transactionalSMS/sms` for SMS and
//! `POST /smtp/email` for email. Every request carries a bounded timeout so
//! a stuck provider call fails that one dispatch instead of wedging the
//! broadcast.

use crate::channel::{mask_address, DispatchReceipt, NotificationChannel, NotifyError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use vigie_types::message::RenderedMessage;
use vigie_types::ChannelKind;

/// Default Brevo API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.brevo.com/v3";

/// Per-request timeout for provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the Brevo adapter.
#[derive(Debug, Clone)]
pub struct BrevoConfig {
    pub api_key: String,
    /// Alphanumeric SMS sender name.
    pub sms_sender: String,
    pub email_sender_name: String,
    pub email_sender_address: String,
    /// API base URL; overridable for tests.
    pub base_url: String,
}

/// Brevo-backed notification channel.
pub struct BrevoChannel {
    config: BrevoConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmsResponse {
    #[serde(default)]
    message_id: Option<serde_json::Value>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailResponse {
    #[serde(default)]
    message_id: Option<String>,
}

impl BrevoChannel {
    pub fn new(config: BrevoConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn send_sms(
        &self,
        address: &str,
        message: &RenderedMessage,
    ) -> Result<DispatchReceipt, NotifyError> {
        let url = format!("{}/transactionalSMS/sms", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.config.api_key)
            .json(&json!({
                "sender": self.config.sms_sender,
                "recipient": address,
                "content": message.body,
                "type": "transactional",
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Provider(format!("{status}: {body}")));
        }

        let parsed: SmsResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let message_id = parsed
            .message_id
            .map(|v| v.to_string().trim_matches('"').to_string())
            .or(parsed.reference)
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!(address = %mask_address(address), %message_id, "sms dispatched");
        Ok(DispatchReceipt { message_id })
    }

    async fn send_email(
        &self,
        address: &str,
        message: &RenderedMessage,
    ) -> Result<DispatchReceipt, NotifyError> {
        let url = format!("{}/smtp/email", self.config.base_url);
        let subject = message.subject.as_deref().unwrap_or("Weather alert");
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.config.api_key)
            .json(&json!({
                "sender": {
                    "name": self.config.email_sender_name,
                    "email": self.config.email_sender_address,
                },
                "to": [{ "email": address }],
                "subject": subject,
                "htmlContent": message.body,
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Provider(format!("{status}: {body}")));
        }

        let parsed: EmailResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let message_id = parsed.message_id.unwrap_or_else(|| "unknown".to_string());

        tracing::info!(address = %mask_address(address), %message_id, "email dispatched");
        Ok(DispatchReceipt { message_id })
    }
}

#[async_trait]
impl NotificationChannel for BrevoChannel {
    async fn send(
        &self,
        kind: ChannelKind,
        address: &str,
        message: &RenderedMessage,
    ) -> Result<DispatchReceipt, NotifyError> {
        match kind {
            ChannelKind::Sms => self.send_sms(address, message).await,
            ChannelKind::Email => self.send_email(address, message).await,
        }
    }
}
