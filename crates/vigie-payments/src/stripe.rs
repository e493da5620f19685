//! Stripe payment-intent adapter.
//!
//! Talks to the Stripe API with form-encoded requests and bearer
//! authentication. The subscription reference rides along in the intent's
//! metadata so a retrieved intent can always be traced back to the
//! subscription it pays for.

use crate::{IntentHandle, IntentStatus, PaymentError, PaymentGateway};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use vigie_types::Plan;

/// Default Stripe API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

/// Per-request timeout for gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the Stripe adapter.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// API base URL; overridable for tests.
    pub base_url: String,
}

/// Stripe-backed payment gateway.
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Gateway(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn parse_intent(response: reqwest::Response) -> Result<IntentResponse, PaymentError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Gateway(format!("{status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| PaymentError::Gateway(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        plan: Plan,
        reference: &str,
    ) -> Result<IntentHandle, PaymentError> {
        let url = format!("{}/payment_intents", self.config.base_url);
        let amount = plan.amount_cents().to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", plan.currency()),
            ("description", plan.display_name()),
            ("metadata[reference]", reference),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(e.to_string()))?;

        let intent = Self::parse_intent(response).await?;
        tracing::info!(intent_id = %intent.id, %reference, "payment intent created");

        Ok(IntentHandle {
            intent_id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus, PaymentError> {
        let url = format!("{}/payment_intents/{intent_id}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(e.to_string()))?;

        let intent = Self::parse_intent(response).await?;
        Ok(IntentStatus {
            intent_id: intent.id,
            succeeded: intent.status == "succeeded",
            reference: intent.metadata.get("reference").cloned(),
        })
    }
}
