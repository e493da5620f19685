//! Payment gating for subscription activation.
//!
//! A subscription is created in `pending_payment` and becomes active only
//! through a confirmed payment. This crate owns that gate: it creates
//! payment intents with the gateway (never touching subscription state) and
//! turns verified confirmations into activations. Activation idempotency
//! lives in the store, so replayed webhooks and double confirms are safe
//! no-ops here.

pub mod stripe;
pub mod webhook;

pub use stripe::{StripeConfig, StripeGateway};
pub use webhook::{signature_header, verify_signature, SignatureError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use vigie_db::DbPool;
use vigie_store::{StoreError, Subscription, SubscriptionStatus};
use vigie_types::{ChannelKind, Plan};

/// Errors from payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The gateway call failed or returned an unusable response.
    #[error("payment gateway error: {0}")]
    Gateway(String),
    /// The payment exists but has not completed yet.
    #[error("payment not completed: {0}")]
    Incomplete(String),
    #[error(transparent)]
    Webhook(#[from] SignatureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A freshly created payment intent, handed to the client for checkout.
#[derive(Debug, Clone, Serialize)]
pub struct IntentHandle {
    pub intent_id: String,
    pub client_secret: String,
}

/// The state of an intent as reported by the gateway.
#[derive(Debug, Clone)]
pub struct IntentStatus {
    pub intent_id: String,
    pub succeeded: bool,
    /// Subscription reference carried in the intent metadata.
    pub reference: Option<String>,
}

/// A payment provider capable of creating and reporting on intents.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an intent for a plan, tagging it with the subscription
    /// reference.
    async fn create_intent(
        &self,
        plan: Plan,
        reference: &str,
    ) -> Result<IntentHandle, PaymentError>;

    /// Fetches the current state of an intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus, PaymentError>;
}

/// A verified payment confirmation, from the webhook or a confirm call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    /// Gateway-side identifier of the completed payment.
    pub payment_reference: String,
    /// Subscription the payment is for.
    pub reference: String,
    pub plan: Plan,
}

/// The plan a subscription's channel is billed under.
pub fn plan_for_channel(channel: ChannelKind) -> Plan {
    match channel {
        ChannelKind::Sms => Plan::SmsMonthly,
        ChannelKind::Email => Plan::EmailYearly,
    }
}

/// Mediates between the subscription store and the payment gateway.
#[derive(Clone)]
pub struct PaymentGate {
    pool: DbPool,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentGate {
    pub fn new(pool: DbPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { pool, gateway }
    }

    /// Creates a checkout intent for a pending subscription.
    ///
    /// Subscription state is read but never written here; only a confirmed
    /// payment activates. Calling twice simply issues a second intent.
    pub async fn create_intent(
        &self,
        reference: &str,
    ) -> Result<(IntentHandle, Plan), PaymentError> {
        let subscription = self.fetch(reference).await?;

        match subscription.status {
            SubscriptionStatus::PendingPayment => {}
            SubscriptionStatus::Active => {
                return Err(PaymentError::Store(StoreError::InvalidState(format!(
                    "subscription {reference} is already active"
                ))));
            }
            SubscriptionStatus::Unsubscribed => {
                return Err(PaymentError::Store(StoreError::InvalidState(format!(
                    "subscription {reference} is unsubscribed"
                ))));
            }
        }

        let plan = plan_for_channel(subscription.channel);
        let handle = self.gateway.create_intent(plan, reference).await?;
        Ok((handle, plan))
    }

    /// Applies a verified confirmation, activating the subscription.
    ///
    /// Replays of the same `payment_reference` return the already-active
    /// subscription unchanged; the store enforces that.
    pub async fn handle_confirmation(
        &self,
        event: ConfirmationEvent,
    ) -> Result<Subscription, PaymentError> {
        let pool = self.pool.clone();
        let subscription = tokio::task::spawn_blocking(move || -> Result<_, PaymentError> {
            let conn = pool.get()?;
            Ok(vigie_store::activate(
                &conn,
                &event.reference,
                &event.payment_reference,
                event.plan,
                Utc::now(),
            )?)
        })
        .await??;

        tracing::info!(
            reference = %subscription.reference,
            "subscription activated by payment confirmation"
        );
        Ok(subscription)
    }

    /// Client-driven confirmation: checks the intent with the gateway and
    /// activates if the payment went through.
    pub async fn confirm_intent(&self, intent_id: &str) -> Result<Subscription, PaymentError> {
        let status = self.gateway.retrieve_intent(intent_id).await?;

        if !status.succeeded {
            return Err(PaymentError::Incomplete(format!(
                "intent {intent_id} has not succeeded"
            )));
        }

        let reference = status.reference.ok_or_else(|| {
            PaymentError::Gateway(format!(
                "intent {intent_id} carries no subscription reference"
            ))
        })?;

        let subscription = self.fetch(&reference).await?;
        self.handle_confirmation(ConfirmationEvent {
            payment_reference: status.intent_id,
            reference,
            plan: plan_for_channel(subscription.channel),
        })
        .await
    }

    async fn fetch(&self, reference: &str) -> Result<Subscription, PaymentError> {
        let pool = self.pool.clone();
        let reference = reference.to_string();
        let subscription = tokio::task::spawn_blocking(move || -> Result<_, PaymentError> {
            let conn = pool.get()?;
            Ok(vigie_store::get(&conn, &reference)?)
        })
        .await??;
        Ok(subscription)
    }
}
