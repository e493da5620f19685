//! Notification channel abstraction.
//!
//! The broadcaster dispatches through a `NotificationChannel` trait object,
//! so the provider adapter (Brevo over HTTP, demo mode, scripted test
//! doubles) is swappable without touching broadcast logic. Retry policy, if
//! any, belongs to the adapter — the broadcaster never retries.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use vigie_types::message::RenderedMessage;
use vigie_types::ChannelKind;

/// Errors from a dispatch attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The provider rejected the message.
    #[error("provider rejected message: {0}")]
    Provider(String),
    /// The request never completed (network error or timeout).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Provider receipt for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Provider-assigned message ID.
    pub message_id: String,
}

/// An outbound notification transport.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Dispatches one rendered message to one address.
    async fn send(
        &self,
        kind: ChannelKind,
        address: &str,
        message: &RenderedMessage,
    ) -> Result<DispatchReceipt, NotifyError>;
}

/// Demo-mode channel used when no provider credentials are configured.
///
/// Logs the would-be dispatch and fabricates a receipt, so the rest of the
/// pipeline (records, dedup, summaries) behaves exactly as in production.
#[derive(Debug, Default)]
pub struct DemoChannel {
    counter: AtomicU64,
}

impl DemoChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationChannel for DemoChannel {
    async fn send(
        &self,
        kind: ChannelKind,
        address: &str,
        message: &RenderedMessage,
    ) -> Result<DispatchReceipt, NotifyError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            kind = kind.as_str(),
            address = %mask_address(address),
            preview = %message.body.chars().take(48).collect::<String>(),
            "demo mode: message not actually sent"
        );
        Ok(DispatchReceipt {
            message_id: format!("demo-{n}"),
        })
    }
}

/// Masks a contact address for logging (first 4 characters kept).
pub fn mask_address(address: &str) -> String {
    let keep = address.chars().take(4).collect::<String>();
    format!("{keep}***")
}
