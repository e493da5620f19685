//! Alert broadcaster.
//!
//! Turns qualifying vigilance transitions into per-subscriber
//! notifications: selects active subscribers, renders a profile-specific
//! message per channel kind, dispatches with bounded concurrency, and
//! appends a delivery record per attempt.
//!
//! Partial failure is the normal case, not exceptional: one subscriber's
//! provider error is recorded as `failed` and never aborts the rest of the
//! broadcast. Re-processing the same transition after a restart is safe:
//! the delivery log is checked before dispatch and an already-sent
//! `(reference, phenomenon, severity, epoch)` tuple is skipped. The epoch
//! comes from the vigilance tracker and advances on de-escalation, so a
//! repeat storm alerts everyone again.

pub mod brevo;
pub mod channel;

pub use brevo::{BrevoChannel, BrevoConfig};
pub use channel::{DemoChannel, DispatchReceipt, NotificationChannel, NotifyError};

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vigie_db::DbPool;
use vigie_store::{
    DeliveryOutcome, NewDelivery, StoreError, Subscription, SubscriptionStatus,
};
use vigie_types::message::{render_for_channel, RenderedMessage};
use vigie_types::{Phenomenon, Severity};
use vigie_watch::Transition;

/// Maximum number of in-flight dispatches during fan-out.
const FANOUT_LIMIT: usize = 8;

/// Errors from broadcast operations.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Aggregate outcome of one broadcast invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BroadcastSummary {
    fn add(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Sent => self.sent += 1,
            DeliveryOutcome::Failed => self.failed += 1,
            DeliveryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Broadcasts alerts for qualifying transitions to active subscribers.
#[derive(Clone)]
pub struct Broadcaster {
    pool: DbPool,
    channel: Arc<dyn NotificationChannel>,
}

impl Broadcaster {
    pub fn new(pool: DbPool, channel: Arc<dyn NotificationChannel>) -> Self {
        Self { pool, channel }
    }

    /// Broadcasts one message per active subscriber for every transition.
    ///
    /// Dispatches fan out concurrently up to [`FANOUT_LIMIT`]; ordering
    /// between subscribers is not guaranteed. Individual failures are
    /// recorded and counted, never propagated.
    pub async fn broadcast(
        &self,
        transitions: &[Transition],
    ) -> Result<BroadcastSummary, BroadcastError> {
        let mut summary = BroadcastSummary::default();

        for &transition in transitions {
            let subscribers = {
                let pool = self.pool.clone();
                tokio::task::spawn_blocking(move || -> Result<_, BroadcastError> {
                    let conn = pool.get()?;
                    Ok(vigie_store::list_active(&conn, None)?)
                })
                .await??
            };

            if subscribers.is_empty() {
                tracing::info!(
                    phenomenon = transition.phenomenon.as_str(),
                    "no active subscribers to alert"
                );
                continue;
            }

            tracing::info!(
                phenomenon = transition.phenomenon.as_str(),
                to = transition.to.name(),
                count = subscribers.len(),
                "broadcasting alert"
            );

            let semaphore = Arc::new(Semaphore::new(FANOUT_LIMIT));
            let mut tasks: JoinSet<DeliveryOutcome> = JoinSet::new();

            for subscription in subscribers {
                let permit = semaphore.clone().acquire_owned().await.expect(
                    "semaphore is never closed while broadcasting",
                );
                let pool = self.pool.clone();
                let channel = self.channel.clone();

                tasks.spawn(async move {
                    let _permit = permit;
                    notify_subscriber(pool, channel, &subscription, transition).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                summary.add(joined?);
            }
        }

        tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "broadcast complete"
        );
        Ok(summary)
    }

    /// Sends a manual test alert to one subscriber.
    ///
    /// Bypasses transition detection and deduplication but reuses the
    /// render / dispatch / record path, so a test send exercises exactly
    /// what a real alert would.
    pub async fn send_test_alert(&self, reference: &str) -> Result<DeliveryOutcome, BroadcastError> {
        let subscription = {
            let pool = self.pool.clone();
            let reference = reference.to_string();
            tokio::task::spawn_blocking(move || -> Result<_, BroadcastError> {
                let conn = pool.get()?;
                Ok(vigie_store::get(&conn, &reference)?)
            })
            .await??
        };

        if subscription.status != SubscriptionStatus::Active {
            return Err(BroadcastError::Store(StoreError::InvalidState(format!(
                "subscription {reference} is not active"
            ))));
        }

        let message = render_for_channel(
            subscription.channel,
            TEST_PHENOMENON,
            TEST_SEVERITY,
            subscription.profile,
        )
        .as_test();

        let outcome = dispatch_and_record(
            self.pool.clone(),
            self.channel.clone(),
            &subscription,
            TEST_PHENOMENON,
            TEST_SEVERITY,
            TEST_EPOCH,
            message,
        )
        .await?;
        Ok(outcome)
    }
}

/// Phenomenon and level used for manual test sends.
const TEST_PHENOMENON: Phenomenon = Phenomenon::Wind;
const TEST_SEVERITY: Severity = Severity::Yellow;
/// Test sends are stamped with a reserved epoch so their records never
/// collide with a live dedup tuple.
const TEST_EPOCH: i64 = -1;

/// Handles one subscriber within a broadcast: dedup check, render,
/// dispatch, record. Infallible by design — every internal error degrades
/// to a `failed` (or at worst unrecorded) outcome so siblings keep going.
async fn notify_subscriber(
    pool: DbPool,
    channel: Arc<dyn NotificationChannel>,
    subscription: &Subscription,
    transition: Transition,
) -> DeliveryOutcome {
    let dedup = {
        let pool = pool.clone();
        let reference = subscription.reference.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, BroadcastError> {
            let conn = pool.get()?;
            Ok(vigie_store::was_delivered(
                &conn,
                &reference,
                transition.phenomenon,
                transition.to,
                transition.epoch,
            )?)
        })
        .await
    };

    match dedup {
        Ok(Ok(true)) => {
            let record = NewDelivery {
                reference: &subscription.reference,
                phenomenon: transition.phenomenon,
                severity: transition.to,
                epoch: transition.epoch,
                outcome: DeliveryOutcome::Skipped,
                detail: Some("already sent for this level in this episode"),
                message: None,
            };
            if let Err(e) = append_record(&pool, &record, &subscription.reference, false).await {
                tracing::error!(reference = %subscription.reference, error = %e, "failed to record skip");
            }
            return DeliveryOutcome::Skipped;
        }
        Ok(Ok(false)) => {}
        Ok(Err(e)) => {
            tracing::error!(reference = %subscription.reference, error = %e, "dedup check failed");
            return DeliveryOutcome::Failed;
        }
        Err(e) => {
            tracing::error!(reference = %subscription.reference, error = %e, "dedup task join error");
            return DeliveryOutcome::Failed;
        }
    }

    let message = render_for_channel(
        subscription.channel,
        transition.phenomenon,
        transition.to,
        subscription.profile,
    );

    match dispatch_and_record(
        pool,
        channel,
        subscription,
        transition.phenomenon,
        transition.to,
        transition.epoch,
        message,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(reference = %subscription.reference, error = %e, "dispatch bookkeeping failed");
            DeliveryOutcome::Failed
        }
    }
}

/// Dispatches one message and appends the delivery record.
async fn dispatch_and_record(
    pool: DbPool,
    channel: Arc<dyn NotificationChannel>,
    subscription: &Subscription,
    phenomenon: Phenomenon,
    severity: Severity,
    epoch: i64,
    message: RenderedMessage,
) -> Result<DeliveryOutcome, BroadcastError> {
    let result = channel
        .send(subscription.channel, &subscription.contact, &message)
        .await;

    let (outcome, detail) = match &result {
        Ok(receipt) => (DeliveryOutcome::Sent, receipt.message_id.clone()),
        Err(e) => {
            tracing::warn!(
                reference = %subscription.reference,
                error = %e,
                "notification dispatch failed"
            );
            (DeliveryOutcome::Failed, e.to_string())
        }
    };

    let record = NewDelivery {
        reference: &subscription.reference,
        phenomenon,
        severity,
        epoch,
        outcome,
        detail: Some(&detail),
        message: Some(&message.body),
    };
    append_record(
        &pool,
        &record,
        &subscription.reference,
        outcome == DeliveryOutcome::Sent,
    )
    .await?;

    Ok(outcome)
}

/// Appends a delivery record, optionally stamping `last_notified_at`.
async fn append_record(
    pool: &DbPool,
    record: &NewDelivery<'_>,
    reference: &str,
    stamp_notified: bool,
) -> Result<(), BroadcastError> {
    let pool = pool.clone();
    let reference = reference.to_string();
    let owned = OwnedDelivery::from(record);

    tokio::task::spawn_blocking(move || -> Result<(), BroadcastError> {
        let conn = pool.get()?;
        vigie_store::record_delivery(&conn, &owned.as_new())?;
        if stamp_notified {
            vigie_store::touch_last_notified(&conn, &reference, Utc::now())?;
        }
        Ok(())
    })
    .await?
}

/// Owned mirror of [`NewDelivery`] so a record can cross into
/// `spawn_blocking`.
struct OwnedDelivery {
    reference: String,
    phenomenon: Phenomenon,
    severity: Severity,
    epoch: i64,
    outcome: DeliveryOutcome,
    detail: Option<String>,
    message: Option<String>,
}

impl From<&NewDelivery<'_>> for OwnedDelivery {
    fn from(d: &NewDelivery<'_>) -> Self {
        Self {
            reference: d.reference.to_string(),
            phenomenon: d.phenomenon,
            severity: d.severity,
            epoch: d.epoch,
            outcome: d.outcome,
            detail: d.detail.map(str::to_string),
            message: d.message.map(str::to_string),
        }
    }
}

impl OwnedDelivery {
    fn as_new(&self) -> NewDelivery<'_> {
        NewDelivery {
            reference: &self.reference,
            phenomenon: self.phenomenon,
            severity: self.severity,
            epoch: self.epoch,
            outcome: self.outcome,
            detail: self.detail.as_deref(),
            message: self.message.as_deref(),
        }
    }
}
