//! Periodic vigilance polling pipeline.
//!
//! One pipeline run fetches a snapshot, evaluates it against the stored
//! state, and broadcasts any qualifying transitions. Runs never overlap: a
//! tick that arrives while a run is still in flight is skipped, not
//! queued.

use crate::feed::{FeedError, SnapshotSource};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use vigie_broadcast::{BroadcastError, BroadcastSummary, Broadcaster};
use vigie_db::DbPool;
use vigie_watch::{SeveritySnapshot, Transition, WatchError};

/// Errors from a single pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The fetch → evaluate → broadcast pipeline.
pub struct Pipeline {
    pool: DbPool,
    broadcaster: Broadcaster,
    feed: Arc<dyn SnapshotSource>,
    /// Held for the duration of a run; `try_lock` makes overlap a skip.
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(pool: DbPool, broadcaster: Broadcaster, feed: Arc<dyn SnapshotSource>) -> Self {
        Self {
            pool,
            broadcaster,
            feed,
            running: Mutex::new(()),
        }
    }

    /// Runs the pipeline once, end to end.
    pub async fn run_once(&self) -> Result<BroadcastSummary, PipelineError> {
        let snapshot = self.feed.fetch().await?;
        let transitions = self.evaluate(snapshot).await?;

        if transitions.is_empty() {
            tracing::debug!("no qualifying transitions");
            return Ok(BroadcastSummary::default());
        }

        for t in &transitions {
            tracing::info!(
                phenomenon = t.phenomenon.as_str(),
                from = t.from.name(),
                to = t.to.name(),
                "qualifying vigilance transition"
            );
        }

        Ok(self.broadcaster.broadcast(&transitions).await?)
    }

    /// Runs the pipeline if no run is already in flight.
    pub async fn run_guarded(&self) {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("previous pipeline run still in flight, skipping tick");
            return;
        };

        match self.run_once().await {
            Ok(summary) if summary == BroadcastSummary::default() => {}
            Ok(summary) => {
                tracing::info!(
                    sent = summary.sent,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "pipeline run complete"
                );
            }
            // A failed fetch degrades the tick to a no-op; state and
            // subscribers are untouched until the next poll.
            Err(PipelineError::Feed(e)) => {
                tracing::warn!(error = %e, "feed fetch failed, skipping tick");
            }
            Err(e) => {
                tracing::error!(error = %e, "pipeline run failed");
            }
        }
    }

    async fn evaluate(
        &self,
        snapshot: SeveritySnapshot,
    ) -> Result<Vec<Transition>, PipelineError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<_, PipelineError> {
            let conn = pool.get()?;
            Ok(vigie_watch::evaluate(&conn, &snapshot)?)
        })
        .await?
    }
}

/// Polls the feed on a fixed cadence until the process shuts down.
pub async fn run_poll_loop(pipeline: Arc<Pipeline>, poll_interval: Duration) {
    tracing::info!(
        interval_secs = poll_interval.as_secs(),
        "starting vigilance poll loop"
    );

    let mut ticker = interval(poll_interval);
    // A stalled run must not cause a burst of catch-up polls.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        pipeline.run_guarded().await;
    }
}
