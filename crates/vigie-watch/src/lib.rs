//! Vigilance state tracker.
//!
//! Persists the last-observed severity level per phenomenon and computes
//! transitions against each newly fetched snapshot. The tracker is the sole
//! owner of `vigilance_state`; only the scheduler pipeline calls into it.
//!
//! A transition qualifies for broadcast only when the level *increased* and
//! the new level is at least `Yellow`. Decreases and sub-threshold
//! increases still update the stored state but emit nothing, so subscribers
//! are not notified about noise or de-escalation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use vigie_types::{Phenomenon, Severity};

/// Broadcast threshold: a qualifying transition must reach at least this level.
pub const ALERT_THRESHOLD: Severity = Severity::Yellow;

/// Errors that can occur during tracker operations.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A severity snapshot fetched from the upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeveritySnapshot {
    /// Severity per phenomenon. Phenomena absent from the snapshot keep
    /// their stored state untouched.
    pub levels: BTreeMap<Phenomenon, Severity>,
    /// Upstream observation timestamp.
    pub as_of: DateTime<Utc>,
}

impl SeveritySnapshot {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            levels: BTreeMap::new(),
            as_of,
        }
    }

    pub fn with(mut self, phenomenon: Phenomenon, severity: Severity) -> Self {
        self.levels.insert(phenomenon, severity);
        self
    }
}

/// A severity change detected between the stored state and a snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    pub phenomenon: Phenomenon,
    pub from: Severity,
    pub to: Severity,
    pub observed_at: DateTime<Utc>,
    /// Alert episode this transition belongs to. Each level decrease opens
    /// a new epoch; delivery dedup is scoped to it.
    pub epoch: i64,
}

/// Stored per-phenomenon state, exposed on the status surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhenomenonState {
    pub phenomenon: Phenomenon,
    pub current: Severity,
    pub previous: Severity,
    pub observed_at: String,
    pub epoch: i64,
}

/// Returns whether a level change is a qualifying transition.
pub fn qualifies(from: Severity, to: Severity) -> bool {
    to > from && to >= ALERT_THRESHOLD
}

/// Evaluates a snapshot against the stored state.
///
/// Runs as one SQLite transaction: for every phenomenon in the snapshot the
/// stored level is read (absent state counts as `Green`), the qualifying
/// transitions are collected, and the new state is written. The commit
/// happens before the transitions are returned, so a crash can never leave
/// state half-updated or ahead of what the caller has seen persisted.
pub fn evaluate(
    conn: &Connection,
    snapshot: &SeveritySnapshot,
) -> Result<Vec<Transition>, WatchError> {
    let tx = conn.unchecked_transaction()?;
    let mut transitions = Vec::new();

    for (&phenomenon, &to) in &snapshot.levels {
        let (from, stored_epoch) =
            stored_state(&tx, phenomenon)?.unwrap_or((Severity::Green, 0));
        // A decrease closes the current alert episode: dedup records from
        // the previous storm must not suppress the next one.
        let epoch = if to < from {
            stored_epoch + 1
        } else {
            stored_epoch
        };

        if qualifies(from, to) {
            transitions.push(Transition {
                phenomenon,
                from,
                to,
                observed_at: snapshot.as_of,
                epoch,
            });
        }

        if from != to {
            tracing::debug!(
                phenomenon = phenomenon.as_str(),
                from = from.name(),
                to = to.name(),
                epoch,
                "vigilance level changed"
            );
        }

        tx.execute(
            "INSERT INTO vigilance_state (phenomenon, current_level, previous_level, observed_at, epoch)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(phenomenon) DO UPDATE SET
                 previous_level = ?3,
                 current_level = ?2,
                 observed_at = ?4,
                 epoch = ?5",
            params![
                phenomenon.as_str(),
                to.code(),
                from.code(),
                snapshot.as_of.to_rfc3339(),
                epoch
            ],
        )?;
    }

    tx.commit()?;
    Ok(transitions)
}

/// Returns the currently tracked state for all phenomena, in stable order.
pub fn current_state(conn: &Connection) -> Result<Vec<PhenomenonState>, WatchError> {
    let mut stmt = conn.prepare(
        "SELECT phenomenon, current_level, previous_level, observed_at, epoch
         FROM vigilance_state ORDER BY phenomenon ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let phenomenon_str: String = row.get(0)?;
        let current_code: i64 = row.get(1)?;
        let previous_code: i64 = row.get(2)?;
        Ok((
            phenomenon_str,
            current_code,
            previous_code,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (phenomenon_str, current_code, previous_code, observed_at, epoch) = row?;
        let Some(phenomenon) = Phenomenon::parse(&phenomenon_str) else {
            tracing::warn!(phenomenon = %phenomenon_str, "unknown phenomenon in stored state");
            continue;
        };
        let (Some(current), Some(previous)) = (
            Severity::from_code(current_code),
            Severity::from_code(previous_code),
        ) else {
            tracing::warn!(phenomenon = %phenomenon_str, "unknown severity code in stored state");
            continue;
        };
        out.push(PhenomenonState {
            phenomenon,
            current,
            previous,
            observed_at,
            epoch,
        });
    }
    Ok(out)
}

fn stored_state(
    conn: &Connection,
    phenomenon: Phenomenon,
) -> Result<Option<(Severity, i64)>, WatchError> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT current_level, epoch FROM vigilance_state WHERE phenomenon = ?1",
            [phenomenon.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(code, epoch)| Severity::from_code(code).map(|level| (level, epoch))))
}
