//! Alert delivery records.
//!
//! Append-only audit trail of dispatch attempts. The `sent` records double
//! as the broadcaster's deduplication index: one `(reference, phenomenon,
//! severity, epoch)` tuple is never sent twice. The epoch comes from the
//! vigilance tracker and advances when a level decreases, so a repeat
//! storm is a fresh tuple and alerts again.

use crate::StoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use vigie_types::{Phenomenon, Severity};

/// Outcome of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// A new delivery record to append.
#[derive(Debug, Clone)]
pub struct NewDelivery<'a> {
    pub reference: &'a str,
    pub phenomenon: Phenomenon,
    pub severity: Severity,
    /// Alert episode the dispatch belongs to.
    pub epoch: i64,
    pub outcome: DeliveryOutcome,
    /// Provider receipt ID on success, error reason on failure.
    pub detail: Option<&'a str>,
    /// Rendered message body, kept for the audit trail.
    pub message: Option<&'a str>,
}

/// A recorded delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub id: i64,
    pub reference: String,
    pub phenomenon: Phenomenon,
    pub severity: Severity,
    pub epoch: i64,
    pub outcome: DeliveryOutcome,
    pub detail: Option<String>,
    pub message: Option<String>,
    pub attempted_at: String,
}

/// Appends a delivery record, returning its row ID.
pub fn record_delivery(conn: &Connection, delivery: &NewDelivery) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO alert_deliveries (reference, phenomenon, severity, epoch, outcome, detail, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            delivery.reference,
            delivery.phenomenon.as_str(),
            delivery.severity.code(),
            delivery.epoch,
            delivery.outcome.as_str(),
            delivery.detail,
            delivery.message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns whether a `sent` record already exists for the tuple within the
/// given epoch. Records from earlier epochs never suppress a resend.
pub fn was_delivered(
    conn: &Connection,
    reference: &str,
    phenomenon: Phenomenon,
    severity: Severity,
    epoch: i64,
) -> Result<bool, StoreError> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM alert_deliveries
         WHERE reference = ?1 AND phenomenon = ?2 AND severity = ?3 AND epoch = ?4
           AND outcome = 'sent'",
        params![reference, phenomenon.as_str(), severity.code(), epoch],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Lists delivery records, newest first, optionally filtered by reference.
pub fn list_deliveries(
    conn: &Connection,
    reference: Option<&str>,
    limit: u32,
) -> Result<Vec<DeliveryRecord>, StoreError> {
    let mut out = Vec::new();
    match reference {
        Some(reference) => {
            let mut stmt = conn.prepare(
                "SELECT id, reference, phenomenon, severity, epoch, outcome, detail, message, attempted_at
                 FROM alert_deliveries WHERE reference = ?1
                 ORDER BY attempted_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![reference, limit], map_row_to_delivery)?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, reference, phenomenon, severity, epoch, outcome, detail, message, attempted_at
                 FROM alert_deliveries ORDER BY attempted_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], map_row_to_delivery)?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

fn map_row_to_delivery(row: &Row) -> rusqlite::Result<DeliveryRecord> {
    let phenomenon_str: String = row.get(2)?;
    let phenomenon = Phenomenon::parse(&phenomenon_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown phenomenon: {phenomenon_str}").into(),
        )
    })?;

    let severity_code: i64 = row.get(3)?;
    let severity = Severity::from_code(severity_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("unknown severity code: {severity_code}").into(),
        )
    })?;

    let outcome_str: String = row.get(5)?;
    let outcome = DeliveryOutcome::parse(&outcome_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown outcome: {outcome_str}").into(),
        )
    })?;

    Ok(DeliveryRecord {
        id: row.get(0)?,
        reference: row.get(1)?,
        phenomenon,
        severity,
        epoch: row.get(4)?,
        outcome,
        detail: row.get(6)?,
        message: row.get(7)?,
        attempted_at: row.get(8)?,
    })
}
