//! Subscription store for the vigie platform.
//!
//! Owns every lifecycle write for subscriber records: creation (pending
//! payment), activation on confirmed payment, and unsubscription. Other
//! components request transitions through the operations here; the store
//! re-validates preconditions on every call.
//!
//! All mutations are conditional `UPDATE ... WHERE status = ...` statements
//! executed inside a transaction, so concurrent activate/unsubscribe calls
//! on the same reference resolve to exactly one consistent final state
//! under SQLite's single-writer model.

mod contact;
mod deliveries;

pub use contact::{normalize_email, normalize_phone};
pub use deliveries::{
    list_deliveries, record_delivery, was_delivered, DeliveryOutcome, DeliveryRecord, NewDelivery,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigie_types::{ChannelKind, Plan, Profile};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input was rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The referenced subscription does not exist.
    #[error("subscription not found: {0}")]
    NotFound(String),
    /// The requested lifecycle transition is not valid from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    Unsubscribed,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "active" => Some(Self::Active),
            "unsubscribed" => Some(Self::Unsubscribed),
            _ => None,
        }
    }
}

/// A subscriber record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// Internal database ID.
    pub id: i64,
    /// Stable, externally shareable reference.
    pub reference: String,
    /// Contact address: E.164 phone for SMS, address for email.
    pub contact: String,
    /// Notification channel kind.
    pub channel: ChannelKind,
    /// Advice profile.
    pub profile: Profile,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// Gateway payment reference, set on activation.
    pub payment_reference: Option<String>,
    /// Billing plan, set on activation.
    pub plan: Option<Plan>,
    /// Billing period start (RFC 3339), set on activation.
    pub period_start: Option<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    pub activated_at: Option<String>,
    pub unsubscribed_at: Option<String>,
    pub last_notified_at: Option<String>,
}

impl Subscription {
    /// Derived next-renewal marker. Nothing enforces renewal; this exists
    /// for the status surface only.
    pub fn next_renewal(&self) -> Option<DateTime<Utc>> {
        let plan = self.plan?;
        let start = self.period_start.as_deref()?;
        let start = DateTime::parse_from_rfc3339(start).ok()?;
        Some(plan.next_renewal(start.with_timezone(&Utc)))
    }
}

/// Generates a fresh opaque subscription reference (`VG-XXXXXXXXXX`).
fn generate_reference() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("VG-{}", hex[..10].to_uppercase())
}

/// Creates a new subscription in `PendingPayment` status.
///
/// The contact is validated and normalized for the channel kind first: SMS
/// contacts must normalize to the restricted +596 E.164 format, email
/// contacts must be syntactically valid. A contact with an existing
/// `Active` subscription is rejected; a contact whose previous enrollment
/// is pending or unsubscribed gets a brand-new reference (the old reference
/// stays terminal).
pub fn create_subscription(
    conn: &Connection,
    contact: &str,
    channel: ChannelKind,
    profile: Profile,
) -> Result<Subscription, StoreError> {
    let contact = match channel {
        ChannelKind::Sms => normalize_phone(contact)
            .ok_or_else(|| StoreError::Validation("invalid phone number".into()))?,
        ChannelKind::Email => normalize_email(contact)
            .ok_or_else(|| StoreError::Validation("invalid email address".into()))?,
    };

    let tx = conn.unchecked_transaction()?;

    let already_active: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM subscribers WHERE contact = ?1 AND status = 'active'",
        [&contact],
        |row| row.get(0),
    )?;
    if already_active {
        return Err(StoreError::Validation("contact already subscribed".into()));
    }

    let reference = generate_reference();
    tx.execute(
        "INSERT INTO subscribers (reference, contact, channel, profile)
         VALUES (?1, ?2, ?3, ?4)",
        params![reference, contact, channel.as_str(), profile.as_str()],
    )?;

    let sub = query_by_reference(&tx, &reference)?
        .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
    tx.commit()?;

    tracing::info!(reference = %sub.reference, channel = channel.as_str(), "subscription created");
    Ok(sub)
}

/// Activates a pending subscription on confirmed payment.
///
/// `PendingPayment → Active` is the only transition performed here.
/// Re-activation with the same payment reference on an already-active row
/// is a no-op success, so at-least-once webhook delivery is safe. Any
/// other call on a non-pending row is `InvalidState`; an unsubscribed
/// reference is never reactivated.
pub fn activate(
    conn: &Connection,
    reference: &str,
    payment_reference: &str,
    plan: Plan,
    period_start: DateTime<Utc>,
) -> Result<Subscription, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().to_rfc3339();

    let updated = tx.execute(
        "UPDATE subscribers
         SET status = 'active', payment_reference = ?2, plan = ?3,
             period_start = ?4, activated_at = ?5
         WHERE reference = ?1 AND status = 'pending_payment'",
        params![
            reference,
            payment_reference,
            plan.as_str(),
            period_start.to_rfc3339(),
            now
        ],
    )?;

    let sub = query_by_reference(&tx, reference)?
        .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

    if updated == 1 {
        tx.commit()?;
        tracing::info!(reference, "subscription activated");
        return Ok(sub);
    }

    // The conditional update matched nothing: decide idempotent no-op vs
    // illegal transition from the row we just read in the same transaction.
    match sub.status {
        SubscriptionStatus::Active
            if sub.payment_reference.as_deref() == Some(payment_reference) =>
        {
            tx.commit()?;
            tracing::debug!(reference, "duplicate activation ignored");
            Ok(sub)
        }
        SubscriptionStatus::Active => Err(StoreError::InvalidState(format!(
            "subscription {reference} is already active under a different payment reference"
        ))),
        SubscriptionStatus::Unsubscribed => Err(StoreError::InvalidState(format!(
            "subscription {reference} is unsubscribed; a new subscription must be created"
        ))),
        // The row read back as pending even though the update matched
        // nothing: a concurrent writer committed between our statements.
        SubscriptionStatus::PendingPayment => Err(StoreError::InvalidState(format!(
            "subscription {reference} changed state concurrently"
        ))),
    }
}

/// Unsubscribes an active subscription.
///
/// Idempotent: unsubscribing an already-unsubscribed reference succeeds
/// silently. Unknown references are `NotFound`; a pending subscription has
/// never been active and cannot be unsubscribed.
pub fn unsubscribe(conn: &Connection, reference: &str) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().to_rfc3339();

    let updated = tx.execute(
        "UPDATE subscribers SET status = 'unsubscribed', unsubscribed_at = ?2
         WHERE reference = ?1 AND status = 'active'",
        params![reference, now],
    )?;

    if updated == 1 {
        tx.commit()?;
        tracing::info!(reference, "subscription unsubscribed");
        return Ok(());
    }

    let sub = query_by_reference(&tx, reference)?
        .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

    match sub.status {
        SubscriptionStatus::Unsubscribed => {
            tx.commit()?;
            Ok(())
        }
        _ => Err(StoreError::InvalidState(format!(
            "subscription {reference} was never activated"
        ))),
    }
}

/// Changes the advice profile of an active subscription.
///
/// Only active subscriptions can retarget their advice; pending and
/// unsubscribed rows are `InvalidState`, unknown references `NotFound`.
pub fn update_profile(
    conn: &Connection,
    reference: &str,
    profile: Profile,
) -> Result<Subscription, StoreError> {
    let tx = conn.unchecked_transaction()?;

    let updated = tx.execute(
        "UPDATE subscribers SET profile = ?2
         WHERE reference = ?1 AND status = 'active'",
        params![reference, profile.as_str()],
    )?;

    let sub = query_by_reference(&tx, reference)?
        .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

    if updated == 1 {
        tx.commit()?;
        tracing::info!(reference, profile = profile.as_str(), "profile updated");
        return Ok(sub);
    }

    Err(StoreError::InvalidState(format!(
        "subscription {reference} is not active"
    )))
}

/// Retrieves a subscription by its reference.
pub fn get(conn: &Connection, reference: &str) -> Result<Subscription, StoreError> {
    query_by_reference(conn, reference)?
        .ok_or_else(|| StoreError::NotFound(reference.to_string()))
}

/// Lists active subscriptions, optionally filtered by channel kind,
/// ordered by creation time.
pub fn list_active(
    conn: &Connection,
    channel: Option<ChannelKind>,
) -> Result<Vec<Subscription>, StoreError> {
    let mut out = Vec::new();
    match channel {
        Some(kind) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
                 WHERE status = 'active' AND channel = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([kind.as_str()], map_row_to_subscription)?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
                 WHERE status = 'active'
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], map_row_to_subscription)?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

/// Stamps the last-notified marker on a subscription.
pub fn touch_last_notified(
    conn: &Connection,
    reference: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE subscribers SET last_notified_at = ?2 WHERE reference = ?1",
        params![reference, at.to_rfc3339()],
    )?;
    Ok(())
}

/// Subscription statistics for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_subscribers: i64,
    pub active: i64,
    pub pending_payment: i64,
    pub deliveries_sent: i64,
    pub by_profile: Vec<(String, i64)>,
}

/// Computes subscription statistics.
pub fn stats(conn: &Connection) -> Result<StoreStats, StoreError> {
    let total_subscribers: i64 =
        conn.query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
    let active: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscribers WHERE status = 'active'",
        [],
        |row| row.get(0),
    )?;
    let pending_payment: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscribers WHERE status = 'pending_payment'",
        [],
        |row| row.get(0),
    )?;
    let deliveries_sent: i64 = conn.query_row(
        "SELECT COUNT(*) FROM alert_deliveries WHERE outcome = 'sent'",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT profile, COUNT(*) FROM subscribers
         WHERE status = 'active' GROUP BY profile ORDER BY profile",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut by_profile = Vec::new();
    for row in rows {
        by_profile.push(row?);
    }

    Ok(StoreStats {
        total_subscribers,
        active,
        pending_payment,
        deliveries_sent,
        by_profile,
    })
}

const SUBSCRIBER_COLUMNS: &str = "id, reference, contact, channel, profile, status, \
     payment_reference, plan, period_start, created_at, activated_at, \
     unsubscribed_at, last_notified_at";

fn query_by_reference(
    conn: &Connection,
    reference: &str,
) -> Result<Option<Subscription>, StoreError> {
    conn.query_row(
        &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE reference = ?1"),
        [reference],
        map_row_to_subscription,
    )
    .optional()
    .map_err(StoreError::Database)
}

fn map_row_to_subscription(row: &Row) -> rusqlite::Result<Subscription> {
    let channel_str: String = row.get(3)?;
    let channel = ChannelKind::parse(&channel_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown channel kind: {channel_str}").into(),
        )
    })?;

    let profile_str: String = row.get(4)?;
    let profile = Profile::parse(&profile_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown profile: {profile_str}").into(),
        )
    })?;

    let status_str: String = row.get(5)?;
    let status = SubscriptionStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown status: {status_str}").into(),
        )
    })?;

    let plan_str: Option<String> = row.get(7)?;
    let plan = match plan_str {
        Some(p) => Some(Plan::parse(&p).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown plan: {p}").into(),
            )
        })?),
        None => None,
    };

    Ok(Subscription {
        id: row.get(0)?,
        reference: row.get(1)?,
        contact: row.get(2)?,
        channel,
        profile,
        status,
        payment_reference: row.get(6)?,
        plan,
        period_start: row.get(8)?,
        created_at: row.get(9)?,
        activated_at: row.get(10)?,
        unsubscribed_at: row.get(11)?,
        last_notified_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        vigie_db::run_migrations(&conn).expect("migrations");
        conn
    }

    #[test]
    fn create_starts_pending_with_fresh_reference() {
        let conn = setup();
        let sub = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Nautical)
            .expect("create");

        assert_eq!(sub.status, SubscriptionStatus::PendingPayment);
        assert_eq!(sub.contact, "+596696123456");
        assert!(sub.reference.starts_with("VG-"));
        assert!(sub.payment_reference.is_none());
        assert!(sub.next_renewal().is_none());
    }

    #[test]
    fn create_rejects_malformed_contacts() {
        let conn = setup();
        let err = create_subscription(&conn, "12", ChannelKind::Sms, Profile::GeneralPublic)
            .expect_err("short phone");
        assert!(matches!(err, StoreError::Validation(_)));

        let err = create_subscription(
            &conn,
            "not-an-email",
            ChannelKind::Email,
            Profile::GeneralPublic,
        )
        .expect_err("bad email");
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn create_rejects_contact_with_active_subscription() {
        let conn = setup();
        let sub = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Tourism)
            .expect("create");
        activate(&conn, &sub.reference, "pi_1", Plan::SmsMonthly, Utc::now()).expect("activate");

        let err = create_subscription(&conn, "0696 12 34 56", ChannelKind::Sms, Profile::Tourism)
            .expect_err("duplicate active contact");
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn activate_is_idempotent_for_same_payment_reference() {
        let conn = setup();
        let sub = create_subscription(&conn, "user@example.com", ChannelKind::Email, Profile::Tourism)
            .expect("create");

        let first = activate(&conn, &sub.reference, "pi_42", Plan::EmailYearly, Utc::now())
            .expect("first activation");
        assert_eq!(first.status, SubscriptionStatus::Active);
        assert_eq!(first.plan, Some(Plan::EmailYearly));

        let second = activate(&conn, &sub.reference, "pi_42", Plan::EmailYearly, Utc::now())
            .expect("duplicate activation is a no-op success");
        assert_eq!(second.status, SubscriptionStatus::Active);
        assert_eq!(second.activated_at, first.activated_at);
    }

    #[test]
    fn activate_rejects_different_payment_reference() {
        let conn = setup();
        let sub = create_subscription(&conn, "user@example.com", ChannelKind::Email, Profile::Tourism)
            .expect("create");
        activate(&conn, &sub.reference, "pi_42", Plan::EmailYearly, Utc::now()).expect("activate");

        let err = activate(&conn, &sub.reference, "pi_99", Plan::EmailYearly, Utc::now())
            .expect_err("different payment reference");
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn activate_unknown_reference_is_not_found() {
        let conn = setup();
        let err = activate(&conn, "VG-NOPE", "pi_1", Plan::SmsMonthly, Utc::now())
            .expect_err("unknown reference");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn unsubscribe_is_idempotent_and_terminal() {
        let conn = setup();
        let sub = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Nautical)
            .expect("create");
        activate(&conn, &sub.reference, "pi_1", Plan::SmsMonthly, Utc::now()).expect("activate");

        unsubscribe(&conn, &sub.reference).expect("first unsubscribe");
        unsubscribe(&conn, &sub.reference).expect("second unsubscribe succeeds silently");

        let current = get(&conn, &sub.reference).expect("get");
        assert_eq!(current.status, SubscriptionStatus::Unsubscribed);
        assert!(current.unsubscribed_at.is_some());

        // A terminal reference never reactivates, even with its original
        // payment reference.
        let err = activate(&conn, &sub.reference, "pi_1", Plan::SmsMonthly, Utc::now())
            .expect_err("unsubscribed is terminal");
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn unsubscribe_pending_is_invalid_state() {
        let conn = setup();
        let sub = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Nautical)
            .expect("create");
        let err = unsubscribe(&conn, &sub.reference).expect_err("never activated");
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn profile_updates_apply_to_active_subscriptions_only() {
        let conn = setup();
        let sub = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Tourism)
            .expect("create");

        let err = update_profile(&conn, &sub.reference, Profile::Nautical)
            .expect_err("pending cannot retarget");
        assert!(matches!(err, StoreError::InvalidState(_)));

        activate(&conn, &sub.reference, "pi_1", Plan::SmsMonthly, Utc::now()).expect("activate");
        let updated =
            update_profile(&conn, &sub.reference, Profile::Nautical).expect("update profile");
        assert_eq!(updated.profile, Profile::Nautical);
        assert_eq!(updated.status, SubscriptionStatus::Active);

        unsubscribe(&conn, &sub.reference).expect("unsubscribe");
        let err = update_profile(&conn, &sub.reference, Profile::Tourism)
            .expect_err("terminal rows keep their profile");
        assert!(matches!(err, StoreError::InvalidState(_)));

        let err = update_profile(&conn, "VG-NOPE", Profile::Tourism)
            .expect_err("unknown reference");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn contact_can_reenroll_after_unsubscribing() {
        let conn = setup();
        let first = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Tourism)
            .expect("create");
        activate(&conn, &first.reference, "pi_1", Plan::SmsMonthly, Utc::now()).expect("activate");
        unsubscribe(&conn, &first.reference).expect("unsubscribe");

        let second = create_subscription(&conn, "0696123456", ChannelKind::Sms, Profile::Nautical)
            .expect("re-enroll");
        assert_ne!(second.reference, first.reference);
        assert_eq!(second.status, SubscriptionStatus::PendingPayment);
    }

    #[test]
    fn list_active_filters_and_orders() {
        let conn = setup();
        let a = create_subscription(&conn, "0696000001", ChannelKind::Sms, Profile::GeneralPublic)
            .expect("create a");
        let b = create_subscription(&conn, "b@example.com", ChannelKind::Email, Profile::Tourism)
            .expect("create b");
        let _pending =
            create_subscription(&conn, "0696000003", ChannelKind::Sms, Profile::GeneralPublic)
                .expect("create pending");

        activate(&conn, &a.reference, "pi_a", Plan::SmsMonthly, Utc::now()).expect("activate a");
        activate(&conn, &b.reference, "pi_b", Plan::EmailYearly, Utc::now()).expect("activate b");

        let all = list_active(&conn, None).expect("list all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reference, a.reference, "ordered by creation");

        let sms_only = list_active(&conn, Some(ChannelKind::Sms)).expect("list sms");
        assert_eq!(sms_only.len(), 1);
        assert_eq!(sms_only[0].reference, a.reference);
    }

    #[test]
    fn stats_counts_lifecycle_buckets() {
        let conn = setup();
        let a = create_subscription(&conn, "0696000001", ChannelKind::Sms, Profile::GeneralPublic)
            .expect("create a");
        let _b = create_subscription(&conn, "0696000002", ChannelKind::Sms, Profile::Nautical)
            .expect("create b");
        activate(&conn, &a.reference, "pi_a", Plan::SmsMonthly, Utc::now()).expect("activate a");

        let s = stats(&conn).expect("stats");
        assert_eq!(s.total_subscribers, 2);
        assert_eq!(s.active, 1);
        assert_eq!(s.pending_payment, 1);
        assert_eq!(s.by_profile, vec![("general_public".to_string(), 1)]);
    }
}
