//! Shared domain types for the vigie alert platform.
//!
//! This crate defines the severity model — phenomena, ordered vigilance
//! levels, subscriber profiles, notification channels, and billing plans —
//! plus the message templates used to render alerts. Pure data and logic,
//! no I/O.
//!
//! No crate in the workspace depends on anything *except* `vigie-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod message;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Ordered vigilance severity level.
///
/// The derived `Ord` follows the declaration order (`Green < Yellow <
/// Orange < Red`) and drives the broadcast trigger rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Green,
    Yellow,
    Orange,
    Red,
}

impl Severity {
    /// Numeric vigilance code (1-4), as used by the upstream feed.
    pub fn code(self) -> i64 {
        match self {
            Self::Green => 1,
            Self::Yellow => 2,
            Self::Orange => 3,
            Self::Red => 4,
        }
    }

    /// Attempts to convert a numeric vigilance code to a `Severity`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Green),
            2 => Some(Self::Yellow),
            3 => Some(Self::Orange),
            4 => Some(Self::Red),
            _ => None,
        }
    }

    /// Display name used in rendered messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Green => "Green",
            Self::Yellow => "Yellow",
            Self::Orange => "Orange",
            Self::Red => "Red",
        }
    }

    /// Hex color used in email rendering.
    pub fn color_hex(self) -> &'static str {
        match self {
            Self::Green => "#00FF00",
            Self::Yellow => "#FFFF00",
            Self::Orange => "#FF8C00",
            Self::Red => "#FF0000",
        }
    }

    /// Short description of the required level of attention.
    pub fn description(self) -> &'static str {
        match self {
            Self::Green => "No particular vigilance",
            Self::Yellow => "Be attentive",
            Self::Orange => "Be very vigilant",
            Self::Red => "Absolute vigilance",
        }
    }
}

/// A tracked weather phenomenon.
///
/// Ordering follows declaration order and exists so phenomena can key
/// sorted collections; it carries no meteorological meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phenomenon {
    Wind,
    RainFlood,
    Storm,
    WavesSubmersion,
    HeatWave,
    Cyclone,
}

impl Phenomenon {
    /// All tracked phenomena, in a stable order.
    pub const ALL: [Phenomenon; 6] = [
        Self::Wind,
        Self::RainFlood,
        Self::Storm,
        Self::WavesSubmersion,
        Self::HeatWave,
        Self::Cyclone,
    ];

    /// Stable identifier used in persistence and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wind => "wind",
            Self::RainFlood => "rain_flood",
            Self::Storm => "storm",
            Self::WavesSubmersion => "waves_submersion",
            Self::HeatWave => "heat_wave",
            Self::Cyclone => "cyclone",
        }
    }

    /// Parses a stable identifier back into a `Phenomenon`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wind" => Some(Self::Wind),
            "rain_flood" => Some(Self::RainFlood),
            "storm" => Some(Self::Storm),
            "waves_submersion" => Some(Self::WavesSubmersion),
            "heat_wave" => Some(Self::HeatWave),
            "cyclone" => Some(Self::Cyclone),
            _ => None,
        }
    }

    /// Human-readable label used in message headlines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Wind => "Strong wind",
            Self::RainFlood => "Heavy rain / flooding",
            Self::Storm => "Thunderstorms",
            Self::WavesSubmersion => "Swell / coastal flooding",
            Self::HeatWave => "Heat wave",
            Self::Cyclone => "Cyclone",
        }
    }
}

/// Subscriber profile, selecting which advice template an alert carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    GeneralPublic,
    Professional,
    Nautical,
    Tourism,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralPublic => "general_public",
            Self::Professional => "professional",
            Self::Nautical => "nautical",
            Self::Tourism => "tourism",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general_public" => Some(Self::GeneralPublic),
            "professional" => Some(Self::Professional),
            "nautical" => Some(Self::Nautical),
            "tourism" => Some(Self::Tourism),
            _ => None,
        }
    }

    /// Display label used in rendered messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::GeneralPublic => "General public",
            Self::Professional => "Professional (construction / agriculture)",
            Self::Nautical => "Nautical / fishing / boating",
            Self::Tourism => "Tourism / beaches",
        }
    }
}

/// Notification channel kind for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Sms,
    Email,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Billing plan for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    SmsMonthly,
    EmailYearly,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SmsMonthly => "sms_monthly",
            Self::EmailYearly => "email_yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sms_monthly" => Some(Self::SmsMonthly),
            "email_yearly" => Some(Self::EmailYearly),
            _ => None,
        }
    }

    /// Price in the smallest currency unit (cents).
    pub fn amount_cents(self) -> i64 {
        match self {
            Self::SmsMonthly => 499,
            Self::EmailYearly => 1999,
        }
    }

    pub fn currency(self) -> &'static str {
        "eur"
    }

    /// Display name shown on invoices and checkout.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::SmsMonthly => "SMS weather alerts (monthly)",
            Self::EmailYearly => "Email weather alerts (yearly)",
        }
    }

    /// Computes the renewal date following a billing period start.
    ///
    /// Derived only; nothing in the platform enforces renewal.
    pub fn next_renewal(self, period_start: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::SmsMonthly => Months::new(1),
            Self::EmailYearly => Months::new(12),
        };
        period_start
            .checked_add_months(months)
            .unwrap_or(period_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn severity_ordering_matches_codes() {
        assert!(Severity::Green < Severity::Yellow);
        assert!(Severity::Yellow < Severity::Orange);
        assert!(Severity::Orange < Severity::Red);

        for level in [
            Severity::Green,
            Severity::Yellow,
            Severity::Orange,
            Severity::Red,
        ] {
            assert_eq!(Severity::from_code(level.code()), Some(level));
        }
        assert_eq!(Severity::from_code(0), None);
        assert_eq!(Severity::from_code(5), None);
    }

    #[test]
    fn phenomenon_round_trips_through_identifier() {
        for p in Phenomenon::ALL {
            assert_eq!(Phenomenon::parse(p.as_str()), Some(p));
        }
        assert_eq!(Phenomenon::parse("volcano"), None);
    }

    #[test]
    fn phenomena_key_sorted_collections() {
        let mut sorted = Phenomenon::ALL;
        sorted.sort();
        assert_eq!(sorted, Phenomenon::ALL, "ordering follows declaration");

        let mut levels = std::collections::BTreeMap::new();
        levels.insert(Phenomenon::Cyclone, Severity::Red);
        levels.insert(Phenomenon::Wind, Severity::Yellow);
        let keys: Vec<_> = levels.keys().copied().collect();
        assert_eq!(keys, vec![Phenomenon::Wind, Phenomenon::Cyclone]);
    }

    #[test]
    fn plan_renewal_derivation() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();

        let monthly = Plan::SmsMonthly.next_renewal(start);
        // Jan 31 + 1 month clamps to Feb 28.
        assert_eq!(monthly.format("%Y-%m-%d").to_string(), "2025-02-28");

        let yearly = Plan::EmailYearly.next_renewal(start);
        assert_eq!(yearly.format("%Y-%m-%d").to_string(), "2026-01-31");
    }

    #[test]
    fn serde_identifiers_are_snake_case() {
        let json = serde_json::to_string(&Phenomenon::WavesSubmersion).unwrap();
        assert_eq!(json, "\"waves_submersion\"");
        let parsed: Profile = serde_json::from_str("\"general_public\"").unwrap();
        assert_eq!(parsed, Profile::GeneralPublic);
    }
}
