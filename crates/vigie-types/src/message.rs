//! Alert message templates and rendering.
//!
//! Advice text is resolved through a flat `(profile, phenomenon)` lookup
//! table rather than nested branching, so adding a profile or phenomenon is
//! a table edit, not a control-flow change.

use crate::{ChannelKind, Phenomenon, Profile, Severity};

/// Footer appended to every SMS alert.
const SMS_FOOTER: &str = "\n\nVigie Alerts - reply STOP to unsubscribe";

/// Fallback advice when the lookup table has no entry.
const DEFAULT_ADVICE: &str = "Stay alert and follow official guidance.";

/// Per-profile, per-phenomenon advice lookup table.
const ADVICE: &[(Profile, Phenomenon, &str)] = &[
    (
        Profile::GeneralPublic,
        Phenomenon::Wind,
        "Limit travel and secure outdoor objects.",
    ),
    (
        Profile::GeneralPublic,
        Phenomenon::RainFlood,
        "Avoid ravines and flood-prone roads.",
    ),
    (
        Profile::GeneralPublic,
        Phenomenon::Storm,
        "Stay indoors and unplug electrical appliances.",
    ),
    (
        Profile::GeneralPublic,
        Phenomenon::WavesSubmersion,
        "Keep away from the shoreline.",
    ),
    (
        Profile::GeneralPublic,
        Phenomenon::HeatWave,
        "Drink water regularly and stay cool.",
    ),
    (
        Profile::GeneralPublic,
        Phenomenon::Cyclone,
        "Prepare supplies (water, lamp, batteries, documents).",
    ),
    (
        Profile::Professional,
        Phenomenon::Wind,
        "Suspend work at height and secure the site.",
    ),
    (
        Profile::Professional,
        Phenomenon::RainFlood,
        "Postpone earthworks.",
    ),
    (
        Profile::Professional,
        Phenomenon::Storm,
        "Move equipment under cover.",
    ),
    (
        Profile::Professional,
        Phenomenon::WavesSubmersion,
        "Evacuate coastal work zones.",
    ),
    (
        Profile::Professional,
        Phenomenon::HeatWave,
        "Adapt working hours and schedule breaks.",
    ),
    (
        Profile::Professional,
        Phenomenon::Cyclone,
        "Secure all equipment and evacuate.",
    ),
    (
        Profile::Nautical,
        Phenomenon::Wind,
        "Stay in port and check moorings.",
    ),
    (
        Profile::Nautical,
        Phenomenon::RainFlood,
        "Beware of reduced visibility.",
    ),
    (Profile::Nautical, Phenomenon::Storm, "Do not go to sea."),
    (
        Profile::Nautical,
        Phenomenon::WavesSubmersion,
        "Do not go to sea, dangerous swell.",
    ),
    (
        Profile::Nautical,
        Phenomenon::HeatWave,
        "Extra hydration at sea.",
    ),
    (
        Profile::Nautical,
        Phenomenon::Cyclone,
        "Move vessels to shelter.",
    ),
    (
        Profile::Tourism,
        Phenomenon::Wind,
        "Avoid water activities.",
    ),
    (
        Profile::Tourism,
        Phenomenon::RainFlood,
        "Postpone mountain excursions.",
    ),
    (
        Profile::Tourism,
        Phenomenon::Storm,
        "Stay at your hotel or in a safe place.",
    ),
    (
        Profile::Tourism,
        Phenomenon::WavesSubmersion,
        "Beaches closed, keep away from the waterfront.",
    ),
    (
        Profile::Tourism,
        Phenomenon::HeatWave,
        "Limit sun exposure between 11:00 and 16:00.",
    ),
    (
        Profile::Tourism,
        Phenomenon::Cyclone,
        "Follow your accommodation's instructions.",
    ),
];

/// Resolves the advice line for a profile and phenomenon.
pub fn advice(profile: Profile, phenomenon: Phenomenon) -> &'static str {
    ADVICE
        .iter()
        .find(|(p, ph, _)| *p == profile && *ph == phenomenon)
        .map(|(_, _, text)| *text)
        .unwrap_or(DEFAULT_ADVICE)
}

/// Headline for the SMS template of a phenomenon.
fn sms_headline(phenomenon: Phenomenon) -> &'static str {
    match phenomenon {
        Phenomenon::Wind => "STRONG WIND ALERT",
        Phenomenon::RainFlood => "HEAVY RAIN ALERT",
        Phenomenon::Storm => "THUNDERSTORM ALERT",
        Phenomenon::WavesSubmersion => "SWELL ALERT",
        Phenomenon::HeatWave => "HEAT ALERT",
        Phenomenon::Cyclone => "CYCLONE ALERT",
    }
}

/// Renders the SMS body for an alert.
pub fn render_sms(phenomenon: Phenomenon, severity: Severity, profile: Profile) -> String {
    let mut body = format!(
        "{} - Martinique.\nVigilance {} - {}.\nAdvice: {}",
        sms_headline(phenomenon),
        severity.name(),
        severity.description(),
        advice(profile, phenomenon),
    );
    body.push_str(SMS_FOOTER);
    body
}

/// Renders the email subject and HTML body for an alert.
pub fn render_email(
    phenomenon: Phenomenon,
    severity: Severity,
    profile: Profile,
) -> (String, String) {
    let subject = format!(
        "{} - Martinique - Vigilance {}",
        sms_headline(phenomenon),
        severity.name()
    );

    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background: linear-gradient(135deg, #2563eb, #06b6d4); padding: 20px; border-radius: 12px 12px 0 0;">
    <h1 style="color: white; margin: 0;">Vigie Alerts</h1>
    <p style="color: rgba(255,255,255,0.9); margin: 5px 0 0;">Weather alert</p>
  </div>
  <div style="background: {color}; padding: 15px; text-align: center;">
    <h2 style="margin: 0; color: #000;">VIGILANCE {level}</h2>
    <p style="margin: 5px 0 0; font-weight: bold;">{phenomenon}</p>
  </div>
  <div style="padding: 20px; background: #f8fafc; border: 1px solid #e2e8f0;">
    <p style="font-size: 16px;">{phenomenon} alert in progress. {description}.</p>
    <div style="background: #eff6ff; padding: 15px; border-radius: 8px; border-left: 4px solid #2563eb; margin: 15px 0;">
      <p style="margin: 0;"><strong>Advice ({profile}):</strong></p>
      <p style="margin: 10px 0 0;">{advice}</p>
    </div>
  </div>
  <div style="padding: 15px; background: #f1f5f9; text-align: center; border-radius: 0 0 12px 12px;">
    <p style="margin: 0; color: #64748b; font-size: 12px;">Vigie Alerts - SMS &amp; Email</p>
  </div>
</div>"#,
        color = severity.color_hex(),
        level = severity.name().to_uppercase(),
        phenomenon = phenomenon.label(),
        description = severity.description(),
        profile = profile.label(),
        advice = advice(profile, phenomenon),
    );

    (subject, html)
}

/// Renders the message for a subscription's channel kind.
///
/// SMS gets a plain-text body and no subject; email gets a subject line
/// and an HTML body, carried separately on [`RenderedMessage`].
pub fn render_for_channel(
    kind: ChannelKind,
    phenomenon: Phenomenon,
    severity: Severity,
    profile: Profile,
) -> RenderedMessage {
    match kind {
        ChannelKind::Sms => RenderedMessage {
            subject: None,
            body: render_sms(phenomenon, severity, profile),
        },
        ChannelKind::Email => {
            let (subject, body) = render_email(phenomenon, severity, profile);
            RenderedMessage {
                subject: Some(subject),
                body,
            }
        }
    }
}

/// A message rendered for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Subject line (email only).
    pub subject: Option<String>,
    /// Message body: plain text for SMS, HTML for email.
    pub body: String,
}

impl RenderedMessage {
    /// Prefixes the message with a test marker, used by manual test sends.
    pub fn as_test(mut self) -> Self {
        self.body = format!("TEST ALERT\n\n{}", self.body);
        if let Some(subject) = self.subject.take() {
            self.subject = Some(format!("[TEST] {subject}"));
        }
        self
    }
}
