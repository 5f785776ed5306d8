//! Shared domain types: identities, device references, field keys, commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a band owner, normalized to lowercase.
///
/// Catalog lookups and identity comparisons are case-insensitive, so the
/// normalized form is what gets stored in a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0 == other.trim().to_lowercase()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device owned by a user: the spoken nickname plus the physical serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub nickname: String,
    pub physical_id: String,
}

impl DeviceRef {
    pub fn new(nickname: impl Into<String>, physical_id: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            physical_id: physical_id.into(),
        }
    }

    pub fn nickname_matches(&self, candidate: &str) -> bool {
        self.nickname.to_lowercase() == candidate.trim().to_lowercase()
    }
}

/// Named scalar fields of the reported document.
///
/// The wire keys are what the band firmware publishes and subscribes to,
/// including its historical spellings; they must not be "corrected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    HeartRate,
    ActivityType,
    AmbientTemperature,
    Spo2,
    Steps,
    MinPulseAlert,
    MaxPulseAlert,
}

impl FieldKey {
    pub const ALL: [FieldKey; 7] = [
        FieldKey::HeartRate,
        FieldKey::ActivityType,
        FieldKey::AmbientTemperature,
        FieldKey::Spo2,
        FieldKey::Steps,
        FieldKey::MinPulseAlert,
        FieldKey::MaxPulseAlert,
    ];

    pub fn wire_key(self) -> &'static str {
        match self {
            FieldKey::HeartRate => "heart_rate",
            FieldKey::ActivityType => "activity_type",
            FieldKey::AmbientTemperature => "enviroment_temperature",
            FieldKey::Spo2 => "SpO2",
            FieldKey::Steps => "steps",
            FieldKey::MinPulseAlert => "min_pulse_alert",
            FieldKey::MaxPulseAlert => "max_pulse_alert",
        }
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.wire_key() == key)
    }

    pub fn is_threshold(self) -> bool {
        matches!(self, FieldKey::MinPulseAlert | FieldKey::MaxPulseAlert)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_key())
    }
}

/// One user-facing action, built per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Identify(String),
    SelectDevice(String),
    ReadField(FieldKey),
    /// The raw slot text; validated as an integer before any store call.
    WriteThreshold(FieldKey, String),
}

impl Command {
    /// Operation label used in logs and transport errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Command::Identify(_) => "identify",
            Command::SelectDevice(_) => "select_device",
            Command::ReadField(_) => "read_field",
            Command::WriteThreshold(_, _) => "write_threshold",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_normalizes_case_and_whitespace() {
        let user = UserId::parse("  Ana ").expect("user");
        assert_eq!(user.as_str(), "ana");
        assert!(user.matches("ANA"));
        assert!(UserId::parse("   ").is_none());
    }

    #[test]
    fn nickname_match_ignores_case() {
        let device = DeviceRef::new("Band1", "SN-001");
        assert!(device.nickname_matches("band1"));
        assert!(device.nickname_matches("BAND1 "));
        assert!(!device.nickname_matches("band2"));
    }

    #[test]
    fn wire_keys_follow_firmware_spelling() {
        assert_eq!(FieldKey::AmbientTemperature.wire_key(), "enviroment_temperature");
        assert_eq!(FieldKey::Spo2.wire_key(), "SpO2");
        for field in FieldKey::ALL {
            assert_eq!(FieldKey::from_wire_key(field.wire_key()), Some(field));
        }
    }

    #[test]
    fn only_pulse_alerts_are_thresholds() {
        let thresholds: Vec<_> = FieldKey::ALL
            .into_iter()
            .filter(|field| field.is_threshold())
            .collect();
        assert_eq!(
            thresholds,
            vec![FieldKey::MinPulseAlert, FieldKey::MaxPulseAlert]
        );
    }
}
