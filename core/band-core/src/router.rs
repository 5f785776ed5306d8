//! Maps inbound operation names and slot values to commands.
//!
//! Both the kebab-case operation names and the voice front end's intent
//! names are accepted, so a skill backend can forward intents untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Command, FieldKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Launch,
    IdentifyUser,
    SelectDevice,
    ReadHeartRate,
    ReadActivity,
    ReadTemperature,
    ReadSpo2,
    ReadSteps,
    SetMinHeartRateThreshold,
    SetMaxHeartRateThreshold,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Launch,
        Operation::IdentifyUser,
        Operation::SelectDevice,
        Operation::ReadHeartRate,
        Operation::ReadActivity,
        Operation::ReadTemperature,
        Operation::ReadSpo2,
        Operation::ReadSteps,
        Operation::SetMinHeartRateThreshold,
        Operation::SetMaxHeartRateThreshold,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Launch => "launch",
            Operation::IdentifyUser => "identify-user",
            Operation::SelectDevice => "select-device",
            Operation::ReadHeartRate => "read-heart-rate",
            Operation::ReadActivity => "read-activity",
            Operation::ReadTemperature => "read-temperature",
            Operation::ReadSpo2 => "read-spo2",
            Operation::ReadSteps => "read-steps",
            Operation::SetMinHeartRateThreshold => "set-min-heart-rate-threshold",
            Operation::SetMaxHeartRateThreshold => "set-max-heart-rate-threshold",
        }
    }

    fn intent_name(self) -> &'static str {
        match self {
            Operation::Launch => "LaunchRequest",
            Operation::IdentifyUser => "CaptureUsernameIntent",
            Operation::SelectDevice => "SelectThingIntent",
            Operation::ReadHeartRate => "CheckHeartbeatIntent",
            Operation::ReadActivity => "CheckActivityIntent",
            Operation::ReadTemperature => "CheckTemperatureIntent",
            Operation::ReadSpo2 => "CheckSpOIntent",
            Operation::ReadSteps => "CheckStepsIntent",
            Operation::SetMinHeartRateThreshold => "ChangeMinHeartbeatIntent",
            Operation::SetMaxHeartRateThreshold => "ChangeMaxHeartbeatIntent",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|op| op.name() == value || op.intent_name() == value)
    }

    /// Slot the operation reads its argument from, if any.
    pub fn slot(self) -> Option<&'static str> {
        match self {
            Operation::IdentifyUser => Some("username"),
            Operation::SelectDevice => Some("thingNick"),
            Operation::SetMinHeartRateThreshold => Some("minPulse"),
            Operation::SetMaxHeartRateThreshold => Some("maxPulse"),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Launch,
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{operation} requires the {slot} slot")]
    MissingSlot {
        operation: Operation,
        slot: &'static str,
    },
}

pub struct IntentRouter;

impl IntentRouter {
    pub fn route(operation: &str, value: Option<&str>) -> Result<Routed, RouteError> {
        let op = Operation::from_name(operation)
            .ok_or_else(|| RouteError::UnknownOperation(operation.trim().to_string()))?;
        Self::route_operation(op, value)
    }

    pub fn route_operation(op: Operation, value: Option<&str>) -> Result<Routed, RouteError> {
        let command = match op {
            Operation::Launch => return Ok(Routed::Launch),
            Operation::IdentifyUser => Command::Identify(required(op, value)?),
            Operation::SelectDevice => Command::SelectDevice(required(op, value)?),
            Operation::ReadHeartRate => Command::ReadField(FieldKey::HeartRate),
            Operation::ReadActivity => Command::ReadField(FieldKey::ActivityType),
            Operation::ReadTemperature => Command::ReadField(FieldKey::AmbientTemperature),
            Operation::ReadSpo2 => Command::ReadField(FieldKey::Spo2),
            Operation::ReadSteps => Command::ReadField(FieldKey::Steps),
            // Threshold values are validated downstream, after the session gate.
            Operation::SetMinHeartRateThreshold => Command::WriteThreshold(
                FieldKey::MinPulseAlert,
                value.unwrap_or_default().to_string(),
            ),
            Operation::SetMaxHeartRateThreshold => Command::WriteThreshold(
                FieldKey::MaxPulseAlert,
                value.unwrap_or_default().to_string(),
            ),
        };
        Ok(Routed::Command(command))
    }
}

fn required(op: Operation, value: Option<&str>) -> Result<String, RouteError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(RouteError::MissingSlot {
            operation: op,
            slot: op.slot().unwrap_or("value"),
        }),
    }
}
