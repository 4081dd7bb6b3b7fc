use crate::model::TargetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod registry;

pub use registry::ActionRegistry;

/// Requested state change. The full vocabulary across all target kinds;
/// which actions apply to which kind is decided by [`ActionRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    On,
    Off,
    SetValue,
    Start,
    Stop,
    SetGeneration,
    Charge,
    Discharge,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::On,
        Action::Off,
        Action::SetValue,
        Action::Start,
        Action::Stop,
        Action::SetGeneration,
        Action::Charge,
        Action::Discharge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::On => "ON",
            Action::Off => "OFF",
            Action::SetValue => "SET_VALUE",
            Action::Start => "START",
            Action::Stop => "STOP",
            Action::SetGeneration => "SET_GENERATION",
            Action::Charge => "CHARGE",
            Action::Discharge => "DISCHARGE",
        }
    }

    /// Actions that carry a numeric operand.
    pub fn requires_value(&self) -> bool {
        matches!(self, Action::SetValue | Action::SetGeneration)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown action name.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown action '{}'", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Immutable command message travelling from the dispatcher to the actuator bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// UUIDv7, time-ordered
    pub command_id: String,
    pub target_kind: TargetKind,
    pub target_entity_id: String,
    pub target_sub_entity_id: Option<String>,
    pub action: Action,
    pub value: Option<f64>,
    pub issued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(
        target_kind: TargetKind,
        entity_id: &str,
        sub_entity_id: Option<&str>,
        action: Action,
        value: Option<f64>,
    ) -> Self {
        Self {
            command_id: Uuid::now_v7().to_string(),
            target_kind,
            target_entity_id: entity_id.to_string(),
            target_sub_entity_id: sub_entity_id.map(str::to_string),
            action,
            value,
            issued_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A message that failed processing, with the reason attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub key: String,
    /// Original payload, lossily decoded as UTF-8 so malformed input survives.
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(key: &str, payload: &[u8], reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            key: key.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}
