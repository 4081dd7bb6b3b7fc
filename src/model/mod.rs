// Domain records and the trait that lets the coordination layer treat them uniformly

mod energy;
mod house;

pub use energy::{Battery, BatteryStatus, EnergySource, SourceStatus};
pub use house::{Device, DeviceState, DeviceType, House};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[cfg(test)]
pub(crate) mod fixtures;

/// What a command is aimed at. Action validity is decided per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    House,
    Device,
    EnergySource,
    Battery,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetKind::House => "house",
            TargetKind::Device => "device",
            TargetKind::EnergySource => "energy_source",
            TargetKind::Battery => "battery",
        };
        f.write_str(s)
    }
}

/// Creation and modification stamps carried by grid records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Audit {
    /// Stamp a freshly created record. An existing `created_at` is kept.
    pub fn stamp_created(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at = Some(now);
    }
}

/// A durable entity addressable by an opaque string id.
///
/// `COLLECTION` doubles as the cache key prefix (`"<COLLECTION>:<id>"`) and
/// as the name of the command channel for this entity type.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const COLLECTION: &'static str;

    /// Command target when no sub-entity is addressed.
    const KIND: TargetKind;

    /// Command target for owned sub-entities, if the record has any.
    const SUB_KIND: Option<TargetKind> = None;

    fn id(&self) -> &str;

    fn has_sub_entity(&self, _sub_id: &str) -> bool {
        false
    }

    fn audit_mut(&mut self) -> Option<&mut Audit> {
        None
    }

    /// Creation-time validation. Returns a human readable reason on failure.
    fn validate(&self) -> Result<(), String>;
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be blank", field));
    }
    Ok(())
}

pub(crate) fn require_reading(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} must be a non-negative number, got {}", field, value));
    }
    Ok(())
}
