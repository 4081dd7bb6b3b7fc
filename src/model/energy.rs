use super::{require_reading, require_text, Audit, Record, TargetKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A generation asset on the grid (solar farm, wind turbine, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergySource {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub location: String,
    /// Nameplate capacity (kW)
    pub capacity: f64,
    /// Current output (kW)
    pub current_generation: f64,
    pub status: SourceStatus,
    pub last_maintenance: NaiveDate,
    pub installation_date: NaiveDate,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Active,
    Inactive,
    Maintenance,
    Fault,
}

/// A storage asset on the grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    pub id: String,
    /// Capacity (kWh)
    pub capacity: f64,
    /// Stored energy (kWh)
    pub current_charge: f64,
    /// State of health, percent
    pub health_status: f64,
    #[serde(rename = "batteryStatus")]
    pub status: BatteryStatus,
    pub last_maintenance: NaiveDate,
    pub installation_date: NaiveDate,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryStatus {
    Charging,
    Discharging,
    Idle,
    Maintenance,
    Fault,
}

impl Record for EnergySource {
    const COLLECTION: &'static str = "energysource";
    const KIND: TargetKind = TargetKind::EnergySource;

    fn id(&self) -> &str {
        &self.id
    }

    fn audit_mut(&mut self) -> Option<&mut Audit> {
        Some(&mut self.audit)
    }

    fn validate(&self) -> Result<(), String> {
        require_text("id", &self.id)?;
        require_text("type", &self.source_type)?;
        require_text("location", &self.location)?;
        require_reading("capacity", self.capacity)?;
        require_reading("currentGeneration", self.current_generation)?;
        Ok(())
    }
}

impl Record for Battery {
    const COLLECTION: &'static str = "battery";
    const KIND: TargetKind = TargetKind::Battery;

    fn id(&self) -> &str {
        &self.id
    }

    fn audit_mut(&mut self) -> Option<&mut Audit> {
        Some(&mut self.audit)
    }

    fn validate(&self) -> Result<(), String> {
        require_text("id", &self.id)?;
        require_reading("capacity", self.capacity)?;
        require_reading("currentCharge", self.current_charge)?;
        require_reading("healthStatus", self.health_status)?;
        if self.current_charge > self.capacity {
            return Err(format!(
                "currentCharge {} exceeds capacity {}",
                self.current_charge, self.capacity
            ));
        }
        Ok(())
    }
}
