use super::{require_text, Record, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A house and the devices installed in it.
///
/// Devices are owned but not cascaded: commands address them by id through
/// the house, and they are never written on their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct House {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_true")]
    pub online: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Light,
    Thermostat,
    AirConditioner,
    Television,
    SmartPlug,
    SecurityCamera,
    DoorLock,
    WindowBlinds,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    On,
    #[default]
    Off,
}

fn default_true() -> bool {
    true
}

impl House {
    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == device_id)
    }
}

impl Record for House {
    const COLLECTION: &'static str = "house";
    const KIND: TargetKind = TargetKind::House;
    const SUB_KIND: Option<TargetKind> = Some(TargetKind::Device);

    fn id(&self) -> &str {
        &self.id
    }

    fn has_sub_entity(&self, sub_id: &str) -> bool {
        self.device(sub_id).is_some()
    }

    fn validate(&self) -> Result<(), String> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            require_text("device id", &device.id)?;
            if !seen.insert(device.id.as_str()) {
                return Err(format!("duplicate device id '{}'", device.id));
            }
        }
        Ok(())
    }
}
