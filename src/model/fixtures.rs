// Sample records shared by unit tests across modules.

use super::*;
use chrono::NaiveDate;

pub(crate) fn house(id: &str, device_ids: &[&str]) -> House {
    House {
        id: id.to_string(),
        name: format!("House {}", id),
        address: "1 Grid Street".to_string(),
        active: true,
        devices: device_ids
            .iter()
            .map(|d| Device {
                id: d.to_string(),
                name: format!("Lamp {}", d),
                device_type: DeviceType::Light,
                state: DeviceState::Off,
                value: None,
                location: "kitchen".to_string(),
                online: true,
            })
            .collect(),
    }
}

pub(crate) fn energy_source(id: &str) -> EnergySource {
    EnergySource {
        id: id.to_string(),
        source_type: "SOLAR".to_string(),
        location: "north-field".to_string(),
        capacity: 500.0,
        current_generation: 120.5,
        status: SourceStatus::Active,
        last_maintenance: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        installation_date: NaiveDate::from_ymd_opt(2021, 6, 15).unwrap(),
        audit: Audit::default(),
    }
}

pub(crate) fn battery(id: &str) -> Battery {
    Battery {
        id: id.to_string(),
        capacity: 200.0,
        current_charge: 150.0,
        health_status: 97.5,
        status: BatteryStatus::Idle,
        last_maintenance: NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
        installation_date: NaiveDate::from_ymd_opt(2022, 1, 5).unwrap(),
        audit: Audit::default(),
    }
}
