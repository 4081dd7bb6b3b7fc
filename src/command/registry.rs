use super::Action;
use crate::error::CityError;
use crate::model::TargetKind;
use std::collections::{HashMap, HashSet};

/// Which actions each target kind accepts.
///
/// Open for extension through [`ActionRegistry::register`], but every action
/// is validated here at the dispatcher boundary, never at the actuator.
#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    allowed: HashMap<TargetKind, HashSet<Action>>,
}

impl ActionRegistry {
    /// Empty registry: rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device, energy source and battery vocabularies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for action in [Action::On, Action::Off, Action::SetValue] {
            registry.register(TargetKind::Device, action);
        }
        for action in [Action::Start, Action::Stop, Action::SetGeneration] {
            registry.register(TargetKind::EnergySource, action);
        }
        for action in [Action::Charge, Action::Discharge, Action::SetValue] {
            registry.register(TargetKind::Battery, action);
        }
        registry
    }

    pub fn register(&mut self, kind: TargetKind, action: Action) -> &mut Self {
        self.allowed.entry(kind).or_default().insert(action);
        self
    }

    pub fn allows(&self, kind: TargetKind, action: Action) -> bool {
        self.allowed
            .get(&kind)
            .map_or(false, |actions| actions.contains(&action))
    }

    /// Parse and validate a raw action for `kind`.
    ///
    /// Rules:
    /// - name must be a known action (case-insensitive)
    /// - action must be registered for `kind`
    /// - SET_VALUE / SET_GENERATION require a value
    /// - a value, when present, must be finite
    pub fn validate(
        &self,
        kind: TargetKind,
        raw_action: &str,
        value: Option<f64>,
    ) -> Result<Action, CityError> {
        let action: Action = raw_action
            .parse()
            .map_err(|e: super::UnknownAction| CityError::InvalidAction(e.to_string()))?;

        if !self.allows(kind, action) {
            return Err(CityError::InvalidAction(format!(
                "action {} is not supported for {}",
                action, kind
            )));
        }

        match value {
            None if action.requires_value() => Err(CityError::InvalidAction(format!(
                "action {} requires a value",
                action
            ))),
            Some(v) if !v.is_finite() => Err(CityError::InvalidAction(format!(
                "value must be a finite number, got {}",
                v
            ))),
            _ => Ok(action),
        }
    }
}
