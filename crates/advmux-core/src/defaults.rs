//! Default Parameter Policy
//!
//! Items that do not bring their own parameters advertise with a shared
//! baseline. A client may register a table of named interval presets; the
//! active preset overrides the baseline interval, and a preset may ask to fall
//! back to the slow preset after a delay.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ContractError;
use crate::item::{IntervalRange, ItemParams};

/// One named interval setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalPreset {
    pub name: String,
    pub interval: IntervalRange,
    /// Switch to the slow preset this many milliseconds after selection
    #[serde(default)]
    pub fallback_ms: Option<u64>,
}

impl IntervalPreset {
    pub fn new(name: impl Into<String>, min: u32, max: u32) -> Self {
        Self {
            name: name.into(),
            interval: IntervalRange::new(min, max),
            fallback_ms: None,
        }
    }

    pub fn with_fallback(mut self, after: Duration) -> Self {
        self.fallback_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn fallback_after(&self) -> Option<Duration> {
        self.fallback_ms.map(Duration::from_millis)
    }
}

/// Client-registered preset table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultParametersTable {
    pub presets: Vec<IntervalPreset>,
    /// Preset selected when a fallback delay expires
    pub slow_preset: usize,
}

impl DefaultParametersTable {
    /// Fast for 30 s after selection, a moderate rate, and a 1 s idle rate
    pub fn standard() -> Self {
        Self {
            presets: vec![
                IntervalPreset::new("fast", 48, 96).with_fallback(Duration::from_secs(30)),
                IntervalPreset::new("normal", 160, 240),
                IntervalPreset::new("slow", 1600, 2000),
            ],
            slow_preset: 2,
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.presets.is_empty() {
            return Err(invalid("no presets"));
        }
        if self.slow_preset >= self.presets.len() {
            return Err(invalid("slow preset index out of range"));
        }
        for preset in &self.presets {
            if preset.interval.min == 0 || preset.interval.min > preset.interval.max {
                return Err(invalid(format!("preset {} has an empty interval", preset.name)));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ContractError {
    ContractError::InvalidDefaults {
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultParameterPolicy {
    baseline: ItemParams,
    table: Option<DefaultParametersTable>,
    active: Option<usize>,
}

impl DefaultParameterPolicy {
    pub fn new(baseline: ItemParams) -> Self {
        Self {
            baseline,
            table: None,
            active: None,
        }
    }

    /// Install a preset table; no preset is active until one is selected
    pub fn register(&mut self, table: DefaultParametersTable) -> Result<(), ContractError> {
        table.validate()?;
        self.table = Some(table);
        self.active = None;
        Ok(())
    }

    /// Fill `out` with the baseline, overriding the interval from the active preset
    pub fn populate_defaults(&self, out: &mut ItemParams) {
        *out = self.baseline;
        if let Some(preset) = self.active_preset() {
            out.interval = preset.interval;
        }
    }

    pub fn defaults(&self) -> ItemParams {
        let mut params = self.baseline;
        self.populate_defaults(&mut params);
        params
    }

    /// Make preset `index` active; `None` if no such preset exists
    pub fn select(&mut self, index: usize) -> Option<&IntervalPreset> {
        let table = self.table.as_ref()?;
        let preset = table.presets.get(index)?;
        self.active = Some(index);
        Some(preset)
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn active_preset(&self) -> Option<&IntervalPreset> {
        self.table.as_ref()?.presets.get(self.active?)
    }

    pub fn slow_preset(&self) -> Option<usize> {
        self.table.as_ref().map(|table| table.slow_preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_without_presets() {
        let policy = DefaultParameterPolicy::new(ItemParams::default());
        assert_eq!(policy.defaults(), ItemParams::default());
        assert!(policy.active_preset().is_none());
    }

    #[test]
    fn test_selected_preset_overrides_interval() {
        let mut policy = DefaultParameterPolicy::new(ItemParams::default().with_channel_map(0x01));
        policy.register(DefaultParametersTable::standard()).unwrap();

        let preset = policy.select(0).unwrap();
        assert_eq!(preset.fallback_after(), Some(Duration::from_secs(30)));

        let mut params = ItemParams::default();
        policy.populate_defaults(&mut params);
        assert_eq!(params.interval, IntervalRange::new(48, 96));
        assert_eq!(params.channel_map, 0x01);

        assert!(policy.select(9).is_none());
        assert_eq!(policy.active(), Some(0));
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let mut policy = DefaultParameterPolicy::default();
        let empty = DefaultParametersTable {
            presets: Vec::new(),
            slow_preset: 0,
        };
        assert!(policy.register(empty).is_err());

        let inverted = DefaultParametersTable {
            presets: vec![IntervalPreset::new("odd", 200, 100)],
            slow_preset: 0,
        };
        assert!(matches!(
            policy.register(inverted),
            Err(ContractError::InvalidDefaults { .. })
        ));
        assert!(policy.select(0).is_none());
    }
}
