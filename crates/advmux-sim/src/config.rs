//! Simulator Configuration
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - a TOML file (`advmux.toml` unless `--config` names another)
//! - environment variables prefixed `ADVMUX_`, nested with `__`
//!   (for example `ADVMUX_CONTROLLER__LATENCY_MS=5`)

use std::time::Duration;

use advmux_core::{
    AdvType, DefaultParametersTable, ItemInfo, ItemParams, LocalAddressKind, StaticItem,
};
use advmux_runtime::{RuntimeConfig, SimulatedController};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

pub const DEFAULT_CONFIG_FILE: &str = "advmux.toml";

// ----------------------------------------------------------------------------
// Simulator Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub runtime: RuntimeConfig,
    pub controller: ControllerConfig,
    /// Register the GAP flags item before the demo items
    pub gap_flags: bool,
    /// Install the standard fast/normal/slow interval table
    pub default_presets: bool,
    pub items: Vec<DemoItem>,
}

/// Behaviour of the simulated radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay before each confirmation is delivered
    pub latency_ms: u64,
    /// Random address writes answered with controller-busy at start-up
    pub busy_address_writes: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            latency_ms: 2,
            busy_address_writes: 0,
        }
    }
}

impl ControllerConfig {
    pub fn build(&self) -> SimulatedController {
        SimulatedController::new(Duration::from_millis(self.latency_ms))
            .with_busy_address_writes(self.busy_address_writes)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            controller: ControllerConfig::default(),
            gap_flags: true,
            default_presets: true,
            items: vec![
                DemoItem::new("name", DemoAdvType::ConnectableScannable, "0709 6164766d7578"),
                DemoItem::new("beacon", DemoAdvType::NonConnectable, "0bff4c000215a1b2c3d4e5f6")
                    .with_rotation(480, 900),
                DemoItem::new("sensor", DemoAdvType::ExtendedScannable, "0eff5900 0102030405060708090a0b"),
                DemoItem {
                    scan_response: true,
                    ..DemoItem::new("tx-power", DemoAdvType::ExtendedScannable, "020a08")
                },
            ],
        }
    }
}

impl SimConfig {
    /// Load defaults, then `path` (or `advmux.toml`), then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path.unwrap_or(DEFAULT_CONFIG_FILE);
        let config: SimConfig = Figment::from(Serialized::defaults(SimConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("ADVMUX_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        for item in &self.items {
            item.payload()?;
        }
        Ok(())
    }

    pub fn default_parameters(&self) -> Option<DefaultParametersTable> {
        self.default_presets.then(DefaultParametersTable::standard)
    }
}

// ----------------------------------------------------------------------------
// Demo Items
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemoAdvType {
    ConnectableScannable,
    Scannable,
    NonConnectable,
    Directed,
    ExtendedConnectable,
    ExtendedScannable,
}

impl From<DemoAdvType> for AdvType {
    fn from(kind: DemoAdvType) -> Self {
        match kind {
            DemoAdvType::ConnectableScannable => AdvType::LEGACY_CONNECTABLE_SCANNABLE,
            DemoAdvType::Scannable => AdvType::LEGACY_SCANNABLE,
            DemoAdvType::NonConnectable => AdvType::LEGACY_NON_CONNECTABLE,
            DemoAdvType::Directed => AdvType::LEGACY_DIRECTED,
            DemoAdvType::ExtendedConnectable => AdvType::EXTENDED_CONNECTABLE,
            DemoAdvType::ExtendedScannable => AdvType::EXTENDED_SCANNABLE,
        }
    }
}

/// One client item registered by the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoItem {
    pub name: String,
    pub adv_type: DemoAdvType,
    /// Formatted AD structures as hex; whitespace is ignored
    pub data: String,
    #[serde(default)]
    pub scan_response: bool,
    #[serde(default)]
    pub own_set: bool,
    /// Custom interval in 0.625 ms units; presets apply when absent
    #[serde(default)]
    pub interval: Option<(u32, u32)>,
    /// Resolvable private address rotated within these bounds in seconds
    #[serde(default)]
    pub rotation: Option<(u32, u32)>,
}

impl DemoItem {
    pub fn new(name: impl Into<String>, adv_type: DemoAdvType, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adv_type,
            data: data.into(),
            scan_response: false,
            own_set: false,
            interval: None,
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.rotation = Some((min_secs, max_secs));
        self
    }

    pub fn payload(&self) -> Result<Vec<u8>> {
        let compact: String = self.data.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(compact).map_err(|source| SimError::ItemData {
            name: self.name.clone(),
            source,
        })
    }

    fn params(&self) -> Option<ItemParams> {
        if self.interval.is_none() && self.rotation.is_none() {
            return None;
        }
        let mut params = ItemParams::default();
        if let Some((min, max)) = self.interval {
            params = params.with_interval(min, max);
        }
        if let Some((min, max)) = self.rotation {
            params = params
                .with_random_address(LocalAddressKind::GenerateResolvable, None)
                .with_rotation(min, max);
        }
        Some(params)
    }

    pub fn build(&self) -> Result<StaticItem> {
        let data = self.payload()?;
        let adv_type = AdvType::from(self.adv_type);
        let info = if self.scan_response {
            ItemInfo::scan_response(adv_type, data.len())
        } else {
            ItemInfo::advert(adv_type, data.len())
        }
        .with_own_set(self.own_set);

        let item = StaticItem::new(info, data);
        Ok(match self.params() {
            Some(params) => item.with_params(params),
            None => item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_items_decode() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        let name = config.items[0].build().unwrap();
        assert_eq!(advmux_core::AdvertisingItem::info(&name).data_size, 8);
    }

    #[test]
    fn test_bad_hex_names_the_item() {
        let item = DemoItem::new("broken", DemoAdvType::NonConnectable, "0g");
        match item.build() {
            Err(SimError::ItemData { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_toml_layers_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "sim.toml",
                r#"
                gap_flags = false

                [controller]
                latency_ms = 9

                [[items]]
                name = "solo"
                adv_type = "extended-connectable"
                data = "03ff0102"
                interval = [32, 48]
                "#,
            )?;
            jail.set_env("ADVMUX_CONTROLLER__BUSY_ADDRESS_WRITES", "2");

            let config = SimConfig::load(Some("sim.toml")).map_err(|err| err.to_string())?;
            assert!(!config.gap_flags);
            assert!(config.default_presets);
            assert_eq!(config.controller.latency_ms, 9);
            assert_eq!(config.controller.busy_address_writes, 2);
            assert_eq!(config.items.len(), 1);
            assert_eq!(config.items[0].adv_type, DemoAdvType::ExtendedConnectable);
            assert_eq!(config.items[0].interval, Some((32, 48)));
            Ok(())
        });
    }
}
