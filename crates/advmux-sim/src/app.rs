//! Simulation driver
//!
//! Starts a runtime over the simulated controller, registers the configured
//! items and reports what the scheduler made of them.

use std::time::Duration;

use advmux_core::{AdvHandle, DiagnosticsSnapshot, GapFlagsItem, SetLayout};
use advmux_runtime::{join_runtime, RuntimeBuilder};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SimConfig;
use crate::error::{Result, SimError};

/// Knobs for a single run, taken from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub duration: Duration,
    pub preset: Option<usize>,
    pub terminate: Option<u8>,
    pub layouts: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub registered: Vec<String>,
    pub rejected: Vec<String>,
    pub commands_sent: usize,
    pub diagnostics: DiagnosticsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layouts: Option<Vec<SetLayout>>,
}

impl SimReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub async fn run_simulation(config: &SimConfig, options: &RunOptions) -> Result<SimReport> {
    let controller = config.controller.build();
    let mut builder = RuntimeBuilder::new()
        .with_config(config.runtime.clone())
        .with_controller(controller.clone());
    if let Some(table) = config.default_parameters() {
        builder = builder.with_default_parameters(table);
    }
    let (handle, task) = builder.build_and_start()?;

    if config.gap_flags && handle.register_gap_flags(Box::new(GapFlagsItem::default())).await?.is_none() {
        warn!("GAP flags item rejected");
    }

    let mut registered = Vec::new();
    let mut rejected = Vec::new();
    for demo in &config.items {
        match handle.register_item(Box::new(demo.build()?)).await? {
            Some(item) => {
                info!(name = %demo.name, %item, "Registered demo item");
                registered.push(demo.name.clone());
            }
            None => {
                warn!(name = %demo.name, "Demo item rejected");
                rejected.push(demo.name.clone());
            }
        }
    }
    handle.refresh().await?;

    if let Some(index) = options.preset {
        if !handle.select_default_preset(index).await? {
            return Err(SimError::Config(format!("no default preset {index}")));
        }
    }

    let half = options.duration / 2;
    tokio::time::sleep(half).await;
    if let Some(id) = options.terminate {
        controller.terminate(AdvHandle::new(id)).await?;
    }
    tokio::time::sleep(options.duration - half).await;
    handle.refresh().await?;

    let diagnostics = handle.diagnostics().await?;
    let layouts = if options.layouts {
        Some(handle.set_layouts().await?)
    } else {
        None
    };

    handle.shutdown().await?;
    join_runtime(task).await?;

    Ok(SimReport {
        registered,
        rejected,
        commands_sent: controller.sent().len(),
        diagnostics,
        layouts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DemoAdvType, DemoItem};

    #[tokio::test(start_paused = true)]
    async fn test_default_demo_goes_live() {
        let options = RunOptions {
            duration: Duration::from_secs(2),
            layouts: true,
            ..RunOptions::default()
        };
        let report = run_simulation(&SimConfig::default(), &options).await.unwrap();

        assert_eq!(report.registered.len(), 4);
        assert!(report.rejected.is_empty());
        assert!(report.diagnostics.sets.iter().all(|set| set.active));
        assert_eq!(report.diagnostics.sets.len(), 3);
        assert_eq!(report.layouts.map(|layouts| layouts.len()), Some(3));
        assert!(report.commands_sent > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_preset_is_an_error() {
        let options = RunOptions {
            preset: Some(12),
            ..RunOptions::default()
        };
        let result = run_simulation(&SimConfig::default(), &options).await;
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_item_is_reported_unplaced() {
        let mut config = SimConfig::default();
        config.gap_flags = false;
        config.items = vec![DemoItem::new(
            "huge",
            DemoAdvType::NonConnectable,
            format!("20ff{}", "ab".repeat(31)),
        )];
        let report = run_simulation(&config, &RunOptions::default()).await.unwrap();

        assert_eq!(report.diagnostics.items, 1);
        assert!(report.diagnostics.sets.is_empty());
    }
}
