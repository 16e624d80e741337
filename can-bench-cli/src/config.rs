//! Bench file loading and validation

use anyhow::{bail, Context, Result};
use can_bench::{InjectFrame, LoadOptions, Scenario};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from bench.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub bus: BusConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// CAN interface (`can0`, `vcan0`) or `virtual` for a silent in-memory bus
    pub interface: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// DBC file; relative paths are taken from the bench file's directory
    pub path: PathBuf,
    #[serde(flatten)]
    pub options: LoadOptions,
}

impl AppConfig {
    fn validate(&self) -> Result<()> {
        if self.bus.interface.trim().is_empty() {
            bail!("[bus] interface must not be empty");
        }
        if self.scenarios.is_empty() {
            bail!("no [[scenario]] entries");
        }
        if self.database.is_none() {
            if let Some(scenario) = self.scenarios.iter().find(|s| needs_database(s)) {
                bail!(
                    "scenario '{}' uses DBC messages but no [database] is configured",
                    scenario.name()
                );
            }
        }
        Ok(())
    }
}

fn needs_database(scenario: &Scenario) -> bool {
    match scenario {
        Scenario::RequestResponse(_) => true,
        Scenario::Injection(s) => {
            s.watch.is_some() || s.inject.iter().any(|i| matches!(i, InjectFrame::Encoded(_)))
        }
        Scenario::Burst(_) | Scenario::Monitor(_) => false,
    }
}

/// Load a bench file from TOML
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    if let Some(database) = &mut config.database {
        if database.path.is_relative() {
            if let Some(dir) = path.parent() {
                database.path = dir.join(&database.path);
            }
        }
    }

    Ok(config)
}
