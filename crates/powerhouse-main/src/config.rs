// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerhouse.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use powerhouse_adapters::ConnectionSettings;
use powerhouse_core::config::INVERTER_NUMBER_PLACEHOLDER;
use powerhouse_core::{AverageSpec, ControlSettings, ControllerConfig, EntityMap};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Locations searched when no `--config` is given
const CONFIG_LOCATIONS: [&str; 2] = ["/etc/powerhouse/config.toml", "config.toml"];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Websocket API connection
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    /// Inverter balancing
    #[serde(default)]
    pub control: ControlConfig,

    /// Entity ids read and written
    #[serde(default)]
    pub entities: EntityMap,

    /// Moving averages; when absent, the defaults for `entities` are used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averages: Option<Vec<AverageConfig>>,

    /// System configuration
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_ha_url")]
    pub url: String,

    /// Long-lived access token
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: default_ha_url(),
            access_token: String::new(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

fn default_ha_url() -> String {
    "ws://homeassistant.lan:8123/api/websocket".to_owned()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_inverter_count")]
    pub inverter_count: usize,

    /// Rated output of one inverter (W)
    #[serde(default = "default_power_per_inverter_w")]
    pub power_per_inverter_w: f64,

    #[serde(default = "default_enable_margin")]
    pub enable_margin: f64,

    #[serde(default = "default_disable_margin")]
    pub disable_margin: f64,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            inverter_count: default_inverter_count(),
            power_per_inverter_w: default_power_per_inverter_w(),
            enable_margin: default_enable_margin(),
            disable_margin: default_disable_margin(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_inverter_count() -> usize {
    9
}

fn default_power_per_inverter_w() -> f64 {
    250.0
}

fn default_enable_margin() -> f64 {
    1.5
}

fn default_disable_margin() -> f64 {
    0.5
}

fn default_cooldown_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageConfig {
    pub input: String,
    pub output: String,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Log commands instead of sending them
    #[serde(default)]
    pub debug_mode: bool,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl AppConfig {
    /// Load from `path`, or the first existing default location, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(path)? {
            Some(path) => {
                let config = Self::from_file(&path)?;
                info!("✅ Loaded configuration from {}", path.display());
                config
            }
            None => {
                warn!("No configuration file found, using defaults with environment overrides");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn locate(path: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Configuration file {} does not exist", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }
        Ok(CONFIG_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Override selected values from the environment (`HA_WS_URL`, `HA_TOKEN`, `DEBUG_MODE`)
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("HA_WS_URL") {
            self.home_assistant.url = url;
        }
        if let Some(token) = var("HA_TOKEN") {
            self.home_assistant.access_token = token;
        }
        if let Some(debug_mode) = var("DEBUG_MODE")
            && let Ok(enabled) = debug_mode.parse::<bool>()
        {
            self.system.debug_mode = enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ha = &self.home_assistant;
        if ha.access_token.trim().is_empty() {
            anyhow::bail!("home_assistant.access_token is required (or set HA_TOKEN)");
        }
        if !(ha.url.starts_with("ws://") || ha.url.starts_with("wss://")) {
            anyhow::bail!(
                "home_assistant.url must be a ws:// or wss:// URL, got '{}'",
                ha.url
            );
        }
        if ha.reconnect_delay_secs == 0 {
            anyhow::bail!("home_assistant.reconnect_delay_secs must be at least 1");
        }

        let control = &self.control;
        if control.inverter_count == 0 {
            anyhow::bail!("control.inverter_count must be at least 1");
        }
        if control.power_per_inverter_w <= 0.0 || !control.power_per_inverter_w.is_finite() {
            anyhow::bail!(
                "control.power_per_inverter_w must be positive, got {}",
                control.power_per_inverter_w
            );
        }
        for (name, margin) in [
            ("enable_margin", control.enable_margin),
            ("disable_margin", control.disable_margin),
        ] {
            if !margin.is_finite() || margin < 0.0 {
                anyhow::bail!("control.{} must be a non-negative number, got {}", name, margin);
            }
        }
        if control.cooldown_secs == 0 {
            anyhow::bail!("control.cooldown_secs must be at least 1");
        }

        for (name, pattern) in [
            ("inverter_switch_pattern", &self.entities.inverter_switch_pattern),
            ("inverter_power_pattern", &self.entities.inverter_power_pattern),
        ] {
            if !pattern.contains(INVERTER_NUMBER_PLACEHOLDER) {
                anyhow::bail!(
                    "entities.{} must contain '{}' for the inverter number",
                    name,
                    INVERTER_NUMBER_PLACEHOLDER
                );
            }
        }

        let mut outputs = HashSet::new();
        for average in self.average_specs() {
            if average.window < Duration::from_secs(1) {
                anyhow::bail!("Average '{}' needs a window of at least 1 s", average.output);
            }
            if !outputs.insert(average.output.clone()) {
                anyhow::bail!("Average output '{}' is configured twice", average.output);
            }
        }

        Ok(())
    }

    pub fn average_specs(&self) -> Vec<AverageSpec> {
        match &self.averages {
            Some(averages) => averages
                .iter()
                .map(|a| {
                    AverageSpec::new(
                        a.input.clone(),
                        a.output.clone(),
                        Duration::from_secs(a.window_secs),
                    )
                })
                .collect(),
            None => AverageSpec::defaults(&self.entities),
        }
    }

    pub fn is_debug_mode(&self) -> bool {
        self.system.debug_mode
    }
}

impl From<&AppConfig> for ControllerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            entities: config.entities.clone(),
            control: ControlSettings {
                inverter_count: config.control.inverter_count,
                power_per_inverter_w: config.control.power_per_inverter_w,
                enable_margin: config.control.enable_margin,
                disable_margin: config.control.disable_margin,
                cooldown: Duration::from_secs(config.control.cooldown_secs),
            },
            averages: config.average_specs(),
            dry_run: config.system.debug_mode,
        }
    }
}

impl From<&AppConfig> for ConnectionSettings {
    fn from(config: &AppConfig) -> Self {
        let subscriptions = config.entities.subscriptions(config.control.inverter_count);
        ConnectionSettings::new(
            config.home_assistant.url.clone(),
            config.home_assistant.access_token.clone(),
            subscriptions,
        )
        .with_reconnect_delay(Duration::from_secs(
            config.home_assistant.reconnect_delay_secs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.home_assistant.access_token = "token".to_owned();
        config
    }

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(
            config.home_assistant.url,
            "ws://homeassistant.lan:8123/api/websocket"
        );
        assert_eq!(config.home_assistant.reconnect_delay_secs, 5);
        assert_eq!(config.control.inverter_count, 9);
        assert_eq!(config.control.power_per_inverter_w, 250.0);
        assert_eq!(config.control.cooldown_secs, 5);
        assert!(!config.is_debug_mode());
        assert_eq!(config.average_specs().len(), 3);

        // No token by default
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let file = write_config(
            r#"
[home_assistant]
url = "wss://ha.example.com/api/websocket"
access_token = "abc"

[control]
inverter_count = 4

[entities]
manual_override = "input_boolean.inverters_manual"
"#,
        );

        let config = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(config.home_assistant.access_token, "abc");
        assert_eq!(config.home_assistant.reconnect_delay_secs, 5);
        assert_eq!(config.control.inverter_count, 4);
        assert_eq!(config.control.enable_margin, 1.5);
        assert_eq!(config.entities.manual_override, "input_boolean.inverters_manual");
        assert_eq!(config.entities.load, EntityMap::default().load);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_custom_averages() {
        let file = write_config(
            r#"
[home_assistant]
access_token = "abc"

[[averages]]
input = "sensor.grid_power"
output = "sensor.grid_power_average"
window_secs = 300
"#,
        );

        let config = AppConfig::load(Some(file.path())).unwrap();
        let specs = config.average_specs();

        assert_eq!(
            specs,
            vec![AverageSpec::new(
                "sensor.grid_power",
                "sensor.grid_power_average",
                Duration::from_secs(300)
            )]
        );
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let file = write_config("[control\ninverter_count = ");
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HA_WS_URL", "ws://10.0.0.2:8123/api/websocket"),
            ("HA_TOKEN", "from-env"),
            ("DEBUG_MODE", "true"),
        ]);
        let mut config = AppConfig::default();

        config.apply_env(|key| env.get(key).map(|v| (*v).to_owned()));

        assert_eq!(config.home_assistant.url, "ws://10.0.0.2:8123/api/websocket");
        assert_eq!(config.home_assistant.access_token, "from-env");
        assert!(config.is_debug_mode());
    }

    #[test]
    fn test_env_ignores_unparseable_debug_mode() {
        let mut config = AppConfig::default();
        config.apply_env(|key| (key == "DEBUG_MODE").then(|| "sometimes".to_owned()));
        assert!(!config.is_debug_mode());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.home_assistant.url = "http://homeassistant.lan:8123".to_owned();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.control.inverter_count = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.control.power_per_inverter_w = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.control.disable_margin = -0.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.control.cooldown_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.entities.inverter_switch_pattern = "switch.inverter".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_margins() {
        for margin in [f64::NAN, f64::INFINITY] {
            let mut config = valid();
            config.control.enable_margin = margin;
            assert!(config.validate().is_err());

            let mut config = valid();
            config.control.disable_margin = margin;
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_validate_rejects_zero_reconnect_delay() {
        let mut config = valid();
        config.home_assistant.reconnect_delay_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_delay_secs"));
    }

    #[test]
    fn test_validate_rejects_bad_averages() {
        let average = |output: &str, window_secs| AverageConfig {
            input: "sensor.in".to_owned(),
            output: output.to_owned(),
            window_secs,
        };

        let mut config = valid();
        config.averages = Some(vec![average("sensor.out", 0)]);
        assert!(config.validate().is_err());

        config.averages = Some(vec![average("sensor.out", 60), average("sensor.out", 30)]);
        assert!(config.validate().is_err());

        config.averages = Some(vec![average("sensor.out", 60), average("sensor.other", 30)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_into_core_and_connection_settings() {
        let mut config = valid();
        config.control.inverter_count = 2;
        config.control.cooldown_secs = 7;
        config.system.debug_mode = true;

        let core = ControllerConfig::from(&config);
        assert_eq!(core.control.cooldown, Duration::from_secs(7));
        assert!(core.dry_run);
        assert_eq!(core.derived_keys().len(), 3);

        let connection = ConnectionSettings::from(&config);
        assert_eq!(connection.access_token, "token");
        assert_eq!(connection.subscriptions, core.subscriptions());
        assert_eq!(connection.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_toml_serialization() {
        let config = valid();
        let toml_str = toml::to_string_pretty(&config).unwrap();

        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.home_assistant.url, deserialized.home_assistant.url);
        assert_eq!(config.entities, deserialized.entities);
        assert!(deserialized.validate().is_ok());
    }
}
