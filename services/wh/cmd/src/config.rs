//! Configuration handling for the whlink demo.
//!
//! Reads the session parameters and the demo scenario from a YAML file, then
//! applies `WH_*` environment overrides on top.

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use wh_session::{ConnectMode, SessionConfig};

/// Which side of the link this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Coordinator
    Parent,
    /// Peer
    Child,
}

/// Communication running on top of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Traffic {
    /// Direct datagrams
    Mp,
    /// Data sharing
    Ds,
    /// Key sharing
    Ks,
}

impl Traffic {
    /// Connect mode for this traffic on `role`
    pub fn connect_mode(self, role: Role) -> ConnectMode {
        match (role, self) {
            (Role::Parent, Traffic::Mp) => ConnectMode::MpParent,
            (Role::Parent, Traffic::Ds) => ConnectMode::DsParent,
            (Role::Parent, Traffic::Ks) => ConnectMode::KsParent,
            (Role::Child, Traffic::Mp) => ConnectMode::MpChild,
            (Role::Child, Traffic::Ds) => ConnectMode::DsChild,
            (Role::Child, Traffic::Ks) => ConnectMode::KsChild,
        }
    }
}

/// Scenario the demo plays against the simulated gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Side of the link
    pub role: Role,
    /// Traffic once linked
    pub traffic: Traffic,
    /// Radio channel; 0 lets the coordinator survey and peers cycle
    pub channel: u8,
    /// Session identifier the coordinator advertises
    pub tgid: u16,
    /// Peers that join a simulated coordinator
    pub peers: u16,
    /// Traffic cycles before finalizing
    pub cycles: u32,
    /// Pause between cycles in milliseconds
    pub cycle_interval_ms: u64,
    /// Survey channels before starting a coordinator
    pub measure: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            role: Role::Parent,
            traffic: Traffic::Ds,
            channel: 0,
            tgid: 1,
            peers: 3,
            cycles: 10,
            cycle_interval_ms: 100,
            measure: true,
        }
    }
}

/// whlink configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhConfig {
    /// Session parameters
    pub session: SessionConfig,
    /// Demo scenario
    pub demo: DemoConfig,
}

impl WhConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<WhConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final wh configuration: ggid={:#010x}, max_children={}, role={:?}, traffic={:?}, channel={}",
            config.session.ggid,
            config.session.max_children,
            config.demo.role,
            config.demo.traffic,
            config.demo.channel
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ggid) = lookup("WH_GGID").and_then(|v| parse_u32(&v)) {
            self.session.ggid = ggid;
            info!("GGID overridden by environment: {:#010x}", ggid);
        }

        if let Some(channel) = lookup("WH_CHANNEL").and_then(|v| v.parse::<u8>().ok()) {
            self.demo.channel = channel;
            info!("Channel overridden by environment: {}", channel);
        }

        if let Some(tgid) = lookup("WH_TGID").and_then(|v| v.parse::<u16>().ok()) {
            self.demo.tgid = tgid;
            info!("TGID overridden by environment: {}", tgid);
        }

        if let Some(max) = lookup("WH_MAX_CHILDREN").and_then(|v| v.parse::<u16>().ok()) {
            self.session.max_children = max;
            info!("Max children overridden by environment: {}", max);
        }
    }
}

/// Decimal or `0x`-prefixed hex
fn parse_u32(value: &str) -> Option<u32> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wh_session::BringUp;

    #[test]
    fn test_default_config() {
        let config = WhConfig::default();
        assert_eq!(config.session.max_children, 15);
        assert_eq!(config.demo.role, Role::Parent);
        assert_eq!(config.demo.traffic, Traffic::Ds);
        assert_eq!(config.demo.channel, 0);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
session:
  ggid: 4194065
  ssid: "lobby"
  max_children: 4
  bring_up: detailed
demo:
  role: child
  traffic: ks
  channel: 7
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = WhConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.session.ggid, 4194065);
        assert_eq!(config.session.ssid, "lobby");
        assert_eq!(config.session.max_children, 4);
        assert_eq!(config.session.bring_up, BringUp::Detailed);
        assert_eq!(config.session.ds_data_size, 12);
        assert_eq!(config.demo.role, Role::Child);
        assert_eq!(config.demo.traffic, Traffic::Ks);
        assert_eq!(config.demo.channel, 7);
        assert_eq!(config.demo.cycles, 10);
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"session: [not, a, map").unwrap();

        let config = WhConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WhConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.demo, DemoConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("WH_GGID", "0x003fff22"),
            ("WH_CHANNEL", "13"),
            ("WH_TGID", "42"),
            ("WH_MAX_CHILDREN", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = WhConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.session.ggid, 0x003f_ff22);
        assert_eq!(config.demo.channel, 13);
        assert_eq!(config.demo.tgid, 42);
        assert_eq!(config.session.max_children, 15);
    }

    #[test]
    fn test_traffic_maps_to_connect_mode() {
        assert_eq!(Traffic::Ds.connect_mode(Role::Parent), ConnectMode::DsParent);
        assert_eq!(Traffic::Mp.connect_mode(Role::Child), ConnectMode::MpChild);
        assert!(!Traffic::Ks.connect_mode(Role::Child).is_parent());
    }
}
