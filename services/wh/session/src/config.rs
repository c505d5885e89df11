//! Session configuration.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wh_gateway::SSID_LENGTH;

/// Build a system application identifier
pub const fn system_ggid(num: u32) -> u32 {
    0x003F_FF00 | (num & 0xff)
}

/// How the radio is brought up and down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BringUp {
    /// One initialize request, one end request
    #[default]
    Combined,
    /// System init, enable, power on; power off, disable
    Detailed,
}

/// Configuration for a wh session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Application identifier advertised and matched in beacons
    pub ggid: u32,
    /// Connection SSID presented when joining
    pub ssid: String,
    /// User payload advertised by the coordinator
    pub user_game_info: Vec<u8>,
    /// Maximum coordinator payload per cycle
    pub parent_max_size: u16,
    /// Maximum peer payload per cycle
    pub child_max_size: u16,
    /// Peer capacity of a coordinator
    pub max_children: u16,
    /// Messaging cycles per frame
    pub mp_frequency: u16,
    /// Port for direct datagrams
    pub data_port: u16,
    /// Send priority for direct datagrams
    pub data_priority: u8,
    /// Port for data and key sharing
    pub sharing_port: u16,
    /// Bytes each node contributes per data-sharing cycle
    pub ds_data_size: u16,
    /// Radio bring-up style
    pub bring_up: BringUp,
    /// Fixed seed for channel tie resolution; derived from the radio when absent
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ggid: system_ggid(0x11),
            ssid: String::new(),
            user_game_info: Vec::new(),
            parent_max_size: 512,
            child_max_size: 128,
            max_children: 15,
            mp_frequency: 1,
            data_port: 14,
            data_priority: 1,
            sharing_port: 13,
            ds_data_size: 12,
            bring_up: BringUp::Combined,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// SSID zero-padded or truncated to the fixed connection length
    pub fn connection_ssid(&self) -> Bytes {
        let mut ssid = vec![0u8; SSID_LENGTH];
        let raw = self.ssid.as_bytes();
        let n = raw.len().min(SSID_LENGTH);
        ssid[..n].copy_from_slice(&raw[..n]);
        Bytes::from(ssid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ggid() {
        assert_eq!(system_ggid(0x11), 0x003F_FF11);
    }

    #[test]
    fn test_connection_ssid_is_fixed_length() {
        let mut config = SessionConfig::default();
        config.ssid = "player".to_string();
        let ssid = config.connection_ssid();
        assert_eq!(ssid.len(), SSID_LENGTH);
        assert_eq!(&ssid[..6], b"player");
        assert!(ssid[6..].iter().all(|b| *b == 0));

        config.ssid = "x".repeat(40);
        assert_eq!(config.connection_ssid().len(), SSID_LENGTH);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: SessionConfig =
            serde_yaml::from_str("ggid: 4194065\nbring_up: detailed\n").unwrap();
        assert_eq!(config.ggid, 4194065);
        assert_eq!(config.bring_up, BringUp::Detailed);
        assert_eq!(config.max_children, 15);
    }
}
