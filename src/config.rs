// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! On-disk node configuration (TOML via `serde`), in the shape of the
//! teacher's `core::types::NodeConfig`/`NodeP2pConfig`.
//!
//! Persisted state proper is out of scope (§6: "Persisted state: none" —
//! identity is re-rolled on each start unless an application supplies a
//! node-id), but *configuring* a run — which profile, which interfaces,
//! whether to run read-only, an optional SHSP PSK — is ambient stack any
//! complete binary needs.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Which profile to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Plain HNCP: no key-value dictionary.
    Hncp,
    /// HNCP plus the SHSP key-value profile.
    Shsp,
}

impl Default for ProfileKind {
    fn default() -> Self {
        ProfileKind::Hncp
    }
}

/// Top-level node configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Which profile to run (§4.6/§4.7).
    #[serde(default)]
    pub profile: ProfileKind,
    /// Override the node-id instead of rolling a random one at startup.
    /// Hex-encoded, must be `profile.node_id_len()` bytes once decoded.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Interface names to bind HNCP's multicast transport to (§6).
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Read-only mode: never publish non-Neighbor TLVs (§4.4, §8 scenario
    /// 6). Corresponds to the CLI's `-w`/write-enabled flag being absent.
    #[serde(default)]
    pub read_only: bool,
    /// SHSP pre-shared key, hex-encoded. Only meaningful when
    /// `profile == Shsp`; `None` means SHSP runs without the PSK-HMAC-style
    /// integrity envelope (§4.7).
    #[serde(default)]
    pub psk: Option<String>,
    /// Multicast group to bind (defaults to HNCP's `ff02::8808`).
    #[serde(default)]
    pub multicast_group: Option<String>,
    /// Multicast/unicast port (defaults to HNCP's 8808).
    #[serde(default)]
    pub port: Option<u16>,
    /// Prometheus `/metrics` HTTP listen address, e.g. `"0.0.0.0:9102"`.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl NodeConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: NodeConfig = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Decode [`NodeConfig::node_id`] to raw bytes, if set.
    pub fn node_id_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.node_id {
            Some(s) => hex::decode(s)
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("node_id: {e}"))),
            None => Ok(None),
        }
    }

    /// Decode [`NodeConfig::psk`] to raw bytes, if set.
    pub fn psk_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.psk {
            Some(s) => hex::decode(s)
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("psk: {e}"))),
            None => Ok(None),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one interface is required".to_string(),
            ));
        }
        if let Some(id) = &self.node_id {
            if hex::decode(id).map(|b| b.len()) != Ok(crate::profile::hncp::Hncp::NODE_ID_LENGTH) {
                return Err(ConfigError::Invalid(format!(
                    "node_id must decode to {} bytes",
                    crate::profile::hncp::Hncp::NODE_ID_LENGTH
                )));
            }
        }
        if self.psk.is_some() && self.profile != ProfileKind::Shsp {
            return Err(ConfigError::Invalid(
                "psk is only meaningful for profile = \"shsp\"".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            interfaces = ["eth0"]
        "#;
        let cfg: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.profile, ProfileKind::Hncp);
        assert_eq!(cfg.interfaces, vec!["eth0".to_string()]);
        assert!(!cfg.read_only);
    }

    #[test]
    fn rejects_psk_without_shsp_profile() {
        let toml = r#"
            interfaces = ["eth0"]
            psk = "deadbeef"
        "#;
        let cfg: NodeConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_interface_list() {
        let cfg = NodeConfig {
            profile: ProfileKind::Hncp,
            node_id: None,
            interfaces: Vec::new(),
            read_only: false,
            psk: None,
            multicast_group: None,
            port: None,
            metrics_listen: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn node_id_must_match_profile_length() {
        let toml = r#"
            interfaces = ["eth0"]
            node_id = "aabb"
        "#;
        let cfg: NodeConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }
}
