//! Node configuration.
//!
//! [`NodeConfig`] carries everything the node entry recognizes: identity
//! (invoice, host, port), the persistent-state root, farm sizing, and the
//! operator flags. Path helpers pin the on-disk layout under `$home`.

use std::path::PathBuf;

use zold_core::constants::{COPIES_DIR, FARM_FILE, NETWORK, REMOTES_FILE, WALLETS_DIR};
use zold_farm::score::STRENGTH;

/// Default TCP port for the advertised endpoint.
pub const DEFAULT_PORT: u16 = 4096;

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The score invoice (`prefix@id`) mining rewards accrue to.
    pub invoice: String,
    /// Advertised peer endpoint.
    pub host: String,
    pub port: u16,
    /// Socket bind port; may differ from the advertised one behind NAT.
    pub bind_port: u16,
    /// Root directory for all persistent state.
    pub home: PathBuf,
    /// Farm worker count; zero disables mining.
    pub threads: usize,
    /// Required proof-of-work strength.
    pub strength: u32,
    /// Network name this node participates in.
    pub network: String,
    /// Use the always-empty remotes registry.
    pub standalone: bool,
    /// Accept peer scores below the required strength.
    pub ignore_score_weakness: bool,
    /// Disable self-exit when a newer version is advertised cluster-wide.
    pub never_reboot: bool,
    /// Secret accepted by the `?halt=` shutdown parameter.
    pub halt_code: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let home = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zold");
        Self {
            invoice: String::new(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            bind_port: DEFAULT_PORT,
            home,
            threads: 4,
            strength: STRENGTH,
            network: NETWORK.to_string(),
            standalone: false,
            ignore_score_weakness: false,
            never_reboot: false,
            halt_code: None,
        }
    }
}

impl NodeConfig {
    pub fn wallets_dir(&self) -> PathBuf {
        self.home.join(WALLETS_DIR)
    }

    pub fn copies_dir(&self) -> PathBuf {
        self.home.join(COPIES_DIR)
    }

    pub fn remotes_path(&self) -> PathBuf {
        self.home.join(REMOTES_FILE)
    }

    pub fn farm_path(&self) -> PathBuf {
        self.home.join(FARM_FILE)
    }

    /// Socket address the HTTP front binds to.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.bind_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.bind_port, cfg.port);
    }

    #[test]
    fn state_layout_under_home() {
        let cfg = NodeConfig {
            home: PathBuf::from("/tmp/z"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.wallets_dir(), PathBuf::from("/tmp/z/zold-wallets"));
        assert_eq!(cfg.copies_dir(), PathBuf::from("/tmp/z/zold-copies"));
        assert_eq!(cfg.remotes_path(), PathBuf::from("/tmp/z/zold-remotes"));
        assert_eq!(cfg.farm_path(), PathBuf::from("/tmp/z/farm"));
    }

    #[test]
    fn bind_addr_uses_bind_port() {
        let cfg = NodeConfig {
            bind_port: 8084,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8084");
    }
}
