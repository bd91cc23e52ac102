//! Connection configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Oldest simulator version the Web API client is written against (12.1.4).
pub const MIN_SIM_VERSION: i32 = 121400;
/// Newest simulator version this client has been exercised with.
pub const MAX_SIM_VERSION: i32 = 121499;

/// Tunable connection settings. `Default` matches a simulator running on
/// the same machine with the stock Web API ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XplinkConfig {
    /// Root path of the Web API, prepended to the version segment.
    pub api_path: String,

    /// API port when the simulator runs on this machine.
    pub local_port: u16,

    /// API port when the simulator is reached over the network.
    pub remote_port: u16,

    /// Versions outside `[min_version, max_version]` connect anyway and log
    /// a persistent warning (degrade, don't fail).
    pub min_version: i32,
    pub max_version: i32,

    /// Prefer REST over the WebSocket for writes to a remote simulator.
    pub prefer_rest_for_remote: bool,

    /// When set, raw metadata lists are dumped here as JSON after each
    /// reload. Diagnostic only; never read back.
    pub snapshot_dir: Option<PathBuf>,

    /// Skip beacon discovery and talk to a fixed API address instead.
    pub host_override: Option<SocketAddr>,
}

impl Default for XplinkConfig {
    fn default() -> Self {
        Self {
            api_path: "/api".to_string(),
            local_port: 8086,
            remote_port: 8080,
            min_version: MIN_SIM_VERSION,
            max_version: MAX_SIM_VERSION,
            prefer_rest_for_remote: true,
            snapshot_dir: None,
            host_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_ports() {
        let cfg = XplinkConfig::default();
        assert_eq!(cfg.local_port, 8086);
        assert_eq!(cfg.remote_port, 8080);
        assert_eq!(cfg.api_path, "/api");
        assert!(cfg.prefer_rest_for_remote);
        assert!(cfg.host_override.is_none());
    }
}
