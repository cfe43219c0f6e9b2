//! Driver configuration.
//!
//! Environment variables (read by [`DriverConfig::from_env`]):
//! - `SHARE_CSI_NODE_ID`: identifier this node reports to the orchestrator.
//!   Defaults to the hostname reported by the OS, or `"localhost"`.
//! - `SHARE_CSI_DATA_ROOT`: directory holding anchor and bind directories.
//!   Defaults to `/var/lib/libshare-csi`.
//! - `SHARE_CSI_STATE_FILE`: path of the persisted volume map. Defaults to
//!   `<data_root>/volumes.json`.
//! - `SHARE_CSI_MAX_VOLUMES`: maximum volumes advertised per node. Defaults
//!   to `128`.
//! - `SHARE_CSI_ALWAYS_READ_ONLY`: set to `1` to force every publish
//!   read-only regardless of the request flag. Defaults to `0`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Plugin name reported by the identity service.
pub const DRIVER_NAME: &str = "rk8s.sharedresource.csi";

const DEFAULT_DATA_ROOT: &str = "/var/lib/libshare-csi";
const DEFAULT_MAX_VOLUMES: u64 = 128;

/// Configuration for one driver instance, constructor-injected rather than
/// read from process-global state so tests can build isolated drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Identifier this node reports in `NodeGetInfo` and topology.
    pub node_id: String,
    /// Maximum number of volumes advertised per node.
    pub max_volumes_per_node: u64,
    /// Force every publish read-only regardless of the request flag.
    pub always_read_only: bool,
    /// Directory holding anchor and bind directories.
    pub data_root: PathBuf,
    /// Path of the persisted volume map.
    pub state_file: PathBuf,
}

impl DriverConfig {
    /// Configuration rooted at `data_root` for the given node.
    pub fn new(node_id: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let state_file = data_root.join("volumes.json");
        Self {
            node_id: node_id.into(),
            max_volumes_per_node: DEFAULT_MAX_VOLUMES,
            always_read_only: false,
            data_root,
            state_file,
        }
    }

    /// Build configuration from `SHARE_CSI_*` environment variables,
    /// falling back to the documented defaults.
    pub fn from_env() -> Self {
        let node_id = std::env::var("SHARE_CSI_NODE_ID").unwrap_or_else(|_| {
            nix::unistd::gethostname()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_owned())
        });
        let data_root = std::env::var("SHARE_CSI_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_ROOT));

        let mut config = Self::new(node_id, data_root);
        if let Ok(path) = std::env::var("SHARE_CSI_STATE_FILE") {
            config.state_file = PathBuf::from(path);
        }
        if let Ok(max) = std::env::var("SHARE_CSI_MAX_VOLUMES")
            && let Ok(max) = max.parse()
        {
            config.max_volumes_per_node = max;
        }
        config.always_read_only = std::env::var("SHARE_CSI_ALWAYS_READ_ONLY")
            .map(|v| v == "1")
            .unwrap_or(false);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::new("node-01", "/tmp/share-csi");
        assert_eq!(config.node_id, "node-01");
        assert_eq!(config.max_volumes_per_node, DEFAULT_MAX_VOLUMES);
        assert!(!config.always_read_only);
        assert_eq!(
            config.state_file,
            PathBuf::from("/tmp/share-csi/volumes.json")
        );
    }
}
