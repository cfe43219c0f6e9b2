//! CSI Identity service trait.
//!
//! The Identity service allows the orchestrator to discover plugin metadata
//! and check plugin health. Every CSI plugin carries one.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service — plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, DriverError>;

    /// Liveness probe. Returns `true` when the plugin is healthy.
    async fn probe(&self) -> Result<bool, DriverError>;

    /// Advertise the capabilities supported by this plugin. Empty for this
    /// driver: no controller service, no topology constraints.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, DriverError>;
}
