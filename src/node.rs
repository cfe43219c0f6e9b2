//! CSI Node service trait.
//!
//! The Node service runs on each worker node and owns the lifecycle of
//! ephemeral share mounts:
//!
//! 1. **Publish** — authorize the workload, stage a private copy of the
//!    share, and mount it at the kubelet target path.
//! 2. **Unpublish** — tear the mounts down and release the volume record.
//!
//! Staging, volume statistics, and expansion are outside this driver's
//! ephemeral-inline contract and must return a not-implemented condition
//! with no side effects.

use async_trait::async_trait;
use std::path::Path;

use crate::error::DriverError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeUnpublishVolumeRequest,
};

/// Node service — per-node mount and unmount of share volumes.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Publish an ephemeral share volume at the request's target path.
    ///
    /// Idempotent: a second publish for an already-mounted target succeeds
    /// without re-running setup or content mapping.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), DriverError>;

    /// Tear down a previously published volume and delete its record.
    ///
    /// An unknown volume identifier is a server-internal error; a target
    /// that was already unmounted out-of-band is tolerated.
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), DriverError>;

    /// Not implemented: this driver has no staging phase.
    async fn stage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &Path,
    ) -> Result<(), DriverError>;

    /// Not implemented: this driver has no staging phase.
    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &Path,
    ) -> Result<(), DriverError>;

    /// Not implemented.
    async fn volume_stats(
        &self,
        volume_id: &str,
        volume_path: &Path,
    ) -> Result<(), DriverError>;

    /// Not implemented: ephemeral share volumes are never resized.
    async fn expand_volume(
        &self,
        volume_id: &str,
        volume_path: &Path,
    ) -> Result<(), DriverError>;

    /// Return this node's identifier, volume limit, and topology segment.
    async fn node_info(&self) -> Result<NodeInfo, DriverError>;

    /// Advertise node-service capabilities. Empty for this driver.
    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, DriverError>;
}
