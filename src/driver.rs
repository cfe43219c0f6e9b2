//! The node-local shared-resource driver.
//!
//! [`SharedResourceDriver`] ties the collaborators together and implements
//! the [`CsiIdentity`] and [`CsiNode`] services. A publish runs request
//! validation, share resolution, authorization, volume registration, mount
//! setup, content mapping, and state persistence, in that order. The first
//! failure wins, and nothing on the filesystem or in the registry is mutated
//! before the failing check. Unpublish is the symmetric teardown.
//!
//! Once filesystem mutation has begun, downstream failures (content mapping,
//! persistence) are surfaced as internal errors without rolling the mount
//! back: the mount-point check makes a retried publish a no-op and a
//! subsequent unpublish can always clean up, so unwinding here would only
//! add failure modes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::{DRIVER_NAME, DriverConfig};
use crate::error::DriverError;
use crate::identity::CsiIdentity;
use crate::metrics;
use crate::mount::{MountStrategy, Mounter, ReadOnlyMount, ReadWriteMount};
use crate::node::CsiNode;
use crate::share::{AccessReviewer, ResolvedShare, ShareLister, resolve_share};
use crate::store::{StateBackend, VolumeStore};
use crate::types::{
    DEVICE_ID_KEY, NodeCapability, NodeInfo, NodePublishVolumeRequest,
    NodeUnpublishVolumeRequest, PluginCapability, PluginInfo, PodIdentity, TOPOLOGY_NODE_KEY,
    Topology, VolumeAccessType, VolumeCapability, VolumeId, is_ephemeral,
};

/// Nominal capacity recorded per ephemeral share volume. Share payloads are
/// bounded by the API server's object size limit, not by this figure.
const SHARE_VOLUME_CAPACITY_BYTES: u64 = 1 << 30;

/// Node plugin exposing shared ConfigMaps and Secrets as per-pod mounts.
pub struct SharedResourceDriver {
    config: DriverConfig,
    store: Arc<VolumeStore>,
    lister: Arc<dyn ShareLister>,
    reviewer: Arc<dyn AccessReviewer>,
    mounter: Arc<dyn Mounter>,
    read_only_mounter: ReadOnlyMount,
    read_write_mounter: ReadWriteMount,
}

impl SharedResourceDriver {
    /// Build a driver from its injected collaborators.
    pub fn new(
        config: DriverConfig,
        lister: Arc<dyn ShareLister>,
        reviewer: Arc<dyn AccessReviewer>,
        mounter: Arc<dyn Mounter>,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        let store = Arc::new(VolumeStore::new(config.data_root.clone(), backend));
        Self {
            config,
            store,
            lister,
            reviewer,
            read_only_mounter: ReadOnlyMount::new(mounter.clone()),
            read_write_mounter: ReadWriteMount::new(mounter.clone()),
            mounter,
        }
    }

    /// Rebuild the in-memory volume registry from durable storage. Call once
    /// at process start, before serving requests.
    pub async fn recover(&self) -> Result<usize, DriverError> {
        self.store.recover().await
    }

    fn strategy_for(&self, read_only: bool) -> &dyn MountStrategy {
        if read_only {
            &self.read_only_mounter
        } else {
            &self.read_write_mounter
        }
    }

    /// Workload-identity and volume-shape validation of a publish request.
    fn validate_volume_context(
        &self,
        req: &NodePublishVolumeRequest,
        capability: &VolumeCapability,
    ) -> Result<PodIdentity, DriverError> {
        let identity = PodIdentity::from_context(&req.volume_context);
        debug!(
            pod = %identity.name,
            namespace = %identity.namespace,
            service_account = %identity.service_account,
            uid = %identity.uid,
            "publish requested for pod"
        );

        if !identity.is_complete() {
            return Err(DriverError::InvalidArgument(format!(
                "volume attributes missing required pod fields: namespace: {:?} name: {:?} uid: {:?} serviceAccount: {:?}",
                identity.namespace, identity.name, identity.uid, identity.service_account,
            )));
        }
        if !is_ephemeral(&req.volume_context) {
            return Err(DriverError::InvalidArgument(
                "non-ephemeral request made".into(),
            ));
        }
        if !capability.is_mount() {
            return Err(DriverError::InvalidArgument(
                "only mount access type is supported".into(),
            ));
        }
        Ok(identity)
    }

    /// Resolve the single referenced share and confirm the workload may read
    /// it. Nothing is materialized for a share that does not pass here.
    async fn validate_share(
        &self,
        req: &NodePublishVolumeRequest,
        identity: &PodIdentity,
    ) -> Result<ResolvedShare, DriverError> {
        let share = resolve_share(self.lister.as_ref(), &req.volume_context)?;

        let review = self
            .reviewer
            .can_access(share.share_name(), identity, share.kind())
            .await?;
        if !review.allowed {
            let reason = if review.reason.is_empty() {
                format!(
                    "pod {}/{} (service account {:?}) may not use the shared {} {:?}",
                    identity.namespace,
                    identity.name,
                    identity.service_account,
                    share.kind(),
                    share.share_name(),
                )
            } else {
                review.reason
            };
            return Err(DriverError::PermissionDenied(reason));
        }
        Ok(share)
    }
}

#[async_trait]
impl CsiNode for SharedResourceDriver {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), DriverError> {
        let capability = req.volume_capability.as_ref().ok_or_else(|| {
            DriverError::InvalidArgument("volume capability missing in request".into())
        })?;
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument(
                "volume ID missing in request".into(),
            ));
        }
        if req.target_path.is_empty() {
            return Err(DriverError::InvalidArgument(
                "target path missing in request".into(),
            ));
        }
        if req.volume_context.is_empty() {
            return Err(DriverError::InvalidArgument(
                "volume attributes missing in request".into(),
            ));
        }

        let identity = self.validate_volume_context(&req, capability)?;
        let share = self.validate_share(&req, &identity).await?;

        let volume_id = VolumeId::from(req.volume_id.as_str());
        let target_path = Path::new(&req.target_path);
        // Always-read-only mode makes sure no publish ends up writable,
        // whatever the request asked for.
        let read_only = self.config.always_read_only || req.readonly;

        let (record, _outcome) = self
            .store
            .create(
                &volume_id,
                target_path,
                read_only,
                &req.volume_context,
                share,
                SHARE_VOLUME_CAPACITY_BYTES,
                VolumeAccessType::Mount,
            )
            .await?;

        // The mount table, not the registry, is the authoritative
        // idempotency check for setup.
        let already_mounted = match self.mounter.is_mount_point(target_path).await {
            Ok(mounted) => mounted,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(target_path)
                    .await
                    .map_err(DriverError::internal)?;
                false
            }
            Err(e) => return Err(DriverError::internal(e)),
        };
        if already_mounted {
            debug!("target already mounted, republish is a no-op");
            return Ok(());
        }

        if let Some(device_id) = req.publish_context.get(DEVICE_ID_KEY) {
            debug!(%device_id, "device from publish context");
        }

        self.strategy_for(read_only)
            .setup(&record.anchor_dir, &record.bind_dir, target_path)
            .await?;

        metrics::inc_mount_attempts();

        if let Err(e) = self.store.map_to_pod(&record).await {
            metrics::inc_mount_failures();
            return Err(DriverError::Internal(format!(
                "failed to populate mount device {} at {}: {e}",
                record.bind_dir.display(),
                target_path.display(),
            )));
        }

        if let Err(e) = self.store.persist().await {
            metrics::inc_mount_failures();
            error!(error = %e, "failed to persist volume state after mount");
            return Err(DriverError::internal(e));
        }

        info!(read_only, "volume published");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), DriverError> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument(
                "volume ID missing in request".into(),
            ));
        }
        if req.target_path.is_empty() {
            return Err(DriverError::InvalidArgument(
                "target path missing in request".into(),
            ));
        }

        let volume_id = VolumeId::from(req.volume_id.as_str());
        let Some(record) = self.store.get(&volume_id) else {
            // Deliberately not an idempotent success: the orchestrator is
            // not expected to unpublish the same volume twice.
            return Err(DriverError::Internal(format!(
                "unpublish volume {volume_id} already gone"
            )));
        };

        self.strategy_for(record.read_only)
            .teardown(&record.anchor_dir, &record.bind_dir, Path::new(&req.target_path))
            .await?;
        info!("volume unpublished");

        // Tolerates a concurrent delete having won the race.
        self.store.delete(&volume_id).await?;
        Ok(())
    }

    async fn stage_volume(
        &self,
        _volume_id: &str,
        _staging_target_path: &Path,
    ) -> Result<(), DriverError> {
        Err(DriverError::unimplemented("NodeStageVolume"))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &str,
        _staging_target_path: &Path,
    ) -> Result<(), DriverError> {
        Err(DriverError::unimplemented("NodeUnstageVolume"))
    }

    async fn volume_stats(
        &self,
        _volume_id: &str,
        _volume_path: &Path,
    ) -> Result<(), DriverError> {
        Err(DriverError::unimplemented("NodeGetVolumeStats"))
    }

    async fn expand_volume(
        &self,
        _volume_id: &str,
        _volume_path: &Path,
    ) -> Result<(), DriverError> {
        Err(DriverError::unimplemented("NodeExpandVolume"))
    }

    async fn node_info(&self) -> Result<NodeInfo, DriverError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: self.config.max_volumes_per_node,
            accessible_topology: Some(Topology {
                segments: HashMap::from([(
                    TOPOLOGY_NODE_KEY.to_owned(),
                    self.config.node_id.clone(),
                )]),
            }),
        })
    }

    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, DriverError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CsiIdentity for SharedResourceDriver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, DriverError> {
        Ok(PluginInfo {
            name: DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, DriverError> {
        let healthy = tokio::fs::metadata(&self.config.data_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        Ok(healthy)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, DriverError> {
        Ok(Vec::new())
    }
}
