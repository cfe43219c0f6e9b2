//! Core data model: volume identity, request messages, capabilities, and the
//! workload identity extracted from volume attributes.
//!
//! These types are all [`Serialize`]/[`Deserialize`] so they can be carried
//! over the transport and, where applicable, persisted in the volume map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume-context and publish-context keys
// ---------------------------------------------------------------------------

/// Volume attribute carrying the namespace of the requesting pod.
pub const POD_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pod.namespace";
/// Volume attribute carrying the name of the requesting pod.
pub const POD_NAME_KEY: &str = "csi.storage.k8s.io/pod.name";
/// Volume attribute carrying the UID of the requesting pod.
pub const POD_UID_KEY: &str = "csi.storage.k8s.io/pod.uid";
/// Volume attribute carrying the service account of the requesting pod.
pub const POD_SERVICE_ACCOUNT_KEY: &str = "csi.storage.k8s.io/serviceAccount.name";
/// Volume attribute declaring the volume as ephemeral-inline.
pub const EPHEMERAL_KEY: &str = "csi.storage.k8s.io/ephemeral";
/// Volume attribute naming the shared ConfigMap to mount.
pub const SHARED_CONFIGMAP_KEY: &str = "sharedConfigMap";
/// Volume attribute naming the shared Secret to mount.
pub const SHARED_SECRET_KEY: &str = "sharedSecret";
/// Publish-context key carrying a device identifier. Logged only.
pub const DEVICE_ID_KEY: &str = "deviceID";
/// Topology segment key under which the node advertises itself.
pub const TOPOLOGY_NODE_KEY: &str = "topology.sharedresource.csi/node";

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, caller-supplied identifier for a volume, unique per active mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Workload identity
// ---------------------------------------------------------------------------

/// The (namespace, pod name, pod UID, service account) tuple identifying the
/// workload a publish request is made on behalf of.
///
/// This tuple is the subject presented to the authorization gate; a publish
/// proceeds only when [`PodIdentity::is_complete`] holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub service_account: String,
}

impl PodIdentity {
    /// Extract the identity from a request's volume attributes. Missing keys
    /// yield empty fields; completeness is checked separately so the caller
    /// controls the failure message.
    pub fn from_context(ctx: &HashMap<String, String>) -> Self {
        let field = |key: &str| ctx.get(key).cloned().unwrap_or_default();
        Self {
            namespace: field(POD_NAMESPACE_KEY),
            name: field(POD_NAME_KEY),
            uid: field(POD_UID_KEY),
            service_account: field(POD_SERVICE_ACCOUNT_KEY),
        }
    }

    /// All four identity fields are present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.namespace.is_empty()
            && !self.name.is_empty()
            && !self.uid.is_empty()
            && !self.service_account.is_empty()
    }
}

/// Whether the volume attributes declare an ephemeral-inline volume.
///
/// An absent or empty flag counts as ephemeral: orchestrators predating the
/// inline-ephemeral field omit it entirely. Any value other than the literal
/// `"true"` is non-ephemeral and gets rejected by the validator.
pub fn is_ephemeral(ctx: &HashMap<String, String>) -> bool {
    matches!(
        ctx.get(EPHEMERAL_KEY).map(String::as_str),
        None | Some("") | Some("true")
    )
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// How the requested volume will be exposed to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// A mounted directory. The only access type this driver supports.
    Mount {
        /// Requested filesystem type, if any.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// A raw block device. Always rejected.
    Block,
}

/// Requested access mode. Shared resources are many-reader by nature; the
/// mode is carried for protocol completeness but not enforced beyond the
/// read-only flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    SingleNodeWriter,
    ReadOnlyMany,
    ReadWriteMany,
}

/// Capability block of a publish request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// Convenience constructor for a plain mount capability.
    pub fn mount() -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode: AccessMode::default(),
        }
    }

    /// Whether this capability requests mount (not block) access.
    pub fn is_mount(&self) -> bool {
        matches!(self.access_type, AccessType::Mount { .. })
    }
}

/// Access-type tag recorded in a volume record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeAccessType {
    Mount,
    Block,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to publish an ephemeral share volume at a kubelet target path.
///
/// Field emptiness is validated by the node service, not at decode time, so
/// the documented validation order is observable to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Caller-supplied volume identifier.
    pub volume_id: String,
    /// Path the orchestrator expects the mount at.
    pub target_path: String,
    /// Requested capability. Must be present and of mount access type.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the orchestrator asked for a read-only publish.
    #[serde(default)]
    pub readonly: bool,
    /// Volume attributes: workload identity, ephemeral flag, share name.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Opaque context from the controller publish phase. Logged only.
    #[serde(default)]
    pub publish_context: HashMap<String, String>,
}

/// Request to tear down a previously published volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the plugin, served by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name in reverse-domain notation.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the plugin. This driver advertises none: it has
/// no controller service and no staging phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
}

/// Node-service capabilities. This driver advertises none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"topology.sharedresource.csi/node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Information about the node this service runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes this node will host.
    pub max_volumes_per_node: u64,
    /// Single-segment topology keyed by [`TOPOLOGY_NODE_KEY`].
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn volume_id_display() {
        let id = VolumeId("csi-2b1a".into());
        assert_eq!(id.to_string(), "csi-2b1a");
    }

    #[test]
    fn pod_identity_extraction() {
        let ctx = ctx(&[
            (POD_NAMESPACE_KEY, "ns1"),
            (POD_NAME_KEY, "pod-a"),
            (POD_UID_KEY, "uid-1"),
            (POD_SERVICE_ACCOUNT_KEY, "default"),
        ]);
        let identity = PodIdentity::from_context(&ctx);
        assert!(identity.is_complete());
        assert_eq!(identity.namespace, "ns1");
        assert_eq!(identity.uid, "uid-1");
    }

    #[test]
    fn pod_identity_incomplete_when_field_missing() {
        let ctx = ctx(&[
            (POD_NAMESPACE_KEY, "ns1"),
            (POD_NAME_KEY, "pod-a"),
            (POD_UID_KEY, "uid-1"),
        ]);
        assert!(!PodIdentity::from_context(&ctx).is_complete());
    }

    #[test]
    fn ephemeral_flag_defaults_to_true() {
        assert!(is_ephemeral(&HashMap::new()));
        assert!(is_ephemeral(&ctx(&[(EPHEMERAL_KEY, "")])));
        assert!(is_ephemeral(&ctx(&[(EPHEMERAL_KEY, "true")])));
        assert!(!is_ephemeral(&ctx(&[(EPHEMERAL_KEY, "false")])));
        assert!(!is_ephemeral(&ctx(&[(EPHEMERAL_KEY, "True")])));
    }

    #[test]
    fn capability_access_type() {
        assert!(VolumeCapability::mount().is_mount());
        let block = VolumeCapability {
            access_type: AccessType::Block,
            access_mode: AccessMode::default(),
        };
        assert!(!block.is_mount());
    }

    #[test]
    fn publish_request_serde_defaults() {
        let json = r#"{"volume_id":"v1","target_path":"/t"}"#;
        let req: NodePublishVolumeRequest = serde_json::from_str(json).expect("deserialize");
        assert!(req.volume_capability.is_none());
        assert!(!req.readonly);
        assert!(req.volume_context.is_empty());
    }
}
