//! Protocol messages for the node plugin's RPC surface.
//!
//! [`CsiMessage`] is the top-level envelope exchanged between the
//! orchestrator-side client and the node-side server. Each transport stream
//! carries exactly one request followed by one response: the client sends a
//! *request* variant and the server replies with the corresponding
//! *response* variant (or [`CsiMessage::Error`]).

use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeUnpublishVolumeRequest,
    PluginCapability, PluginInfo,
};

/// Top-level message envelope for the node plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Publish an ephemeral share volume (Node).
    NodePublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    /// Stage a volume (Node). Always answered with not-implemented.
    NodeStageVolume {
        volume_id: String,
        staging_target_path: String,
    },
    /// Unstage a volume (Node). Always answered with not-implemented.
    NodeUnstageVolume {
        volume_id: String,
        staging_target_path: String,
    },
    /// Query volume statistics (Node). Always answered with not-implemented.
    NodeGetVolumeStats {
        volume_id: String,
        volume_path: String,
    },
    /// Expand a volume (Node). Always answered with not-implemented.
    NodeExpandVolume {
        volume_id: String,
        volume_path: String,
    },
    /// Query node identity and topology (Node).
    NodeGetInfo,
    /// Query node-service capabilities (Node).
    NodeGetCapabilities,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// Generic success acknowledgement (no payload).
    Ok,
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// Node-service capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Probe result.
    ProbeResult(bool),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// An error occurred.
    Error(DriverError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodePublishVolume(req) => {
                write!(f, "NodePublishVolume({})", req.volume_id)
            }
            Self::NodeUnpublishVolume(req) => {
                write!(f, "NodeUnpublishVolume({})", req.volume_id)
            }
            Self::NodeStageVolume { volume_id, .. } => {
                write!(f, "NodeStageVolume({volume_id})")
            }
            Self::NodeUnstageVolume { volume_id, .. } => {
                write!(f, "NodeUnstageVolume({volume_id})")
            }
            Self::NodeGetVolumeStats { volume_id, .. } => {
                write!(f, "NodeGetVolumeStats({volume_id})")
            }
            Self::NodeExpandVolume { volume_id, .. } => {
                write!(f, "NodeExpandVolume({volume_id})")
            }
            Self::NodeGetInfo => f.write_str("NodeGetInfo"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::Ok => f.write_str("Ok"),
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}
