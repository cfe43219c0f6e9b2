//! QUIC server that runs on each worker node and dispatches incoming
//! requests to the identity and node service implementations.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use super::MAX_MESSAGE_BYTES;
use crate::error::DriverError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// A server that accepts QUIC connections and dispatches [`CsiMessage`]
/// requests to a [`CsiIdentity`] + [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, DriverError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| DriverError::Internal(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint =
            quinn::Endpoint::server(server_config, addr).map_err(DriverError::internal)?;
        info!(%addr, "node plugin listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed. Each
    /// connection and each bi-stream within it is served on its own task, so
    /// requests for distinct volumes progress independently.
    pub async fn serve(&self) -> Result<(), DriverError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(
        conn: quinn::Connection,
        handler: Arc<T>,
    ) -> Result<(), DriverError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(DriverError::internal(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), DriverError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(DriverError::internal)?;

        let request: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| DriverError::InvalidArgument(format!("malformed request: {e}")))?;
        debug!(%request, "request received");

        let response = Self::dispatch(handler, request).await;

        let payload = serde_json::to_vec(&response).map_err(DriverError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(DriverError::internal)?;
        send.finish().map_err(DriverError::internal)?;
        Ok(())
    }

    /// Map a request variant onto the matching service call and wrap the
    /// result back into a response variant.
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        fn ack(result: Result<(), DriverError>) -> CsiMessage {
            match result {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            }
        }

        match request {
            // --- Node -------------------------------------------------------
            CsiMessage::NodePublishVolume(req) => ack(handler.publish_volume(req).await),
            CsiMessage::NodeUnpublishVolume(req) => ack(handler.unpublish_volume(req).await),
            CsiMessage::NodeStageVolume {
                volume_id,
                staging_target_path,
            } => ack(
                handler
                    .stage_volume(&volume_id, Path::new(&staging_target_path))
                    .await,
            ),
            CsiMessage::NodeUnstageVolume {
                volume_id,
                staging_target_path,
            } => ack(
                handler
                    .unstage_volume(&volume_id, Path::new(&staging_target_path))
                    .await,
            ),
            CsiMessage::NodeGetVolumeStats {
                volume_id,
                volume_path,
            } => ack(
                handler
                    .volume_stats(&volume_id, Path::new(&volume_path))
                    .await,
            ),
            CsiMessage::NodeExpandVolume {
                volume_id,
                volume_path,
            } => ack(
                handler
                    .expand_volume(&volume_id, Path::new(&volume_path))
                    .await,
            ),
            CsiMessage::NodeGetInfo => match handler.node_info().await {
                Ok(info) => CsiMessage::NodeInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::NodeGetCapabilities => match handler.node_capabilities().await {
                Ok(caps) => CsiMessage::NodeCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => match handler.probe().await {
                Ok(ok) => CsiMessage::ProbeResult(ok),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(DriverError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// The underlying QUIC endpoint, useful for obtaining the local address
    /// or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}
