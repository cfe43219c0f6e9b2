//! QUIC client used by the node agent to issue requests to the plugin.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_BYTES;
use crate::error::DriverError;
use crate::message::CsiMessage;

/// A lightweight client that sends [`CsiMessage`] requests over a single
/// QUIC connection and returns the server's response.
pub struct CsiClient {
    connection: quinn::Connection,
}

impl CsiClient {
    /// Establish a new QUIC connection to the plugin at `addr`.
    ///
    /// * `server_name` — TLS SNI name that must match a SAN in the server's
    ///   certificate
    /// * `tls_config` — client TLS configuration
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, DriverError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| DriverError::Internal(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let mut endpoint = quinn::Endpoint::client(
            "0.0.0.0:0".parse().expect("wildcard address"),
        )
        .map_err(DriverError::internal)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(DriverError::internal)?
            .await
            .map_err(DriverError::internal)?;

        debug!(%addr, %server_name, "connected to node plugin");
        Ok(Self { connection })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new bi-directional stream, writes the serialized
    /// request, finishes the send side, then reads and deserializes the full
    /// response.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, DriverError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(DriverError::internal)?;

        let payload = serde_json::to_vec(msg).map_err(DriverError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(DriverError::internal)?;
        send.finish().map_err(DriverError::internal)?;

        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(DriverError::internal)?;

        let response: CsiMessage =
            serde_json::from_slice(&buf).map_err(DriverError::internal)?;
        debug!(%response, "response received");
        Ok(response)
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
