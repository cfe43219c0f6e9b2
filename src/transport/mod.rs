//! QUIC transport for the node plugin's RPC surface.
//!
//! [`client::CsiClient`] and [`server::CsiServer`] exchange
//! [`crate::message::CsiMessage`] values over QUIC bi-directional streams,
//! one JSON request/response pair per stream.

pub mod client;
pub mod server;

/// Upper bound for a single request or response payload.
pub(crate) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;
