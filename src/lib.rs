//! # libshare-csi — node-local CSI plugin for shared cluster resources
//!
//! This crate implements the node-local half of a storage-interface driver
//! that exposes cluster-shared ConfigMaps and Secrets to workloads as
//! ephemeral, per-pod filesystem mounts. On publish it authorizes the
//! requesting workload against the named share, stages a private tmpfs copy
//! of the share content, and binds it at the path the orchestrator expects;
//! on unpublish it idempotently tears the mounts down and releases state.
//! The volume registry is mirrored to disk so the driver can rebuild its
//! view after a restart.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: volume identity, requests, capabilities, pod identity. |
//! | [`error`] | [`DriverError`] and its condition-code taxonomy. |
//! | [`share`] | Share objects, lister and authorization interfaces, share resolution. |
//! | [`mount`] | Mount syscall abstraction and the read-only / read-write strategies. |
//! | [`store`] | In-memory volume registry with durable, wholesale persistence. |
//! | [`identity`] | [`CsiIdentity`] trait — plugin discovery & health. |
//! | [`node`] | [`CsiNode`] trait — publish, unpublish, node info. |
//! | [`driver`] | [`SharedResourceDriver`] tying validation, authorization, mounts, and state together. |
//! | [`config`] | Driver configuration. |
//! | [`metrics`] | Mount attempt/failure counters. |
//! | [`message`] | [`CsiMessage`] protocol envelope. |
//! | [`transport`] | QUIC client/server carrying the envelope. |

pub mod config;
pub mod driver;
pub mod error;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod mount;
pub mod node;
pub mod share;
pub mod store;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::DriverConfig;
pub use driver::SharedResourceDriver;
pub use error::{DriverError, ErrorCode};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use mount::{Mounter, OsMounter};
pub use node::CsiNode;
pub use share::{AccessReview, AccessReviewer, ShareLister};
pub use store::{FileStateBackend, StateBackend, VolumeStore};
pub use types::*;
