//! BootBone uplink library.
//!
//! A resilient, bidirectional message transport that keeps one WebSocket
//! connection to a remote peer alive over an unreliable network, plus the
//! small services the firmware wraps around it (persistence, readiness,
//! configuration). All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module so the crate builds
//! and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod kv_store;
pub mod link;
pub mod readiness;
pub mod task;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use link::{Message, Transport, TransportState};
