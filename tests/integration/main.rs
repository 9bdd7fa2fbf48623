//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one subsystem end to end against the host
//! simulations: the transport against a scripted mock network, and the
//! persistence helpers against the in-memory NVS backend. No hardware or
//! real network is needed.

#![cfg(not(target_os = "espidf"))]

mod kv_store_tests;
mod mock_link;
mod transport_tests;
