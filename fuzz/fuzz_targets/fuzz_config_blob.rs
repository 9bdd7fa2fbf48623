//! Fuzz target: `TransportConfig::from_blob`
//!
//! A stored config blob can be anything after a flash fault. Decoding must
//! never panic, and whatever it accepts must already be valid.
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use bootbone::TransportConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(cfg) = TransportConfig::from_blob(data) {
        assert!(cfg.validate().is_ok());
        assert!(cfg.poll_interval_ms < cfg.heartbeat_interval_ms);
        assert!(!cfg.backoff_schedule_ms.is_empty());
    }
});
