//! Fuzz target for the listener property parser.
//!
//! Property strings come from operator configuration. Parsing must never
//! panic, and anything accepted must pass validation.

#![no_main]

use cache_replicator::ReplicatorConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: &str| {
    if let Ok(config) = ReplicatorConfig::from_properties(input) {
        assert!(config.validate().is_ok());
        assert!(config.asynchronous.interval_duration() >= cache_replicator::config::MIN_INTERVAL);
    }
});
