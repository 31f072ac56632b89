#![no_main]

use keyseal::{config::StoreConfig, store::validate_key};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Parsing and validation must never panic
        if let Ok(config) = StoreConfig::parse(text) {
            let _ = config.validate();
            let _ = config.policy();
        }

        // Accepted secret names never escape the repository directory
        if validate_key(text).is_ok() {
            assert!(!text.contains('/'));
            assert!(!text.contains('\\'));
            assert!(!text.starts_with('.'));
        }
    }
});
