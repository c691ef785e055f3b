#![no_main]

use libfuzzer_sys::fuzz_target;
use mongo_client::ClientConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ClientConfig::from_connection_string(s) {
            // Anything that parses must also validate and yield a usable pool config.
            assert!(config.validate().is_ok());
            assert!(config.pool_config().validate().is_ok());
        }
    }
});
