#![no_main]

use libfuzzer_sys::fuzz_target;
use mongo_driver_pool::ServerAddress;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(address) = ServerAddress::parse(s) {
            assert!(!address.host.is_empty());
            assert_ne!(address.port, 0);
            let _ = address.to_string();
        }
    }
});
