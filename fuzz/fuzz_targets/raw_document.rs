#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mongo_types::RawDocument;

#[derive(Debug, Arbitrary)]
struct Input {
    /// Overwrite the length prefix with this value.
    length: Option<i32>,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut data = input.body;
    if let Some(length) = input.length {
        if data.len() >= 4 {
            data[..4].copy_from_slice(&length.to_le_bytes());
        }
    }

    if let Ok(doc) = RawDocument::from_bytes(Bytes::from(data.clone())) {
        assert_eq!(doc.as_bytes(), data.as_slice());
        assert_eq!(doc.len(), data.len());
        assert_eq!(data.last(), Some(&0));
    }
});
