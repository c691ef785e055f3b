//! Raw documents returned by the server.

use bytes::Bytes;

use crate::error::DecodeError;

/// Smallest valid document: a four-byte length prefix and the terminator.
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// A raw BSON document whose outer framing has been checked.
///
/// Only the length prefix and terminator are validated. Element parsing is
/// the encoder's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    bytes: Bytes,
}

impl RawDocument {
    /// Check the framing of `bytes` and wrap them.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_DOCUMENT_SIZE {
            return Err(DecodeError::TooShort(bytes.len()));
        }

        let declared = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if usize::try_from(declared).ok() != Some(bytes.len()) {
            return Err(DecodeError::LengthMismatch {
                declared: i64::from(declared),
                actual: bytes.len(),
            });
        }

        if bytes[bytes.len() - 1] != 0 {
            return Err(DecodeError::MissingTerminator);
        }

        Ok(Self { bytes })
    }

    /// The empty document `{}`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bytes: Bytes::from_static(&[5, 0, 0, 0, 0]),
        }
    }

    /// Raw bytes including the length prefix.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total encoded length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether this is the empty document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == MIN_DOCUMENT_SIZE
    }

    /// Consume the document and return its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}
