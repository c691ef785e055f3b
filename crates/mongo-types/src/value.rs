//! Scalar value types passed through the writer boundary.

use std::fmt;

/// A 12-byte BSON ObjectId.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Create an ObjectId from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of this ObjectId.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse a 24-character hex string.
    ///
    /// Returns `None` if the input is not exactly 24 hex digits.
    #[must_use]
    pub fn parse_str(s: &str) -> Option<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A 128-bit IEEE 754-2008 decimal, carried as its raw little-endian bytes.
///
/// Arithmetic is out of scope; the core only forwards the value to the
/// encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal128 {
    bytes: [u8; 16],
}

impl Decimal128 {
    /// Create a decimal from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Raw bytes of this decimal.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 16] {
        self.bytes
    }
}

/// A BSON timestamp (seconds since epoch plus an ordinal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// Ordinal within the second.
    pub increment: u32,
}

/// Binary value subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinarySubtype {
    /// Generic binary data (0x00).
    Generic,
    /// Function (0x01).
    Function,
    /// Old binary format (0x02).
    BinaryOld,
    /// Old UUID representation (0x03).
    UuidOld,
    /// RFC 4122 UUID (0x04).
    Uuid,
    /// MD5 digest (0x05).
    Md5,
    /// Encrypted value (0x06).
    Encrypted,
    /// Compressed column (0x07).
    Column,
    /// Sensitive data (0x08).
    Sensitive,
    /// User-defined subtype (0x80-0xFF).
    UserDefined(u8),
    /// Reserved subtype not assigned above.
    Reserved(u8),
}

impl From<u8> for BinarySubtype {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Generic,
            0x01 => Self::Function,
            0x02 => Self::BinaryOld,
            0x03 => Self::UuidOld,
            0x04 => Self::Uuid,
            0x05 => Self::Md5,
            0x06 => Self::Encrypted,
            0x07 => Self::Column,
            0x08 => Self::Sensitive,
            0x80..=0xFF => Self::UserDefined(value),
            other => Self::Reserved(other),
        }
    }
}

impl From<BinarySubtype> for u8 {
    fn from(value: BinarySubtype) -> Self {
        match value {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidOld => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::Encrypted => 0x06,
            BinarySubtype::Column => 0x07,
            BinarySubtype::Sensitive => 0x08,
            BinarySubtype::UserDefined(b) | BinarySubtype::Reserved(b) => b,
        }
    }
}
