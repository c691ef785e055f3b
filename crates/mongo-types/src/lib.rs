//! # mongo-types
//!
//! Value types and the writer boundary used by the driver core to hand typed
//! values to a BSON encoder.
//!
//! The encoder itself lives outside this workspace. This crate only defines
//! the contract the core writes through, plus a framing check for raw
//! documents returned by the server.
//!
//! ## Features
//!
//! - `chrono` (default): Write date-times from `chrono::DateTime<Utc>`
//! - `uuid` (default): Write UUIDs as binary subtype 4
//!
//! ## Scoped Writers
//!
//! Nested arrays and documents must be closed before the parent scope accepts
//! more values. [`ArrayScope`] and [`DocumentScope`] close themselves when
//! dropped, so early returns cannot leave a scope open:
//!
//! ```rust,ignore
//! use mongo_types::writer::{write_document_with, ValueWriter};
//!
//! write_document_with(&mut writer, |doc| {
//!     doc.write_document_element("ok")?.write_double(1.0)?;
//!     doc.write_document_element("n")?.write_int32(3)
//! })?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod raw;
pub mod value;
pub mod writer;

pub use error::{DecodeError, WriteError};
pub use raw::RawDocument;
pub use value::{BinarySubtype, Decimal128, ObjectId, Timestamp};
pub use writer::{
    ArrayScope, ArrayWriter, DocumentScope, DocumentWriter, ValueWriter, write_array_with,
    write_document_with,
};
