//! Writer traits for handing typed values to a BSON encoder.
//!
//! A [`ValueWriter`] accepts exactly one value. Writing an array, document or
//! code-with-scope opens a nested writer that must be ended before the parent
//! accepts anything else. The scope guards in this module make that pairing
//! structural: an [`ArrayScope`] or [`DocumentScope`] ends its writer when
//! dropped, including when the caller bails out early with `?`.

use crate::error::WriteError;
use crate::value::{BinarySubtype, Decimal128, ObjectId, Timestamp};

/// Writes elements of an array.
///
/// Callers must call [`write_array_end`](Self::write_array_end) once all
/// elements are written. Prefer [`ArrayScope`], which does this on drop.
pub trait ArrayWriter {
    /// Start the next element and return the writer for its value.
    fn write_array_element(&mut self) -> Result<&mut dyn ValueWriter, WriteError>;

    /// Close the array.
    fn write_array_end(&mut self) -> Result<(), WriteError>;
}

/// Writes key/value pairs of a document.
///
/// Callers must call [`write_document_end`](Self::write_document_end) once
/// all elements are written. Prefer [`DocumentScope`], which does this on
/// drop.
pub trait DocumentWriter {
    /// Start an element with the given key and return the writer for its value.
    fn write_document_element(&mut self, key: &str) -> Result<&mut dyn ValueWriter, WriteError>;

    /// Close the document.
    fn write_document_end(&mut self) -> Result<(), WriteError>;
}

/// Writes a single BSON value.
pub trait ValueWriter {
    /// Open a nested array.
    fn write_array(&mut self) -> Result<Box<dyn ArrayWriter + '_>, WriteError>;

    /// Open a nested document.
    fn write_document(&mut self) -> Result<Box<dyn DocumentWriter + '_>, WriteError>;

    /// Write JavaScript code and open the document holding its scope.
    fn write_code_with_scope(
        &mut self,
        code: &str,
    ) -> Result<Box<dyn DocumentWriter + '_>, WriteError>;

    /// Write generic binary data.
    fn write_binary(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.write_binary_with_subtype(data, BinarySubtype::Generic)
    }

    /// Write binary data with an explicit subtype.
    fn write_binary_with_subtype(
        &mut self,
        data: &[u8],
        subtype: BinarySubtype,
    ) -> Result<(), WriteError>;

    /// Write a boolean.
    fn write_boolean(&mut self, value: bool) -> Result<(), WriteError>;

    /// Write a deprecated DBPointer.
    fn write_db_pointer(&mut self, namespace: &str, id: ObjectId) -> Result<(), WriteError>;

    /// Write a UTC date-time as milliseconds since the Unix epoch.
    fn write_date_time(&mut self, millis: i64) -> Result<(), WriteError>;

    /// Write a 128-bit decimal.
    fn write_decimal128(&mut self, value: Decimal128) -> Result<(), WriteError>;

    /// Write a double.
    fn write_double(&mut self, value: f64) -> Result<(), WriteError>;

    /// Write a 32-bit integer.
    fn write_int32(&mut self, value: i32) -> Result<(), WriteError>;

    /// Write a 64-bit integer.
    fn write_int64(&mut self, value: i64) -> Result<(), WriteError>;

    /// Write JavaScript code without a scope.
    fn write_javascript(&mut self, code: &str) -> Result<(), WriteError>;

    /// Write MaxKey.
    fn write_max_key(&mut self) -> Result<(), WriteError>;

    /// Write MinKey.
    fn write_min_key(&mut self) -> Result<(), WriteError>;

    /// Write null.
    fn write_null(&mut self) -> Result<(), WriteError>;

    /// Write an ObjectId.
    fn write_object_id(&mut self, id: ObjectId) -> Result<(), WriteError>;

    /// Write a regular expression.
    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<(), WriteError>;

    /// Write a UTF-8 string.
    fn write_string(&mut self, value: &str) -> Result<(), WriteError>;

    /// Write a deprecated symbol.
    fn write_symbol(&mut self, symbol: &str) -> Result<(), WriteError>;

    /// Write a timestamp.
    fn write_timestamp(&mut self, value: Timestamp) -> Result<(), WriteError>;

    /// Write the deprecated undefined value.
    fn write_undefined(&mut self) -> Result<(), WriteError>;

    /// Write a `chrono` date-time with millisecond precision.
    #[cfg(feature = "chrono")]
    fn write_chrono_date_time(
        &mut self,
        value: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), WriteError> {
        self.write_date_time(value.timestamp_millis())
    }

    /// Write a UUID as binary subtype 4.
    #[cfg(feature = "uuid")]
    fn write_uuid(&mut self, value: uuid::Uuid) -> Result<(), WriteError> {
        self.write_binary_with_subtype(value.as_bytes(), BinarySubtype::Uuid)
    }
}

/// An open array that is ended exactly once.
pub struct ArrayScope<'a> {
    writer: Box<dyn ArrayWriter + 'a>,
    ended: bool,
}

impl<'a> ArrayScope<'a> {
    /// Open an array on `parent`.
    pub fn open<W: ValueWriter + ?Sized>(parent: &'a mut W) -> Result<Self, WriteError> {
        Ok(Self {
            writer: parent.write_array()?,
            ended: false,
        })
    }

    /// Start the next element.
    pub fn element(&mut self) -> Result<&mut dyn ValueWriter, WriteError> {
        self.writer.write_array_element()
    }

    /// End the array, surfacing any error from the writer.
    pub fn end(mut self) -> Result<(), WriteError> {
        self.ended = true;
        self.writer.write_array_end()
    }
}

impl Drop for ArrayScope<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(e) = self.writer.write_array_end() {
            tracing::warn!(error = %e, "failed to end array scope on drop");
        }
    }
}

/// An open document (or code-with-scope scope) that is ended exactly once.
pub struct DocumentScope<'a> {
    writer: Box<dyn DocumentWriter + 'a>,
    ended: bool,
}

impl<'a> DocumentScope<'a> {
    /// Open a document on `parent`.
    pub fn open<W: ValueWriter + ?Sized>(parent: &'a mut W) -> Result<Self, WriteError> {
        Ok(Self {
            writer: parent.write_document()?,
            ended: false,
        })
    }

    /// Write `code` on `parent` and open its scope document.
    pub fn open_code_with_scope<W: ValueWriter + ?Sized>(
        parent: &'a mut W,
        code: &str,
    ) -> Result<Self, WriteError> {
        Ok(Self {
            writer: parent.write_code_with_scope(code)?,
            ended: false,
        })
    }

    /// Start an element with the given key.
    pub fn element(&mut self, key: &str) -> Result<&mut dyn ValueWriter, WriteError> {
        self.writer.write_document_element(key)
    }

    /// End the document, surfacing any error from the writer.
    pub fn end(mut self) -> Result<(), WriteError> {
        self.ended = true;
        self.writer.write_document_end()
    }
}

impl Drop for DocumentScope<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(e) = self.writer.write_document_end() {
            tracing::warn!(error = %e, "failed to end document scope on drop");
        }
    }
}

/// Write an array through `f`, ending it on every exit path.
///
/// If `f` fails, the array is still ended and `f`'s error is returned.
pub fn write_array_with<W, F, T>(parent: &mut W, f: F) -> Result<T, WriteError>
where
    W: ValueWriter + ?Sized,
    F: FnOnce(&mut ArrayScope<'_>) -> Result<T, WriteError>,
{
    let mut scope = ArrayScope::open(parent)?;
    let out = f(&mut scope)?;
    scope.end()?;
    Ok(out)
}

/// Write a document through `f`, ending it on every exit path.
///
/// If `f` fails, the document is still ended and `f`'s error is returned.
pub fn write_document_with<W, F, T>(parent: &mut W, f: F) -> Result<T, WriteError>
where
    W: ValueWriter + ?Sized,
    F: FnOnce(&mut DocumentScope<'_>) -> Result<T, WriteError>,
{
    let mut scope = DocumentScope::open(parent)?;
    let out = f(&mut scope)?;
    scope.end()?;
    Ok(out)
}
