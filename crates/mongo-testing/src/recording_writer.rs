//! A value writer that records calls instead of encoding them.

use mongo_types::{
    ArrayWriter, BinarySubtype, Decimal128, DocumentWriter, ObjectId, Timestamp, ValueWriter,
    WriteError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Array,
    Document,
}

impl Scope {
    fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Document => "document",
        }
    }
}

/// Records every writer call as a short event string.
///
/// Scope ends are checked against the open scopes, so an unbalanced end is
/// reported as [`WriteError::UnbalancedScope`]. A failure can be injected for
/// any event name with [`RecordingWriter::fail_on`].
#[derive(Debug, Default)]
pub struct RecordingWriter {
    events: Vec<String>,
    open: Vec<Scope>,
    fail_on: Option<&'static str>,
}

impl RecordingWriter {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any call whose event name is `event` (for example `"int32"`).
    #[must_use]
    pub fn fail_on(mut self, event: &'static str) -> Self {
        self.fail_on = Some(event);
        self
    }

    /// Recorded events, in call order.
    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Number of scopes still open.
    #[must_use]
    pub fn open_scopes(&self) -> usize {
        self.open.len()
    }

    fn record(&mut self, name: &'static str, detail: impl std::fmt::Display) -> Result<(), WriteError> {
        if self.fail_on == Some(name) {
            return Err(WriteError::Backend(format!("injected failure on {name}")));
        }
        let detail = detail.to_string();
        if detail.is_empty() {
            self.events.push(name.to_owned());
        } else {
            self.events.push(format!("{name}({detail})"));
        }
        Ok(())
    }

    fn close(&mut self, scope: Scope) -> Result<(), WriteError> {
        match self.open.last().copied() {
            Some(open) if open == scope => {
                self.open.pop();
                self.record(if scope == Scope::Array { "end_array" } else { "end_document" }, "")
            }
            Some(open) => Err(WriteError::UnbalancedScope {
                expected: open.name(),
                actual: scope.name(),
            }),
            None => Err(WriteError::InvalidState {
                action: "end scope",
                state: "top level".into(),
            }),
        }
    }
}

struct RecordingArray<'a> {
    writer: &'a mut RecordingWriter,
}

impl ArrayWriter for RecordingArray<'_> {
    fn write_array_element(&mut self) -> Result<&mut dyn ValueWriter, WriteError> {
        self.writer.record("element", "")?;
        Ok(&mut *self.writer)
    }

    fn write_array_end(&mut self) -> Result<(), WriteError> {
        self.writer.close(Scope::Array)
    }
}

struct RecordingDocument<'a> {
    writer: &'a mut RecordingWriter,
}

impl DocumentWriter for RecordingDocument<'_> {
    fn write_document_element(&mut self, key: &str) -> Result<&mut dyn ValueWriter, WriteError> {
        if key.contains('\0') {
            return Err(WriteError::InvalidKey(key.to_owned()));
        }
        self.writer.record("element", key)?;
        Ok(&mut *self.writer)
    }

    fn write_document_end(&mut self) -> Result<(), WriteError> {
        self.writer.close(Scope::Document)
    }
}

impl ValueWriter for RecordingWriter {
    fn write_array(&mut self) -> Result<Box<dyn ArrayWriter + '_>, WriteError> {
        self.record("start_array", "")?;
        self.open.push(Scope::Array);
        Ok(Box::new(RecordingArray { writer: self }))
    }

    fn write_document(&mut self) -> Result<Box<dyn DocumentWriter + '_>, WriteError> {
        self.record("start_document", "")?;
        self.open.push(Scope::Document);
        Ok(Box::new(RecordingDocument { writer: self }))
    }

    fn write_code_with_scope(
        &mut self,
        code: &str,
    ) -> Result<Box<dyn DocumentWriter + '_>, WriteError> {
        self.record("code_with_scope", code)?;
        self.open.push(Scope::Document);
        Ok(Box::new(RecordingDocument { writer: self }))
    }

    fn write_binary_with_subtype(
        &mut self,
        data: &[u8],
        subtype: BinarySubtype,
    ) -> Result<(), WriteError> {
        self.record("binary", format!("{}, {}", u8::from(subtype), data.len()))
    }

    fn write_boolean(&mut self, value: bool) -> Result<(), WriteError> {
        self.record("boolean", value)
    }

    fn write_db_pointer(&mut self, namespace: &str, id: ObjectId) -> Result<(), WriteError> {
        self.record("db_pointer", format!("{namespace}, {id}"))
    }

    fn write_date_time(&mut self, millis: i64) -> Result<(), WriteError> {
        self.record("date_time", millis)
    }

    fn write_decimal128(&mut self, _value: Decimal128) -> Result<(), WriteError> {
        self.record("decimal128", "")
    }

    fn write_double(&mut self, value: f64) -> Result<(), WriteError> {
        self.record("double", value)
    }

    fn write_int32(&mut self, value: i32) -> Result<(), WriteError> {
        self.record("int32", value)
    }

    fn write_int64(&mut self, value: i64) -> Result<(), WriteError> {
        self.record("int64", value)
    }

    fn write_javascript(&mut self, code: &str) -> Result<(), WriteError> {
        self.record("javascript", code)
    }

    fn write_max_key(&mut self) -> Result<(), WriteError> {
        self.record("max_key", "")
    }

    fn write_min_key(&mut self) -> Result<(), WriteError> {
        self.record("min_key", "")
    }

    fn write_null(&mut self) -> Result<(), WriteError> {
        self.record("null", "")
    }

    fn write_object_id(&mut self, id: ObjectId) -> Result<(), WriteError> {
        self.record("object_id", id)
    }

    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<(), WriteError> {
        self.record("regex", format!("{pattern}, {options}"))
    }

    fn write_string(&mut self, value: &str) -> Result<(), WriteError> {
        self.record("string", value)
    }

    fn write_symbol(&mut self, symbol: &str) -> Result<(), WriteError> {
        self.record("symbol", symbol)
    }

    fn write_timestamp(&mut self, value: Timestamp) -> Result<(), WriteError> {
        self.record("timestamp", format!("{}, {}", value.time, value.increment))
    }

    fn write_undefined(&mut self) -> Result<(), WriteError> {
        self.record("undefined", "")
    }
}
