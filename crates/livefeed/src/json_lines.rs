//! One JSON value per separator-terminated record.
//!
//! Records are located by a plain byte search for the separator, not by a
//! JSON tokenizer, so the separator must never occur unescaped inside a
//! value. A bare `\n` is safe for any compact JSON encoder because JSON
//! strings always escape newlines.

use serde_json::Value;

use crate::{
    buffer::{ParserBuffer, escape_for_logging},
    error::FramingError,
    options::BufferOptions,
};

pub const DEFAULT_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonState {
    #[default]
    AwaitingJson,
    /// An invalid record was reported. Absorbing until
    /// [`JsonPerLineParser::reset`].
    Error,
}

/// Decodes separator-delimited JSON values from bytes fed via
/// [`write`](Self::write).
///
/// Only complete records are parsed; a trailing record without separator
/// stays buffered. A `\r` before the separator is tolerated. A blank record
/// is invalid JSON like any other unless
/// [`skip_blank_records`](Self::skip_blank_records) is enabled.
///
/// ```rust
/// use livefeed::JsonPerLineParser;
/// use serde_json::json;
///
/// let mut parser = JsonPerLineParser::new();
/// let values: Vec<_> = parser
///     .write(b"{\"x\":1,\"y\":2}\n{\"x\":2,")
///     .map(Result::unwrap)
///     .collect();
/// assert_eq!(values, [json!({"x": 1, "y": 2})]);
/// ```
#[derive(Debug)]
pub struct JsonPerLineParser {
    buffer: ParserBuffer,
    separator: Vec<u8>,
    skip_blank: bool,
    state: JsonState,
}

impl Default for JsonPerLineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonPerLineParser {
    #[must_use]
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    /// # Panics
    ///
    /// Panics if `separator` is empty.
    #[must_use]
    pub fn with_separator(separator: impl AsRef<[u8]>) -> Self {
        Self::with_options(separator, BufferOptions::default())
    }

    /// # Panics
    ///
    /// Panics if `separator` is empty.
    #[must_use]
    pub fn with_options(separator: impl AsRef<[u8]>, options: BufferOptions) -> Self {
        let separator = separator.as_ref().to_vec();
        assert!(!separator.is_empty(), "record separator must not be empty");
        Self {
            buffer: ParserBuffer::with_options(options),
            separator,
            skip_blank: false,
            state: JsonState::AwaitingJson,
        }
    }

    /// Silently drops records that contain only whitespace, e.g. keep-alive
    /// newlines.
    #[must_use]
    pub fn skip_blank_records(mut self, skip: bool) -> Self {
        self.skip_blank = skip;
        self
    }

    pub fn write<'p>(&'p mut self, data: &[u8]) -> JsonIter<'p> {
        self.push(data);
        JsonIter { parser: self }
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
        self.state = JsonState::AwaitingJson;
    }

    #[must_use]
    pub fn state(&self) -> JsonState {
        self.state
    }

    #[must_use]
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.write(data);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.state == JsonState::Error
    }

    pub(crate) fn next_event(&mut self) -> Option<Result<Value, FramingError>> {
        loop {
            if self.state == JsonState::Error {
                return None;
            }
            let record = self.buffer.peek_until(&self.separator)?;
            let consumed = record.len() + self.separator.len();
            let record = record.strip_suffix(b"\r").unwrap_or(record);

            if self.skip_blank && record.iter().all(u8::is_ascii_whitespace) {
                self.buffer.advance(consumed);
                continue;
            }

            match serde_json::from_slice::<Value>(record) {
                Ok(value) => {
                    tracing::trace!(len = record.len(), "json record");
                    self.buffer.advance(consumed);
                    return Some(Ok(value));
                }
                Err(source) => {
                    let err = FramingError::InvalidJson {
                        record: escape_for_logging(record),
                        context: self.buffer.context_string(),
                        source,
                    };
                    self.state = JsonState::Error;
                    return Some(Err(err));
                }
            }
        }
    }
}

pub struct JsonIter<'p> {
    parser: &'p mut JsonPerLineParser,
}

impl Iterator for JsonIter<'_> {
    type Item = Result<Value, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_event()
    }
}
