use bstr::ByteSlice;

use crate::options::BufferOptions;

/// Number of upcoming bytes shown by [`ParserBuffer::context_string`].
const CONTEXT_LENGTH: usize = 10;

/// Append-only byte buffer with a logical read cursor.
///
/// All positions are relative to the logical stream: once the consumed prefix
/// grows past [`BufferOptions::shift_length`] it is dropped from memory, but
/// `peek`, `peek_until` and `advance` observe no difference.
///
/// `peek` and `peek_until` return `None` while the requested span has not
/// been written yet; they never block and never fail otherwise.
#[derive(Debug, Clone, Default)]
pub struct ParserBuffer {
    data: Vec<u8>,
    /// Physical index of the next unconsumed byte in `data`.
    read: usize,
    /// Bytes dropped from the front of `data` since the last reset.
    discarded: usize,
    options: BufferOptions,
}

impl ParserBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BufferOptions::default())
    }

    #[must_use]
    pub fn with_options(options: BufferOptions) -> Self {
        Self {
            data: Vec::new(),
            read: 0,
            discarded: 0,
            options,
        }
    }

    /// Appends `data`. The buffer enforces no upper bound.
    pub fn write(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Drops all buffered data and rewinds the logical stream to zero.
    pub fn reset(&mut self) {
        self.data.clear();
        self.read = 0;
        self.discarded = 0;
    }

    /// Bytes consumed via [`advance`](Self::advance) since the last reset.
    #[must_use]
    pub fn consumed_len(&self) -> usize {
        self.discarded + self.read
    }

    /// Bytes written but not consumed yet.
    #[must_use]
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.read
    }

    /// Returns `length` bytes starting `skip` bytes after the read cursor.
    #[must_use]
    pub fn peek(&self, length: usize, skip: usize) -> Option<&[u8]> {
        let start = self.read.checked_add(skip)?;
        let end = start.checked_add(length)?;
        self.data.get(start..end)
    }

    /// Returns everything from the read cursor up to, not including, the
    /// first occurrence of `delimiter`.
    #[must_use]
    pub fn peek_until(&self, delimiter: &[u8]) -> Option<&[u8]> {
        let unread = &self.data[self.read..];
        unread.find(delimiter).map(|end| &unread[..end])
    }

    /// Moves the read cursor forward by `length` bytes.
    ///
    /// Returns `false`, leaving the buffer untouched, if fewer than `length`
    /// unconsumed bytes exist.
    pub fn advance(&mut self, length: usize) -> bool {
        if length > self.remaining_len() {
            return false;
        }
        self.read += length;
        self.compact();
        true
    }

    /// A bounded, escaped preview of the upcoming data for diagnostics.
    ///
    /// Prefixed with `...` when something was consumed before, suffixed with
    /// `...` when more data follows the preview and `<EOF>` otherwise.
    #[must_use]
    pub fn context_string(&self) -> String {
        let mut out = String::new();
        if self.consumed_len() > 0 {
            out.push_str("...");
        }

        let shown = self.remaining_len().min(CONTEXT_LENGTH);
        out.push_str(&escape_for_logging(&self.data[self.read..self.read + shown]));

        if self.remaining_len() > shown {
            out.push_str("...");
        } else {
            out.push_str("<EOF>");
        }
        out
    }

    fn compact(&mut self) {
        let shift = self.options.shift_length;
        if shift > 0 && self.read >= shift {
            self.data.drain(..self.read);
            self.discarded += self.read;
            self.read = 0;
        }
    }
}

/// Escapes control characters and invalid UTF-8 in `data` for log output.
#[must_use]
pub fn escape_for_logging(data: &[u8]) -> String {
    let quoted = format!("{:?}", data.as_bstr());
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&quoted);
    inner.replace("\\\"", "\"")
}
