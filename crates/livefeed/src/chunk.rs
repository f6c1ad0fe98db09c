//! Incremental decoder for `Transfer-Encoding: chunked` framing.
//!
//! The wire format is `<hex-length>\r\n<body>\r\n`, repeated, terminated by a
//! zero-length chunk (`0\r\n\r\n`). Chunk lengths are octet counts, so the
//! decoder works on bytes and never assumes that a `write` boundary lines up
//! with a chunk boundary.

use bytes::Bytes;

use crate::{
    buffer::{ParserBuffer, escape_for_logging},
    error::FramingError,
    options::BufferOptions,
};

const CRLF: &[u8] = b"\r\n";

/// A length line longer than this can never be valid, even with chunk
/// extensions, and is reported instead of buffered forever.
pub const MAX_LENGTH_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    #[default]
    AwaitingLength,
    AwaitingBody,
    /// The terminating chunk was seen. Absorbing until [`ChunkParser::reset`].
    End,
    /// A framing error was reported. Absorbing until [`ChunkParser::reset`].
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// One complete chunk body.
    Body(Bytes),
    /// The zero-length terminating chunk.
    End,
}

enum Step {
    Continue,
    NeedData,
    Emit(ChunkEvent),
    Fail(FramingError),
}

/// Decodes chunked framing from bytes fed via [`write`](Self::write).
///
/// ```rust
/// use livefeed::{ChunkEvent, ChunkParser};
///
/// let mut parser = ChunkParser::new();
/// assert_eq!(parser.write(b"5\r\nhel").count(), 0);
///
/// let events: Vec<_> = parser.write(b"lo\r\n0\r\n\r\n").map(Result::unwrap).collect();
/// assert_eq!(events, [ChunkEvent::Body("hello".into()), ChunkEvent::End]);
/// ```
#[derive(Debug, Default)]
pub struct ChunkParser {
    buffer: ParserBuffer,
    state: ChunkState,
    chunk_length: usize,
}

impl ChunkParser {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BufferOptions::default())
    }

    #[must_use]
    pub fn with_options(options: BufferOptions) -> Self {
        Self {
            buffer: ParserBuffer::with_options(options),
            state: ChunkState::AwaitingLength,
            chunk_length: 0,
        }
    }

    /// Appends `data` and returns an iterator over every event that is now
    /// complete.
    ///
    /// Events not drained before the iterator is dropped are yielded by the
    /// next iterator.
    pub fn write<'p>(&'p mut self, data: &[u8]) -> ChunkIter<'p> {
        self.push(data);
        ChunkIter { parser: self }
    }

    /// Discards buffered data and expects a chunk length again. Chunk
    /// boundaries are connection-specific, so this is required after every
    /// reconnect.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.state = ChunkState::AwaitingLength;
        self.chunk_length = 0;
    }

    #[must_use]
    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.write(data);
    }

    /// Drives the state machine until it produces one event, needs more data,
    /// or fails.
    pub(crate) fn next_event(&mut self) -> Option<Result<ChunkEvent, FramingError>> {
        loop {
            let step = match self.state {
                ChunkState::AwaitingLength => self.parse_length(),
                ChunkState::AwaitingBody => self.parse_body(),
                ChunkState::End | ChunkState::Error => return None,
            };
            match step {
                Step::Continue => {}
                Step::NeedData => return None,
                Step::Emit(event) => return Some(Ok(event)),
                Step::Fail(err) => {
                    self.state = ChunkState::Error;
                    return Some(Err(err));
                }
            }
        }
    }

    fn parse_length(&mut self) -> Step {
        let Some(line) = self.buffer.peek_until(CRLF) else {
            if self.buffer.remaining_len() > MAX_LENGTH_LINE {
                return Step::Fail(FramingError::LengthLineTooLong {
                    limit: MAX_LENGTH_LINE,
                    context: self.buffer.context_string(),
                });
            }
            return Step::NeedData;
        };
        let line_len = line.len();

        let Some(length) = parse_chunk_length(line) else {
            return Step::Fail(FramingError::InvalidChunkLength {
                token: escape_for_logging(line),
                context: self.buffer.context_string(),
            });
        };

        self.buffer.advance(line_len + CRLF.len());

        if length == 0 {
            tracing::debug!("terminating chunk");
            self.state = ChunkState::End;
            return Step::Emit(ChunkEvent::End);
        }

        self.chunk_length = length;
        self.state = ChunkState::AwaitingBody;
        Step::Continue
    }

    fn parse_body(&mut self) -> Step {
        let length = self.chunk_length;
        let Some(body) = self.buffer.peek(length, 0) else {
            return Step::NeedData;
        };
        let Some(terminator) = self.buffer.peek(CRLF.len(), length) else {
            return Step::NeedData;
        };

        if terminator != CRLF {
            return Step::Fail(FramingError::MissingChunkTerminator {
                found: escape_for_logging(terminator),
                context: self.buffer.context_string(),
            });
        }

        let body = Bytes::copy_from_slice(body);
        tracing::trace!(len = length, "chunk body");
        self.buffer.advance(length + CRLF.len());
        self.state = ChunkState::AwaitingLength;
        Step::Emit(ChunkEvent::Body(body))
    }
}

/// Parses a chunk-length line: hex digits, optionally surrounded by spaces or
/// tabs and followed by `;extensions`, which are ignored.
fn parse_chunk_length(line: &[u8]) -> Option<usize> {
    let token = match line.iter().position(|&b| b == b';') {
        Some(end) => &line[..end],
        None => line,
    };
    let token = trim_blanks(token);
    if token.is_empty() {
        return None;
    }

    token.iter().try_fold(0usize, |length, &b| {
        let digit = char::from(b).to_digit(16)?;
        length.checked_mul(16)?.checked_add(digit as usize)
    })
}

fn trim_blanks(mut token: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = token {
        token = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = token {
        token = rest;
    }
    token
}

pub struct ChunkIter<'p> {
    parser: &'p mut ChunkParser,
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<ChunkEvent, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_event()
    }
}

/// Frames one chunk body. An empty body encodes the terminating chunk.
#[must_use]
pub fn encode_chunk(body: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", body.len()).into_bytes();
    out.extend_from_slice(body);
    out.extend_from_slice(CRLF);
    out
}

/// The terminating zero-length chunk.
#[must_use]
pub fn encode_terminator() -> &'static [u8] {
    b"0\r\n\r\n"
}

/// Frames every non-empty body in order and appends the terminating chunk.
#[must_use]
pub fn encode_chunks<I, B>(bodies: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for body in bodies {
        let body = body.as_ref();
        if !body.is_empty() {
            out.extend_from_slice(&encode_chunk(body));
        }
    }
    out.extend_from_slice(encode_terminator());
    out
}
