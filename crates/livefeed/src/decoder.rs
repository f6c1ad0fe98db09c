use serde_json::Value;

use crate::{
    chunk::{ChunkEvent, ChunkParser},
    error::FramingError,
    json_lines::JsonPerLineParser,
    options::{BufferOptions, Framing},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Value(Value),
    /// The chunked body reached its terminating chunk. Never produced for
    /// [`Framing::Raw`], where only the transport knows about the end.
    End,
}

/// The parser chain for one connection: optional chunk framing, then one
/// JSON value per record.
///
/// Bodies are pulled from the chunk layer only when the JSON layer has no
/// complete record left, so every fully formed value in a `write` is yielded
/// in order before the next chunk is even looked at.
#[derive(Debug)]
pub struct Decoder {
    chunks: Option<ChunkParser>,
    json: JsonPerLineParser,
}

impl Decoder {
    #[must_use]
    pub fn new(framing: Framing) -> Self {
        Self::with_options(framing, crate::json_lines::DEFAULT_SEPARATOR, BufferOptions::default())
    }

    #[must_use]
    pub fn with_options(
        framing: Framing,
        separator: impl AsRef<[u8]>,
        options: BufferOptions,
    ) -> Self {
        let chunks = match framing {
            Framing::Chunked => Some(ChunkParser::with_options(options)),
            Framing::Raw => None,
        };
        Self {
            chunks,
            json: JsonPerLineParser::with_options(separator, options),
        }
    }

    /// See [`JsonPerLineParser::skip_blank_records`].
    #[must_use]
    pub fn skip_blank_records(mut self, skip: bool) -> Self {
        self.json = self.json.skip_blank_records(skip);
        self
    }

    pub fn write<'d>(&'d mut self, data: &[u8]) -> DecodeIter<'d> {
        match &mut self.chunks {
            Some(chunks) => chunks.push(data),
            None => self.json.push(data),
        }
        DecodeIter { decoder: self }
    }

    /// Resets every layer.
    pub fn reset(&mut self) {
        if let Some(chunks) = &mut self.chunks {
            chunks.reset();
        }
        self.json.reset();
    }

    #[must_use]
    pub fn framing(&self) -> Framing {
        if self.chunks.is_some() {
            Framing::Chunked
        } else {
            Framing::Raw
        }
    }

    fn next_event(&mut self) -> Option<Result<DecodedEvent, FramingError>> {
        loop {
            if self.json.is_failed() {
                return None;
            }
            if let Some(value) = self.json.next_event() {
                return Some(value.map(DecodedEvent::Value));
            }

            let chunks = self.chunks.as_mut()?;
            match chunks.next_event()? {
                Ok(ChunkEvent::Body(body)) => self.json.push(&body),
                Ok(ChunkEvent::End) => return Some(Ok(DecodedEvent::End)),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

pub struct DecodeIter<'d> {
    decoder: &'d mut Decoder,
}

impl Iterator for DecodeIter<'_> {
    type Item = Result<DecodedEvent, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_event()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::chunk::encode_chunks;

    #[test]
    fn values_split_across_chunks() {
        let mut decoder = Decoder::new(Framing::Chunked);
        let mut events = Vec::new();
        for part in [&b"4\r\n{\"x\"\r\n"[..], b"2\r\n:1\r\n", b"2\r\n}\n\r\n0\r\n\r\n"] {
            events.extend(decoder.write(part).map(Result::unwrap));
        }
        assert_eq!(
            events,
            [DecodedEvent::Value(json!({"x": 1})), DecodedEvent::End]
        );
    }

    #[test]
    fn raw_framing_passes_bytes_through() {
        let mut decoder = Decoder::new(Framing::Raw);
        let events: Vec<_> = decoder
            .write(b"{\"x\":1}\n{\"x\":2}\n")
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            events,
            [
                DecodedEvent::Value(json!({"x": 1})),
                DecodedEvent::Value(json!({"x": 2})),
            ]
        );
    }

    #[test]
    fn chunk_error_is_reported_once() {
        let mut decoder = Decoder::new(Framing::Chunked);
        let events: Vec<_> = decoder.write(b"2\r\n1\n\r\nzz\r\n").collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(DecodedEvent::Value(_))));
        assert!(matches!(
            events[1],
            Err(FramingError::InvalidChunkLength { .. })
        ));
        assert_eq!(decoder.write(b"2\r\n2\n\r\n").count(), 0);
    }

    #[test]
    fn json_error_stops_the_chain() {
        let mut decoder = Decoder::new(Framing::Chunked);
        let wire = encode_chunks(["{\"x\":\n", "{\"x\":2}\n"]);
        let events: Vec<_> = decoder.write(&wire).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(FramingError::InvalidJson { .. })));

        decoder.reset();
        let wire = encode_chunks(["{\"x\":3}\n"]);
        let events: Vec<_> = decoder.write(&wire).map(Result::unwrap).collect();
        assert_eq!(
            events,
            [DecodedEvent::Value(json!({"x": 3})), DecodedEvent::End]
        );
    }
}
