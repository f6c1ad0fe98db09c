#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use livefeed::{DecodedEvent, Decoder, Framing, chunk_utils::split_at_offsets, encode_chunks};
use serde_json::{Map, Value};

#[derive(Debug, Arbitrary)]
struct Input {
    raw: bool,
    /// Chunk body size used when re-framing the records.
    body_len: u8,
    /// Read boundaries applied to the wire bytes.
    offsets: Vec<u16>,
    records: Vec<ArbitraryValue>,
    /// Appended after the framed records; usually garbage.
    tail: Vec<u8>,
}

#[derive(Debug)]
struct ArbitraryValue(Value);

impl<'a> Arbitrary<'a> for ArbitraryValue {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let value = match u.choose_index(16)? {
            0 => Value::Null,
            1 => Value::Bool(u.arbitrary()?),
            2..=5 => {
                let n: f64 = u.arbitrary()?;
                Value::Number(
                    serde_json::Number::from_f64(n).ok_or(arbitrary::Error::IncorrectFormat)?,
                )
            }
            6..=9 => Value::String(u.arbitrary()?),
            10..=12 => {
                let elems: Vec<ArbitraryValue> = u.arbitrary()?;
                Value::Array(elems.into_iter().map(|v| v.0).collect())
            }
            13..=15 => {
                let m: Vec<(String, ArbitraryValue)> = u.arbitrary()?;
                Value::Object(Map::from_iter(m.into_iter().map(|(k, v)| (k, v.0))))
            }
            _ => Err(arbitrary::Error::IncorrectFormat)?,
        };
        Ok(ArbitraryValue(value))
    }
}

/// What a decoder reported, with error details dropped: the error context
/// depends on how much had been written when the error was noticed.
#[derive(Debug, PartialEq)]
enum Seen {
    Value(Value),
    End,
    Error,
}

fn decode<'a>(framing: Framing, reads: impl IntoIterator<Item = &'a [u8]>) -> Vec<Seen> {
    let mut decoder = Decoder::new(framing);
    let mut seen = Vec::new();
    for read in reads {
        seen.extend(decoder.write(read).map(|event| match event {
            Ok(DecodedEvent::Value(value)) => Seen::Value(value),
            Ok(DecodedEvent::End) => Seen::End,
            Err(_) => Seen::Error,
        }));
    }
    seen
}

fn check(input: &Input) {
    let mut lines = Vec::new();
    for record in &input.records {
        lines.extend(serde_json::to_vec(&record.0).unwrap());
        lines.push(b'\n');
    }

    let (framing, mut wire) = if input.raw {
        (Framing::Raw, lines)
    } else {
        let body_len = usize::from(input.body_len.max(1));
        (Framing::Chunked, encode_chunks(lines.chunks(body_len)))
    };
    let clean = input.tail.is_empty();
    wire.extend_from_slice(&input.tail);

    let offsets: Vec<usize> = input.offsets.iter().map(|&o| usize::from(o)).collect();
    let whole = decode(framing, [wire.as_slice()]);
    let fragmented = decode(framing, split_at_offsets(&wire, &offsets));

    assert!(whole.iter().filter(|s| **s == Seen::Error).count() <= 1);
    assert!(fragmented.iter().filter(|s| **s == Seen::Error).count() <= 1);
    // A runaway length line is reported as soon as the buffered line exceeds
    // the limit, which depends on the read boundaries. Everything before the
    // first error must agree.
    let first_error = |seen: &[Seen]| seen.iter().position(|s| *s == Seen::Error);
    let agreed = match (first_error(&whole), first_error(&fragmented)) {
        (None, None) => whole.len().max(fragmented.len()),
        (a, b) => a.into_iter().chain(b).min().unwrap_or_default(),
    };
    assert_eq!(whole.get(..agreed), fragmented.get(..agreed));

    if clean {
        let values = whole.iter().filter(|s| matches!(s, Seen::Value(_))).count();
        assert_eq!(values, input.records.len());
        assert!(!whole.contains(&Seen::Error));
        assert_eq!(whole, fragmented);
    }
}

fuzz_target!(|input: Input| check(&input));
