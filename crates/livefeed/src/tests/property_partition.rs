//! Fragmentation invariance: splitting the input across `write` calls must
//! never change what the parsers emit.

use quickcheck::{QuickCheck, TestResult};
use serde_json::{Value, json};

use crate::{
    BufferOptions, ChunkEvent, ChunkParser, DecodedEvent, Decoder, Framing, FramingError,
    ParserBuffer, chunk_utils::split_at_offsets, encode_chunks,
};

fn tests() -> u64 {
    #[cfg(not(miri))]
    let tests = if is_ci::cached() { 10_000 } else { 1_000 };
    #[cfg(miri)]
    let tests = 10;
    tests
}

fn fragments<'a>(data: &'a [u8], splits: &[usize]) -> Vec<&'a [u8]> {
    let offsets: Vec<usize> = splits.iter().map(|s| s % (data.len() + 1)).collect();
    split_at_offsets(data, &offsets)
}

/// Consumes every complete `delimiter`-terminated record.
fn take_records(buffer: &mut ParserBuffer, delimiter: u8, records: &mut Vec<Vec<u8>>) {
    while let Some(record) = buffer.peek_until(&[delimiter]) {
        let record = record.to_vec();
        assert!(buffer.advance(record.len() + 1));
        records.push(record);
    }
}

#[test]
fn buffer_reassembly_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(data: Vec<u8>, splits: Vec<usize>, delimiter: u8, shift: u8) -> bool {
        let options = BufferOptions {
            shift_length: usize::from(shift % 8),
        };

        let mut whole = ParserBuffer::with_options(options);
        let mut expected = Vec::new();
        whole.write(&data);
        take_records(&mut whole, delimiter, &mut expected);

        let mut pieces = ParserBuffer::with_options(options);
        let mut records = Vec::new();
        for fragment in fragments(&data, &splits) {
            pieces.write(fragment);
            take_records(&mut pieces, delimiter, &mut records);
        }

        records == expected
            && pieces.consumed_len() == whole.consumed_len()
            && pieces.peek(pieces.remaining_len(), 0) == whole.peek(whole.remaining_len(), 0)
    }

    QuickCheck::new()
        .tests(tests())
        .quickcheck(prop as fn(Vec<u8>, Vec<usize>, u8, u8) -> bool);
}

#[test]
fn chunk_fragmentation_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(bodies: Vec<Vec<u8>>, splits: Vec<usize>) -> bool {
        let wire = encode_chunks(&bodies);

        let mut parser = ChunkParser::new();
        let mut decoded = Vec::new();
        let mut ended = false;
        for fragment in fragments(&wire, &splits) {
            for event in parser.write(fragment) {
                match event {
                    Ok(ChunkEvent::Body(body)) => decoded.push(body.to_vec()),
                    Ok(ChunkEvent::End) => ended = true,
                    Err(_) => return false,
                }
            }
        }

        let expected: Vec<Vec<u8>> = bodies.into_iter().filter(|b| !b.is_empty()).collect();
        ended && decoded == expected
    }

    QuickCheck::new()
        .tests(tests())
        .quickcheck(prop as fn(Vec<Vec<u8>>, Vec<usize>) -> bool);
}

#[test]
fn json_over_chunks_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(samples: Vec<(i32, String)>, body_splits: Vec<usize>, splits: Vec<usize>) -> bool {
        let values: Vec<Value> = samples
            .iter()
            .map(|(x, y)| json!({ "x": x, "y": y }))
            .collect();
        let lines: Vec<u8> = values
            .iter()
            .flat_map(|v| format!("{v}\n").into_bytes())
            .collect();

        let bodies = fragments(&lines, &body_splits);
        let wire = encode_chunks(&bodies);

        let mut decoder = Decoder::new(Framing::Chunked);
        let mut decoded = Vec::new();
        for fragment in fragments(&wire, &splits) {
            for event in decoder.write(fragment) {
                match event {
                    Ok(DecodedEvent::Value(value)) => decoded.push(value),
                    Ok(DecodedEvent::End) => {}
                    Err(_) => return false,
                }
            }
        }
        decoded == values
    }

    QuickCheck::new()
        .tests(tests())
        .quickcheck(prop as fn(Vec<(i32, String)>, Vec<usize>, Vec<usize>) -> bool);
}

#[test]
fn malformed_length_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(token: String) -> TestResult {
        let token = token.replace(['\r', '\n', ';'], "");
        let trimmed = token.trim_matches([' ', '\t']);
        if trimmed.chars().all(|c| c.is_ascii_hexdigit()) && !trimmed.is_empty() {
            return TestResult::discard();
        }

        let mut parser = ChunkParser::new();
        let input = format!("{token}\r\n3\r\nabc\r\n0\r\n\r\n");
        let events: Vec<_> = parser.write(input.as_bytes()).collect();
        TestResult::from_bool(matches!(
            &events[..],
            [Err(FramingError::InvalidChunkLength { .. })]
        ))
    }

    QuickCheck::new()
        .tests(tests())
        .quickcheck(prop as fn(String) -> TestResult);
}
