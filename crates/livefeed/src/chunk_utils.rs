/// Split `payload` into approximately equal-sized byte fragments.
///
/// Fragments may end in the middle of a multi-byte UTF-8 sequence, which is
/// exactly what a network read can do.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn produce_chunks(payload: &[u8], parts: usize) -> Vec<&[u8]> {
    assert!(parts > 0);
    let chunk_size = payload.len().div_ceil(parts).max(1);
    payload.chunks(chunk_size).collect()
}

/// Split `payload` at the given byte offsets. Offsets beyond the payload and
/// repeated offsets are ignored; the fragments always concatenate back to
/// `payload`.
#[must_use]
pub fn split_at_offsets<'a>(payload: &'a [u8], offsets: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = offsets
        .iter()
        .copied()
        .filter(|&offset| offset > 0 && offset < payload.len())
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut fragments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        fragments.push(&payload[start..cut]);
        start = cut;
    }
    fragments.push(&payload[start..]);
    fragments
}

/// Return a sequence of prefixes converging to `payload`.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn produce_prefixes(payload: &[u8], parts: usize) -> Vec<&[u8]> {
    let mut end = 0;
    produce_chunks(payload, parts)
        .into_iter()
        .map(|chunk| {
            end += chunk.len();
            &payload[..end]
        })
        .collect()
}
