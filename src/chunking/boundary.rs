//! Span planner: decides where each chunk of a file starts and ends.
//!
//! Cut preference inside the window `[start + size/2, start + size]`:
//! 1. A syntax boundary supplied by the AST pass
//! 2. The end of a blank line
//! 3. The end of any line
//! 4. A statement end (`;` or `}`)
//! 5. Whitespace
//! 6. Hard cut at a UTF-8 character boundary
//!
//! The next chunk starts `overlap` bytes before the cut, moved forward to a
//! line start when one falls inside the overlap.

/// Smallest chunk size honoured; keeps the planner making progress.
const MIN_CHUNK_SIZE: usize = 16;

/// Byte range of one chunk plus how much of it repeats the previous chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
}

/// Plan chunk spans for `content`.
///
/// `syntax` holds ascending byte offsets that are preferred cut points.
/// `overlap` must be at most `size / 2`.
pub fn plan_spans(content: &str, size: usize, overlap: usize, syntax: &[usize]) -> Vec<Span> {
    let len = content.len();
    if len == 0 {
        return Vec::new();
    }
    let size = size.max(MIN_CHUNK_SIZE);
    let overlap = overlap.min(size / 2);
    let bytes = content.as_bytes();

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut carried = 0usize;
    let mut prev_end = 0usize;

    loop {
        if len - start <= size {
            spans.push(Span {
                start,
                end: len,
                overlap: carried,
            });
            break;
        }

        let hard = floor_char_boundary(content, start + size);
        let min_cut = (start + size / 2).max(prev_end + 1).min(hard);
        let cut = find_cut(bytes, min_cut, hard, syntax);

        spans.push(Span {
            start,
            end: cut,
            overlap: carried,
        });

        let next_start = if overlap == 0 {
            cut
        } else {
            overlap_start(content, cut, overlap)
        };
        carried = cut - next_start;
        prev_end = cut;
        start = next_start;
    }

    spans
}

fn find_cut(bytes: &[u8], min_cut: usize, hard: usize, syntax: &[usize]) -> usize {
    // Syntax boundaries: largest one inside the window.
    let upper = syntax.partition_point(|&b| b <= hard);
    if let Some(&b) = syntax[..upper].last() {
        if b >= min_cut {
            return b;
        }
    }

    let window = &bytes[min_cut..hard];

    if let Some(i) = window.windows(2).rposition(|w| w == b"\n\n") {
        return min_cut + i + 2;
    }
    if let Some(i) = window.iter().rposition(|&b| b == b'\n') {
        return min_cut + i + 1;
    }
    if let Some(i) = window.iter().rposition(|&b| b == b';' || b == b'}') {
        return min_cut + i + 1;
    }
    if let Some(i) = window.iter().rposition(|&b| b == b' ' || b == b'\t') {
        return min_cut + i + 1;
    }
    hard
}

/// Where the chunk after `cut` begins: `overlap` bytes back, or the first
/// line start inside that region.
fn overlap_start(content: &str, cut: usize, overlap: usize) -> usize {
    let from = ceil_char_boundary(content, cut.saturating_sub(overlap));
    match content.as_bytes()[from..cut].iter().position(|&b| b == b'\n') {
        Some(i) if from + i + 1 < cut => from + i + 1,
        _ => from,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
