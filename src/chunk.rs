//! Fixed-size overlapping text chunker.
//!
//! Splits extracted document text into windows of `chunk_size` characters
//! advancing at stride `chunk_size - overlap`, so consecutive windows share
//! `overlap` characters of context. The final window may be shorter. Windows
//! are measured in characters, never bytes, so multibyte input is safe.

/// Split text into overlapping windows. Deterministic; empty input yields
/// an empty sequence.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let stride = chunk_size.saturating_sub(overlap).max(1);

    // Byte offsets of each char boundary, plus the end of the string, so
    // windows can be sliced without landing inside a code point.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < n_chars {
        let end = (start + chunk_size).min(n_chars);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        start += stride;
    }
    chunks
}
