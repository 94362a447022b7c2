//! Fixed-size overlapping text chunker.
//!
//! Splits a document's body into segments of at most `chunk_size`
//! characters, where consecutive segments share exactly `chunk_overlap`
//! trailing/leading characters. Overlap is truncated, never padded, at
//! document boundaries. Counting is by Unicode scalar, so a chunk
//! boundary can never split a multi-byte character.
//!
//! Each chunk receives a deterministic identifier derived from its
//! document path and index, plus a SHA-256 hash of its text for
//! staleness detection.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Split a document into overlapping chunks.
///
/// Requires `chunk_size > 0` and `chunk_overlap < chunk_size` (enforced at
/// config load). Deterministic: the same document and settings always
/// produce the same chunk sequence. An empty document yields no chunks.
///
/// Concatenating the first chunk with the post-overlap suffix of every
/// later chunk reconstructs the document exactly.
pub fn split_document(doc: &Document, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    debug_assert!(chunk_size > 0);
    debug_assert!(chunk_overlap < chunk_size);

    let text = &doc.body;
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offsets of every char boundary, with the end of the string as
    // the final entry. Slicing between entries is always UTF-8 safe.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;

    let stride = chunk_size - chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = (start + chunk_size).min(n_chars);
        chunks.push(make_chunk(doc, index, &text[bounds[start]..bounds[end]]));
        index += 1;

        if end == n_chars {
            break;
        }
        start += stride;
    }

    chunks
}

fn make_chunk(doc: &Document, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}#{}", doc.meta.path, index),
        index,
        text: text.to_string(),
        hash,
        meta: doc.meta.clone(),
    }
}
