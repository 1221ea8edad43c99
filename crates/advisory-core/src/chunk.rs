//! Paragraph-boundary chunker for knowledge-base documents.
//!
//! Documents are split on blank lines (`\n\n`) and packed into chunks of
//! at most `max_tokens × 4` characters. A paragraph longer than that is
//! hard-split at the last newline or space before the limit.
//!
//! Chunk ids are deterministic, `{doc_id}_chunk_{NNN}`, so re-ingesting a
//! document overwrites its previous vectors instead of duplicating them.
//! Each chunk also carries a SHA-256 hash of its text.
//!
//! ```rust
//! use advisory_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("farm_guide", "Soil health.\n\nIrrigation.", 500);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "farm_guide_chunk_000");
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default chunk size used by ingestion.
pub const DEFAULT_MAX_TOKENS: usize = 500;

/// Split `text` into chunks of at most `max_tokens` (estimated).
///
/// Always returns at least one chunk; indices are contiguous from 0.
pub fn chunk_text(doc_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if joined_len > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(doc_id, i, piece))
        .collect()
}

/// Estimated token count of a chunk's text.
pub fn estimate_chunk_tokens(text: &str) -> u32 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u32
}

/// Split an oversized paragraph at whitespace, never inside a UTF-8
/// character, always making progress.
fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;
    while !rest.is_empty() {
        if rest.len() <= max_chars {
            let tail = rest.trim();
            if !tail.is_empty() {
                out.push(tail.to_string());
            }
            break;
        }
        let mut limit = max_chars;
        while limit > 0 && !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        let cut = rest[..limit]
            .rfind(['\n', ' '])
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let cut = if cut == 0 {
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            cut
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn make_chunk(doc_id: &str, index: usize, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Chunk {
        id: format!("{}_chunk_{:03}", doc_id, index),
        document_id: doc_id.to_string(),
        chunk_index: index as i64,
        text,
        hash,
    }
}
