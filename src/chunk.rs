//! Overlapping character-window chunker.
//!
//! Splits extracted page text into [`Chunk`]s of at most `chunk_size`
//! characters, where each chunk starts `chunk_overlap` characters before
//! the previous one ended. Window ends are pulled back to the nearest
//! whitespace so words are not cut in half when that is possible.
//!
//! Each chunk receives a fresh UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into overlapping windows. Returns chunks with contiguous
/// indices starting at 0.
///
/// `chunk_overlap` is clamped below `chunk_size` so every window advances.
/// Whitespace-only text yields no chunks.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);

    let chars: Vec<char> = text.trim().chars().collect();
    let mut chunks = Vec::new();
    if chars.is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end < chars.len() {
            // Try to end the window at a whitespace boundary
            chars[start..hard_end]
                .iter()
                .rposition(|c| c.is_whitespace())
                .map(|pos| start + pos)
                .filter(|&pos| pos > start + overlap)
                .unwrap_or(hard_end)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, piece));
            chunk_index += 1;
        }

        if end >= chars.len() {
            break;
        }

        let mut next = end - overlap;
        // Start the next window on a word when the overlap lands mid-word
        if let Some(ws) = chars[next..end].iter().position(|c| c.is_whitespace()) {
            if next > 0 && !chars[next - 1].is_whitespace() {
                next += ws + 1;
            }
        }
        start = next.max(start + 1);
    }

    chunks
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 200, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("doc1", "", 200, 50).is_empty());
        assert!(chunk_text("doc1", "   \n\n ", 200, 50).is_empty());
    }

    #[test]
    fn test_windows_respect_size() {
        let text = words(300);
        let chunks = chunk_text("doc1", &text, 200, 50);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 200, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let chunks = chunk_text("doc1", &words(500), 200, 50);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = chunk_text("doc1", &words(200), 200, 50);
        for pair in chunks.windows(2) {
            let tail_word = pair[0].text.split_whitespace().last().unwrap();
            assert!(
                pair[1].text.contains(tail_word),
                "'{}' not carried into next chunk",
                tail_word
            );
        }
    }

    #[test]
    fn test_covers_every_word() {
        let text = words(400);
        let chunks = chunk_text("doc1", &text, 200, 50);
        for w in text.split_whitespace() {
            assert!(
                chunks
                    .iter()
                    .any(|c| c.text.split_whitespace().any(|cw| cw == w)),
                "{} missing",
                w
            );
        }
    }

    #[test]
    fn test_unbroken_text_hard_split() {
        let text = "x".repeat(450);
        let chunks = chunk_text("doc1", &text, 200, 50);
        assert_eq!(chunks[0].text.len(), 200);
        // 0..200, 150..350, 300..450
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_overlap_clamped() {
        let chunks = chunk_text("doc1", &"y".repeat(30), 10, 50);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 30);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "é".repeat(350);
        let chunks = chunk_text("doc1", &text, 200, 50);
        assert_eq!(chunks[0].text.chars().count(), 200);
    }

    #[test]
    fn test_deterministic_text_and_hash() {
        let text = words(120);
        let c1 = chunk_text("doc1", &text, 200, 50);
        let c2 = chunk_text("doc1", &text, 200, 50);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }
}
