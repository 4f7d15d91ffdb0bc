//! Sentence-aware text chunking.
//!
//! Articles are windowed into chunks of roughly `chunk_size` characters
//! with `chunk_overlap` characters of trailing context carried into the
//! next window. Window boundaries snap to sentence ends so no chunk
//! starts or stops mid-sentence, except for pathological sentences
//! longer than a whole window, which are hard-split.

/// Chunks shorter than this after trimming are discarded as noise.
pub const MIN_CHUNK_CHARS: usize = 16;

/// Split `text` into overlapping sentence-aligned chunks.
///
/// Returns an empty vec for text with no usable content.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(MIN_CHUNK_CHARS);
    let chunk_overlap = chunk_overlap.min(chunk_size / 2);

    let mut pieces: Vec<String> = Vec::new();
    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if sentence.chars().count() > chunk_size {
            pieces.extend(hard_split(sentence, chunk_size));
        } else {
            pieces.push(sentence.to_string());
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();
        if window_len > 0 && window_len + piece_len + 1 > chunk_size {
            chunks.push(window.join(" "));

            // Seed the next window with trailing sentences up to the
            // overlap budget. Best effort: a trailing sentence longer
            // than the budget means no overlap at all.
            let mut kept: Vec<String> = Vec::new();
            let mut kept_len = 0usize;
            for prev in window.iter().rev() {
                let prev_len = prev.chars().count();
                if kept_len + prev_len > chunk_overlap {
                    break;
                }
                kept.push(prev.clone());
                kept_len += prev_len + 1;
            }
            kept.reverse();
            window = kept;
            window_len = kept_len;
        }
        window_len += piece_len + if window.is_empty() { 0 } else { 1 };
        window.push(piece);
    }
    if !window.is_empty() {
        chunks.push(window.join(" "));
    }

    chunks.retain(|c| c.chars().count() >= MIN_CHUNK_CHARS);
    chunks
}

/// Split text at sentence-ending punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, c) in text.char_indices() {
        if (c == '.' || c == '!' || c == '?') && i + 1 < text.len() {
            let next = bytes.get(i + 1).copied().unwrap_or(0);
            if next == b' ' || next == b'\n' {
                result.push(&text[start..=i]);
                start = i + 1;
            }
        }
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

/// Split an oversized sentence into `max_chars`-character runs.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars)
        .map(|run| run.iter().collect())
        .collect()
}

// ====== Tests ======

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 200, 40).is_empty());
        assert!(chunk_text("   \n  ", 200, 40).is_empty());
    }

    #[test]
    fn tiny_text_is_discarded() {
        assert!(chunk_text("Short.", 200, 40).is_empty());
    }

    #[test]
    fn short_article_is_one_chunk() {
        let text = "Rust is a systems programming language. It focuses on safety.";
        let chunks = chunk_text(text, 200, 40);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("systems programming"));
        assert!(chunks[0].contains("safety"));
    }

    #[test]
    fn long_text_produces_multiple_windows() {
        let sentence = "The quick brown fox jumps over the lazy dog every day. ";
        let text = sentence.repeat(10);
        let chunks = chunk_text(&text, 150, 30);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Each window ends at a sentence boundary.
            assert!(chunk.ends_with('.'), "chunk not sentence-aligned: {chunk}");
        }
    }

    #[test]
    fn consecutive_windows_share_overlap() {
        let sentence = "Alpha beta gamma delta epsilon zeta eta theta one. ";
        let text = sentence.repeat(8);
        let chunks = chunk_text(&text, 150, 60);
        assert!(chunks.len() > 1);
        let first_tail: Vec<&str> = chunks[0].split(". ").collect();
        let last_sentence = *first_tail.last().unwrap();
        assert!(
            chunks[1].starts_with(last_sentence.trim_end_matches('.'))
                || chunks[1].contains(last_sentence.trim_end_matches('.')),
            "second window does not carry overlap"
        );
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let text = "x".repeat(500);
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn split_respects_multibyte_boundaries() {
        let text = "Füße über die Brücke längs. ".repeat(10);
        let chunks = chunk_text(&text, 120, 20);
        assert!(!chunks.is_empty());
        for chunk in chunks {
            assert!(chunk.contains("Brücke"));
        }
    }
}
