//! Splits long text into overlapping chunks for embedding and search.
//! Prefers paragraph boundaries; falls back to line breaks, then spaces, then character splits.

/// Default maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default characters of trailing context repeated at the start of the next chunk.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn new(max_chars: usize, overlap: usize) -> Self {
        Self { max_chars, overlap }
    }
}

/// Split `text` into chunks of at most `params.max_chars` characters.
/// Blank input yields no chunks; `max_chars == 0` disables splitting.
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if params.max_chars == 0 {
        return vec![text.to_string()];
    }
    let params = ChunkParams {
        overlap: params.overlap.min(params.max_chars.saturating_sub(1)),
        ..params
    };
    split_recursive(text, SEPARATORS, params)
}

fn split_recursive(text: &str, separators: &[&str], params: ChunkParams) -> Vec<String> {
    let Some((sep, rest)) = separators.split_first() else {
        return hard_split(text, params.max_chars);
    };
    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for part in text.split(sep).map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(part) <= params.max_chars {
            fitting.push(part);
        } else {
            out.extend(merge(&fitting, sep, params));
            fitting.clear();
            out.extend(split_recursive(part, rest, params));
        }
    }
    out.extend(merge(&fitting, sep, params));
    out
}

/// Greedily packs parts into chunks, carrying up to `overlap` characters of trailing
/// parts into the next chunk.
fn merge(parts: &[&str], sep: &str, params: ChunkParams) -> Vec<String> {
    let sep_len = char_len(sep);
    let mut out = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut len = 0usize;
    for part in parts {
        let part_len = char_len(part);
        if !window.is_empty() && len + sep_len + part_len > params.max_chars {
            out.push(window.join(sep));
            while !window.is_empty()
                && (len > params.overlap || len + sep_len + part_len > params.max_chars)
            {
                let dropped = window.remove(0);
                len -= char_len(dropped) + if window.is_empty() { 0 } else { sep_len };
            }
        }
        len += part_len + if window.is_empty() { 0 } else { sep_len };
        window.push(part);
    }
    if !window.is_empty() {
        out.push(window.join(sep));
    }
    out
}

/// Last resort: cut every `max_chars` characters, on char boundaries.
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let c = chunk_text("One paragraph.", ChunkParams::default());
        assert_eq!(c, vec!["One paragraph."]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("  \n\n ", ChunkParams::default()).is_empty());
    }

    #[test]
    fn small_paragraphs_are_packed_together() {
        let c = chunk_text("P1\n\nP2\n\nP3", ChunkParams::new(512, 0));
        assert_eq!(c, vec!["P1\n\nP2\n\nP3"]);
    }

    #[test]
    fn paragraphs_split_when_too_big() {
        let c = chunk_text("aaaa\n\nbbbb\n\ncccc", ChunkParams::new(10, 0));
        assert_eq!(c, vec!["aaaa\n\nbbbb", "cccc"]);
    }

    #[test]
    fn overlap_repeats_trailing_words() {
        let c = chunk_text("aaaa bbbb cccc dddd", ChunkParams::new(9, 4));
        assert_eq!(c, vec!["aaaa bbbb", "bbbb cccc", "cccc dddd"]);
    }

    #[test]
    fn long_paragraph_respects_limit() {
        let long = "word ".repeat(300);
        let c = chunk_text(&long, ChunkParams::new(200, 50));
        assert!(c.len() >= 8);
        assert!(c.iter().all(|ch| ch.chars().count() <= 200));
    }

    #[test]
    fn unbroken_text_is_cut_on_char_boundaries() {
        let long = "é".repeat(25);
        let c = chunk_text(&long, ChunkParams::new(10, 3));
        assert_eq!(c.len(), 3);
        assert!(c.iter().all(|ch| ch.chars().count() <= 10));
        assert_eq!(c.concat(), long);
    }
}
