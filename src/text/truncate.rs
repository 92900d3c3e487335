use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::count::{count_chars, is_sentence_end_char};

/// Where the truncator looks for a sentence boundary inside the cut snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySearch {
    /// Only accept a sentence end that is followed by nothing but whitespace
    /// up to the snippet end.
    #[default]
    SnippetEdge,
    /// Accept the last sentence end anywhere in the snippet.
    Anywhere,
}

impl BoundarySearch {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "edge" | "snippet_edge" => Some(Self::SnippetEdge),
            "anywhere" | "last" => Some(Self::Anywhere),
            _ => None,
        }
    }
}

/// Truncates `text` to at most `max_len` characters, preferring to cut right
/// after a sentence-ending mark. Text that already fits is returned unchanged.
pub fn safe_trim(text: &str, max_len: usize, mode: BoundarySearch) -> String {
    if count_chars(text) <= max_len {
        return text.to_string();
    }

    let snippet: String = text.nfc().take(max_len).collect();
    let boundary = match mode {
        BoundarySearch::SnippetEdge => edge_boundary(&snippet),
        BoundarySearch::Anywhere => snippet
            .char_indices()
            .filter(|(_, ch)| is_sentence_end_char(*ch))
            .last()
            .map(|(idx, ch)| idx + ch.len_utf8()),
    };

    match boundary {
        Some(end) => snippet[..end].to_string(),
        None => snippet.trim_end().to_string(),
    }
}

/// Byte offset just past a sentence-ending mark that is followed only by
/// whitespace, if the snippet ends that way.
fn edge_boundary(snippet: &str) -> Option<usize> {
    for (idx, ch) in snippet.char_indices().rev() {
        if is_sentence_end_char(ch) {
            return Some(idx + ch.len_utf8());
        }
        if !ch.is_whitespace() {
            return None;
        }
    }
    None
}
