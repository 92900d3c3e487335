use unicode_normalization::UnicodeNormalization;

/// Characters that end a sentence for both truncation and punctuation biasing.
pub const SENTENCE_END_CHARS: [char; 8] = ['。', '．', '.', '!', '?', '！', '？', '\n'];

/// Counts characters after NFC normalization, so a base letter followed by a
/// combining mark counts the same as its precomposed form.
pub fn count_chars(text: &str) -> usize {
    text.nfc().count()
}

pub fn is_sentence_end_char(ch: char) -> bool {
    SENTENCE_END_CHARS.contains(&ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_composed_and_decomposed_forms_equally() {
        let precomposed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_eq!(count_chars(precomposed), 4);
        assert_eq!(count_chars(decomposed), 4);
    }

    #[test]
    fn counts_cjk_as_single_characters() {
        assert_eq!(count_chars("こんにちは。"), 6);
        assert_eq!(count_chars(""), 0);
    }

    #[test]
    fn detects_sentence_end_chars() {
        assert!(is_sentence_end_char('。'));
        assert!(is_sentence_end_char('\n'));
        assert!(!is_sentence_end_char('"'));
        assert!(!is_sentence_end_char('a'));
    }
}
