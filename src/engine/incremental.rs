/// Turns successive full decodes of a growing completion into stream deltas.
///
/// Decoder cleanup can rewrite text that was already streamed, for example by
/// merging a space into the following punctuation. Streamed text cannot be
/// taken back, so after a rewrite the delta skips as many characters as were
/// rewritten. The streamed character count stays in step with the decode.
#[derive(Debug, Default)]
pub struct IncrementalText {
    emitted: String,
}

impl IncrementalText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta for the latest full decode. Empty while the decode ends in an
    /// incomplete character.
    pub fn advance(&mut self, decoded: String) -> String {
        if decoded.ends_with('\u{FFFD}') {
            return String::new();
        }
        let common = common_prefix_len(&self.emitted, &decoded);
        let rewritten = self.emitted[common..].chars().count();
        let delta = decoded[common..].chars().skip(rewritten).collect();
        self.emitted = decoded;
        delta
    }
}

/// Byte length of the longest shared prefix, on a char boundary of both.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((idx, ch), _)| idx + ch.len_utf8())
}
