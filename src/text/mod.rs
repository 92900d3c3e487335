//! Character counting and the post-processing applied to generated text.

mod count;
mod delimiters;
mod truncate;

pub use count::{SENTENCE_END_CHARS, count_chars, is_sentence_end_char};
pub use delimiters::{PAIRS, auto_close_pairs, unmatched_closers};
pub use truncate::{BoundarySearch, safe_trim};

/// Truncates and then closes delimiters, shrinking the truncation budget when
/// the appended closers would push the result past `max_len`.
pub fn fit_to_max_len(text: &str, max_len: usize, mode: BoundarySearch) -> String {
    let mut budget = max_len;
    loop {
        let closed = auto_close_pairs(&safe_trim(text, budget, mode));
        let len = count_chars(&closed);
        if len <= max_len || budget == 0 {
            return closed;
        }
        budget = budget.saturating_sub(len - max_len);
    }
}
