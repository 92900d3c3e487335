/// Opening delimiters and the closer each one expects.
pub const PAIRS: [(char, char); 8] = [
    ('(', ')'),
    ('[', ']'),
    ('{', '}'),
    ('"', '"'),
    ('\'', '\''),
    ('（', '）'),
    ('「', '」'),
    ('『', '』'),
];

fn closer_for(ch: char) -> Option<char> {
    PAIRS.iter().find(|(open, _)| *open == ch).map(|(_, close)| *close)
}

fn is_closer(ch: char) -> bool {
    PAIRS.iter().any(|(_, close)| *close == ch)
}

/// Closers still owed after scanning `text`, most recently opened first.
pub fn unmatched_closers(text: &str) -> Vec<char> {
    let mut stack: Vec<char> = Vec::new();
    for ch in text.chars() {
        // A symmetric quote closes the innermost open quote of the same kind.
        if is_closer(ch) && stack.last() == Some(&ch) {
            stack.pop();
        } else if let Some(close) = closer_for(ch) {
            stack.push(close);
        }
    }
    stack.reverse();
    stack
}

/// Appends a closer for every delimiter opened and not validly closed.
/// Stray closers that match nothing are left in place.
pub fn auto_close_pairs(text: &str) -> String {
    let missing = unmatched_closers(text);
    let mut out = String::with_capacity(text.len() + missing.len() * 3);
    out.push_str(text);
    out.extend(missing);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_in_reverse_order() {
        assert_eq!(auto_close_pairs("call(a, [b"), "call(a, [b])");
        assert_eq!(auto_close_pairs("「引用（注"), "「引用（注）」");
    }

    #[test]
    fn balanced_text_is_untouched() {
        let text = "f(x) = {a: [1, 2]} and \"quoted\" 『ok』";
        assert_eq!(auto_close_pairs(text), text);
    }

    #[test]
    fn stray_closers_pass_through() {
        assert_eq!(auto_close_pairs("oops) fine"), "oops) fine");
        // mismatched closer does not pop the open bracket
        assert_eq!(auto_close_pairs("[a)"), "[a)]");
    }

    #[test]
    fn unterminated_quote_gets_closed() {
        assert_eq!(auto_close_pairs("he said \"hi"), "he said \"hi\"");
        assert_eq!(auto_close_pairs("'(\""), "'(\"\")'");
    }

    #[test]
    fn reports_missing_closers() {
        assert_eq!(unmatched_closers("({["), vec![']', '}', ')']);
        assert!(unmatched_closers("()").is_empty());
    }
}
