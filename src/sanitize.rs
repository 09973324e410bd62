use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

fn separator_run_re() -> &'static Regex {
    static SEPARATOR_RUN_RE: OnceLock<Regex> = OnceLock::new();
    SEPARATOR_RUN_RE.get_or_init(|| Regex::new(r"[_\-=~`^]+").expect("valid separator regex"))
}

fn whitespace_run_re() -> &'static Regex {
    static WHITESPACE_RUN_RE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE_RUN_RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Cleans a free-text video title, returning `None` when nothing usable is left.
///
/// The output is ASCII, has no repeated symbol runs or separator runs, single
/// spaces and no surrounding whitespace. Applying it to its own output is a
/// no-op.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let ascii: String = raw.nfc().filter(char::is_ascii).collect();
    let collapsed = collapse_symbol_runs(&ascii);
    let separated = separator_run_re().replace_all(&collapsed, " ");
    let title = whitespace_run_re()
        .replace_all(&separated, " ")
        .trim()
        .to_string();

    if is_digits_and_punctuation(&title) {
        return None;
    }
    if title.chars().filter(char::is_ascii_alphanumeric).count() <= 1 {
        return None;
    }
    Some(title)
}

/// Collapses runs of two or more identical characters that are neither word
/// characters nor whitespace ("!!!" -> "!", "..." -> ".").
fn collapse_symbol_runs(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous: Option<char> = None;
    for c in value.chars() {
        let symbol = !(c.is_alphanumeric() || c == '_' || c.is_whitespace());
        if symbol && previous == Some(c) {
            continue;
        }
        out.push(c);
        previous = Some(c);
    }
    out
}

/// Titles such as "2:" or "----": only digits, punctuation and whitespace.
fn is_digits_and_punctuation(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_punctuation() || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("----")]
    #[case("2:")]
    #[case("1")]
    #[case("--- 3")]
    #[case(".:")]
    #[case("   ")]
    #[case("a")]
    #[case("🎥🎥")]
    #[case("12 34")]
    fn rejects_unusable_titles(#[case] raw: &str) {
        assert_eq!(sanitize_title(raw), None);
    }

    #[rstest]
    #[case("CS 101", "CS 101")]
    #[case("Intro to Biology", "Intro to Biology")]
    #[case("  Intro   to\tBiology ", "Intro to Biology")]
    #[case("🎥 Cell Division!!!", "Cell Division!")]
    #[case("Algebra___Basics", "Algebra Basics")]
    #[case("Part 1 -- Forces == Motion", "Part 1 Forces Motion")]
    #[case("What?? Why...", "What? Why.")]
    #[case("Café Chat", "Caf Chat")]
    #[case("Ch 2", "Ch 2")]
    fn cleans_titles(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_title(raw).as_deref(), Some(expected));
    }

    #[test]
    fn composes_before_stripping_non_ascii() {
        // "e" followed by a combining acute accent composes to a single
        // non-ASCII code point, which is then removed.
        assert_eq!(sanitize_title("Cafe\u{301} Chat").as_deref(), Some("Caf Chat"));
    }

    #[test]
    fn keeps_distinct_adjacent_symbols() {
        assert_eq!(sanitize_title("Q&A: Part 2").as_deref(), Some("Q&A: Part 2"));
        assert_eq!(sanitize_title("Hello?!").as_deref(), Some("Hello?!"));
    }

    proptest! {
        #[test]
        fn sanitizing_is_idempotent(raw in "\\PC{0,40}") {
            if let Some(once) = sanitize_title(&raw) {
                prop_assert_eq!(sanitize_title(&once), Some(once.clone()));
            }
        }

        #[test]
        fn sanitized_titles_are_trimmed_ascii(raw in "[ -~]{0,40}") {
            if let Some(title) = sanitize_title(&raw) {
                prop_assert!(title.is_ascii());
                prop_assert_eq!(title.trim(), title.as_str());
                prop_assert!(!title.contains("  "));
            }
        }
    }
}
