//! Reply normalization for Persian model output.
//!
//! Two passes run on every final answer:
//! - [`remove_repeated`] collapses degenerate word loops ("باشه باشه باشه")
//!   and its output is what gets persisted;
//! - [`clean_bot_message`] fixes whitespace and punctuation for display.

use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of the same word at least this long are collapsed to one occurrence.
const MIN_REPEAT_RUN: usize = 3;
const MIN_REPEAT_WORD_CHARS: usize = 2;
const MAX_REPEAT_WORD_CHARS: usize = 30;

/// Sentence punctuation handled by the spacing rules.
const PUNCTUATION: &[char] = &['،', '.', '؟', '!', '…'];

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+)(\s*)").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([،.؟!…])").unwrap());
// Digits are excluded so decimals such as "2.5" survive.
static MISSING_SPACE_AFTER_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([،.؟!…])([^\s<،.؟!…\d])").unwrap());
static PERSIAN_HYPHEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([اآبپتثجچحخدذرزژسشصضطظعغفقکگلمنوهی])\s*-\s*([اآبپتثجچحخدذرزژسشصضطظعغفقکگلمنوهی])")
        .unwrap()
});
static DISALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"[^\w\s.،؟!\-«»"()\[\]{}…:%/+\x{0600}-\x{06FF}\x{200C}\x{FE0F}\p{Extended_Pictographic}]"#,
    )
    .unwrap()
});
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap());

/// Collapse runs of three or more identical consecutive words into one.
///
/// Only "word" tokens (letters, digits or underscore, 2 to 30 chars) are
/// considered; comparison ignores case. Whitespace between surviving tokens
/// is preserved.
pub fn remove_repeated(text: &str) -> String {
    let segments: Vec<(&str, &str)> = TOKEN
        .captures_iter(text)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2).map_or("", |m| m.as_str()))))
        .collect();

    let leading_len = text.len() - text.trim_start().len();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..leading_len]);

    let mut i = 0;
    while i < segments.len() {
        let (word, _) = segments[i];
        let mut run_end = i + 1;
        if is_repeatable_word(word) {
            while run_end < segments.len() && same_word(segments[run_end].0, word) {
                run_end += 1;
            }
        }

        if run_end - i >= MIN_REPEAT_RUN {
            out.push_str(word);
            out.push_str(segments[run_end - 1].1);
        } else {
            for (w, ws) in &segments[i..run_end] {
                out.push_str(w);
                out.push_str(ws);
            }
        }
        i = run_end;
    }

    out
}

fn is_repeatable_word(token: &str) -> bool {
    let len = token.chars().count();
    (MIN_REPEAT_WORD_CHARS..=MAX_REPEAT_WORD_CHARS).contains(&len)
        && token.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn same_word(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Clean a model reply for display without dropping emoji or gluing Persian words.
///
/// Whitespace is collapsed to single spaces, Latin commas and dot runs become
/// `،` and `…`, punctuation gets exactly one trailing space, a hyphen between
/// two Persian letters becomes a zero-width non-joiner, quotes and
/// parentheses become guillemets, and characters outside the allowed set
/// are removed.
pub fn clean_bot_message(message: &str) -> String {
    let text = WHITESPACE.replace_all(message.trim(), " ");

    let text = text.replace(',', "،");
    let text = ELLIPSIS.replace_all(&text, "…");
    let text = dedupe_punctuation(&text);

    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = MISSING_SPACE_AFTER_PUNCT.replace_all(&text, "$1 $2");
    let text = PERSIAN_HYPHEN.replace_all(&text, "$1\u{200C}$2");

    let text = DISALLOWED.replace_all(&text, "");
    let text = QUOTED.replace_all(&text, "«$1»");
    let text = text.replace('"', "").replace('(', "«").replace(')', "»");

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Collapse runs of the same punctuation mark ("!!!" → "!").
fn dedupe_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if PUNCTUATION.contains(&c) && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ====================================================================
    // remove_repeated
    // ====================================================================

    #[test]
    fn test_collapses_word_loop() {
        assert_eq!(
            remove_repeated("لطفا لطفا لطفا لطفا استراحت کنید"),
            "لطفا استراحت کنید"
        );
    }

    #[test]
    fn test_keeps_double_words() {
        let text = "آرام آرام بهتر می‌شوید";
        assert_eq!(remove_repeated(text), text);
    }

    #[test]
    fn test_ignores_case() {
        assert_eq!(remove_repeated("ok OK ok done"), "ok done");
    }

    #[test]
    fn test_single_letters_not_collapsed() {
        let text = "a a a b";
        assert_eq!(remove_repeated(text), text);
    }

    #[test]
    fn test_preserves_leading_whitespace_and_tail() {
        assert_eq!(remove_repeated("  تب تب تب \n"), "  تب \n");
    }

    // ====================================================================
    // clean_bot_message
    // ====================================================================

    #[test]
    fn test_clean_keeps_words() {
        let cleaned = clean_bot_message(" سلام ,,\nدنیا!!  ");
        assert!(cleaned.contains("سلام"));
        assert!(cleaned.contains("دنیا"));
        assert!(!cleaned.contains(','));
        assert!(cleaned.ends_with("دنیا!"));
    }

    #[test]
    fn test_clean_spacing_around_punctuation() {
        assert_eq!(clean_bot_message("سلام ،خوبید ؟"), "سلام، خوبید؟");
    }

    #[test]
    fn test_clean_ellipsis() {
        assert_eq!(clean_bot_message("صبر کنید...بعد"), "صبر کنید… بعد");
    }

    #[test]
    fn test_clean_keeps_decimals() {
        assert_eq!(clean_bot_message("دمای 38.5 درجه"), "دمای 38.5 درجه");
    }

    #[test]
    fn test_clean_persian_hyphen_becomes_zwnj() {
        assert_eq!(clean_bot_message("می - شود"), "می\u{200C}شود");
    }

    #[test]
    fn test_clean_quotes_and_parentheses() {
        assert_eq!(
            clean_bot_message("داروی \"استامینوفن\" (۵۰۰ میلی‌گرم)"),
            "داروی «استامینوفن» «۵۰۰ میلی‌گرم»"
        );
    }

    #[test]
    fn test_clean_keeps_emoji() {
        let cleaned = clean_bot_message("خوب باشید 🌷");
        assert!(cleaned.contains('🌷'));
    }

    #[test]
    fn test_clean_drops_disallowed_symbols() {
        assert_eq!(clean_bot_message("درد ## شدید"), "درد شدید");
    }
}
