//! Character-boundary helpers for Persian text, which is multibyte throughout.

/// Leading `n` characters of `s`, borrowed.
pub fn head(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Trailing `n` characters of `s`, borrowed.
pub fn tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((start, _)) => &s[start..],
        None => s,
    }
}

/// Single-line excerpt for logs: whitespace collapsed, `...` when cut.
pub fn preview(s: &str, n: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = head(&flat, n);
    if cut.len() < flat.len() {
        format!("{}...", cut)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_and_tail_respect_characters() {
        assert_eq!(head("سلام دنیا", 4), "سلام");
        assert_eq!(tail("تب و سرفه", 4), "سرفه");
        assert_eq!(head("ab", 5), "ab");
        assert_eq!(tail("ab", 5), "ab");
        assert_eq!(tail("ab", 0), "");
    }

    #[test]
    fn test_preview_flattens_html_error_pages() {
        let body = "<html>\n  <body>502 Bad Gateway</body>\n</html>";
        assert_eq!(preview(body, 12), "<html> <body...");
        assert_eq!(preview("خطای سرور", 20), "خطای سرور");
    }
}
