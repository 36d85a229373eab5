//! Shared helpers for terminal output

/// Shorten text to at most `max_chars` characters, marking the cut with `...`
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Pad or cut a cell to a fixed width for table output
pub fn cell(s: &str, width: usize) -> String {
    format!("{:<width$}", preview(s, width), width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_ascii() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello world", 8), "hello...");
    }

    #[test]
    fn test_preview_multibyte() {
        // cuts on characters, never inside one
        assert_eq!(preview("héllo wörld", 7), "héll...");
    }

    #[test]
    fn test_cell_width() {
        assert_eq!(cell("ab", 4), "ab  ");
        assert_eq!(cell("abcdefgh", 6).chars().count(), 6);
    }
}
