//! Path-component slugification.
//!
//! Adapted from Django's `slugify` (the rules the inbox tree has always
//! used): ASCII only, lowercased, word characters kept, whitespace and
//! hyphen runs collapsed to a single hyphen, edge hyphens/underscores
//! stripped.

use once_cell::sync::Lazy;
use regex::Regex;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_\s-]").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

/// Converts arbitrary text into a safe path component.
///
/// Text that slugifies to nothing (for example, an all-emoji summary) falls
/// back to `"unnamed"` so a notification always has a storage directory.
pub fn slugify(text: &str) -> String {
    let ascii: String = text.chars().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let cleaned = DISALLOWED.replace_all(&lowered, "");
    let collapsed = SEPARATORS.replace_all(&cleaned, "-");
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '_');

    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::slugify;
    use pretty_assertions::assert_eq;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Multiple   spaces  "), "multiple-spaces");
    }

    #[test]
    fn strips_punctuation_but_keeps_word_chars() {
        assert_eq!(slugify("Build finished: 3 warnings!"), "build-finished-3-warnings");
        assert_eq!(slugify("snake_case stays"), "snake_case-stays");
    }

    #[test]
    fn drops_non_ascii() {
        assert_eq!(slugify("café ☕ news"), "caf-news");
    }

    #[test]
    fn trims_edge_separators() {
        assert_eq!(slugify("--already-slugged--"), "already-slugged");
        assert_eq!(slugify("_private_"), "private");
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(slugify(""), "unnamed");
        assert_eq!(slugify("☕☕☕"), "unnamed");
    }
}
