//! URL-safe slugs derived from titles and tag names.

use unicode_normalization::UnicodeNormalization;

/// Decomposes the value (NFKD) so accented letters keep their base letter, lowercases, drops
/// everything that is not an ASCII letter, digit, underscore, hyphen or whitespace, and
/// collapses whitespace/hyphen runs into a single `-`.
///
/// Leading and trailing `-` and `_` are stripped, so the result may be empty.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.nfkd() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_whitespace() {
            pending_separator = true;
        }
    }

    slug.trim_matches(|c| c == '-' || c == '_').to_owned()
}

/// `slugify`, falling back to `fallback` when nothing URL-safe is left of the value.
#[must_use]
pub fn slugify_or(value: &str, fallback: &str) -> String {
    let slug = slugify(value);
    if slug.is_empty() {
        fallback.to_owned()
    } else {
        slug
    }
}

/// The `attempt`-th candidate for a slug: the base itself first, then `base-1`, `base-2`, ...
#[must_use]
pub fn candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_owned()
    } else {
        format!("{base}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use crate::slug::{candidate, slugify, slugify_or};

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Rust -- is   fun!  "), "rust-is-fun");
        assert_eq!(slugify("snake_case stays"), "snake_case-stays");
        assert_eq!(slugify("Crème brûlée 101"), "creme-brulee-101");
        assert_eq!(slugify("Ångström ﬁles"), "angstrom-files");
        assert_eq!(slugify("-_edges_-"), "edges");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn fallback_for_empty_slugs() {
        assert_eq!(slugify_or("日本語のタイトル", "post"), "post");
        assert_eq!(slugify_or("Django tips", "post"), "django-tips");
    }

    #[test]
    fn candidates_are_suffixed() {
        assert_eq!(candidate("hello", 0), "hello");
        assert_eq!(candidate("hello", 1), "hello-1");
        assert_eq!(candidate("hello", 12), "hello-12");
    }
}
