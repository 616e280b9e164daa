//! Canonicalization of raw translation text into a comparison key.
//!
//! The normalized form is a matching key only. It drops diacritics, so it
//! must never be shown back to users.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Punctuation stripped from either end of a translation.
///
/// Includes the Spanish opening marks so "¿Dónde está?" and "donde esta"
/// share a key.
fn is_terminal_punct(c: char) -> bool {
    matches!(
        c,
        '.' | '!' | '?' | ',' | ';' | ':' | '…' | '¡' | '¿' | '"' | '\'' | '«' | '»'
    )
}

/// Canonicalize a raw translation.
///
/// Lowercases, strips diacritics, collapses runs of whitespace and trims
/// terminal punctuation. Total and idempotent; empty input yields "".
pub fn normalize(raw: &str) -> String {
    let folded: String = raw
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || is_terminal_punct(c))
        .to_string()
}

/// Split a normalized string into comparison tokens.
///
/// Interior punctuation is dropped so "café, leche" and "café leche" tokenize
/// identically.
pub fn tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| c.is_whitespace() || is_terminal_punct(c))
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_accents() {
        assert_eq!(normalize("Bebo Café cada MAÑANA"), "bebo cafe cada manana");
    }

    #[test]
    fn strips_terminal_punctuation_only() {
        assert_eq!(normalize("¿Dónde está el baño?"), "donde esta el bano");
        assert_eq!(normalize("Sí, claro."), "si, claro");
        assert_eq!(normalize("Hola . . ."), "hola");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  bebo \t café\n cada  mañana "), "bebo cafe cada manana");
    }

    #[test]
    fn empty_and_punctuation_only_inputs_are_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("?!."), "");
    }

    #[test]
    fn tokens_ignore_interior_punctuation() {
        assert_eq!(tokens("si, claro"), vec!["si", "claro"]);
        assert!(tokens("").is_empty());
    }
}
