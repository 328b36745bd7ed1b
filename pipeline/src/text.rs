//! Term matching helpers shared by the rule-based stages.

/// Lowercase `text`, replace everything but letters and digits with single
/// spaces and pad both ends, so a term matches as ` term `.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Whether `normalized` (from [`normalize`]) contains `term` as a whole word
/// or phrase.
pub fn contains_term(normalized: &str, term: &str) -> bool {
    let needle = normalize(term);
    !needle.trim().is_empty() && normalized.contains(&needle)
}

/// Terms from `terms` found in `normalized`, in list order.
pub fn matching_terms<'a>(normalized: &str, terms: &'a [String]) -> Vec<&'a str> {
    terms
        .iter()
        .filter(|t| contains_term(normalized, t))
        .map(String::as_str)
        .collect()
}

/// Word tokens of at least `min_chars` characters, lowercased.
pub fn words(text: &str, min_chars: usize) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= min_chars)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Hello,  World!"), " hello world ");
        assert_eq!(normalize(""), " ");
    }

    #[test]
    fn test_contains_term_is_whole_word() {
        let text = normalize("The database is DOWN for all users.");
        assert!(contains_term(&text, "down"));
        assert!(contains_term(&text, "all users"));
        assert!(!contains_term(&text, "own"));
        assert!(!contains_term(&text, "   "));
    }

    #[test]
    fn test_accented_terms() {
        let text = normalize("Es urgente, el servicio está caído");
        assert!(contains_term(&text, "urgente"));
        assert!(contains_term(&text, "está caído"));
    }

    #[test]
    fn test_words() {
        assert_eq!(words("a VPN-client, ok", 3), vec!["vpn", "client"]);
    }
}
