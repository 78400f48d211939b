//! Text helpers shared by the pipeline stages

use std::collections::HashSet;

use augmenter_kg::store::contains_phrase;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "and",
    "or", "but", "if", "then", "else", "when", "where", "why", "how", "what", "which", "who",
    "whom", "this", "that", "these", "those", "it", "its", "for", "from", "to", "of", "in",
    "on", "at", "by", "with", "about", "into", "through", "as", "than", "there", "their",
    "they", "he", "she", "his", "her", "we", "you", "i", "me", "my", "our", "your", "not",
    "no", "so", "can", "also",
];

/// Lowercased content terms of `text`, stop words and 1-char tokens removed
pub fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() >= 2 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Number of `query_terms` that occur in `text`
pub fn overlap(query_terms: &HashSet<String>, text: &str) -> usize {
    let text_terms = terms(text);
    query_terms.intersection(&text_terms).count()
}

/// Whether `name` occurs as a whole phrase in `text`, ignoring case
pub fn mentions(text: &str, name: &str) -> bool {
    contains_phrase(&text.to_lowercase(), &name.trim().to_lowercase())
}

/// Split a newline-separated model reply into clean, unique items.
///
/// Strips list markers (`-`, `*`, `•`, `1.`, `1)`) and wrapping quotes,
/// drops empty lines, and keeps the first occurrence of each item.
pub fn parse_lines(response: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut items = vec![];

    for line in response.lines() {
        let item = clean_line(line);
        if item.is_empty() {
            continue;
        }
        if seen.insert(item.to_lowercase()) {
            items.push(item);
        }
    }

    items
}

fn clean_line(line: &str) -> String {
    let mut item = line.trim();

    for marker in ['-', '*', '•'] {
        if let Some(rest) = item.strip_prefix(marker) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                item = rest.trim_start();
            }
        }
    }

    // "1." / "12)" numbering
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &item[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            item = rest.trim_start();
        }
    }

    item.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_drop_stop_words() {
        let t = terms("Where was the Eiffel Tower built?");
        assert!(t.contains("eiffel"));
        assert!(t.contains("tower"));
        assert!(t.contains("built"));
        assert!(!t.contains("where"));
        assert!(!t.contains("the"));
    }

    #[test]
    fn test_overlap() {
        let q = terms("Where was the Eiffel Tower built?");
        assert_eq!(overlap(&q, "The Eiffel Tower is in Paris"), 2);
        assert_eq!(overlap(&q, "Unrelated text"), 0);
    }

    #[test]
    fn test_mentions() {
        assert!(mentions("Where was the Eiffel Tower built?", "eiffel tower"));
        assert!(!mentions("Where was the Eiffel Tower built?", "Eiffel Tow"));
        assert!(!mentions("anything", "   "));
    }

    #[test]
    fn test_parse_lines() {
        let reply = "1. Eiffel Tower construction location\n\n- \"Gustave Eiffel\"\n* Paris\n2) paris\n   \n";
        assert_eq!(
            parse_lines(reply),
            vec!["Eiffel Tower construction location", "Gustave Eiffel", "Paris"]
        );
    }

    #[test]
    fn test_parse_lines_keeps_years() {
        // A bare year is content, not a list marker
        assert_eq!(parse_lines("1889\n1889 World's Fair"), vec!["1889", "1889 World's Fair"]);
        assert_eq!(parse_lines("-\n*\n-5 degrees"), vec!["-5 degrees"]);
    }
}
