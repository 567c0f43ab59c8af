//! Word-frequency extraction for open-ended answer reporting.

use std::collections::HashMap;

/// Common English words excluded from answer word counts.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Tokenizes an answer value into lowercase words, dropping stop words,
/// bare numbers, and single characters.
#[must_use]
pub fn extract_words(value: &str) -> Vec<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 1)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Counts word frequencies across answer values and returns the `limit`
/// most common, ties broken alphabetically for determinism.
#[must_use]
pub fn word_counts<'a, I>(values: I, limit: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        for word in extract_words(value) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_drops_noise() {
        assert_eq!(
            extract_words("The water is clean, 100%!"),
            vec!["water", "clean"]
        );
    }

    #[test]
    fn counts_are_ordered_and_limited() {
        let values = ["clean water", "dirty water", "water pump broken"];
        let counts = word_counts(values, 2);
        assert_eq!(counts[0], ("water".to_string(), 3));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn ties_break_alphabetically() {
        let counts = word_counts(["pump well", "well pump"], 10);
        assert_eq!(
            counts,
            vec![("pump".to_string(), 2), ("well".to_string(), 2)]
        );
    }
}
