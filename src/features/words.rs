//! Per-user vocabulary, truncated to the most frequent words

use crate::db::WordFrequency;
use regex::Regex;
use std::collections::HashMap;

pub struct WordCounter {
    word_re: Regex,
}

impl Default for WordCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl WordCounter {
    pub fn new() -> Self {
        Self {
            word_re: Regex::new(r"[a-z']+").expect("static word regex"),
        }
    }

    /// Lowercased alphabetic tokens (apostrophes allowed) longer than two chars
    pub fn tokenize<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.word_re
            .find_iter(text)
            .map(|m| m.as_str().trim_matches('\''))
            .filter(|w| w.chars().count() > 2)
    }

    /// Top-`top_k` word counts across a user's messages. Ties at the cut are
    /// broken alphabetically so results are reproducible.
    pub fn count(&self, messages: &[String], top_k: usize) -> WordFrequency {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for message in messages {
            let lower = message.to_lowercase();
            for word in self.tokenize(&lower) {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);
        ranked.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_rules() {
        let c = WordCounter::new();
        let words: Vec<&str> = c.tokenize("don't go to the 'big' shop42 ok").collect();
        assert_eq!(words, vec!["don't", "the", "big", "shop"]);
    }

    #[test]
    fn test_counts_are_case_insensitive() {
        let c = WordCounter::new();
        let f = c.count(&msgs(&["Hello hello", "HELLO world"]), 50);
        assert_eq!(f["hello"], 3);
        assert_eq!(f["world"], 1);
    }

    #[test]
    fn test_top_k_truncation() {
        let c = WordCounter::new();
        let f = c.count(&msgs(&["aaa aaa aaa bbb bbb ccc ddd"]), 2);
        assert_eq!(f.len(), 2);
        assert!(f.contains_key("aaa"));
        assert!(f.contains_key("bbb"));

        // tie at the cut resolved alphabetically
        let f = c.count(&msgs(&["zzz yyy xxx"]), 1);
        assert!(f.contains_key("xxx"));
    }
}
