//! Writing-style statistics per user

use crate::db::WritingPattern;
use regex::Regex;
use std::collections::HashSet;

const EMOTICONS: &str = r"(?i):\)|:\(|:D|:P|;D|<3|XD|lol|lmao|kappa|poggers|kekw|lul|pepega|5head";

/// Holds the compiled emoticon vocabulary so it is built once per pass
pub struct WritingAnalyzer {
    emoticon_re: Regex,
}

impl Default for WritingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs of 3+ identical consecutive characters, each maximal run counted once
fn repeated_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut prev: Option<char> = None;
    let mut len = 0;
    for c in text.chars() {
        if Some(c) == prev {
            len += 1;
            if len == 3 {
                runs += 1;
            }
        } else {
            prev = Some(c);
            len = 1;
        }
    }
    runs
}

fn is_all_caps(message: &str) -> bool {
    let mut alpha = 0;
    for c in message.chars().filter(|c| c.is_alphabetic()) {
        if !c.is_uppercase() {
            return false;
        }
        alpha += 1;
    }
    alpha > 3
}

impl WritingAnalyzer {
    pub fn new() -> Self {
        Self {
            emoticon_re: Regex::new(EMOTICONS).expect("static emoticon regex"),
        }
    }

    /// Compute the writing pattern for one user's messages, or None when there
    /// are fewer than `min_messages` of them.
    pub fn analyze(&self, messages: &[String], min_messages: usize) -> Option<WritingPattern> {
        if messages.is_empty() || messages.len() < min_messages {
            return None;
        }
        let n = messages.len() as f64;

        let lengths: Vec<f64> = messages.iter().map(|m| m.chars().count() as f64).collect();
        let avg_len = lengths.iter().sum::<f64>() / n;
        let variance = lengths.iter().map(|l| (l - avg_len).powi(2)).sum::<f64>() / n;

        let all_text = messages.join(" ");
        let total_chars = all_text.chars().count().max(1) as f64;
        let mut exclamations = 0usize;
        let mut questions = 0usize;
        let mut periods = 0usize;
        let mut letters = 0usize;
        let mut upper = 0usize;
        for c in all_text.chars() {
            match c {
                '!' => exclamations += 1,
                '?' => questions += 1,
                '.' => periods += 1,
                _ if c.is_alphabetic() => {
                    letters += 1;
                    if c.is_uppercase() {
                        upper += 1;
                    }
                }
                _ => {}
            }
        }
        let caps_ratio = if letters > 0 { upper as f64 / letters as f64 } else { 0.0 };

        let mut emoticon_hits = 0usize;
        let mut unique_emoticons = HashSet::new();
        for m in self.emoticon_re.find_iter(&all_text) {
            emoticon_hits += 1;
            unique_emoticons.insert(m.as_str().to_lowercase());
        }

        let all_caps = messages.iter().filter(|m| is_all_caps(m)).count();
        let repeated: usize = messages.iter().map(|m| repeated_runs(m)).sum();
        let words: usize = messages.iter().map(|m| m.split_whitespace().count()).sum();

        let with_question = messages.iter().filter(|m| m.contains('?')).count();
        let with_exclamation = messages.iter().filter(|m| m.contains('!')).count();
        let statements = messages
            .iter()
            .filter(|m| !m.contains('?') && !m.contains('!'))
            .count();

        Some(WritingPattern {
            avg_message_length: avg_len,
            message_length_variance: variance,
            punctuation_ratio: (exclamations + questions + periods) as f64 / total_chars,
            exclamation_ratio: exclamations as f64 / total_chars,
            question_ratio: questions as f64 / total_chars,
            caps_ratio,
            all_caps_frequency: all_caps as f64 / n,
            emoji_frequency: emoticon_hits as f64 / n,
            unique_emoji_count: unique_emoticons.len(),
            repeated_char_frequency: repeated as f64 / n,
            avg_words_per_message: words as f64 / n,
            question_frequency: with_question as f64 / n,
            exclamation_frequency: with_exclamation as f64 / n,
            statement_frequency: statements as f64 / n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_below_minimum_is_absent() {
        let a = WritingAnalyzer::new();
        assert!(a.analyze(&msgs(&["a", "b", "c", "d"]), 5).is_none());
        assert!(a.analyze(&[], 0).is_none());
    }

    #[test]
    fn test_length_statistics() {
        let a = WritingAnalyzer::new();
        let p = a.analyze(&msgs(&["aa", "aaaa", "aaaaaa"]), 1).unwrap();
        assert!((p.avg_message_length - 4.0).abs() < 1e-9);
        // population variance of 2, 4, 6
        assert!((p.message_length_variance - 8.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sentence_types_overlap() {
        let a = WritingAnalyzer::new();
        let p = a.analyze(&msgs(&["what?!", "really?", "wow!", "ok"]), 1).unwrap();
        assert!((p.question_frequency - 0.5).abs() < 1e-9);
        assert!((p.exclamation_frequency - 0.5).abs() < 1e-9);
        assert!((p.statement_frequency - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_caps_and_all_caps() {
        let a = WritingAnalyzer::new();
        let p = a.analyze(&msgs(&["HELLO THERE", "Hi", "OK!"]), 1).unwrap();
        // OK has only two letters, so only the first message is all caps
        assert!((p.all_caps_frequency - 1.0 / 3.0).abs() < 1e-9);
        // 14 letters, 13 uppercase
        assert!((p.caps_ratio - 13.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_emoticons_and_repeats() {
        let a = WritingAnalyzer::new();
        let p = a.analyze(&msgs(&["LOL that was good :)", "lol", "nooooo wayyy"]), 1).unwrap();
        assert!((p.emoji_frequency - 1.0).abs() < 1e-9);
        assert_eq!(p.unique_emoji_count, 2);
        assert!((p.repeated_char_frequency - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_runs_counts_maximal_runs() {
        assert_eq!(repeated_runs("aaaaaa"), 1);
        assert_eq!(repeated_runs("aaabbb"), 2);
        assert_eq!(repeated_runs("aabb"), 0);
    }

    #[test]
    fn test_punctuation_ratio() {
        let a = WritingAnalyzer::new();
        let p = a.analyze(&msgs(&["hi.", "yo!"]), 1).unwrap();
        // "hi. yo!" is 7 chars with 2 marks
        assert!((p.punctuation_ratio - 2.0 / 7.0).abs() < 1e-9);
        assert!((p.exclamation_ratio - 1.0 / 7.0).abs() < 1e-9);
        assert!((p.avg_words_per_message - 1.0).abs() < 1e-9);
    }
}
