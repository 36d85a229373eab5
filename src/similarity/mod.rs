//! Pairwise user similarity
//!
//! Four signals fused into one score, then scaled by how much data backed it:
//!
//! - word: Jaccard overlap of top-word sets
//! - pattern: closeness of writing statistics
//! - temporal: peak-hour overlap and session/interval closeness
//! - behavioral: always 0 for now
//!
//! Every strategy in [`strategy`] scores pairs through [`PairScorer`], they
//! only differ in which pairs get scored.

pub mod strategy;

pub use strategy::{compute_pair_scores, PairScores, Strategy};

use crate::db::{PairSimilarity, TemporalPattern, WordFrequency, WritingPattern};
use crate::features::ChannelFeatures;
use std::collections::HashSet;

pub const WORD_WEIGHT: f64 = 0.30;
pub const PATTERN_WEIGHT: f64 = 0.40;
pub const TEMPORAL_WEIGHT: f64 = 0.25;
pub const BEHAVIORAL_WEIGHT: f64 = 0.05;

/// Message-length differences are scaled by this before scoring
const LENGTH_NORMALIZER: f64 = 100.0;
const CONFIDENCE_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordOverlap {
    pub similarity: f64,
    pub common: usize,
    pub total: usize,
}

/// Jaccard index of the two key sets; 0 if either side is empty
pub fn word_overlap(a: Option<&WordFrequency>, b: Option<&WordFrequency>) -> WordOverlap {
    let empty = WordOverlap { similarity: 0.0, common: 0, total: 0 };
    let (Some(a), Some(b)) = (a, b) else {
        return empty;
    };
    if a.is_empty() || b.is_empty() {
        return empty;
    }
    let common = a.keys().filter(|w| b.contains_key(*w)).count();
    let total = a.len() + b.len() - common;
    WordOverlap {
        similarity: common as f64 / total as f64,
        common,
        total,
    }
}

fn closeness(a: f64, b: f64, normalizer: f64) -> f64 {
    (1.0 - (a - b).abs() / normalizer).max(0.0)
}

/// Mean closeness of average length, punctuation, caps, emoticon and
/// question rates. 0 if either pattern is missing.
pub fn pattern_similarity(a: Option<&WritingPattern>, b: Option<&WritingPattern>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let parts = [
        closeness(a.avg_message_length, b.avg_message_length, LENGTH_NORMALIZER),
        closeness(a.punctuation_ratio, b.punctuation_ratio, 1.0),
        closeness(a.caps_ratio, b.caps_ratio, 1.0),
        closeness(a.emoji_frequency, b.emoji_frequency, 1.0),
        closeness(a.question_frequency, b.question_frequency, 1.0),
    ];
    parts.iter().sum::<f64>() / parts.len() as f64
}

fn relative_closeness(a: f64, b: f64) -> Option<f64> {
    if a > 0.0 && b > 0.0 {
        Some((1.0 - (a - b).abs() / a.max(b)).max(0.0))
    } else {
        None
    }
}

/// Mean of whichever temporal components both sides can support
pub fn temporal_similarity(a: Option<&TemporalPattern>, b: Option<&TemporalPattern>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let mut parts = Vec::with_capacity(3);

    let hours_a: HashSet<u32> = a.peak_hours.iter().copied().collect();
    let hours_b: HashSet<u32> = b.peak_hours.iter().copied().collect();
    if !hours_a.is_empty() && !hours_b.is_empty() {
        let shared = hours_a.intersection(&hours_b).count();
        let union = hours_a.union(&hours_b).count();
        parts.push(shared as f64 / union as f64);
    }
    parts.extend(relative_closeness(a.avg_session_duration, b.avg_session_duration));
    parts.extend(relative_closeness(a.avg_message_interval, b.avg_message_interval));

    if parts.is_empty() {
        0.0
    } else {
        parts.iter().sum::<f64>() / parts.len() as f64
    }
}

/// How much feature data backed a pair score, in [0.1, 1.0]
pub fn confidence(
    wa: Option<&WritingPattern>,
    wb: Option<&WritingPattern>,
    ta: Option<&TemporalPattern>,
    tb: Option<&TemporalPattern>,
) -> f64 {
    let mut total = 0.0;
    if let (Some(wa), Some(wb)) = (wa, wb) {
        total += 0.4;
        total += 0.3 * ((wa.avg_message_length + wb.avg_message_length) / 100.0).min(1.0);
    }
    if ta.is_some() && tb.is_some() {
        total += 0.3;
    }
    if total > 0.0 {
        total
    } else {
        CONFIDENCE_FLOOR
    }
}

pub fn combine(word: f64, pattern: f64, temporal: f64, behavioral: f64) -> f64 {
    (WORD_WEIGHT * word + PATTERN_WEIGHT * pattern + TEMPORAL_WEIGHT * temporal + BEHAVIORAL_WEIGHT * behavioral)
        .clamp(0.0, 1.0)
}

/// Scores pairs of users from one channel's features
pub struct PairScorer<'a> {
    features: &'a ChannelFeatures,
}

impl<'a> PairScorer<'a> {
    pub fn new(features: &'a ChannelFeatures) -> Self {
        Self { features }
    }

    /// The cheap first signal, used to prune pairs before full scoring
    pub fn word_overlap(&self, u1: &str, u2: &str) -> WordOverlap {
        word_overlap(self.features.words.get(u1), self.features.words.get(u2))
    }

    /// Finish a pair whose word overlap is already known
    pub fn complete(&self, u1: &str, u2: &str, words: WordOverlap) -> PairSimilarity {
        let f = self.features;
        let (wa, wb) = (f.writing.get(u1), f.writing.get(u2));
        let (ta, tb) = (f.temporal.get(u1), f.temporal.get(u2));

        let pattern = pattern_similarity(wa, wb);
        let temporal = temporal_similarity(ta, tb);
        let behavioral = 0.0;

        let (user_a, user_b) = if u1 <= u2 { (u1, u2) } else { (u2, u1) };
        PairSimilarity {
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
            word_similarity: words.similarity,
            pattern_similarity: pattern,
            temporal_similarity: temporal,
            behavioral_similarity: behavioral,
            combined_similarity: combine(words.similarity, pattern, temporal, behavioral),
            confidence: confidence(wa, wb, ta, tb),
            common_words: words.common,
            total_compared_words: words.total,
        }
    }

    pub fn score(&self, u1: &str, u2: &str) -> PairSimilarity {
        self.complete(u1, u2, self.word_overlap(u1, u2))
    }
}
