//! Feature extraction
//!
//! Three independent extractors. Each user's features are fully recomputed
//! from their messages on every pass.

pub mod temporal;
pub mod words;
pub mod writing;

pub use temporal::{analyze_temporal, has_overlap, CoPresence};
pub use words::WordCounter;
pub use writing::WritingAnalyzer;

use crate::db::{TemporalPattern, WordFrequency, WritingPattern};
use crate::settings::Settings;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

/// All features computed for one channel. Users below a minimum have no entry.
#[derive(Debug, Default)]
pub struct ChannelFeatures {
    pub writing: HashMap<String, WritingPattern>,
    pub temporal: HashMap<String, TemporalPattern>,
    pub words: HashMap<String, WordFrequency>,
}

pub fn extract_features(
    messages: &BTreeMap<String, Vec<String>>,
    timestamps: &BTreeMap<String, Vec<NaiveDateTime>>,
    settings: &Settings,
) -> ChannelFeatures {
    let writing = WritingAnalyzer::new();
    let counter = WordCounter::new();
    let mut features = ChannelFeatures::default();

    for (username, msgs) in messages {
        if let Some(p) = writing.analyze(msgs, settings.min_messages) {
            features.writing.insert(username.clone(), p);
        }
        if msgs.len() >= settings.min_messages_for_words {
            let counts = counter.count(msgs, settings.top_k_words);
            if !counts.is_empty() {
                features.words.insert(username.clone(), counts);
            }
        }
    }

    for (username, times) in timestamps {
        if let Some(p) = analyze_temporal(times, settings.min_messages) {
            features.temporal.insert(username.clone(), p);
        }
    }

    features
}
