use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parsed transcript line. Append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub channel: String,
    pub username: String,
    pub text: String,
    pub timestamp: NaiveDateTime,
    pub log_date: NaiveDate,
}

/// Ingestion progress for one (channel, filename)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileCursor {
    pub channel: String,
    pub filename: String,
    pub file_path: String,
    pub last_line_index: usize,
    pub file_size: u64,
    /// RFC 3339 modification time as reported by the filesystem
    pub modified_time: String,
    /// SHA-256 of the file's first line, used to detect replacement
    pub head_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WritingPattern {
    pub avg_message_length: f64,
    pub message_length_variance: f64,
    pub punctuation_ratio: f64,
    pub exclamation_ratio: f64,
    pub question_ratio: f64,
    pub caps_ratio: f64,
    pub all_caps_frequency: f64,
    pub emoji_frequency: f64,
    pub unique_emoji_count: usize,
    pub repeated_char_frequency: f64,
    pub avg_words_per_message: f64,
    pub question_frequency: f64,
    pub exclamation_frequency: f64,
    pub statement_frequency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemporalPattern {
    /// Up to three most active hours of day, most active first
    pub peak_hours: Vec<u32>,
    pub avg_session_duration: f64,
    pub avg_message_interval: f64,
    /// Share of gaps under 10 s among the first 100 messages, over the number
    /// of gaps in that window
    pub burst_frequency: f64,
    /// Variance of sub-hour intervals between consecutive messages
    pub activity_variance: f64,
    pub total_sessions: usize,
}

/// Top-K word counts for one user
pub type WordFrequency = HashMap<String, u64>;

/// Scores for one unordered pair. `user_a < user_b` always.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PairSimilarity {
    pub user_a: String,
    pub user_b: String,
    pub word_similarity: f64,
    pub pattern_similarity: f64,
    pub temporal_similarity: f64,
    pub behavioral_similarity: f64,
    pub combined_similarity: f64,
    pub confidence: f64,
    pub common_words: usize,
    pub total_compared_words: usize,
}

impl PairSimilarity {
    /// Combined score scaled by confidence; this drives grouping
    pub fn adjusted(&self) -> f64 {
        self.combined_similarity * self.confidence
    }

    pub fn other(&self, username: &str) -> &str {
        if self.user_a == username {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

/// One inferred person: the usernames believed to belong to them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    pub channel: String,
    pub group_id: usize,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub username: String,
    pub chat_count: u64,
    /// Percentage in [0, 100]
    pub alt_likelihood: f64,
    pub similar_users: Vec<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsStatus {
    pub channel: String,
    pub last_processed_date: Option<String>,
    pub total_messages: u64,
    pub last_analytics_update: Option<String>,
    pub analytics_version: i64,
}

/// Per-channel output consumed by the API/dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub user_stats: Vec<UserStats>,
    pub start_date: String,
    pub end_date: String,
    pub unique_user_count: usize,
    pub total_users: usize,
    pub total_messages: u64,
    pub last_updated: String,
}

/// Stored message as returned by paginated reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub username: String,
    pub message: String,
    pub timestamp: String,
    pub log_date: String,
}
