mod date_filter;
mod models;
mod retry;
mod schema;

pub use date_filter::DateFilter;
pub use models::{
    AnalyticsStatus, ChannelSummary, ChatMessage, FileCursor, PairSimilarity, StoredMessage,
    TemporalPattern, UserGroup, UserStats, WordFrequency, WritingPattern,
};
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use schema::{Database, TIMESTAMP_FORMAT};
