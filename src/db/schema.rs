use super::date_filter::DateFilter;
use super::models::{
    AnalyticsStatus, ChatMessage, FileCursor, PairSimilarity, StoredMessage, TemporalPattern,
    UserGroup, UserStats, WordFrequency, WritingPattern,
};
use super::retry::{ExponentialBackoff, RetryPolicy};
use crate::error::Result;
use crate::parser::LOG_DATE_FORMAT;
use crate::settings::Settings;
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Handle to the embedded store. Holds no open connection: every read and
/// every write transaction gets its own, so concurrent callers only meet
/// inside SQLite's WAL locking.
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    retry: Box<dyn RetryPolicy>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database {
            path,
            busy_timeout: settings.busy_timeout(),
            retry: Box::new(ExponentialBackoff::from_settings(settings)),
        };
        db.init()?;
        Ok(db)
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Run a read on an independent connection. No snapshot is shared with
    /// other readers or writers.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Run `f` inside one IMMEDIATE transaction. Lock contention that outlasts
    /// the busy timeout is retried on a fresh connection while the retry
    /// policy allows; any other error propagates at once.
    pub fn write<T>(&self, mut f: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match self.try_write(&mut f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_lock_contention() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            warn!("Database locked, retry {} in {:?}: {}", attempt, delay, e);
                            std::thread::sleep(delay);
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_write<T>(&self, f: &mut impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn init(&self) -> Result<()> {
        self.write(|tx| {
            tx.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    username TEXT NOT NULL,
                    message TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    log_date TEXT NOT NULL,
                    source_file TEXT,
                    created_at TEXT DEFAULT CURRENT_TIMESTAMP
                );

                CREATE TABLE IF NOT EXISTS processed_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    last_processed_line INTEGER NOT NULL DEFAULT 0,
                    file_size INTEGER NOT NULL DEFAULT 0,
                    last_modified TEXT,
                    head_fingerprint TEXT,
                    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(channel, filename)
                );

                CREATE TABLE IF NOT EXISTS user_stats (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    username TEXT NOT NULL,
                    chat_count INTEGER NOT NULL DEFAULT 0,
                    alt_likelihood REAL NOT NULL DEFAULT 0.0,
                    similar_users TEXT,  -- JSON array of display strings
                    last_updated TEXT,
                    UNIQUE(channel, username)
                );

                CREATE TABLE IF NOT EXISTS stylometry_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    group_id INTEGER NOT NULL,
                    usernames TEXT NOT NULL,  -- JSON array
                    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(channel, group_id)
                );

                CREATE TABLE IF NOT EXISTS analytics_status (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL UNIQUE,
                    last_processed_date TEXT,
                    total_messages INTEGER NOT NULL DEFAULT 0,
                    last_analytics_update TEXT,
                    analytics_version INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS user_words (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    username TEXT NOT NULL,
                    word TEXT NOT NULL,
                    frequency INTEGER NOT NULL DEFAULT 1,
                    UNIQUE(channel, username, word)
                );

                CREATE TABLE IF NOT EXISTS user_similarities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    user1 TEXT NOT NULL,
                    user2 TEXT NOT NULL,
                    word_similarity REAL NOT NULL DEFAULT 0.0,
                    pattern_similarity REAL NOT NULL DEFAULT 0.0,
                    temporal_similarity REAL NOT NULL DEFAULT 0.0,
                    behavioral_similarity REAL NOT NULL DEFAULT 0.0,
                    combined_similarity REAL NOT NULL DEFAULT 0.0,
                    confidence_score REAL NOT NULL DEFAULT 0.0,
                    common_words INTEGER NOT NULL DEFAULT 0,
                    total_compared_words INTEGER NOT NULL DEFAULT 0,
                    last_updated TEXT DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(channel, user1, user2),
                    CHECK(user1 < user2)
                );

                CREATE TABLE IF NOT EXISTS user_patterns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    username TEXT NOT NULL,
                    avg_message_length REAL NOT NULL,
                    message_length_variance REAL NOT NULL,
                    punctuation_ratio REAL NOT NULL,
                    exclamation_ratio REAL NOT NULL,
                    question_ratio REAL NOT NULL,
                    caps_ratio REAL NOT NULL,
                    all_caps_frequency REAL NOT NULL,
                    emoji_frequency REAL NOT NULL,
                    unique_emoji_count INTEGER NOT NULL,
                    repeated_char_frequency REAL NOT NULL,
                    avg_words_per_message REAL NOT NULL,
                    question_frequency REAL NOT NULL,
                    exclamation_frequency REAL NOT NULL,
                    statement_frequency REAL NOT NULL,
                    last_updated TEXT DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(channel, username)
                );

                CREATE TABLE IF NOT EXISTS user_temporal_patterns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    username TEXT NOT NULL,
                    peak_hours TEXT NOT NULL,  -- JSON array
                    avg_session_duration REAL NOT NULL,
                    avg_message_interval REAL NOT NULL,
                    burst_frequency REAL NOT NULL,
                    activity_variance REAL NOT NULL,
                    total_sessions INTEGER NOT NULL,
                    last_updated TEXT DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(channel, username)
                );

                CREATE INDEX IF NOT EXISTS idx_chat_channel_date ON chat_messages(channel, log_date);
                CREATE INDEX IF NOT EXISTS idx_chat_channel_user ON chat_messages(channel, username);
                CREATE INDEX IF NOT EXISTS idx_chat_source ON chat_messages(channel, source_file);
                CREATE INDEX IF NOT EXISTS idx_user_stats_channel ON user_stats(channel);
                CREATE INDEX IF NOT EXISTS idx_user_words_channel_user ON user_words(channel, username);
                CREATE INDEX IF NOT EXISTS idx_user_similarities_channel ON user_similarities(channel);
                ",
            )?;
            Ok(())
        })
    }

    // ==================== Ingestion ====================

    pub fn get_file_cursor(&self, channel: &str, filename: &str) -> Result<Option<FileCursor>> {
        self.read(|conn| {
            let cursor = conn
                .query_row(
                    "SELECT channel, filename, file_path, last_processed_line, file_size,
                            last_modified, head_fingerprint
                     FROM processed_files WHERE channel = ?1 AND filename = ?2",
                    params![channel, filename],
                    |row| {
                        Ok(FileCursor {
                            channel: row.get(0)?,
                            filename: row.get(1)?,
                            file_path: row.get(2)?,
                            last_line_index: row.get::<_, i64>(3)?.max(0) as usize,
                            file_size: row.get::<_, i64>(4)?.max(0) as u64,
                            modified_time: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                            head_fingerprint: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(cursor)
        })
    }

    /// Store newly parsed messages and advance the file's cursor atomically.
    /// With `purge_previous`, rows earlier ingested from the same file are
    /// removed first (the file was truncated or replaced).
    pub fn commit_ingest(
        &self,
        cursor: &FileCursor,
        messages: &[ChatMessage],
        purge_previous: bool,
    ) -> Result<usize> {
        self.write(|tx| {
            if purge_previous {
                let purged = tx.execute(
                    "DELETE FROM chat_messages WHERE channel = ?1 AND source_file = ?2",
                    params![cursor.channel, cursor.filename],
                )?;
                debug!("Purged {} rows previously read from {}/{}", purged, cursor.channel, cursor.filename);
            }

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO chat_messages (channel, username, message, timestamp, log_date, source_file)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for msg in messages {
                    stmt.execute(params![
                        msg.channel,
                        msg.username,
                        msg.text,
                        msg.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                        msg.log_date.format(LOG_DATE_FORMAT).to_string(),
                        cursor.filename,
                    ])?;
                }
            }

            tx.execute(
                "INSERT INTO processed_files
                    (channel, filename, file_path, last_processed_line, file_size, last_modified, head_fingerprint, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
                 ON CONFLICT(channel, filename) DO UPDATE SET
                    file_path = excluded.file_path,
                    last_processed_line = excluded.last_processed_line,
                    file_size = excluded.file_size,
                    last_modified = excluded.last_modified,
                    head_fingerprint = excluded.head_fingerprint,
                    updated_at = CURRENT_TIMESTAMP",
                params![
                    cursor.channel,
                    cursor.filename,
                    cursor.file_path,
                    cursor.last_line_index as i64,
                    cursor.file_size as i64,
                    cursor.modified_time,
                    cursor.head_fingerprint,
                ],
            )?;
            Ok(messages.len())
        })
    }

    // ==================== Message reads ====================

    pub fn get_channels(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT channel FROM chat_messages ORDER BY channel")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }

    pub fn get_available_dates(&self, channel: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT log_date FROM chat_messages WHERE channel = ?1 ORDER BY log_date",
            )?;
            let rows = stmt.query_map(params![channel], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }

    pub fn get_date_range(&self, channel: &str) -> Result<Option<(String, String)>> {
        self.read(|conn| {
            let (min, max): (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(log_date), MAX(log_date) FROM chat_messages WHERE channel = ?1",
                params![channel],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(min.zip(max))
        })
    }

    pub fn get_total_messages_count(&self, channel: &str) -> Result<u64> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Channel plus optional date predicate as a WHERE clause with parameters
    fn channel_where(channel: &str, filter: Option<&DateFilter>) -> (String, Vec<Value>) {
        let mut values = vec![Value::Text(channel.to_string())];
        let mut clause = "channel = ?".to_string();
        if let Some(filter) = filter {
            let (extra, extra_values) = filter.sql_clause();
            clause.push_str(" AND ");
            clause.push_str(&extra);
            values.extend(extra_values);
        }
        (clause, values)
    }

    /// Message counts per user, busiest first
    pub fn get_user_chat_counts(&self, channel: &str, filter: Option<&DateFilter>) -> Result<Vec<(String, u64)>> {
        let (clause, values) = Self::channel_where(channel, filter);
        self.read(|conn| {
            let sql = format!(
                "SELECT username, COUNT(*) AS chat_count FROM chat_messages
                 WHERE {} GROUP BY username ORDER BY chat_count DESC, username",
                clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Each user's messages in timestamp order
    pub fn get_user_messages(
        &self,
        channel: &str,
        filter: Option<&DateFilter>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let (clause, values) = Self::channel_where(channel, filter);
        self.read(|conn| {
            let sql = format!(
                "SELECT username, message FROM chat_messages WHERE {} ORDER BY username, timestamp, id",
                clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for row in rows {
                let (username, message) = row?;
                out.entry(username).or_default().push(message);
            }
            Ok(out)
        })
    }

    /// Each user's message timestamps, sorted. Unparseable values are skipped.
    pub fn get_user_timestamps(
        &self,
        channel: &str,
        filter: Option<&DateFilter>,
    ) -> Result<BTreeMap<String, Vec<NaiveDateTime>>> {
        let (clause, values) = Self::channel_where(channel, filter);
        self.read(|conn| {
            let sql = format!(
                "SELECT username, timestamp FROM chat_messages WHERE {} ORDER BY username, timestamp, id",
                clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out: BTreeMap<String, Vec<NaiveDateTime>> = BTreeMap::new();
            for row in rows {
                let (username, ts) = row?;
                match NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT) {
                    Ok(t) => out.entry(username).or_default().push(t),
                    Err(_) => debug!("Skipping unparseable timestamp {:?} for {}", ts, username),
                }
            }
            Ok(out)
        })
    }

    /// One page (1-based) of a user's messages, newest first
    pub fn get_user_messages_paginated(
        &self,
        channel: &str,
        username: &str,
        filter: Option<&DateFilter>,
        page: usize,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let (clause, mut values) = Self::channel_where(channel, filter);
        values.push(Value::Text(username.to_string()));
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer((page.max(1) - 1).saturating_mul(limit) as i64));
        self.read(|conn| {
            let sql = format!(
                "SELECT id, username, message, timestamp, log_date FROM chat_messages
                 WHERE {} AND username = ? ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
                clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    message: row.get(2)?,
                    timestamp: row.get(3)?,
                    log_date: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Channels a username has posted in, with message counts
    pub fn get_user_channels(&self, username: &str) -> Result<Vec<(String, u64)>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel, COUNT(*) AS n FROM chat_messages WHERE username = ?1
                 GROUP BY channel ORDER BY n DESC, channel",
            )?;
            let rows = stmt.query_map(params![username], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // ==================== Features ====================

    pub fn replace_writing_patterns(&self, channel: &str, patterns: &[(String, WritingPattern)]) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM user_patterns WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_patterns
                    (channel, username, avg_message_length, message_length_variance, punctuation_ratio,
                     exclamation_ratio, question_ratio, caps_ratio, all_caps_frequency, emoji_frequency,
                     unique_emoji_count, repeated_char_frequency, avg_words_per_message,
                     question_frequency, exclamation_frequency, statement_frequency)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for (username, p) in patterns {
                stmt.execute(params![
                    channel,
                    username,
                    p.avg_message_length,
                    p.message_length_variance,
                    p.punctuation_ratio,
                    p.exclamation_ratio,
                    p.question_ratio,
                    p.caps_ratio,
                    p.all_caps_frequency,
                    p.emoji_frequency,
                    p.unique_emoji_count as i64,
                    p.repeated_char_frequency,
                    p.avg_words_per_message,
                    p.question_frequency,
                    p.exclamation_frequency,
                    p.statement_frequency,
                ])?;
            }
            Ok(())
        })
    }

    fn row_to_writing_pattern(row: &rusqlite::Row) -> rusqlite::Result<(String, WritingPattern)> {
        Ok((
            row.get(0)?,
            WritingPattern {
                avg_message_length: row.get(1)?,
                message_length_variance: row.get(2)?,
                punctuation_ratio: row.get(3)?,
                exclamation_ratio: row.get(4)?,
                question_ratio: row.get(5)?,
                caps_ratio: row.get(6)?,
                all_caps_frequency: row.get(7)?,
                emoji_frequency: row.get(8)?,
                unique_emoji_count: row.get::<_, i64>(9)?.max(0) as usize,
                repeated_char_frequency: row.get(10)?,
                avg_words_per_message: row.get(11)?,
                question_frequency: row.get(12)?,
                exclamation_frequency: row.get(13)?,
                statement_frequency: row.get(14)?,
            },
        ))
    }

    const WRITING_COLUMNS: &'static str = "username, avg_message_length, message_length_variance,
        punctuation_ratio, exclamation_ratio, question_ratio, caps_ratio, all_caps_frequency,
        emoji_frequency, unique_emoji_count, repeated_char_frequency, avg_words_per_message,
        question_frequency, exclamation_frequency, statement_frequency";

    pub fn get_writing_patterns(&self, channel: &str) -> Result<HashMap<String, WritingPattern>> {
        self.read(|conn| {
            let sql = format!("SELECT {} FROM user_patterns WHERE channel = ?1", Self::WRITING_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![channel], Self::row_to_writing_pattern)?;
            Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
        })
    }

    pub fn get_writing_pattern(&self, channel: &str, username: &str) -> Result<Option<WritingPattern>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM user_patterns WHERE channel = ?1 AND username = ?2",
                Self::WRITING_COLUMNS
            );
            let found = conn
                .query_row(&sql, params![channel, username], Self::row_to_writing_pattern)
                .optional()?;
            Ok(found.map(|(_, p)| p))
        })
    }

    pub fn replace_temporal_patterns(&self, channel: &str, patterns: &[(String, TemporalPattern)]) -> Result<()> {
        let encoded: Vec<(&String, &TemporalPattern, String)> = patterns
            .iter()
            .map(|(u, p)| -> Result<_> { Ok((u, p, serde_json::to_string(&p.peak_hours)?)) })
            .collect::<Result<_>>()?;
        self.write(|tx| {
            tx.execute("DELETE FROM user_temporal_patterns WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_temporal_patterns
                    (channel, username, peak_hours, avg_session_duration, avg_message_interval,
                     burst_frequency, activity_variance, total_sessions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (username, p, peak_json) in &encoded {
                stmt.execute(params![
                    channel,
                    username,
                    peak_json,
                    p.avg_session_duration,
                    p.avg_message_interval,
                    p.burst_frequency,
                    p.activity_variance,
                    p.total_sessions as i64,
                ])?;
            }
            Ok(())
        })
    }

    fn row_to_temporal_pattern(row: &rusqlite::Row) -> rusqlite::Result<(String, TemporalPattern)> {
        let peak_json: String = row.get(1)?;
        Ok((
            row.get(0)?,
            TemporalPattern {
                peak_hours: serde_json::from_str(&peak_json).unwrap_or_default(),
                avg_session_duration: row.get(2)?,
                avg_message_interval: row.get(3)?,
                burst_frequency: row.get(4)?,
                activity_variance: row.get(5)?,
                total_sessions: row.get::<_, i64>(6)?.max(0) as usize,
            },
        ))
    }

    const TEMPORAL_COLUMNS: &'static str = "username, peak_hours, avg_session_duration,
        avg_message_interval, burst_frequency, activity_variance, total_sessions";

    pub fn get_temporal_patterns(&self, channel: &str) -> Result<HashMap<String, TemporalPattern>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM user_temporal_patterns WHERE channel = ?1",
                Self::TEMPORAL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![channel], Self::row_to_temporal_pattern)?;
            Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
        })
    }

    pub fn get_temporal_pattern(&self, channel: &str, username: &str) -> Result<Option<TemporalPattern>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM user_temporal_patterns WHERE channel = ?1 AND username = ?2",
                Self::TEMPORAL_COLUMNS
            );
            let found = conn
                .query_row(&sql, params![channel, username], Self::row_to_temporal_pattern)
                .optional()?;
            Ok(found.map(|(_, p)| p))
        })
    }

    pub fn replace_user_words(&self, channel: &str, words: &[(String, WordFrequency)]) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM user_words WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_words (channel, username, word, frequency) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (username, counts) in words {
                for (word, count) in counts {
                    stmt.execute(params![channel, username, word, *count as i64])?;
                }
            }
            Ok(())
        })
    }

    pub fn get_user_words(&self, channel: &str, username: &str) -> Result<WordFrequency> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT word, frequency FROM user_words WHERE channel = ?1 AND username = ?2",
            )?;
            let rows = stmt.query_map(params![channel, username], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?;
            Ok(rows.collect::<rusqlite::Result<WordFrequency>>()?)
        })
    }

    // ==================== Similarity & groups ====================

    pub fn replace_similarities(&self, channel: &str, pairs: &[PairSimilarity]) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM user_similarities WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_similarities
                    (channel, user1, user2, word_similarity, pattern_similarity, temporal_similarity,
                     behavioral_similarity, combined_similarity, confidence_score, common_words,
                     total_compared_words)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for p in pairs {
                stmt.execute(params![
                    channel,
                    p.user_a,
                    p.user_b,
                    p.word_similarity,
                    p.pattern_similarity,
                    p.temporal_similarity,
                    p.behavioral_similarity,
                    p.combined_similarity,
                    p.confidence,
                    p.common_words as i64,
                    p.total_compared_words as i64,
                ])?;
            }
            Ok(())
        })
    }

    fn row_to_pair(row: &rusqlite::Row) -> rusqlite::Result<PairSimilarity> {
        Ok(PairSimilarity {
            user_a: row.get(0)?,
            user_b: row.get(1)?,
            word_similarity: row.get(2)?,
            pattern_similarity: row.get(3)?,
            temporal_similarity: row.get(4)?,
            behavioral_similarity: row.get(5)?,
            combined_similarity: row.get(6)?,
            confidence: row.get(7)?,
            common_words: row.get::<_, i64>(8)?.max(0) as usize,
            total_compared_words: row.get::<_, i64>(9)?.max(0) as usize,
        })
    }

    /// Stored pairs involving `username`, strongest adjusted score first
    pub fn get_user_similarities(&self, channel: &str, username: &str) -> Result<Vec<PairSimilarity>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user1, user2, word_similarity, pattern_similarity, temporal_similarity,
                        behavioral_similarity, combined_similarity, confidence_score,
                        common_words, total_compared_words
                 FROM user_similarities
                 WHERE channel = ?1 AND (user1 = ?2 OR user2 = ?2)
                 ORDER BY combined_similarity * confidence_score DESC",
            )?;
            let rows = stmt.query_map(params![channel, username], Self::row_to_pair)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// The `per_user` strongest stored partners for every user in the channel
    pub fn get_top_user_similarities(
        &self,
        channel: &str,
        per_user: usize,
    ) -> Result<HashMap<String, Vec<PairSimilarity>>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user1, user2, word_similarity, pattern_similarity, temporal_similarity,
                        behavioral_similarity, combined_similarity, confidence_score,
                        common_words, total_compared_words
                 FROM user_similarities WHERE channel = ?1
                 ORDER BY combined_similarity * confidence_score DESC",
            )?;
            let rows = stmt.query_map(params![channel], Self::row_to_pair)?;
            let mut out: HashMap<String, Vec<PairSimilarity>> = HashMap::new();
            for row in rows {
                let pair = row?;
                for user in [pair.user_a.clone(), pair.user_b.clone()] {
                    let list = out.entry(user).or_default();
                    if list.len() < per_user {
                        list.push(pair.clone());
                    }
                }
            }
            Ok(out)
        })
    }

    pub fn replace_groups(&self, channel: &str, groups: &[Vec<String>]) -> Result<()> {
        let encoded: Vec<String> = groups
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;
        self.write(|tx| {
            tx.execute("DELETE FROM stylometry_groups WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO stylometry_groups (channel, group_id, usernames) VALUES (?1, ?2, ?3)",
            )?;
            for (group_id, members) in encoded.iter().enumerate() {
                stmt.execute(params![channel, group_id as i64, members])?;
            }
            Ok(())
        })
    }

    pub fn get_groups(&self, channel: &str) -> Result<Vec<UserGroup>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, usernames FROM stylometry_groups WHERE channel = ?1 ORDER BY group_id",
            )?;
            let rows = stmt.query_map(params![channel], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut groups = Vec::new();
            for row in rows {
                let (group_id, members) = row?;
                groups.push(UserGroup {
                    channel: channel.to_string(),
                    group_id: group_id as usize,
                    members: serde_json::from_str(&members)?,
                });
            }
            Ok(groups)
        })
    }

    /// Number of inferred distinct people
    pub fn get_unique_user_count(&self, channel: &str) -> Result<usize> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM stylometry_groups WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // ==================== User stats & status ====================

    pub fn replace_user_stats(&self, channel: &str, stats: &[UserStats]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let encoded: Vec<(&UserStats, String)> = stats
            .iter()
            .map(|s| -> Result<_> { Ok((s, serde_json::to_string(&s.similar_users)?)) })
            .collect::<Result<_>>()?;
        self.write(|tx| {
            tx.execute("DELETE FROM user_stats WHERE channel = ?1", params![channel])?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_stats (channel, username, chat_count, alt_likelihood, similar_users, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (s, similar_json) in &encoded {
                stmt.execute(params![
                    channel,
                    s.username,
                    s.chat_count as i64,
                    s.alt_likelihood,
                    similar_json,
                    now,
                ])?;
            }
            Ok(())
        })
    }

    pub fn get_user_stats(&self, channel: &str) -> Result<Vec<UserStats>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, chat_count, alt_likelihood, similar_users, last_updated
                 FROM user_stats WHERE channel = ?1 ORDER BY chat_count DESC, username",
            )?;
            let rows = stmt.query_map(params![channel], |row| {
                let similar: Option<String> = row.get(3)?;
                Ok(UserStats {
                    username: row.get(0)?,
                    chat_count: row.get::<_, i64>(1)?.max(0) as u64,
                    alt_likelihood: row.get(2)?,
                    similar_users: similar
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    last_updated: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn get_analytics_status(&self, channel: &str) -> Result<Option<AnalyticsStatus>> {
        self.read(|conn| {
            let status = conn
                .query_row(
                    "SELECT channel, last_processed_date, total_messages, last_analytics_update, analytics_version
                     FROM analytics_status WHERE channel = ?1",
                    params![channel],
                    |row| {
                        Ok(AnalyticsStatus {
                            channel: row.get(0)?,
                            last_processed_date: row.get(1)?,
                            total_messages: row.get::<_, i64>(2)?.max(0) as u64,
                            last_analytics_update: row.get(3)?,
                            analytics_version: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(status)
        })
    }

    pub fn update_analytics_status(
        &self,
        channel: &str,
        last_processed_date: Option<&str>,
        total_messages: u64,
    ) -> Result<()> {
        self.set_analytics_status(channel, last_processed_date, total_messages, &chrono::Utc::now().to_rfc3339())
    }

    /// Write a status row with an explicit update time
    pub fn set_analytics_status(
        &self,
        channel: &str,
        last_processed_date: Option<&str>,
        total_messages: u64,
        updated_at: &str,
    ) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO analytics_status (channel, last_processed_date, total_messages, last_analytics_update, analytics_version)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(channel) DO UPDATE SET
                    last_processed_date = excluded.last_processed_date,
                    total_messages = excluded.total_messages,
                    last_analytics_update = excluded.last_analytics_update",
                params![channel, last_processed_date, total_messages as i64, updated_at],
            )?;
            Ok(())
        })
    }
}
