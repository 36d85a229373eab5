//! Transcript line parsing
//!
//! Grammar: `[HH:MM:SS] username: message`. Comment lines (`#` after trimming)
//! and anything that does not match are dropped without error.

use crate::db::ChatMessage;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;

pub const LOG_DATE_FORMAT: &str = "%Y-%m-%d";

fn build_line_regex() -> Regex {
    Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\] ([^:]+): (.*)$").expect("static line regex")
}

fn build_file_date_regex() -> Regex {
    Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("static date regex")
}

/// Compiled line grammar. Parsing itself is pure.
pub struct LineParser {
    line_re: Regex,
    file_date_re: Regex,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            line_re: build_line_regex(),
            file_date_re: build_file_date_regex(),
        }
    }

    /// Extract the log date embedded in a filename such as `2024-03-01.log`
    pub fn log_date_from_filename(&self, filename: &str) -> Option<NaiveDate> {
        let caps = self.file_date_re.captures(filename)?;
        NaiveDate::parse_from_str(&caps[1], LOG_DATE_FORMAT).ok()
    }

    /// Parse one transcript line. Returns None for comments, malformed lines
    /// and time-of-day values that do not form a valid timestamp.
    pub fn parse_line(&self, line: &str, channel: &str, log_date: NaiveDate) -> Option<ChatMessage> {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            return None;
        }

        let caps = self.line_re.captures(trimmed)?;
        let time = NaiveTime::parse_from_str(&caps[1], "%H:%M:%S").ok()?;
        // chrono accepts :60 as a leap second
        if time.nanosecond() >= 1_000_000_000 {
            return None;
        }

        let username = caps[2].trim();
        if username.is_empty() {
            return None;
        }

        Some(ChatMessage {
            channel: channel.to_string(),
            username: username.to_string(),
            text: caps[3].trim().to_string(),
            timestamp: NaiveDateTime::new(log_date, time),
            log_date,
        })
    }
}
