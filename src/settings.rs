//! Analysis settings
//!
//! Stored as a JSON file. Every tunable the ingest and analysis passes need
//! lives here and is handed to each call explicitly.

use crate::error::{AltwatchError, Result};
use crate::features::temporal::MAX_CO_PRESENCE_SECS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ten years
const MAX_STALE_AFTER_HOURS: i64 = 24 * 365 * 10;

/// How users are grouped once pair scores are known
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// Seed-and-absorb single pass, absorbed users never seed
    Greedy,
    /// Transitive closure over the above-threshold adjacency
    Connected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_channels_root")]
    pub channels_root: PathBuf,
    /// Minimum messages before writing/temporal patterns are computed
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
    #[serde(default = "default_min_messages_for_words")]
    pub min_messages_for_words: usize,
    #[serde(default = "default_top_k_words")]
    pub top_k_words: usize,
    /// Adjusted similarity needed to share a group
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Largest population scored exhaustively
    #[serde(default = "default_exhaustive_max_users")]
    pub exhaustive_max_users: usize,
    /// Above this population only the most active users are compared
    #[serde(default = "default_sampling_ceiling")]
    pub sampling_ceiling: usize,
    #[serde(default = "default_sample_fraction")]
    pub sample_fraction: f64,
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
    /// Word overlap below this skips the rest of the pair when early stopping
    #[serde(default = "default_early_stop_word_floor")]
    pub early_stop_word_floor: f64,
    #[serde(default = "default_max_partners_per_user")]
    pub max_partners_per_user: usize,
    #[serde(default = "default_cluster_mode")]
    pub cluster_mode: ClusterMode,
    /// Two users posting within this many seconds of each other are co-present
    #[serde(default = "default_co_presence_window_secs")]
    pub co_presence_window_secs: u64,
    /// Never group co-present users together
    #[serde(default)]
    pub co_presence_veto: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Cached analytics older than this are recomputed
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
}

fn default_channels_root() -> PathBuf {
    PathBuf::from("Channels")
}

fn default_min_messages() -> usize {
    5
}

fn default_min_messages_for_words() -> usize {
    3
}

fn default_top_k_words() -> usize {
    50
}

fn default_similarity_threshold() -> f64 {
    0.3
}

fn default_exhaustive_max_users() -> usize {
    200
}

fn default_sampling_ceiling() -> usize {
    1000
}

fn default_sample_fraction() -> f64 {
    0.1
}

fn default_sample_cap() -> usize {
    800
}

fn default_early_stop_word_floor() -> f64 {
    0.1
}

fn default_max_partners_per_user() -> usize {
    50
}

fn default_cluster_mode() -> ClusterMode {
    ClusterMode::Greedy
}

fn default_co_presence_window_secs() -> u64 {
    2
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_retry_max_attempts() -> u32 {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_stale_after_hours() -> i64 {
    24
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channels_root: default_channels_root(),
            min_messages: default_min_messages(),
            min_messages_for_words: default_min_messages_for_words(),
            top_k_words: default_top_k_words(),
            similarity_threshold: default_similarity_threshold(),
            exhaustive_max_users: default_exhaustive_max_users(),
            sampling_ceiling: default_sampling_ceiling(),
            sample_fraction: default_sample_fraction(),
            sample_cap: default_sample_cap(),
            early_stop_word_floor: default_early_stop_word_floor(),
            max_partners_per_user: default_max_partners_per_user(),
            cluster_mode: default_cluster_mode(),
            co_presence_window_secs: default_co_presence_window_secs(),
            co_presence_veto: false,
            busy_timeout_ms: default_busy_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults when missing or unreadable
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unparseable settings {}: {}", path.display(), e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the analysis meaningless
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AltwatchError::Config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.top_k_words == 0 {
            return Err(AltwatchError::Config("top_k_words must be positive".to_string()));
        }
        if self.exhaustive_max_users > self.sampling_ceiling {
            return Err(AltwatchError::Config(format!(
                "exhaustive_max_users ({}) exceeds sampling_ceiling ({})",
                self.exhaustive_max_users, self.sampling_ceiling
            )));
        }
        if !(0.0..=1.0).contains(&self.sample_fraction) {
            return Err(AltwatchError::Config("sample_fraction must be within [0, 1]".to_string()));
        }
        if !(1..=MAX_STALE_AFTER_HOURS).contains(&self.stale_after_hours) {
            return Err(AltwatchError::Config(format!(
                "stale_after_hours must be within [1, {}], got {}",
                MAX_STALE_AFTER_HOURS, self.stale_after_hours
            )));
        }
        if self.co_presence_window_secs > MAX_CO_PRESENCE_SECS {
            return Err(AltwatchError::Config(format!(
                "co_presence_window_secs must be at most {}",
                MAX_CO_PRESENCE_SECS
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.min_messages, 5);
        assert_eq!(s.top_k_words, 50);
        assert!((s.similarity_threshold - 0.3).abs() < 1e-12);
        assert_eq!(s.sampling_ceiling, 1000);
        assert_eq!(s.cluster_mode, ClusterMode::Greedy);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{"top_k_words": 10, "cluster_mode": "connected"}"#).unwrap();
        assert_eq!(s.top_k_words, 10);
        assert_eq!(s.cluster_mode, ClusterMode::Connected);
        assert_eq!(s.min_messages, 5);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("nope.json"));
        assert_eq!(s.max_partners_per_user, 50);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let mut s = Settings::default();
        s.similarity_threshold = 0.45;
        s.save(&path).unwrap();
        let loaded = Settings::load(&path);
        assert!((loaded.similarity_threshold - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut s = Settings::default();
        s.similarity_threshold = 1.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_staleness() {
        let mut s = Settings::default();
        s.stale_after_hours = 0;
        assert!(s.validate().is_err());
        s.stale_after_hours = i64::MAX;
        assert!(s.validate().is_err());
        s.stale_after_hours = 24 * 365;
        assert!(s.validate().is_ok());

        s.co_presence_window_secs = 86_400;
        assert!(s.validate().is_err());
    }
}
