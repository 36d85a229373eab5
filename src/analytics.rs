//! Ingest-then-analyze pipeline and channel summaries
//!
//! Not serialized: two passes over the same channel may interleave their
//! writes. Each stage replaces its own tables in one transaction, so a reader
//! sees either the old or the new rows of a stage, never a mix.

use crate::clustering::{cluster_users, co_presence_groups, ClusteringResult};
use crate::db::{ChannelSummary, DateFilter, Database, PairSimilarity, UserStats};
use crate::error::Result;
use crate::features::{extract_features, ChannelFeatures, CoPresence};
use crate::ingest::process_all_channels;
use crate::parser::LOG_DATE_FORMAT;
use crate::settings::Settings;
use crate::similarity::{compute_pair_scores, Strategy};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Everything one analysis pass computed for a channel
#[derive(Debug, Default)]
pub struct Analysis {
    pub features: ChannelFeatures,
    pub pairs: Vec<PairSimilarity>,
    pub clustering: ClusteringResult,
}

impl Analysis {
    /// Per-user stats in the order of `chat_counts`
    pub fn user_stats(&self, chat_counts: &[(String, u64)]) -> Vec<UserStats> {
        chat_counts
            .iter()
            .map(|(username, count)| UserStats {
                username: username.clone(),
                chat_count: *count,
                alt_likelihood: self.clustering.alt_scores.get(username).copied().unwrap_or(0.0) * 100.0,
                similar_users: self.clustering.similar_users.get(username).cloned().unwrap_or_default(),
                last_updated: None,
            })
            .collect()
    }
}

/// Run feature extraction, pair scoring and clustering over in-memory data.
///
/// `chat_counts` defines the population; a user absent from it is ignored.
pub fn analyze_users(
    messages: &BTreeMap<String, Vec<String>>,
    timestamps: &BTreeMap<String, Vec<NaiveDateTime>>,
    chat_counts: &[(String, u64)],
    settings: &Settings,
) -> Analysis {
    if chat_counts.is_empty() {
        return Analysis::default();
    }
    let features = extract_features(messages, timestamps, settings);
    let users: Vec<String> = chat_counts.iter().map(|(u, _)| u.clone()).collect();

    let scores = if users.len() > 1 {
        compute_pair_scores(chat_counts, &features, messages, settings)
    } else {
        Default::default()
    };
    let co_presence = settings
        .co_presence_veto
        .then(|| CoPresence::new(timestamps, settings.co_presence_window_secs));
    let clustering = cluster_users(
        &users,
        &scores,
        settings.similarity_threshold,
        settings.cluster_mode,
        co_presence.as_ref(),
    );
    info!("Analysis complete: {} users, {} groups", users.len(), clustering.groups.len());

    Analysis {
        features,
        pairs: scores.pairs,
        clustering,
    }
}

/// Outcome of [`update_user_analytics`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub channel: String,
    pub users: usize,
    pub groups: usize,
    pub pairs_stored: usize,
    #[serde(skip)]
    pub strategy: Option<Strategy>,
}

/// Recompute and persist a channel's features, pair scores, groups and user
/// stats. The analytics status row is only touched for unfiltered runs.
///
/// Stages are written one after another; a failure leaves earlier stages'
/// results in place.
pub fn update_user_analytics(
    db: &Database,
    channel: &str,
    filter: Option<&DateFilter>,
    settings: &Settings,
) -> Result<AnalyticsReport> {
    info!("Running stylometry analysis for {}", channel);
    let chat_counts = db.get_user_chat_counts(channel, filter)?;
    if chat_counts.is_empty() {
        return Ok(AnalyticsReport {
            channel: channel.to_string(),
            users: 0,
            groups: 0,
            pairs_stored: 0,
            strategy: None,
        });
    }

    let messages = db.get_user_messages(channel, filter)?;
    let timestamps = db.get_user_timestamps(channel, filter)?;
    let analysis = analyze_users(&messages, &timestamps, &chat_counts, settings);

    let writing: Vec<_> = analysis.features.writing.iter().map(|(u, p)| (u.clone(), p.clone())).collect();
    db.replace_writing_patterns(channel, &writing)?;
    let temporal: Vec<_> = analysis.features.temporal.iter().map(|(u, p)| (u.clone(), p.clone())).collect();
    db.replace_temporal_patterns(channel, &temporal)?;
    let words: Vec<_> = analysis.features.words.iter().map(|(u, w)| (u.clone(), w.clone())).collect();
    db.replace_user_words(channel, &words)?;

    db.replace_similarities(channel, &analysis.pairs)?;
    db.replace_groups(channel, &analysis.clustering.groups)?;
    db.replace_user_stats(channel, &analysis.user_stats(&chat_counts))?;

    if filter.is_none() {
        let end_date = db.get_date_range(channel)?.map(|(_, end)| end);
        let total = db.get_total_messages_count(channel)?;
        db.update_analytics_status(channel, end_date.as_deref(), total)?;
        info!("Analytics updated for {} ({} total messages)", channel, total);
    }

    Ok(AnalyticsReport {
        channel: channel.to_string(),
        users: chat_counts.len(),
        groups: analysis.clustering.groups.len(),
        pairs_stored: analysis.pairs.len(),
        strategy: Some(Strategy::select(chat_counts.len(), settings)),
    })
}

/// Whether a channel's cached analytics should be recomputed
pub fn needs_analytics_update(db: &Database, channel: &str, new_messages: usize, settings: &Settings) -> Result<bool> {
    if new_messages > 0 {
        return Ok(true);
    }
    let Some(status) = db.get_analytics_status(channel)? else {
        return Ok(true);
    };
    if db.get_user_stats(channel)?.is_empty() {
        return Ok(true);
    }
    if db.get_total_messages_count(channel)? != status.total_messages {
        return Ok(true);
    }
    let Some(last) = status.last_analytics_update.as_deref() else {
        return Ok(true);
    };
    let Ok(ts) = DateTime::parse_from_rfc3339(last) else {
        return Ok(true);
    };
    let age = Utc::now().signed_duration_since(ts);
    Ok(TimeDelta::try_hours(settings.stale_after_hours).map_or(true, |limit| age > limit))
}

/// Group a channel's users by co-presence alone, see [`co_presence_groups`]
pub fn co_presence_estimate(
    db: &Database,
    channel: &str,
    filter: Option<&DateFilter>,
    settings: &Settings,
) -> Result<Vec<Vec<String>>> {
    let timestamps = db.get_user_timestamps(channel, filter)?;
    let users: Vec<String> = timestamps.keys().cloned().collect();
    let co_presence = CoPresence::new(&timestamps, settings.co_presence_window_secs);
    Ok(co_presence_groups(&users, &co_presence))
}

/// Summary built from the stored analytics
pub fn get_channel_summary(db: &Database, channel: &str) -> Result<ChannelSummary> {
    let user_stats = db.get_user_stats(channel)?;
    let (start_date, end_date) = db.get_date_range(channel)?.unwrap_or_default();
    let total_messages: u64 = user_stats.iter().map(|s| s.chat_count).sum();
    Ok(ChannelSummary {
        channel: channel.to_string(),
        total_users: user_stats.len(),
        user_stats,
        start_date,
        end_date,
        unique_user_count: db.get_unique_user_count(channel)?,
        total_messages,
        last_updated: Utc::now().to_rfc3339(),
    })
}

pub fn get_all_channels_summary(db: &Database) -> Result<Vec<ChannelSummary>> {
    db.get_channels()?
        .iter()
        .map(|channel| get_channel_summary(db, channel))
        .collect()
}

/// Analyze a date-filtered slice of a channel without writing anything
pub fn filtered_channel_summary(
    db: &Database,
    channel: &str,
    filter: &DateFilter,
    settings: &Settings,
) -> Result<ChannelSummary> {
    let chat_counts = db.get_user_chat_counts(channel, Some(filter))?;
    let messages = db.get_user_messages(channel, Some(filter))?;
    let timestamps = db.get_user_timestamps(channel, Some(filter))?;
    let analysis = analyze_users(&messages, &timestamps, &chat_counts, settings);

    let dates: Vec<String> = db
        .get_available_dates(channel)?
        .into_iter()
        .filter(|d| {
            chrono::NaiveDate::parse_from_str(d, LOG_DATE_FORMAT)
                .map(|day| filter.matches(day))
                .unwrap_or(false)
        })
        .collect();
    let now = Utc::now().to_rfc3339();
    let mut user_stats = analysis.user_stats(&chat_counts);
    for s in &mut user_stats {
        s.last_updated = Some(now.clone());
    }

    Ok(ChannelSummary {
        channel: channel.to_string(),
        total_users: user_stats.len(),
        total_messages: chat_counts.iter().map(|(_, c)| c).sum(),
        user_stats,
        start_date: dates.first().cloned().unwrap_or_default(),
        end_date: dates.last().cloned().unwrap_or_default(),
        unique_user_count: analysis.clustering.groups.len(),
        last_updated: now,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChannelOutcome {
    Updated { new_messages: usize, users: usize, groups: usize },
    UpToDate { new_messages: usize },
    Failed { error: String },
}

/// Ingest every channel, then re-analyze those whose analytics are stale.
/// One channel failing is recorded and the rest continue.
pub fn process_and_update(db: &Database, settings: &Settings) -> Result<BTreeMap<String, ChannelOutcome>> {
    let mut outcomes = BTreeMap::new();
    let mut new_counts: BTreeMap<String, usize> = BTreeMap::new();

    for (channel, result) in process_all_channels(db, settings) {
        match result {
            Ok(n) => {
                new_counts.insert(channel, n);
            }
            Err(e) => {
                outcomes.insert(channel, ChannelOutcome::Failed { error: e.to_string() });
            }
        }
    }

    let mut channels: BTreeSet<String> = db.get_channels()?.into_iter().collect();
    channels.extend(new_counts.keys().cloned());

    for channel in channels {
        if outcomes.contains_key(&channel) {
            continue;
        }
        let new_messages = new_counts.get(&channel).copied().unwrap_or(0);
        let outcome = needs_analytics_update(db, &channel, new_messages, settings).and_then(|stale| {
            if !stale {
                return Ok(ChannelOutcome::UpToDate { new_messages });
            }
            let report = update_user_analytics(db, &channel, None, settings)?;
            Ok(ChannelOutcome::Updated {
                new_messages,
                users: report.users,
                groups: report.groups,
            })
        });
        let outcome = outcome.unwrap_or_else(|e| {
            warn!("Analytics failed for channel {}: {}", channel, e);
            ChannelOutcome::Failed { error: e.to_string() }
        });
        outcomes.insert(channel, outcome);
    }
    Ok(outcomes)
}
