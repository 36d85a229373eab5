//! altwatch CLI - ingest channel logs and look for alt accounts
//!
//! Usage: altwatch-cli [OPTIONS] <COMMAND>
//!
//! This is the manual trigger; a scheduler can call `run` on an interval.
//! Supports JSON output for scripting.

use altwatch_lib::analytics::{self, ChannelOutcome};
use altwatch_lib::db::{ChannelSummary, DateFilter, Database};
use altwatch_lib::settings::Settings;
use altwatch_lib::utils::{cell, preview};
use altwatch_lib::{ingest, AltwatchError, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "altwatch-cli")]
#[command(version, about = "Chat log stylometry and alt-account detection", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path (default: <data dir>/altwatch/chat_data.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Settings file (default: <config dir>/altwatch/settings.json)
    #[arg(long, global = true, env = "ALTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the channels root from settings
    #[arg(long, global = true)]
    channels: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read new lines from channel logs
    Ingest {
        /// Only this channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// Recompute and store analytics for one channel
    Analyze {
        channel: String,
        /// Date filter: YYYY-MM-DD, start:end, include:d1,d2 or exclude:d1,d2
        #[arg(long)]
        filter: Option<String>,
    },
    /// Ingest everything, then re-analyze channels whose analytics are stale
    Run,
    /// Show channel summaries
    Summary {
        /// Channel (default: all)
        channel: Option<String>,
        /// Analyze a date range on the fly without storing results
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show one user's features, closest matches and messages
    User {
        channel: String,
        username: String,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show the stored groups of a channel
    Groups { channel: String },
    /// Show each user's strongest stored pair scores
    Pairs {
        channel: String,
        #[arg(long, default_value = "3")]
        per_user: usize,
    },
    /// Estimate distinct people from who posts at the same moment
    Copresence {
        channel: String,
        #[arg(long)]
        filter: Option<String>,
    },
    /// List channels with stored messages
    Channels,
    /// List dates with messages in a channel
    Dates { channel: String },
    /// Settings management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show all settings
    List,
    /// Get one setting
    Get { key: String },
    /// Set one setting (value parsed as JSON, falling back to a string)
    Set { key: String, value: String },
    /// Show the settings file path
    Path,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "altwatch_lib=debug,altwatch_cli=debug"
    } else if cli.quiet {
        "warn"
    } else {
        "altwatch_lib=info,altwatch_cli=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn settings_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("altwatch")
            .join("settings.json")
    })
}

fn database_path(cli: &Cli) -> PathBuf {
    cli.db.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("altwatch")
            .join("chat_data.db")
    })
}

fn parse_filter(filter: Option<&str>) -> Result<Option<DateFilter>> {
    filter.map(DateFilter::parse).transpose()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_cli(cli: Cli) -> Result<()> {
    let config_path = settings_path(&cli);
    let mut settings = Settings::load(&config_path);

    // Config commands don't need the database
    if let Commands::Config { cmd } = &cli.command {
        return handle_config(cmd, &config_path, settings, cli.json);
    }
    if let Some(root) = &cli.channels {
        settings.channels_root = root.clone();
    }
    settings.validate()?;

    let db_path = database_path(&cli);
    debug!("Using database: {}", db_path.display());
    let db = Database::new(&db_path, &settings)?;

    match &cli.command {
        Commands::Ingest { channel } => handle_ingest(&db, &settings, channel.as_deref(), cli.json),
        Commands::Analyze { channel, filter } => {
            let filter = parse_filter(filter.as_deref())?;
            let report = analytics::update_user_analytics(&db, channel, filter.as_ref(), &settings)?;
            if cli.json {
                print_json(&report)
            } else {
                println!(
                    "{}: {} users in {} groups, {} pairs stored",
                    report.channel, report.users, report.groups, report.pairs_stored
                );
                if let Some(strategy) = report.strategy {
                    println!("pair strategy: {:?}", strategy);
                }
                Ok(())
            }
        }
        Commands::Run => handle_run(&db, &settings, cli.json),
        Commands::Summary { channel, filter } => {
            let filter = parse_filter(filter.as_deref())?;
            handle_summary(&db, &settings, channel.as_deref(), filter.as_ref(), cli.json)
        }
        Commands::User { channel, username, page, limit, filter } => {
            let filter = parse_filter(filter.as_deref())?;
            handle_user(&db, channel, username, *page, *limit, filter.as_ref(), cli.json)
        }
        Commands::Groups { channel } => {
            let groups = db.get_groups(channel)?;
            if cli.json {
                print_json(&groups)
            } else {
                for g in groups.iter().filter(|g| g.members.len() > 1) {
                    println!("#{:<4} {}", g.group_id, g.members.join(", "));
                }
                let alone = groups.iter().filter(|g| g.members.len() == 1).count();
                println!("{} groups, {} users without a match", groups.len(), alone);
                Ok(())
            }
        }
        Commands::Pairs { channel, per_user } => handle_pairs(&db, channel, *per_user, cli.json),
        Commands::Copresence { channel, filter } => {
            let filter = parse_filter(filter.as_deref())?;
            let groups = analytics::co_presence_estimate(&db, channel, filter.as_ref(), &settings)?;
            if cli.json {
                print_json(&groups)
            } else {
                let users: usize = groups.iter().map(Vec::len).sum();
                println!(
                    "{}: {} users in {} co-presence groups (window {}s)",
                    channel,
                    users,
                    groups.len(),
                    settings.co_presence_window_secs
                );
                for (i, g) in groups.iter().enumerate().filter(|(_, g)| g.len() > 1) {
                    println!("#{:<4} {}", i, g.join(", "));
                }
                Ok(())
            }
        }
        Commands::Channels => {
            let channels = db.get_channels()?;
            if cli.json {
                print_json(&channels)
            } else {
                for c in channels {
                    println!("{}", c);
                }
                Ok(())
            }
        }
        Commands::Dates { channel } => {
            let dates = db.get_available_dates(channel)?;
            if cli.json {
                print_json(&dates)
            } else {
                for d in dates {
                    println!("{}", d);
                }
                Ok(())
            }
        }
        Commands::Config { .. } => Ok(()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_ingest(db: &Database, settings: &Settings, channel: Option<&str>, json: bool) -> Result<()> {
    let results: Vec<(String, Result<usize>)> = match channel {
        Some(c) => vec![(c.to_string(), ingest::process_channel(db, settings, c))],
        None => ingest::process_all_channels(db, settings),
    };

    if json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|(channel, result)| match result {
                Ok(n) => serde_json::json!({ "channel": channel, "newMessages": n }),
                Err(e) => serde_json::json!({ "channel": channel, "error": e.to_string() }),
            })
            .collect();
        print_json(&rows)?;
    } else if results.is_empty() {
        println!("No channels under {}", settings.channels_root.display());
    } else {
        for (channel, result) in &results {
            match result {
                Ok(n) => println!("{}: {} new messages", channel, n),
                Err(e) => println!("{}: failed ({})", channel, e),
            }
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        return Err(AltwatchError::Config(format!("{} channel(s) failed to ingest", failed)));
    }
    Ok(())
}

fn handle_run(db: &Database, settings: &Settings, json: bool) -> Result<()> {
    let outcomes = analytics::process_and_update(db, settings)?;
    if json {
        return print_json(&outcomes);
    }
    for (channel, outcome) in &outcomes {
        match outcome {
            ChannelOutcome::Updated { new_messages, users, groups } => println!(
                "{}: {} new messages, analyzed {} users into {} groups",
                channel, new_messages, users, groups
            ),
            ChannelOutcome::UpToDate { .. } => println!("{}: up to date", channel),
            ChannelOutcome::Failed { error } => println!("{}: failed ({})", channel, error),
        }
    }
    Ok(())
}

fn handle_pairs(db: &Database, channel: &str, per_user: usize, json: bool) -> Result<()> {
    let top = db.get_top_user_similarities(channel, per_user)?;
    let ordered: BTreeMap<&String, _> = top.iter().collect();
    if json {
        return print_json(&ordered);
    }
    for (user, pairs) in ordered {
        let partners: Vec<String> = pairs
            .iter()
            .map(|p| format!("{} {:.1}%", p.other(user), p.adjusted() * 100.0))
            .collect();
        println!("{} {}", cell(user, 24), partners.join(", "));
    }
    Ok(())
}

fn print_summary(summary: &ChannelSummary) {
    println!(
        "== {} ==  {} to {}  |  {} messages  |  {} users  |  ~{} people",
        summary.channel,
        summary.start_date,
        summary.end_date,
        summary.total_messages,
        summary.total_users,
        summary.unique_user_count
    );
    println!("{} {:>8} {:>8}  similar to", cell("username", 24), "msgs", "alt %");
    for s in &summary.user_stats {
        println!(
            "{} {:>8} {:>8.1}  {}",
            cell(&s.username, 24),
            s.chat_count,
            s.alt_likelihood,
            s.similar_users.join(", ")
        );
    }
    println!();
}

fn handle_summary(
    db: &Database,
    settings: &Settings,
    channel: Option<&str>,
    filter: Option<&DateFilter>,
    json: bool,
) -> Result<()> {
    let summaries = match (channel, filter) {
        (Some(c), Some(f)) => vec![analytics::filtered_channel_summary(db, c, f, settings)?],
        (Some(c), None) => vec![analytics::get_channel_summary(db, c)?],
        (None, Some(f)) => db
            .get_channels()?
            .iter()
            .map(|c| analytics::filtered_channel_summary(db, c, f, settings))
            .collect::<Result<Vec<_>>>()?,
        (None, None) => analytics::get_all_channels_summary(db)?,
    };
    if json {
        return print_json(&summaries);
    }
    for s in &summaries {
        print_summary(s);
    }
    Ok(())
}

fn handle_user(
    db: &Database,
    channel: &str,
    username: &str,
    page: usize,
    limit: usize,
    filter: Option<&DateFilter>,
    json: bool,
) -> Result<()> {
    let writing = db.get_writing_pattern(channel, username)?;
    let temporal = db.get_temporal_pattern(channel, username)?;
    let similar = db.get_user_similarities(channel, username)?;
    let channels = db.get_user_channels(username)?;
    let words = db.get_user_words(channel, username)?;
    let mut top_words: Vec<(&String, &u64)> = words.iter().collect();
    top_words.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let messages = db.get_user_messages_paginated(channel, username, filter, page, limit)?;

    if json {
        return print_json(&serde_json::json!({
            "channel": channel,
            "username": username,
            "writingPattern": writing,
            "temporalPattern": temporal,
            "similarities": similar,
            "channels": channels,
            "topWords": top_words,
            "page": page,
            "messages": messages,
        }));
    }

    println!("== {} in {} ==", username, channel);
    match &writing {
        Some(w) => println!(
            "writing:  avg len {:.1}, caps {:.2}, punct {:.3}, emotes/msg {:.2}, questions {:.0}%",
            w.avg_message_length,
            w.caps_ratio,
            w.punctuation_ratio,
            w.emoji_frequency,
            w.question_frequency * 100.0
        ),
        None => println!("writing:  not enough messages"),
    }
    match &temporal {
        Some(t) => println!(
            "activity: peak hours {:?}, {} sessions, avg session {:.0}s, avg gap {:.0}s",
            t.peak_hours, t.total_sessions, t.avg_session_duration, t.avg_message_interval
        ),
        None => println!("activity: not enough messages"),
    }
    if !top_words.is_empty() {
        let list: Vec<String> = top_words.iter().take(15).map(|(w, n)| format!("{} ({})", w, n)).collect();
        println!("words:    {}", list.join(", "));
    }
    println!("closest:");
    for p in similar.iter().take(10) {
        println!(
            "  {} adjusted {:.1}% (words {:.2}, style {:.2}, timing {:.2}, confidence {:.0}%)",
            cell(p.other(username), 24),
            p.adjusted() * 100.0,
            p.word_similarity,
            p.pattern_similarity,
            p.temporal_similarity,
            p.confidence * 100.0
        );
    }
    if channels.len() > 1 {
        let list: Vec<String> = channels.iter().map(|(c, n)| format!("{} ({})", c, n)).collect();
        println!("also seen in: {}", list.join(", "));
    }
    println!("messages (page {}):", page);
    for m in &messages {
        println!("  {} {}", m.timestamp, preview(&m.message, 100));
    }
    Ok(())
}

fn handle_config(cmd: &ConfigCommands, path: &Path, settings: Settings, json: bool) -> Result<()> {
    let mut value = serde_json::to_value(&settings)?;
    match cmd {
        ConfigCommands::List => {
            if json {
                print_json(&value)?;
            } else if let Some(map) = value.as_object() {
                for (k, v) in map {
                    println!("{:<24} {}", k, v);
                }
            }
        }
        ConfigCommands::Get { key } => {
            let v = value
                .get(key)
                .ok_or_else(|| AltwatchError::Config(format!("Unknown config key: {}", key)))?;
            println!("{}", v);
        }
        ConfigCommands::Set { key, value: raw } => {
            let map = value
                .as_object_mut()
                .ok_or_else(|| AltwatchError::Config("settings are not an object".to_string()))?;
            if !map.contains_key(key) {
                return Err(AltwatchError::Config(format!("Unknown config key: {}", key)));
            }
            let parsed = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            map.insert(key.clone(), parsed);
            let updated: Settings = serde_json::from_value(value)?;
            updated.validate()?;
            updated.save(path)?;
            println!("Set {} in {}", key, path.display());
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}
