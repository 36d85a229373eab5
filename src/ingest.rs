//! Incremental transcript ingestion
//!
//! Layout: `{channels_root}/{channel}/*.log`, one file per day with the date
//! in its name. Each file has a cursor (last line read, size, mtime, first-line
//! fingerprint) so a pass only reads what was appended since the last one.

use crate::db::{ChatMessage, Database, FileCursor};
use crate::error::Result;
use crate::parser::LineParser;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where reading resumes for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// Nothing changed since the last pass
    Unchanged,
    /// Continue after the stored line index
    From(usize),
    /// File shrank or was replaced: read from the top and drop its old rows
    Restart,
}

fn head_fingerprint(content: &str) -> Option<String> {
    let first = content.lines().next()?;
    Some(hex::encode(Sha256::digest(first.as_bytes())))
}

fn modified_rfc3339(meta: &fs::Metadata) -> Option<String> {
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).to_rfc3339())
}

fn decide_resume(stored: Option<&FileCursor>, size: u64, modified: &str, fingerprint: Option<&str>) -> Resume {
    let Some(stored) = stored else {
        return Resume::From(0);
    };
    if stored.file_size == size && stored.modified_time == modified {
        return Resume::Unchanged;
    }
    if size >= stored.file_size && stored.head_fingerprint.as_deref() == fingerprint {
        return Resume::From(stored.last_line_index);
    }
    Resume::Restart
}

/// Ingest new lines from one log file. Returns the number of messages stored.
///
/// Files that cannot be read or decoded yield 0 and keep their cursor, so the
/// next pass retries them. Database errors propagate.
pub fn process_log_file(db: &Database, parser: &LineParser, channel: &str, path: &Path) -> Result<usize> {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        return Ok(0);
    };
    let Some(log_date) = parser.log_date_from_filename(&filename) else {
        debug!("Skipping {}: no date in filename", path.display());
        return Ok(0);
    };

    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!("Cannot stat {}: {}", path.display(), e);
            return Ok(0);
        }
    };
    let size = meta.len();
    let modified = modified_rfc3339(&meta).unwrap_or_default();

    let stored = db.get_file_cursor(channel, &filename)?;
    if stored.as_ref().is_some_and(|c| c.file_size == size && c.modified_time == modified) {
        debug!("{}/{} unchanged", channel, filename);
        return Ok(0);
    }

    // read_to_string also rejects invalid UTF-8
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return Ok(0);
        }
    };
    let fingerprint = head_fingerprint(&content);
    let lines: Vec<&str> = content.lines().collect();

    let (start, purge) = match decide_resume(stored.as_ref(), size, &modified, fingerprint.as_deref()) {
        Resume::Unchanged => return Ok(0),
        Resume::From(idx) => (idx.min(lines.len()), false),
        Resume::Restart => {
            info!("{}/{} was truncated or replaced, re-reading from the start", channel, filename);
            (0, true)
        }
    };

    let messages: Vec<ChatMessage> = lines[start..]
        .iter()
        .filter_map(|line| parser.parse_line(line, channel, log_date))
        .collect();

    let cursor = FileCursor {
        channel: channel.to_string(),
        filename: filename.clone(),
        file_path: path.to_string_lossy().to_string(),
        last_line_index: lines.len(),
        file_size: size,
        modified_time: modified,
        head_fingerprint: fingerprint,
    };
    let stored_count = db.commit_ingest(&cursor, &messages, purge)?;
    if stored_count > 0 {
        debug!("{}/{}: {} new messages from line {}", channel, filename, stored_count, start);
    }
    Ok(stored_count)
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() == want_dirs)
        .collect();
    entries.sort();
    Ok(entries)
}

/// Ingest every `.log` file of one channel, oldest filename first
pub fn process_channel(db: &Database, settings: &Settings, channel: &str) -> Result<usize> {
    let dir = settings.channels_root.join(channel);
    if !dir.is_dir() {
        return Ok(0);
    }
    let parser = LineParser::new();
    let mut total = 0;
    for path in sorted_entries(&dir, false)? {
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        total += process_log_file(db, &parser, channel, &path)?;
    }
    if total > 0 {
        info!("Channel {}: {} new messages", channel, total);
    }
    Ok(total)
}

/// Ingest all channel directories under the root. A missing root means no
/// channels. A failing channel is reported in its own entry and does not stop
/// the others.
pub fn process_all_channels(db: &Database, settings: &Settings) -> Vec<(String, Result<usize>)> {
    let root = &settings.channels_root;
    if !root.is_dir() {
        debug!("Channels root {} does not exist", root.display());
        return Vec::new();
    }
    let dirs = match sorted_entries(root, true) {
        Ok(d) => d,
        Err(e) => {
            warn!("Cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    dirs.into_iter()
        .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .map(|channel| {
            let outcome = process_channel(db, settings, &channel);
            if let Err(e) = &outcome {
                warn!("Ingestion failed for channel {}: {}", channel, e);
            }
            (channel, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup() -> (tempfile::TempDir, Database, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.channels_root = dir.path().join("Channels");
        let db = Database::new(dir.path().join("chat.db"), &settings).unwrap();
        (dir, db, settings)
    }

    fn write_log(settings: &Settings, channel: &str, name: &str, lines: &[String]) -> PathBuf {
        let dir = settings.channels_root.join(channel);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&path, body).unwrap();
        path
    }

    fn append(path: &Path, lines: &[String]) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        for l in lines {
            writeln!(f, "{}", l).unwrap();
        }
    }

    fn chat_lines(n: usize, offset: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                let s = offset + i;
                format!("[{:02}:{:02}:{:02}] user{}: message {}", (s / 3600) % 24, (s / 60) % 60, s % 60, s % 7, s)
            })
            .collect()
    }

    #[test]
    fn test_unchanged_file_yields_nothing() {
        let (_dir, db, settings) = setup();
        let path = write_log(&settings, "general", "2024-03-01.log", &chat_lines(10, 0));
        let parser = LineParser::new();
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 10);
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 0);
        assert_eq!(db.get_total_messages_count("general").unwrap(), 10);
    }

    #[test]
    fn test_append_yields_exactly_new_lines() {
        let (_dir, db, settings) = setup();
        let path = write_log(&settings, "general", "2024-03-01.log", &chat_lines(10, 0));
        let parser = LineParser::new();
        process_log_file(&db, &parser, "general", &path).unwrap();

        append(&path, &chat_lines(7, 10));
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 7);
        assert_eq!(db.get_total_messages_count("general").unwrap(), 17);

        let cursor = db.get_file_cursor("general", "2024-03-01.log").unwrap().unwrap();
        assert_eq!(cursor.last_line_index, 17);
    }

    #[test]
    fn test_comment_lines_are_not_stored() {
        let (_dir, db, settings) = setup();
        let mut lines = chat_lines(1150, 0);
        for i in 0..50 {
            lines.insert(i * 20, format!("# comment {}", i));
        }
        assert_eq!(lines.len(), 1200);
        write_log(&settings, "general", "2024-03-01.log", &lines);

        assert_eq!(process_channel(&db, &settings, "general").unwrap(), 1150);
        assert_eq!(db.get_total_messages_count("general").unwrap(), 1150);
    }

    #[test]
    fn test_truncated_file_restarts_and_replaces_rows() {
        let (_dir, db, settings) = setup();
        let path = write_log(&settings, "general", "2024-03-01.log", &chat_lines(20, 0));
        let parser = LineParser::new();
        process_log_file(&db, &parser, "general", &path).unwrap();

        fs::write(&path, "[09:00:00] fresh: start over\n").unwrap();
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 1);
        let messages = db.get_user_messages("general", None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages["fresh"], vec!["start over".to_string()]);
    }

    #[test]
    fn test_replaced_file_detected_by_fingerprint() {
        let (_dir, db, settings) = setup();
        let path = write_log(&settings, "general", "2024-03-01.log", &chat_lines(3, 0));
        let parser = LineParser::new();
        process_log_file(&db, &parser, "general", &path).unwrap();

        // same or larger size, different first line
        let replacement: Vec<String> = (0..5).map(|i| format!("[10:00:0{}] other: replaced {}", i, i)).collect();
        write_log(&settings, "general", "2024-03-01.log", &replacement);
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 5);
        assert_eq!(db.get_total_messages_count("general").unwrap(), 5);
    }

    #[test]
    fn test_undecodable_file_keeps_cursor() {
        let (_dir, db, settings) = setup();
        let dir = settings.channels_root.join("general");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("2024-03-01.log");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let parser = LineParser::new();
        assert_eq!(process_log_file(&db, &parser, "general", &path).unwrap(), 0);
        assert!(db.get_file_cursor("general", "2024-03-01.log").unwrap().is_none());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let (_dir, db, settings) = setup();
        assert!(process_all_channels(&db, &settings).is_empty());
    }

    #[test]
    fn test_all_channels_and_non_log_files() {
        let (_dir, db, settings) = setup();
        write_log(&settings, "alpha", "2024-03-01.log", &chat_lines(4, 0));
        write_log(&settings, "beta", "2024-03-02.log", &chat_lines(6, 0));
        write_log(&settings, "beta", "notes.txt", &chat_lines(6, 0));
        write_log(&settings, "beta", "undated.log", &chat_lines(6, 0));

        let results = process_all_channels(&db, &settings);
        let counts: Vec<(String, usize)> = results.into_iter().map(|(c, r)| (c, r.unwrap())).collect();
        assert_eq!(counts, vec![("alpha".to_string(), 4), ("beta".to_string(), 6)]);
        assert_eq!(db.get_channels().unwrap(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_failing_channel_is_isolated() {
        let (_dir, db, settings) = setup();
        write_log(&settings, "broken", "2024-03-01.log", &chat_lines(4, 0));
        write_log(&settings, "general", "2024-03-01.log", &chat_lines(5, 0));
        db.write(|tx| {
            tx.execute_batch(
                "CREATE TRIGGER reject_broken BEFORE INSERT ON chat_messages
                 WHEN NEW.channel = 'broken'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let results = process_all_channels(&db, &settings);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "broken");
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0, "general");
        assert_eq!(results[1].1.as_ref().unwrap(), &5);
        // the failed file keeps no cursor, so the next pass retries it
        assert!(db.get_file_cursor("broken", "2024-03-01.log").unwrap().is_none());
    }

    #[test]
    fn test_decide_resume() {
        let cursor = FileCursor {
            channel: "c".to_string(),
            filename: "f".to_string(),
            file_path: "f".to_string(),
            last_line_index: 12,
            file_size: 100,
            modified_time: "t1".to_string(),
            head_fingerprint: Some("h".to_string()),
        };
        assert_eq!(decide_resume(None, 10, "t", None), Resume::From(0));
        assert_eq!(decide_resume(Some(&cursor), 100, "t1", Some("h")), Resume::Unchanged);
        assert_eq!(decide_resume(Some(&cursor), 150, "t2", Some("h")), Resume::From(12));
        assert_eq!(decide_resume(Some(&cursor), 100, "t2", Some("h")), Resume::From(12));
        assert_eq!(decide_resume(Some(&cursor), 50, "t2", Some("h")), Resume::Restart);
        assert_eq!(decide_resume(Some(&cursor), 150, "t2", Some("x")), Resume::Restart);
    }
}
