//! Activity timing statistics per user

use crate::db::TemporalPattern;
use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap};

/// Fewest events a temporal pattern is ever computed from
const MIN_EVENTS: usize = 5;
/// Gaps of an hour or more are not counted as intervals
const MAX_INTERVAL_SECS: i64 = 3600;
/// A gap longer than this starts a new session
const SESSION_GAP_SECS: i64 = 1800;
const BURST_GAP_SECS: i64 = 10;
/// Bursts are only looked for among the first events
const BURST_WINDOW: usize = 100;
const PEAK_HOURS: usize = 3;
/// Upper bound on the co-presence window
pub const MAX_CO_PRESENCE_SECS: u64 = 3600;

/// Most frequent hours of day. Ties keep first-seen order.
fn peak_hours(times: &[NaiveDateTime]) -> Vec<u32> {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for t in times {
        let hour = t.hour();
        match counts.iter_mut().find(|(h, _)| *h == hour) {
            Some((_, c)) => *c += 1,
            None => counts.push((hour, 1)),
        }
    }
    // stable sort keeps tabulation order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(PEAK_HOURS).map(|(h, _)| h).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Compute the temporal pattern from one user's message times, or None when
/// there are fewer than `max(5, min_messages)` of them.
pub fn analyze_temporal(timestamps: &[NaiveDateTime], min_messages: usize) -> Option<TemporalPattern> {
    if timestamps.len() < MIN_EVENTS.max(min_messages) {
        return None;
    }
    let mut times = timestamps.to_vec();
    times.sort();

    let gaps: Vec<i64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .collect();

    let intervals: Vec<f64> = gaps
        .iter()
        .filter(|g| **g < MAX_INTERVAL_SECS)
        .map(|g| *g as f64)
        .collect();

    let window = times.len().min(BURST_WINDOW);
    let examined = window.saturating_sub(1);
    let bursts = gaps[..examined].iter().filter(|g| **g < BURST_GAP_SECS).count();
    let burst_frequency = if examined > 0 { bursts as f64 / examined as f64 } else { 0.0 };

    let mut durations = Vec::new();
    let mut session_start = times[0];
    for (i, gap) in gaps.iter().enumerate() {
        if *gap > SESSION_GAP_SECS {
            durations.push((times[i] - session_start).num_seconds() as f64);
            session_start = times[i + 1];
        }
    }
    durations.push((times[times.len() - 1] - session_start).num_seconds() as f64);

    Some(TemporalPattern {
        peak_hours: peak_hours(&times),
        avg_session_duration: mean(&durations),
        avg_message_interval: mean(&intervals),
        burst_frequency,
        activity_variance: sample_variance(&intervals),
        total_sessions: durations.len(),
    })
}

/// True when some event of `a` lies within `window` of some event of `b`.
/// Both slices must be sorted.
pub fn has_overlap(a: &[NaiveDateTime], b: &[NaiveDateTime], window: Duration) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if (a[i] - b[j]).abs() <= window {
            return true;
        }
        if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// Message times per user, for telling apart users who chat at the same
/// moment. One person rarely posts from two accounts within seconds.
#[derive(Debug, Default)]
pub struct CoPresence {
    times: HashMap<String, Vec<NaiveDateTime>>,
    window: Duration,
}

impl CoPresence {
    pub fn new(timestamps: &BTreeMap<String, Vec<NaiveDateTime>>, window_secs: u64) -> Self {
        let times = timestamps
            .iter()
            .map(|(user, t)| {
                let mut sorted = t.clone();
                sorted.sort();
                (user.clone(), sorted)
            })
            .collect();
        Self {
            times,
            window: Duration::seconds(window_secs.min(MAX_CO_PRESENCE_SECS) as i64),
        }
    }

    /// Users without recorded times never overlap
    pub fn overlaps(&self, a: &str, b: &str) -> bool {
        match (self.times.get(a), self.times.get(b)) {
            (Some(ta), Some(tb)) => has_overlap(ta, tb, self.window),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_too_few_events() {
        let times: Vec<_> = (0..4).map(|i| at(10, i, 0)).collect();
        assert!(analyze_temporal(&times, 5).is_none());
        // floor of five applies even with a lower configured minimum
        assert!(analyze_temporal(&times, 2).is_none());
    }

    #[test]
    fn test_sessions_and_intervals() {
        // two sessions: 10:00-10:02 (3 msgs) and 12:00-12:01 (2 msgs)
        let times = vec![at(10, 0, 0), at(10, 1, 0), at(10, 2, 0), at(12, 0, 0), at(12, 1, 0)];
        let p = analyze_temporal(&times, 5).unwrap();
        assert_eq!(p.total_sessions, 2);
        assert!((p.avg_session_duration - 90.0).abs() < 1e-9);
        // the two-hour gap is excluded from interval stats
        assert!((p.avg_message_interval - 60.0).abs() < 1e-9);
        assert_eq!(p.activity_variance, 0.0);
        assert_eq!(p.burst_frequency, 0.0);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let times = vec![at(10, 2, 0), at(10, 0, 0), at(10, 1, 0), at(10, 4, 0), at(10, 3, 0)];
        let p = analyze_temporal(&times, 5).unwrap();
        assert_eq!(p.total_sessions, 1);
        assert!((p.avg_session_duration - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_burst_frequency() {
        let times = vec![at(9, 0, 0), at(9, 0, 2), at(9, 0, 4), at(9, 1, 0), at(9, 2, 0)];
        let p = analyze_temporal(&times, 5).unwrap();
        assert!((p.burst_frequency - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_peak_hours_tie_order() {
        let times = vec![
            at(8, 0, 0),
            at(9, 0, 0),
            at(9, 10, 0),
            at(10, 0, 0),
            at(11, 0, 0),
            at(11, 10, 0),
        ];
        assert_eq!(peak_hours(&times), vec![9, 11, 8]);
    }

    #[test]
    fn test_has_overlap_window() {
        let a = vec![at(10, 0, 0), at(10, 5, 0)];
        let b = vec![at(10, 2, 0), at(10, 5, 2)];
        assert!(has_overlap(&a, &b, Duration::seconds(2)));
        assert!(!has_overlap(&a, &b, Duration::seconds(1)));
        assert!(!has_overlap(&a, &[], Duration::seconds(2)));
    }

    #[test]
    fn test_co_presence_sorts_and_ignores_unknown_users() {
        let mut times = BTreeMap::new();
        times.insert("ann".to_string(), vec![at(12, 0, 0), at(9, 0, 0)]);
        times.insert("bea".to_string(), vec![at(9, 0, 1)]);
        times.insert("cid".to_string(), vec![at(11, 0, 0)]);
        let co = CoPresence::new(&times, 2);
        assert!(co.overlaps("ann", "bea"));
        assert!(co.overlaps("bea", "ann"));
        assert!(!co.overlaps("ann", "cid"));
        assert!(!co.overlaps("ann", "ghost"));
    }
}
