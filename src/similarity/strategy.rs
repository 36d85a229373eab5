//! Which pairs get scored, chosen by population size
//!
//! Small channels score every pair. Mid-sized channels prune on word overlap
//! first and cap each user's partners. Very large channels only compare the
//! most active users; everyone else gets a constant-time heuristic score and
//! a group of their own.

use super::PairScorer;
use crate::db::{PairSimilarity, WritingPattern};
use crate::features::{ChannelFeatures, WritingAnalyzer};
use crate::settings::Settings;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Exhaustive,
    EarlyStopped,
    Sampled,
}

impl Strategy {
    pub fn select(user_count: usize, settings: &Settings) -> Self {
        if user_count <= settings.exhaustive_max_users {
            Strategy::Exhaustive
        } else if user_count <= settings.sampling_ceiling {
            Strategy::EarlyStopped
        } else {
            Strategy::Sampled
        }
    }
}

/// Output of one scoring pass
#[derive(Debug, Default)]
pub struct PairScores {
    /// Pairs worth persisting
    pub pairs: Vec<PairSimilarity>,
    /// Alt scores for users that were never compared pairwise
    pub heuristic: HashMap<String, f64>,
    /// Users that must each form their own group
    pub singletons: Vec<String>,
}

fn exhaustive(scorer: &PairScorer, users: &[&str]) -> Vec<PairSimilarity> {
    let mut pairs = Vec::with_capacity(users.len() * users.len().saturating_sub(1) / 2);
    for (i, u1) in users.iter().enumerate() {
        for u2 in &users[i + 1..] {
            pairs.push(scorer.score(u1, u2));
        }
    }
    pairs
}

fn early_stopped(scorer: &PairScorer, users: &[&str], settings: &Settings) -> Vec<PairSimilarity> {
    let keep_at = 0.5 * settings.similarity_threshold;
    let cap = settings.max_partners_per_user;
    let mut partners: HashMap<&str, usize> = HashMap::new();
    let mut pairs = Vec::new();
    let mut pruned = 0usize;

    for (i, u1) in users.iter().enumerate() {
        for u2 in &users[i + 1..] {
            if partners.get(*u1).copied().unwrap_or(0) > cap {
                break;
            }
            if partners.get(*u2).copied().unwrap_or(0) > cap {
                continue;
            }
            let words = scorer.word_overlap(u1, u2);
            if words.similarity < settings.early_stop_word_floor {
                pruned += 1;
                continue;
            }
            let pair = scorer.complete(u1, u2, words);
            if pair.combined_similarity >= keep_at {
                *partners.entry(*u1).or_insert(0) += 1;
                *partners.entry(*u2).or_insert(0) += 1;
                pairs.push(pair);
            }
        }
    }
    debug!("Early stopping pruned {} pairs on word overlap", pruned);
    pairs
}

/// Constant-time alt score from a user's own writing statistics
pub fn heuristic_score(pattern: Option<&WritingPattern>) -> f64 {
    let Some(p) = pattern else {
        return 0.0;
    };
    let mut score = 0.0;
    if p.avg_message_length < 15.0 {
        score += 0.15;
    }
    if p.caps_ratio > 0.6 {
        score += 0.1;
    }
    if p.punctuation_ratio < 0.005 {
        score += 0.05;
    }
    score
}

/// Score the channel's users with the strategy their count calls for.
///
/// `users` carries each user's message count; it decides who is compared
/// when sampling. Users left out of the sample are scored from their raw
/// `messages`, however few they sent. Pair order within the output is
/// deterministic.
pub fn compute_pair_scores(
    users: &[(String, u64)],
    features: &ChannelFeatures,
    messages: &BTreeMap<String, Vec<String>>,
    settings: &Settings,
) -> PairScores {
    let scorer = PairScorer::new(features);
    let strategy = Strategy::select(users.len(), settings);
    info!("Scoring {} users with {:?} strategy", users.len(), strategy);

    let mut by_name: Vec<&str> = users.iter().map(|(u, _)| u.as_str()).collect();
    by_name.sort_unstable();

    match strategy {
        Strategy::Exhaustive => PairScores {
            pairs: exhaustive(&scorer, &by_name),
            ..Default::default()
        },
        Strategy::EarlyStopped => PairScores {
            pairs: early_stopped(&scorer, &by_name, settings),
            ..Default::default()
        },
        Strategy::Sampled => {
            let mut by_volume: Vec<&(String, u64)> = users.iter().collect();
            by_volume.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let sample = ((users.len() as f64 * settings.sample_fraction).ceil() as usize)
                .min(settings.sample_cap)
                .min(users.len());
            let mut sampled: Vec<&str> = by_volume[..sample].iter().map(|(u, _)| u.as_str()).collect();
            sampled.sort_unstable();

            let mut rest: Vec<String> = by_volume[sample..].iter().map(|(u, _)| u.clone()).collect();
            rest.sort_unstable();
            let analyzer = WritingAnalyzer::new();
            let heuristic = rest
                .iter()
                .map(|u| {
                    let raw = messages.get(u).and_then(|m| analyzer.analyze(m, 1));
                    (u.clone(), heuristic_score(raw.as_ref()))
                })
                .collect();
            debug!("Sampled {} of {} users for pairwise comparison", sample, users.len());

            PairScores {
                pairs: early_stopped(&scorer, &sampled, settings),
                heuristic,
                singletons: rest,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WordFrequency;
    use crate::features::extract_features;

    type Population = (Vec<(String, u64)>, ChannelFeatures, BTreeMap<String, Vec<String>>);

    fn shared_words() -> WordFrequency {
        ["alpha", "beta", "gamma"].iter().map(|w| (w.to_string(), 2)).collect()
    }

    fn vocabulary(list: &[&str]) -> WordFrequency {
        list.iter().map(|w| (w.to_string(), 1)).collect()
    }

    fn population(n: usize, overlap: bool) -> Population {
        let mut f = ChannelFeatures::default();
        let mut users = Vec::new();
        let mut messages = BTreeMap::new();
        for i in 0..n {
            let name = format!("user{:04}", i);
            let words = if overlap {
                shared_words()
            } else {
                [format!("only{}", i)].into_iter().map(|w| (w, 1)).collect()
            };
            f.words.insert(name.clone(), words);
            f.writing.insert(
                name.clone(),
                WritingPattern { avg_message_length: 10.0, ..Default::default() },
            );
            messages.insert(name.clone(), vec!["hey you".to_string(); 2]);
            users.push((name, (n - i) as u64));
        }
        (users, f, messages)
    }

    #[test]
    fn test_select() {
        let s = Settings::default();
        assert_eq!(Strategy::select(0, &s), Strategy::Exhaustive);
        assert_eq!(Strategy::select(200, &s), Strategy::Exhaustive);
        assert_eq!(Strategy::select(201, &s), Strategy::EarlyStopped);
        assert_eq!(Strategy::select(1000, &s), Strategy::EarlyStopped);
        assert_eq!(Strategy::select(1001, &s), Strategy::Sampled);
    }

    #[test]
    fn test_exhaustive_scores_every_pair() {
        let (users, f, m) = population(6, false);
        let scores = compute_pair_scores(&users, &f, &m, &Settings::default());
        assert_eq!(scores.pairs.len(), 15);
        assert!(scores.pairs.iter().all(|p| p.user_a < p.user_b));
        assert!(scores.singletons.is_empty());
    }

    #[test]
    fn test_early_stop_prunes_low_word_overlap() {
        let (users, f, m) = population(6, false);
        let mut s = Settings::default();
        s.exhaustive_max_users = 2;
        let scores = compute_pair_scores(&users, &f, &m, &s);
        assert!(scores.pairs.is_empty());
    }

    #[test]
    fn test_early_stop_drops_weak_combined_scores() {
        // no writing or temporal features, so combined = 0.3 * word overlap
        let mut f = ChannelFeatures::default();
        f.words.insert("ann".into(), vocabulary(&["one", "two", "three"]));
        f.words.insert("bea".into(), vocabulary(&["three", "four", "five"]));
        f.words.insert("cid".into(), vocabulary(&["one", "two", "three"]));
        let users: Vec<(String, u64)> = ["ann", "bea", "cid"].iter().map(|u| (u.to_string(), 5)).collect();
        let mut s = Settings::default();
        s.exhaustive_max_users = 1;

        let scores = compute_pair_scores(&users, &f, &BTreeMap::new(), &s);
        // ann/bea and bea/cid overlap 1/5: past the word floor, but 0.06 < 0.15
        let kept: Vec<(&str, &str)> = scores
            .pairs
            .iter()
            .map(|p| (p.user_a.as_str(), p.user_b.as_str()))
            .collect();
        assert_eq!(kept, vec![("ann", "cid")]);
        assert!((scores.pairs[0].combined_similarity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_early_stop_partner_cap() {
        let (users, f, m) = population(10, true);
        let mut s = Settings::default();
        s.exhaustive_max_users = 2;
        s.max_partners_per_user = 2;
        let scores = compute_pair_scores(&users, &f, &m, &s);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for p in &scores.pairs {
            *counts.entry(p.user_a.as_str()).or_default() += 1;
            *counts.entry(p.user_b.as_str()).or_default() += 1;
        }
        // a user stops taking partners once past the cap
        assert!(counts.values().all(|c| *c <= 3));
        assert!(scores.pairs.len() < 45);
    }

    #[test]
    fn test_sampled_compares_only_most_active() {
        let (users, f, m) = population(30, true);
        let mut s = Settings::default();
        s.exhaustive_max_users = 5;
        s.sampling_ceiling = 10;
        let scores = compute_pair_scores(&users, &f, &m, &s);

        // top 10% of 30 by message count: user0000..user0002
        assert_eq!(scores.pairs.len(), 3);
        assert_eq!(scores.singletons.len(), 27);
        assert!(!scores.singletons.contains(&"user0000".to_string()));
        // "hey you": short and no punctuation
        assert!((scores.heuristic["user0029"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_sampled_out_users_scored_from_few_messages() {
        let mut messages = BTreeMap::new();
        let mut users = Vec::new();
        for i in 0..30 {
            let name = format!("u{:03}", i);
            let texts = if i < 3 {
                (0..20).map(|k| format!("regular chatter about the match, take {}.", k)).collect()
            } else {
                vec!["HEY YOU".to_string(); 2]
            };
            users.push((name.clone(), texts.len() as u64));
            messages.insert(name, texts);
        }
        let mut s = Settings::default();
        s.exhaustive_max_users = 5;
        s.sampling_ceiling = 10;
        let features = extract_features(&messages, &BTreeMap::new(), &s);
        assert!(!features.writing.contains_key("u029"));

        let scores = compute_pair_scores(&users, &features, &messages, &s);
        assert_eq!(scores.singletons.len(), 27);
        assert!((scores.heuristic["u029"] - 0.3).abs() < 1e-9);
        assert!(!scores.heuristic.contains_key("u000"));
    }

    #[test]
    fn test_heuristic_score_rules() {
        assert_eq!(heuristic_score(None), 0.0);
        let p = WritingPattern {
            avg_message_length: 8.0,
            caps_ratio: 0.9,
            punctuation_ratio: 0.0,
            ..Default::default()
        };
        assert!((heuristic_score(Some(&p)) - 0.3).abs() < 1e-9);
        let q = WritingPattern { avg_message_length: 40.0, punctuation_ratio: 0.1, ..Default::default() };
        assert_eq!(heuristic_score(Some(&q)), 0.0);
    }
}
