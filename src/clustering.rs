//! Grouping users into inferred people
//!
//! Greedy (default): walk users in name order; an unassigned user seeds a
//! group and pulls in every unassigned user whose adjusted similarity to the
//! seed reaches the threshold. Absorbed users never seed, so grouping is not
//! transitive.
//!
//! Connected: union-find over the same above-threshold edges, so groups are
//! the connected components.
//!
//! Both produce a partition of the input users. Users that were never
//! compared pairwise stay alone. With a [`CoPresence`] veto, users seen
//! posting at the same moment are never placed in one group.

use crate::db::PairSimilarity;
use crate::features::CoPresence;
use crate::settings::ClusterMode;
use crate::similarity::PairScores;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Result of grouping one channel
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringResult {
    pub groups: Vec<Vec<String>>,
    /// Highest adjusted similarity per user, in [0, 1]
    pub alt_scores: HashMap<String, f64>,
    /// Display strings for partners at or above the threshold
    pub similar_users: HashMap<String, Vec<String>>,
}

/// `other (score%, confidence: conf%)`
pub fn format_similar_user(other: &str, pair: &PairSimilarity) -> String {
    format!(
        "{} ({:.1}%, confidence: {:.1}%)",
        other,
        pair.adjusted() * 100.0,
        pair.confidence * 100.0
    )
}

/// Union-find keyed by username, union by rank with path compression
struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, usize>,
}

impl UnionFind {
    fn new(users: &[String]) -> Self {
        Self {
            parent: users.iter().map(|u| (u.clone(), u.clone())).collect(),
            rank: users.iter().map(|u| (u.clone(), 0)).collect(),
        }
    }

    fn find(&mut self, id: &str) -> String {
        let parent = self.parent.get(id).cloned().unwrap_or_else(|| id.to_string());
        if parent != id {
            let root = self.find(&parent);
            self.parent.insert(id.to_string(), root.clone());
            root
        } else {
            parent
        }
    }

    fn union(&mut self, a: &str, b: &str) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b);
        } else {
            if rank_a == rank_b {
                self.rank.insert(root_a.clone(), rank_a + 1);
            }
            self.parent.insert(root_b, root_a);
        }
    }

    /// Components with sorted members, ordered by their first member
    fn components(&mut self) -> Vec<Vec<String>> {
        let ids: Vec<String> = self.parent.keys().cloned().collect();
        let mut by_root: HashMap<String, Vec<String>> = HashMap::new();
        for id in ids {
            let root = self.find(&id);
            by_root.entry(root).or_default().push(id);
        }
        let mut groups: Vec<Vec<String>> = by_root
            .into_values()
            .map(|mut g| {
                g.sort();
                g
            })
            .collect();
        groups.sort();
        groups
    }
}

fn greedy_groups(
    users: &[String],
    adjacency: &HashMap<&str, Vec<&str>>,
    co_presence: Option<&CoPresence>,
) -> Vec<Vec<String>> {
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    for seed in users {
        if !assigned.insert(seed.as_str()) {
            continue;
        }
        let mut group = vec![seed.clone()];
        if let Some(neighbours) = adjacency.get(seed.as_str()) {
            for n in neighbours {
                if assigned.contains(n) {
                    continue;
                }
                if co_presence.is_some_and(|co| group.iter().any(|m| co.overlaps(m, n))) {
                    continue;
                }
                assigned.insert(*n);
                group.push(n.to_string());
            }
        }
        groups.push(group);
    }
    groups
}

/// Group `users` from their pair scores.
///
/// Users in `scores.singletons`, and users missing from every pair, end up
/// alone in their own group.
pub fn cluster_users(
    users: &[String],
    scores: &PairScores,
    threshold: f64,
    mode: ClusterMode,
    co_presence: Option<&CoPresence>,
) -> ClusteringResult {
    let mut ordered: Vec<String> = users.to_vec();
    ordered.sort();
    ordered.dedup();
    let singletons: HashSet<&str> = scores.singletons.iter().map(String::as_str).collect();
    let known: HashSet<&str> = ordered
        .iter()
        .map(String::as_str)
        .filter(|u| !singletons.contains(u))
        .collect();

    let mut alt_scores: HashMap<String, f64> = ordered.iter().map(|u| (u.clone(), 0.0)).collect();
    let mut ranked: HashMap<&str, Vec<(f64, &str, &PairSimilarity)>> = HashMap::new();

    for pair in &scores.pairs {
        let (a, b) = (pair.user_a.as_str(), pair.user_b.as_str());
        if !known.contains(a) || !known.contains(b) {
            continue;
        }
        let adjusted = pair.adjusted();
        for (user, other) in [(a, b), (b, a)] {
            if let Some(best) = alt_scores.get_mut(user) {
                *best = best.max(adjusted);
            }
            if adjusted >= threshold {
                ranked.entry(user).or_default().push((adjusted, other, pair));
            }
        }
    }
    for (user, score) in &scores.heuristic {
        if let Some(best) = alt_scores.get_mut(user) {
            *best = best.max(*score);
        }
    }

    // strongest partner first, name breaks ties
    let mut similar_users: HashMap<String, Vec<String>> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (user, partners) in ranked.iter_mut() {
        partners.sort_by(|x, y| y.0.total_cmp(&x.0).then_with(|| x.1.cmp(y.1)));
        similar_users.insert(
            user.to_string(),
            partners.iter().map(|(_, other, pair)| format_similar_user(other, pair)).collect(),
        );
        let mut neighbours: Vec<&str> = partners.iter().map(|(_, other, _)| *other).collect();
        neighbours.sort_unstable();
        adjacency.insert(*user, neighbours);
    }
    for user in &ordered {
        similar_users.entry(user.clone()).or_default();
    }

    let groups = match mode {
        ClusterMode::Greedy => greedy_groups(&ordered, &adjacency, co_presence),
        ClusterMode::Connected => {
            let mut uf = UnionFind::new(&ordered);
            let edges: BTreeMap<&str, &Vec<&str>> = adjacency.iter().map(|(k, v)| (*k, v)).collect();
            for (user, neighbours) in edges {
                for n in neighbours {
                    if co_presence.is_some_and(|co| co.overlaps(user, n)) {
                        continue;
                    }
                    uf.union(user, n);
                }
            }
            uf.components()
        }
    };
    debug!("{} users grouped into {} groups ({:?})", ordered.len(), groups.len(), mode);

    ClusteringResult {
        groups,
        alt_scores,
        similar_users,
    }
}

/// Partition users by co-presence alone: each seed, in name order, takes
/// every later unassigned user it never posted alongside. The group count is
/// a rough estimate of distinct people that needs no message content.
pub fn co_presence_groups(users: &[String], co_presence: &CoPresence) -> Vec<Vec<String>> {
    let mut ordered: Vec<&String> = users.iter().collect();
    ordered.sort();
    ordered.dedup();
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    for (i, seed) in ordered.iter().enumerate() {
        if !assigned.insert(seed.as_str()) {
            continue;
        }
        let mut group = vec![seed.to_string()];
        for other in &ordered[i + 1..] {
            if !assigned.contains(other.as_str()) && !co_presence.overlaps(seed, other) {
                assigned.insert(other.as_str());
                group.push(other.to_string());
            }
        }
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32, sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(h, m, sec).unwrap()
    }

    fn co_presence(entries: &[(&str, Vec<NaiveDateTime>)]) -> CoPresence {
        let times: BTreeMap<String, Vec<NaiveDateTime>> =
            entries.iter().map(|(u, t)| (u.to_string(), t.clone())).collect();
        CoPresence::new(&times, 2)
    }

    fn pair(a: &str, b: &str, combined: f64, confidence: f64) -> PairSimilarity {
        let (user_a, user_b) = if a < b { (a, b) } else { (b, a) };
        PairSimilarity {
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
            word_similarity: 0.0,
            pattern_similarity: 0.0,
            temporal_similarity: 0.0,
            behavioral_similarity: 0.0,
            combined_similarity: combined,
            confidence,
            common_words: 0,
            total_compared_words: 0,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assert_partition(users: &[String], groups: &[Vec<String>]) {
        let mut seen: Vec<String> = groups.iter().flatten().cloned().collect();
        seen.sort();
        let mut expected = users.to_vec();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_greedy_is_not_transitive() {
        // a~b and b~c, but a and c are unrelated
        let users = names(&["a", "b", "c"]);
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.5, 1.0), pair("b", "c", 0.5, 1.0), pair("a", "c", 0.1, 1.0)],
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, None);
        assert_eq!(r.groups, vec![names(&["a", "b"]), names(&["c"])]);
        assert_partition(&users, &r.groups);
    }

    #[test]
    fn test_connected_is_transitive() {
        let users = names(&["a", "b", "c", "d"]);
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.5, 1.0), pair("b", "c", 0.5, 1.0)],
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Connected, None);
        assert_eq!(r.groups, vec![names(&["a", "b", "c"]), names(&["d"])]);
        assert_partition(&users, &r.groups);
    }

    #[test]
    fn test_threshold_applies_to_adjusted_score() {
        let users = names(&["a", "b"]);
        // combined 0.8 but confidence 0.25 -> adjusted 0.2
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.8, 0.25)],
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, None);
        assert_eq!(r.groups.len(), 2);
        assert!((r.alt_scores["a"] - 0.2).abs() < 1e-9);
        assert!(r.similar_users["a"].is_empty());
    }

    #[test]
    fn test_similar_user_strings() {
        let users = names(&["alice", "bob", "carol"]);
        let scores = PairScores {
            pairs: vec![pair("alice", "bob", 0.9, 0.7), pair("alice", "carol", 0.6, 1.0)],
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, None);
        assert_eq!(
            r.similar_users["alice"],
            vec![
                "bob (63.0%, confidence: 70.0%)".to_string(),
                "carol (60.0%, confidence: 100.0%)".to_string(),
            ]
        );
        assert_eq!(r.similar_users["bob"], vec!["alice (63.0%, confidence: 70.0%)".to_string()]);
        assert_eq!(r.groups, vec![names(&["alice", "bob", "carol"])]);
    }

    #[test]
    fn test_singletons_and_heuristic_scores() {
        let users = names(&["x", "y"]);
        let mut heuristic = HashMap::new();
        heuristic.insert("y".to_string(), 0.2);
        let scores = PairScores {
            heuristic,
            singletons: names(&["y"]),
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, None);
        assert_eq!(r.groups, vec![names(&["x"]), names(&["y"])]);
        assert_eq!(r.alt_scores["y"], 0.2);
        assert_eq!(r.alt_scores["x"], 0.0);
    }

    #[test]
    fn test_empty_population() {
        let r = cluster_users(&[], &PairScores::default(), 0.3, ClusterMode::Greedy, None);
        assert!(r.groups.is_empty());
        assert!(r.alt_scores.is_empty());
    }

    #[test]
    fn test_singletons_never_join_a_group() {
        let users = names(&["a", "b"]);
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.9, 1.0)],
            singletons: names(&["b"]),
            ..Default::default()
        };
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, None);
        assert_eq!(r.groups, vec![names(&["a"]), names(&["b"])]);
        assert!(r.similar_users["a"].is_empty());
    }

    #[test]
    fn test_co_present_users_are_not_merged_greedily() {
        // b chats alongside a; c never does
        let users = names(&["a", "b", "c"]);
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.9, 1.0), pair("a", "c", 0.9, 1.0), pair("b", "c", 0.9, 1.0)],
            ..Default::default()
        };
        let co = co_presence(&[
            ("a", vec![at(10, 0, 0)]),
            ("b", vec![at(10, 0, 1)]),
            ("c", vec![at(15, 0, 0)]),
        ]);
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Greedy, Some(&co));
        assert_eq!(r.groups, vec![names(&["a", "c"]), names(&["b"])]);
        // scores are still reported
        assert_eq!(r.similar_users["b"].len(), 2);
    }

    #[test]
    fn test_co_presence_cuts_connected_edges() {
        let users = names(&["a", "b", "c"]);
        let scores = PairScores {
            pairs: vec![pair("a", "b", 0.9, 1.0), pair("b", "c", 0.9, 1.0)],
            ..Default::default()
        };
        let co = co_presence(&[("a", vec![at(9, 0, 0)]), ("b", vec![at(9, 0, 2)]), ("c", vec![at(20, 0, 0)])]);
        let r = cluster_users(&users, &scores, 0.3, ClusterMode::Connected, Some(&co));
        assert_eq!(r.groups, vec![names(&["a"]), names(&["b", "c"])]);
    }

    #[test]
    fn test_co_presence_groups() {
        let users = names(&["d", "a", "b", "c"]);
        let co = co_presence(&[
            ("a", vec![at(10, 0, 0), at(11, 0, 0)]),
            ("b", vec![at(10, 0, 2)]),
            ("c", vec![at(12, 0, 0)]),
            ("d", vec![at(10, 0, 1)]),
        ]);
        // a takes c; b and d overlap each other
        let groups = co_presence_groups(&users, &co);
        assert_eq!(groups, vec![names(&["a", "c"]), names(&["b"]), names(&["d"])]);
    }
}
