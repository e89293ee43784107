//! Best-identity decision over the gallery.
//!
//! Every embedding (query and stored) is L2-normalized before comparison,
//! so the dot product of two unit vectors equals their cosine similarity;
//! scores are clamped to [0, 1] against floating-point overshoot. Strict
//! greater-than comparisons keep the first-encountered maximum on ties,
//! which makes gallery iteration order an observable part of the contract.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::FaceRecord;

/// Aggregation rule turning per-record similarities into one decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Best score over every individual record.
    #[default]
    Closest,
    /// Per-identity maximum first, then the best identity.
    Voting,
    /// One normalized mean embedding per identity, O(identities) comparisons.
    Centroid,
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closest" => Ok(Self::Closest),
            "voting" => Ok(Self::Voting),
            "centroid" => Ok(Self::Centroid),
            other => Err(format!(
                "unknown match strategy '{other}' (expected closest, voting, or centroid)"
            )),
        }
    }
}

/// Outcome of matching one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: Option<String>,
    /// Best similarity seen, reported even when below threshold so callers
    /// can show "closest was X at 0.54" diagnostics.
    pub score: f32,
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Dot product of two unit vectors, clamped to [0, 1].
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot.clamp(0.0, 1.0)
}

/// Decide the best-matching identity for one query embedding.
///
/// Returns `(Some(identity), score)` when the winning score reaches
/// `threshold` (≥, boundary accepted), `(None, best score)` otherwise.
/// An empty gallery is always `(None, 0.0)` without invoking a strategy.
pub fn find_best(
    query: &[f32],
    records: &[FaceRecord],
    strategy: MatchStrategy,
    threshold: f32,
) -> MatchResult {
    if records.is_empty() {
        return MatchResult {
            identity: None,
            score: 0.0,
        };
    }

    let query = l2_normalize(query);
    let (identity, score) = match strategy {
        MatchStrategy::Closest => closest(&query, records),
        MatchStrategy::Voting => voting(&query, records),
        MatchStrategy::Centroid => centroid(&query, records),
    };

    if score >= threshold {
        MatchResult { identity, score }
    } else {
        MatchResult {
            identity: None,
            score,
        }
    }
}

fn closest(query: &[f32], records: &[FaceRecord]) -> (Option<String>, f32) {
    let mut best: (Option<&str>, f32) = (None, 0.0);
    for record in records {
        let sim = similarity(query, &l2_normalize(&record.embedding));
        if sim > best.1 {
            best = (Some(record.identity.as_str()), sim);
        }
    }
    (best.0.map(str::to_string), best.1)
}

fn voting(query: &[f32], records: &[FaceRecord]) -> (Option<String>, f32) {
    // Per-identity maxima in first-seen order. Galleries are small, so a
    // linear scan keeps insertion order without an ordered-map dependency.
    let mut maxima: Vec<(&str, f32)> = Vec::new();
    for record in records {
        let sim = similarity(query, &l2_normalize(&record.embedding));
        match maxima.iter_mut().find(|(id, _)| *id == record.identity) {
            Some((_, best)) => *best = best.max(sim),
            None => maxima.push((record.identity.as_str(), sim)),
        }
    }

    let mut best: (Option<&str>, f32) = (None, 0.0);
    for (id, sim) in maxima {
        if sim > best.1 {
            best = (Some(id), sim);
        }
    }
    (best.0.map(str::to_string), best.1)
}

fn centroid(query: &[f32], records: &[FaceRecord]) -> (Option<String>, f32) {
    // Sum raw embeddings per identity; the mean is normalized exactly once.
    // Averaging individually-normalized vectors would weight each photo's
    // direction equally regardless of magnitude, which is not the contract.
    let mut sums: Vec<(&str, Vec<f32>, usize)> = Vec::new();
    for record in records {
        match sums.iter_mut().find(|(id, _, _)| *id == record.identity) {
            Some((_, sum, n)) => {
                for (s, x) in sum.iter_mut().zip(&record.embedding) {
                    *s += x;
                }
                *n += 1;
            }
            None => sums.push((record.identity.as_str(), record.embedding.clone(), 1)),
        }
    }

    let mut best: (Option<&str>, f32) = (None, 0.0);
    for (id, sum, n) in &sums {
        let mean: Vec<f32> = sum.iter().map(|s| s / *n as f32).collect();
        let sim = similarity(query, &l2_normalize(&mean));
        if sim > best.1 {
            best = (Some(*id), sim);
        }
    }
    (best.0.map(str::to_string), best.1)
}
