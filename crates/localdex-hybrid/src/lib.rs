//! Reciprocal Rank Fusion of a vector ranking and a lexical ranking.
//!
//! Only rank positions are used. Each list contributes `w / (offset + rank)`
//! (1-based rank) to every chunk it contains, with `w = alpha` for the vector
//! list and `w = 1 - alpha` for the lexical one. Fused scores are divided by
//! `1 / (offset + 1)`, so a chunk ranked first in both lists scores 1.0.
//! [`interleave`] merges same-kind rankings by position alone.
use std::collections::{HashMap, HashSet};

use localdex_core::types::{SearchHit, SourceKind};

pub const DEFAULT_RRF_OFFSET: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    /// Trust given to the vector ranking, in `[0, 1]`.
    pub alpha: f32,
    pub offset: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self { alpha: 0.5, offset: DEFAULT_RRF_OFFSET }
    }
}

struct Fused {
    hit: SearchHit,
    score: f32,
    best_rank: usize,
    best_contribution: f32,
}

/// Merges the two rankings into at most `k` hits ordered by fused score.
/// A chunk present in both lists yields one entry. Chunks whose only list
/// carries zero weight are dropped.
pub fn fuse(vector: &[SearchHit], lexical: &[SearchHit], params: FusionParams, k: usize) -> Vec<SearchHit> {
    let alpha = params.alpha.clamp(0.0, 1.0);
    let offset = params.offset.max(f32::EPSILON);
    let mut by_id: HashMap<&str, Fused> = HashMap::new();

    for (list, weight, source) in [(vector, alpha, SourceKind::Vector), (lexical, 1.0 - alpha, SourceKind::Text)] {
        for (i, hit) in list.iter().enumerate() {
            let rank = i + 1;
            let contribution = weight / (offset + rank as f32);
            let entry = by_id.entry(hit.chunk.id.as_str()).or_insert_with(|| Fused {
                hit: SearchHit { chunk: hit.chunk.clone(), score: 0.0, source },
                score: 0.0,
                best_rank: rank,
                best_contribution: contribution,
            });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
            if contribution > entry.best_contribution {
                entry.best_contribution = contribution;
                entry.hit.source = source;
            }
        }
    }

    let top = 1.0 / (offset + 1.0);
    let mut fused: Vec<Fused> = by_id.into_values().filter(|f| f.score > 0.0).collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.hit.chunk.id.cmp(&b.hit.chunk.id))
    });
    fused
        .into_iter()
        .take(k)
        .map(|f| SearchHit { score: (f.score / top).clamp(0.0, 1.0), ..f.hit })
        .collect()
}

/// Merges rankings whose scores are not comparable with each other, such as
/// cosine similarities from two embedding models. Hits are taken rank by
/// rank across the lists; within one rank position the higher score leads,
/// then the lower chunk id. Scores are kept as reported and a chunk seen
/// twice keeps its best position.
pub fn interleave(lists: &[Vec<SearchHit>], k: usize) -> Vec<SearchHit> {
    let mut ranked: Vec<(usize, &SearchHit)> =
        lists.iter().flat_map(|list| list.iter().enumerate()).collect();
    ranked.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb).then(b.score.total_cmp(&a.score)).then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|(_, hit)| seen.insert(hit.chunk.id.clone()))
        .take(k)
        .map(|(_, hit)| hit.clone())
        .collect()
}

/// How many candidates to request from each store for a final `k`.
pub fn overfetch(k: usize, multiplier: usize) -> usize {
    k.saturating_mul(multiplier.max(1)).max(k)
}
