//! Blended relevance scoring of prefiltered candidates.

use crate::storage::Candidate;
use serde::Serialize;
use std::collections::HashMap;

/// One retrieved chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub chunk_id: usize,
    pub chunk_text: String,
    pub score: f32,
    /// Document the chunk was cut from
    pub source: String,
}

/// Cosine similarity of two vectors.
///
/// `None` when the vectors are empty or their dimensions differ; `Some(0.0)`
/// when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scorer {
    semantic_weight: f32,
    lexical_weight: f32,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(0.7, 0.3)
    }
}

impl Scorer {
    pub fn new(semantic_weight: f32, lexical_weight: f32) -> Self {
        Self {
            semantic_weight,
            lexical_weight,
        }
    }

    /// Score of one candidate.
    ///
    /// With a semantic signal the score is the weighted blend; without one the
    /// lexical score counts at full weight.
    pub fn blend(&self, semantic: Option<f32>, lexical: f32) -> f32 {
        match semantic {
            Some(semantic) => self.semantic_weight * semantic + self.lexical_weight * lexical,
            None => lexical,
        }
    }

    /// Rank `candidates` and keep at most `top_k` with a positive score.
    ///
    /// Ties are broken by chunk order.
    pub fn score(
        &self,
        query_vector: Option<&[f32]>,
        candidates: Vec<Candidate>,
        vectors: &HashMap<usize, Vec<f32>>,
        top_k: usize,
    ) -> Vec<ScoredResult> {
        let mut results: Vec<ScoredResult> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let semantic = query_vector.and_then(|query| {
                    vectors
                        .get(&candidate.chunk.chunk_id)
                        .and_then(|vector| cosine_similarity(query, vector))
                });
                let score = self.blend(semantic, candidate.lexical_score);
                (score > 0.0).then(|| ScoredResult {
                    chunk_id: candidate.chunk.chunk_id,
                    chunk_text: candidate.chunk.text,
                    score,
                    source: candidate.chunk.source,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);
        results
    }
}
