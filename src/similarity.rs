//! Similarity measures and vector utilities for near-duplicate detection.
//!
//! Provides the two measures the semantic stage combines:
//! - [`cosine_similarity`] — directional closeness of two embedding vectors
//! - [`jaccard_similarity`] — shared-token ratio of two normalized texts
//!
//! plus the [`NearDuplicateRule`] two-tier acceptance test and the BLOB
//! codec for storing embeddings in SQLite:
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//!
//! # Why two measures
//!
//! A pure-cosine threshold falsely accepts topically-similar-but-distinct
//! text; a pure-Jaccard threshold misses paraphrases. The combined rule
//! accepts on very high cosine alone, or on moderately high cosine backed
//! by high lexical overlap.

use std::collections::HashSet;

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Build the token set of a normalized text.
///
/// Tokens shorter than `min_token_len` are excluded to reduce noise from
/// articles and unit fragments.
pub fn token_set(normalized: &str, min_token_len: usize) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() >= min_token_len)
        .collect()
}

/// Compute Jaccard similarity between two token sets.
///
/// Returns `|a ∩ b| / |a ∪ b|` in `[0.0, 1.0]`. The union of two empty
/// sets is defined as similarity `0.0`.
pub fn jaccard_similarity(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

// ============ Near-duplicate classification ============

/// Two-tier acceptance rule for near-duplicate candidates.
#[derive(Debug, Clone, Copy)]
pub struct NearDuplicateRule {
    /// Cosine threshold that accepts on its own.
    pub cosine_accept: f64,
    /// Lower cosine threshold that accepts only together with
    /// `jaccard_combined`.
    pub cosine_combined: f64,
    /// Jaccard threshold for the combined tier.
    pub jaccard_combined: f64,
}

impl NearDuplicateRule {
    /// Classify a candidate pair: accept if cosine alone meets the high
    /// threshold, or if cosine and Jaccard simultaneously meet the
    /// combined-tier thresholds.
    pub fn is_near_duplicate(&self, cosine: f64, jaccard: f64) -> bool {
        cosine >= self.cosine_accept
            || (cosine >= self.cosine_combined && jaccard >= self.jaccard_combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> NearDuplicateRule {
        NearDuplicateRule {
            cosine_accept: 0.93,
            cosine_combined: 0.90,
            jaccard_combined: 0.80,
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty() {
        let sim = cosine_similarity(&[], &[]);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        let sim = cosine_similarity(&a, &b);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_token_set_excludes_short_tokens() {
        let tokens = token_set("test rcd at 30ma trip threshold", 3);
        assert!(tokens.contains("test"));
        assert!(tokens.contains("30ma"));
        assert!(!tokens.contains("at"));
    }

    #[test]
    fn test_jaccard_identical_sets() {
        let a = token_set("check earth bonding resistance", 3);
        let b = token_set("check earth bonding resistance", 3);
        assert!((jaccard_similarity(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_jaccard_disjoint_sets() {
        let a = token_set("check earth bonding", 3);
        let b = token_set("install consumer unit", 3);
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_jaccard_empty_union_is_zero() {
        let a = HashSet::new();
        let b = HashSet::new();
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {check, earth, bonding} vs {check, earth, continuity}:
        // intersection 2, union 4
        let a = token_set("check earth bonding", 3);
        let b = token_set("check earth continuity", 3);
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_jaccard_in_unit_interval() {
        let a = token_set("one two three four alpha beta", 3);
        let b = token_set("three four gamma delta epsilon", 3);
        let j = jaccard_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&j));
    }

    #[test]
    fn test_near_duplicate_high_cosine_branch() {
        assert!(rule().is_near_duplicate(0.95, 0.10));
    }

    #[test]
    fn test_near_duplicate_combined_branch() {
        assert!(rule().is_near_duplicate(0.91, 0.85));
    }

    #[test]
    fn test_near_duplicate_rejected() {
        assert!(!rule().is_near_duplicate(0.91, 0.50));
        assert!(!rule().is_near_duplicate(0.80, 0.95));
    }

    #[test]
    fn test_near_duplicate_boundaries_inclusive() {
        assert!(rule().is_near_duplicate(0.93, 0.0));
        assert!(rule().is_near_duplicate(0.90, 0.80));
        assert!(!rule().is_near_duplicate(0.9299, 0.7999));
    }
}
