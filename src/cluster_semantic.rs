//! Semantic near-duplicate clustering.
//!
//! Attaches differently worded but materially identical records to existing
//! clusters. Each canonical record's embedding is compared against a
//! bounded pool of unclustered candidates using the combined cosine +
//! Jaccard test; accepted candidates join the canonical's cluster with the
//! computed cosine recorded as their similarity.

use std::collections::HashSet;

use anyhow::{anyhow, Result};

use crate::config::UnifyConfig;
use crate::models::{KnowledgeRecord, MatchMethod};
use crate::similarity::{cosine_similarity, jaccard_similarity, token_set, NearDuplicateRule};
use crate::store::{KnowledgeStore, NewMembership};

/// Expand existing clusters with near-duplicate members.
///
/// Iterates canonical records carrying an embedding. Per canonical, a
/// bounded candidate pool is fetched and scored; at most
/// `unify.max_semantic_per_cluster` candidates are attached per pass.
/// Candidates attached earlier in the same run are excluded from later
/// pools. A failed canonical is warned about and skipped. Returns the
/// count of clusters that gained members.
pub async fn cluster_semantic_duplicates(
    store: &dyn KnowledgeStore,
    cfg: &UnifyConfig,
) -> Result<u64> {
    let canonicals = store.fetch_canonicals_with_embedding().await?;
    let mut expanded = 0u64;
    let mut claimed: HashSet<String> = HashSet::new();

    for canonical in &canonicals {
        match expand_cluster(store, cfg, canonical, &mut claimed).await {
            Ok(attached) if attached > 0 => expanded += 1,
            Ok(_) => {}
            Err(e) => {
                eprintln!(
                    "Warning: semantic pass failed for canonical {}: {}",
                    canonical.id, e
                );
            }
        }
    }

    Ok(expanded)
}

async fn expand_cluster(
    store: &dyn KnowledgeStore,
    cfg: &UnifyConfig,
    canonical: &KnowledgeRecord,
    claimed: &mut HashSet<String>,
) -> Result<u64> {
    let cluster_id = canonical
        .cluster_id
        .as_deref()
        .ok_or_else(|| anyhow!("canonical record {} has no cluster", canonical.id))?;
    let embedding = canonical
        .embedding
        .as_deref()
        .ok_or_else(|| anyhow!("canonical record {} has no embedding", canonical.id))?;

    let rule = NearDuplicateRule {
        cosine_accept: cfg.cosine_accept,
        cosine_combined: cfg.cosine_combined,
        jaccard_combined: cfg.jaccard_combined,
    };

    let canonical_text = canonical.normalized_content.as_deref().unwrap_or("");
    let canonical_tokens = token_set(canonical_text, cfg.min_token_len);

    let candidates = store
        .fetch_unclustered_with_embedding(cfg.candidate_pool)
        .await?;

    let mut accepted: Vec<NewMembership> = Vec::new();
    for candidate in &candidates {
        if accepted.len() >= cfg.max_semantic_per_cluster {
            break;
        }
        if claimed.contains(&candidate.id) {
            continue;
        }
        let candidate_embedding = match candidate.embedding.as_deref() {
            Some(v) => v,
            None => continue,
        };

        let cosine = cosine_similarity(embedding, candidate_embedding) as f64;
        let candidate_text = candidate.normalized_content.as_deref().unwrap_or("");
        let candidate_tokens = token_set(candidate_text, cfg.min_token_len);
        let jaccard = jaccard_similarity(&canonical_tokens, &candidate_tokens);

        if rule.is_near_duplicate(cosine, jaccard) {
            accepted.push(NewMembership {
                record_id: candidate.id.clone(),
                method: MatchMethod::Semantic,
                similarity: cosine,
                source: candidate.source,
                canonical: false,
            });
        }
    }

    if accepted.is_empty() {
        return Ok(0);
    }

    let attached = store.attach_semantic_members(cluster_id, &accepted).await?;
    if attached > 0 {
        store.refresh_cluster_rollup(cluster_id).await?;
    }
    for member in &accepted {
        claimed.insert(member.record_id.clone());
    }

    Ok(attached)
}
