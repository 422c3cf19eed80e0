//! Unification pipeline orchestration.
//!
//! Runs the stages in order — normalize → exact clustering → semantic
//! clustering → stats — threading each stage's count into the final
//! [`UnifyStats`] payload. Stages can be skipped for partial re-runs;
//! idempotence makes repeated partial invocations converge without
//! redoing completed work.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cluster_exact;
use crate::cluster_semantic;
use crate::config::UnifyConfig;
use crate::normalize;
use crate::stats;
use crate::store::KnowledgeStore;

/// Trigger request for one pipeline run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnifyRequest {
    /// Free-form label for the invocation (e.g. "manual", "scheduled");
    /// not interpreted by the pipeline.
    pub mode: String,
    pub skip_normalization: bool,
    /// Gates both clustering stages together.
    pub skip_clustering: bool,
}

impl Default for UnifyRequest {
    fn default() -> Self {
        Self {
            mode: "manual".to_string(),
            skip_normalization: false,
            skip_clustering: false,
        }
    }
}

/// Stage counts plus post-run aggregates, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStats {
    pub normalized: u64,
    pub exact_clusters: u64,
    pub semantic_clusters: u64,
    pub total_records: i64,
    pub canonical_records: i64,
    pub clustered_records: i64,
    pub total_clusters: i64,
    pub dedup_rate: f64,
}

/// Run the unification pipeline.
///
/// Stage-internal failures (one record, one group, one canonical) are
/// recovered inside the stage; an error returned here means the job itself
/// could not proceed (e.g. storage unreachable). No partial-state cleanup
/// is attempted — the next invocation is safe by idempotence.
pub async fn run_unify(
    store: &dyn KnowledgeStore,
    cfg: &UnifyConfig,
    request: &UnifyRequest,
) -> Result<UnifyStats> {
    let normalized = if request.skip_normalization {
        0
    } else {
        normalize::normalize_batch(store, cfg).await?
    };

    let (exact_clusters, semantic_clusters) = if request.skip_clustering {
        (0, 0)
    } else {
        let exact = cluster_exact::cluster_exact_duplicates(store).await?;
        let semantic = cluster_semantic::cluster_semantic_duplicates(store, cfg).await?;
        (exact, semantic)
    };

    let aggregate = stats::aggregate(store).await;

    Ok(UnifyStats {
        normalized,
        exact_clusters,
        semantic_clusters,
        total_records: aggregate.total_records,
        canonical_records: aggregate.canonical_records,
        clustered_records: aggregate.clustered_records,
        total_clusters: aggregate.total_clusters,
        dedup_rate: aggregate.dedup_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnowledgeRecord, SourceCollection};
    use crate::store::memory::InMemoryStore;

    fn raw(id: &str, content: &str, embedding: Option<Vec<f32>>, ts: i64) -> KnowledgeRecord {
        KnowledgeRecord {
            id: id.to_string(),
            source: SourceCollection::Installation,
            content: content.to_string(),
            normalized_content: None,
            fingerprint: None,
            embedding,
            cluster_id: None,
            canonical: false,
            created_at: ts,
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_record(&raw("r1", "Label every circuit at the board.", Some(vec![1.0, 0.0]), 1))
            .await
            .unwrap();
        store
            .insert_record(&raw("r2", "label every circuit at the board!", None, 2))
            .await
            .unwrap();
        store
            .insert_record(&raw("r3", "Record test results on the schedule", None, 3))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_full_run_then_idempotent_rerun() {
        let store = seeded().await;
        let cfg = UnifyConfig::default();

        let first = run_unify(&store, &cfg, &UnifyRequest::default()).await.unwrap();
        assert_eq!(first.normalized, 3);
        assert_eq!(first.exact_clusters, 1);
        assert_eq!(first.semantic_clusters, 0);
        assert_eq!(first.total_records, 3);
        assert_eq!(first.clustered_records, 2);
        assert_eq!(first.canonical_records, 1);
        assert!((first.dedup_rate - 1.0 / 3.0).abs() < 1e-9);

        let second = run_unify(&store, &cfg, &UnifyRequest::default()).await.unwrap();
        assert_eq!(second.normalized, 0);
        assert_eq!(second.exact_clusters, 0);
        assert_eq!(second.semantic_clusters, 0);
        assert_eq!(second.total_records, first.total_records);
        assert_eq!(second.total_clusters, first.total_clusters);
        assert_eq!(second.clustered_records, first.clustered_records);
    }

    #[tokio::test]
    async fn test_skip_flags_gate_stages() {
        let store = seeded().await;
        let cfg = UnifyConfig::default();

        let skip_all = UnifyRequest {
            skip_normalization: true,
            skip_clustering: true,
            ..UnifyRequest::default()
        };
        let out = run_unify(&store, &cfg, &skip_all).await.unwrap();
        assert_eq!(out.normalized, 0);
        assert_eq!(out.exact_clusters, 0);
        assert_eq!(out.total_clusters, 0);

        // Clustering without normalization finds no fingerprints to group.
        let skip_norm = UnifyRequest {
            skip_normalization: true,
            ..UnifyRequest::default()
        };
        let out = run_unify(&store, &cfg, &skip_norm).await.unwrap();
        assert_eq!(out.exact_clusters, 0);

        // Normalization alone, then clustering alone, converges to the
        // same end state as a full run.
        let norm_only = UnifyRequest {
            skip_clustering: true,
            ..UnifyRequest::default()
        };
        let out = run_unify(&store, &cfg, &norm_only).await.unwrap();
        assert_eq!(out.normalized, 3);

        let cluster_only = UnifyRequest {
            skip_normalization: true,
            ..UnifyRequest::default()
        };
        let out = run_unify(&store, &cfg, &cluster_only).await.unwrap();
        assert_eq!(out.exact_clusters, 1);
        assert_eq!(out.clustered_records, 2);
    }

    #[test]
    fn test_request_parses_camel_case_json() {
        let req: UnifyRequest = serde_json::from_str(
            r#"{"mode":"scheduled","skipNormalization":true,"skipClustering":false}"#,
        )
        .unwrap();
        assert_eq!(req.mode, "scheduled");
        assert!(req.skip_normalization);
        assert!(!req.skip_clustering);

        let req: UnifyRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.mode, "manual");
        assert!(!req.skip_normalization);
    }
}
