//! Exact-duplicate clustering.
//!
//! Merges records with byte-identical fingerprints into clusters. One
//! canonical member is selected per group by a deterministic tie-break:
//! longest raw content, then earliest creation timestamp, then lowest id.

use anyhow::Result;
use uuid::Uuid;

use crate::models::{KnowledgeRecord, MatchMethod, OverlapFlags};
use crate::store::{KnowledgeStore, NewCluster, NewMembership};

/// Cluster every fingerprint shared by two or more unclustered records.
///
/// Each group becomes one cluster written in a single transaction. A
/// failed group is warned about and skipped; the remaining groups are
/// unaffected. Returns the count of clusters created.
pub async fn cluster_exact_duplicates(store: &dyn KnowledgeStore) -> Result<u64> {
    let groups = store.fetch_duplicate_groups().await?;
    let mut created = 0u64;

    for group in &groups {
        let cluster = build_cluster(&group.members);
        let members = build_memberships(&group.members, &cluster.canonical_record_id);

        match store.create_cluster(&cluster, &members).await {
            Ok(()) => created += 1,
            Err(e) => {
                eprintln!(
                    "Warning: skipping duplicate group {}: {}",
                    group.fingerprint, e
                );
            }
        }
    }

    Ok(created)
}

/// Select the canonical member of a duplicate group.
///
/// Longest raw content wins; ties fall to the earliest creation timestamp,
/// then to the lowest id so the ordering is total and independent of
/// storage order.
pub fn select_canonical(members: &[KnowledgeRecord]) -> &KnowledgeRecord {
    members
        .iter()
        .min_by(|a, b| {
            b.content
                .len()
                .cmp(&a.content.len())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        })
        .expect("duplicate group is never empty")
}

fn build_cluster(members: &[KnowledgeRecord]) -> NewCluster {
    let canonical = select_canonical(members);
    NewCluster {
        id: Uuid::new_v4().to_string(),
        canonical_record_id: canonical.id.clone(),
        member_count: members.len() as i64,
        overlap: OverlapFlags::union_of(members.iter().map(|m| m.source)),
        method: crate::models::ClusterMethod::Exact,
        avg_semantic_similarity: None,
    }
}

fn build_memberships(members: &[KnowledgeRecord], canonical_id: &str) -> Vec<NewMembership> {
    members
        .iter()
        .map(|m| NewMembership {
            record_id: m.id.clone(),
            method: MatchMethod::Exact,
            similarity: 1.0,
            source: m.source,
            canonical: m.id == canonical_id,
        })
        .collect()
}
