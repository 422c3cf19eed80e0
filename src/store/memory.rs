//! In-memory [`KnowledgeStore`] implementation for unit tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Fetches are sorted by `(created_at, id)` so test runs are deterministic.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    Cluster, ClusterMembership, ClusterMethod, KnowledgeRecord, MatchMethod, OverlapFlags,
};

use super::{AggregateStats, FingerprintGroup, KnowledgeStore, NewCluster, NewMembership};

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, KnowledgeRecord>>,
    clusters: RwLock<HashMap<String, Cluster>>,
    memberships: RwLock<Vec<ClusterMembership>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records sorted by `(created_at, id)`; handy in tests.
    pub fn sorted_all(&self) -> Vec<KnowledgeRecord> {
        self.sorted_records(|_| true)
    }

    fn sorted_records<F>(&self, predicate: F) -> Vec<KnowledgeRecord>
    where
        F: Fn(&KnowledgeRecord) -> bool,
    {
        let records = self.records.read().unwrap();
        let mut out: Vec<KnowledgeRecord> =
            records.values().filter(|r| predicate(r)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn insert_record(&self, record: &KnowledgeRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn fetch_unfingerprinted(&self, limit: usize) -> Result<Vec<KnowledgeRecord>> {
        let mut out = self.sorted_records(|r| r.fingerprint.is_none());
        out.truncate(limit);
        Ok(out)
    }

    async fn persist_normalization(
        &self,
        record_id: &str,
        normalized: &str,
        fingerprint: &str,
    ) -> Result<()> {
        let mut records = self.records.write().unwrap();
        match records.get_mut(record_id) {
            Some(record) => {
                record.normalized_content = Some(normalized.to_string());
                record.fingerprint = Some(fingerprint.to_string());
                Ok(())
            }
            None => bail!("record {} not found", record_id),
        }
    }

    async fn fetch_duplicate_groups(&self) -> Result<Vec<FingerprintGroup>> {
        let fingerprinted =
            self.sorted_records(|r| r.fingerprint.is_some() && r.cluster_id.is_none());

        let mut by_fp: HashMap<String, Vec<KnowledgeRecord>> = HashMap::new();
        for record in fingerprinted {
            let fp = record.fingerprint.clone().unwrap();
            by_fp.entry(fp).or_default().push(record);
        }

        let mut groups: Vec<FingerprintGroup> = by_fp
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|(fingerprint, members)| FingerprintGroup {
                fingerprint,
                members,
            })
            .collect();
        groups.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(groups)
    }

    async fn create_cluster(&self, cluster: &NewCluster, members: &[NewMembership]) -> Result<()> {
        // Validate the whole group before mutating anything, mirroring the
        // transactional SQLite path.
        {
            let records = self.records.read().unwrap();
            for member in members {
                match records.get(&member.record_id) {
                    Some(r) if r.cluster_id.is_none() => {}
                    Some(_) => bail!("record {} is already clustered", member.record_id),
                    None => bail!("record {} not found", member.record_id),
                }
            }
        }

        let now = 0i64;
        self.clusters.write().unwrap().insert(
            cluster.id.clone(),
            Cluster {
                id: cluster.id.clone(),
                canonical_record_id: cluster.canonical_record_id.clone(),
                member_count: cluster.member_count,
                overlap: cluster.overlap,
                method: cluster.method,
                avg_semantic_similarity: cluster.avg_semantic_similarity,
                created_at: now,
                updated_at: now,
            },
        );

        let mut records = self.records.write().unwrap();
        let mut memberships = self.memberships.write().unwrap();
        for member in members {
            let record = records.get_mut(&member.record_id).unwrap();
            record.cluster_id = Some(cluster.id.clone());
            record.canonical = member.canonical;
            memberships.push(ClusterMembership {
                cluster_id: cluster.id.clone(),
                record_id: member.record_id.clone(),
                method: member.method,
                similarity: member.similarity,
                source: member.source,
                activity_tags: member
                    .source
                    .activity_tags()
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
                created_at: now,
            });
        }

        Ok(())
    }

    async fn fetch_canonicals_with_embedding(&self) -> Result<Vec<KnowledgeRecord>> {
        Ok(self.sorted_records(|r| r.canonical && r.embedding.is_some()))
    }

    async fn fetch_unclustered_with_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<KnowledgeRecord>> {
        let mut out = self.sorted_records(|r| {
            r.cluster_id.is_none() && r.embedding.is_some() && r.fingerprint.is_some()
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn attach_semantic_members(
        &self,
        cluster_id: &str,
        members: &[NewMembership],
    ) -> Result<u64> {
        let mut records = self.records.write().unwrap();
        let mut memberships = self.memberships.write().unwrap();
        let mut attached = 0u64;

        for member in members {
            let record = match records.get_mut(&member.record_id) {
                Some(r) if r.cluster_id.is_none() => r,
                _ => continue,
            };
            record.cluster_id = Some(cluster_id.to_string());
            record.canonical = false;
            memberships.push(ClusterMembership {
                cluster_id: cluster_id.to_string(),
                record_id: member.record_id.clone(),
                method: member.method,
                similarity: member.similarity,
                source: member.source,
                activity_tags: member
                    .source
                    .activity_tags()
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
                created_at: 0,
            });
            attached += 1;
        }

        Ok(attached)
    }

    async fn refresh_cluster_rollup(&self, cluster_id: &str) -> Result<()> {
        let members: Vec<ClusterMembership> = {
            let memberships = self.memberships.read().unwrap();
            memberships
                .iter()
                .filter(|m| m.cluster_id == cluster_id)
                .cloned()
                .collect()
        };
        if members.is_empty() {
            bail!("cluster {} has no members", cluster_id);
        }

        let overlap = OverlapFlags::union_of(members.iter().map(|m| m.source));
        let semantic: Vec<f64> = members
            .iter()
            .filter(|m| m.method == MatchMethod::Semantic)
            .map(|m| m.similarity)
            .collect();

        let mut clusters = self.clusters.write().unwrap();
        let cluster = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| anyhow::anyhow!("cluster {} not found", cluster_id))?;
        cluster.member_count = members.len() as i64;
        cluster.overlap = overlap;
        cluster.avg_semantic_similarity = if semantic.is_empty() {
            None
        } else {
            Some(semantic.iter().sum::<f64>() / semantic.len() as f64)
        };
        cluster.method = if semantic.is_empty() {
            ClusterMethod::Exact
        } else {
            ClusterMethod::ExactSemantic
        };

        Ok(())
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        Ok(self.clusters.read().unwrap().get(cluster_id).cloned())
    }

    async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMembership>> {
        let memberships = self.memberships.read().unwrap();
        let mut out: Vec<ClusterMembership> = memberships
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        Ok(out)
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let records = self.records.read().unwrap();
        let total_records = records.len() as i64;
        let canonical_records = records.values().filter(|r| r.canonical).count() as i64;
        let clustered_records = records.values().filter(|r| r.cluster_id.is_some()).count() as i64;
        let total_clusters = self.clusters.read().unwrap().len() as i64;

        let duplicates = clustered_records - canonical_records;
        let dedup_rate = if total_records > 0 {
            duplicates as f64 / total_records as f64
        } else {
            0.0
        };

        Ok(AggregateStats {
            total_records,
            canonical_records,
            clustered_records,
            total_clusters,
            dedup_rate,
        })
    }
}
