//! Storage abstraction for the unification pipeline.
//!
//! The [`KnowledgeStore`] trait defines all storage operations the pipeline
//! stages need, enabling pluggable backends (SQLite in production, in-memory
//! for unit tests) and keeping the clustering logic decoupled from any
//! particular storage technology.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    Cluster, ClusterMembership, ClusterMethod, KnowledgeRecord, MatchMethod, OverlapFlags,
    SourceCollection,
};

/// Records sharing one fingerprint, as returned by
/// [`KnowledgeStore::fetch_duplicate_groups`].
#[derive(Debug, Clone)]
pub struct FingerprintGroup {
    pub fingerprint: String,
    pub members: Vec<KnowledgeRecord>,
}

/// Write payload for a newly discovered cluster.
#[derive(Debug, Clone)]
pub struct NewCluster {
    pub id: String,
    pub canonical_record_id: String,
    pub member_count: i64,
    pub overlap: OverlapFlags,
    pub method: ClusterMethod,
    pub avg_semantic_similarity: Option<f64>,
}

/// Write payload for one member joining a cluster.
#[derive(Debug, Clone)]
pub struct NewMembership {
    pub record_id: String,
    pub method: MatchMethod,
    pub similarity: f64,
    pub source: SourceCollection,
    pub canonical: bool,
}

/// Aggregate counts reported after a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub total_records: i64,
    pub canonical_records: i64,
    pub clustered_records: i64,
    pub total_clusters: i64,
    /// Proportion of records absorbed into clusters as non-canonical
    /// duplicates, in [0, 1].
    pub dedup_rate: f64,
}

/// Abstract storage backend for the unification pipeline.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_record`](KnowledgeStore::insert_record) | Upsert a record (bulk load) |
/// | [`fetch_unfingerprinted`](KnowledgeStore::fetch_unfingerprinted) | Records lacking a fingerprint, bounded |
/// | [`persist_normalization`](KnowledgeStore::persist_normalization) | Write normalized content + fingerprint atomically |
/// | [`fetch_duplicate_groups`](KnowledgeStore::fetch_duplicate_groups) | Unclustered records grouped by shared fingerprint |
/// | [`create_cluster`](KnowledgeStore::create_cluster) | Cluster + memberships + record updates, one transaction |
/// | [`fetch_canonicals_with_embedding`](KnowledgeStore::fetch_canonicals_with_embedding) | Canonical records carrying an embedding |
/// | [`fetch_unclustered_with_embedding`](KnowledgeStore::fetch_unclustered_with_embedding) | Bounded candidate pool for the semantic stage |
/// | [`attach_semantic_members`](KnowledgeStore::attach_semantic_members) | Guarded attachment of near-duplicates |
/// | [`refresh_cluster_rollup`](KnowledgeStore::refresh_cluster_rollup) | Recompute member count, overlap flags, avg similarity |
/// | [`get_cluster`](KnowledgeStore::get_cluster) / [`get_cluster_members`](KnowledgeStore::get_cluster_members) | Cluster reads |
/// | [`aggregate_stats`](KnowledgeStore::aggregate_stats) | Post-run aggregate counts |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace a record by id.
    async fn insert_record(&self, record: &KnowledgeRecord) -> Result<()>;

    /// Fetch up to `limit` records that have no fingerprint yet.
    async fn fetch_unfingerprinted(&self, limit: usize) -> Result<Vec<KnowledgeRecord>>;

    /// Persist normalized content and fingerprint for one record.
    ///
    /// Both fields are written in a single update: a record either gets
    /// both or neither.
    async fn persist_normalization(
        &self,
        record_id: &str,
        normalized: &str,
        fingerprint: &str,
    ) -> Result<()>;

    /// Fetch groups of two or more unclustered records sharing a
    /// fingerprint. Records already referencing a cluster are excluded,
    /// which is what makes exact clustering re-runnable.
    async fn fetch_duplicate_groups(&self) -> Result<Vec<FingerprintGroup>>;

    /// Create a cluster, its membership rows, and the member records'
    /// cluster/canonical fields in one transaction.
    async fn create_cluster(&self, cluster: &NewCluster, members: &[NewMembership]) -> Result<()>;

    /// Fetch canonical records that carry an embedding.
    async fn fetch_canonicals_with_embedding(&self) -> Result<Vec<KnowledgeRecord>>;

    /// Fetch up to `limit` fingerprinted, unclustered records that carry
    /// an embedding.
    async fn fetch_unclustered_with_embedding(&self, limit: usize)
        -> Result<Vec<KnowledgeRecord>>;

    /// Attach semantic members to an existing cluster.
    ///
    /// The update is guarded per record: a record that already belongs to
    /// a cluster is skipped, enforcing the one-cluster-per-record
    /// invariant at write time. Returns the number actually attached.
    async fn attach_semantic_members(
        &self,
        cluster_id: &str,
        members: &[NewMembership],
    ) -> Result<u64>;

    /// Recompute a cluster's member count, overlap flags, method, and
    /// average semantic similarity from its membership rows.
    async fn refresh_cluster_rollup(&self, cluster_id: &str) -> Result<()>;

    /// Fetch one cluster by id.
    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>>;

    /// Fetch the membership rows of one cluster.
    async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMembership>>;

    /// Compute aggregate counts over the whole store.
    async fn aggregate_stats(&self) -> Result<AggregateStats>;
}
