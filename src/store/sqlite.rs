//! SQLite-backed [`KnowledgeStore`] implementation.
//!
//! Cluster creation and semantic attachment run inside transactions so a
//! group either lands completely or not at all. The one-cluster-per-record
//! invariant is enforced here: member updates are guarded on
//! `cluster_id IS NULL` and membership rows are keyed by record id.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{
    Cluster, ClusterMembership, ClusterMethod, KnowledgeRecord, MatchMethod, OverlapFlags,
    SourceCollection,
};
use crate::similarity::{blob_to_vec, vec_to_blob};

use super::{AggregateStats, FingerprintGroup, KnowledgeStore, NewCluster, NewMembership};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeRecord> {
    let source: String = row.get("source_collection");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let is_canonical: i64 = row.get("is_canonical");

    Ok(KnowledgeRecord {
        id: row.get("id"),
        source: SourceCollection::parse(&source)?,
        content: row.get("content"),
        normalized_content: row.get("normalized_content"),
        fingerprint: row.get("content_fingerprint"),
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        cluster_id: row.get("cluster_id"),
        canonical: is_canonical != 0,
        created_at: row.get("created_at"),
    })
}

fn row_to_cluster(row: &sqlx::sqlite::SqliteRow) -> Result<Cluster> {
    let method: String = row.get("method");
    let has_installation: i64 = row.get("has_installation");
    let has_maintenance: i64 = row.get("has_maintenance");
    let has_inspection: i64 = row.get("has_inspection");

    Ok(Cluster {
        id: row.get("id"),
        canonical_record_id: row.get("canonical_record_id"),
        member_count: row.get("member_count"),
        overlap: OverlapFlags {
            installation: has_installation != 0,
            maintenance: has_maintenance != 0,
            inspection: has_inspection != 0,
        },
        method: ClusterMethod::parse(&method)?,
        avg_semantic_similarity: row.get("avg_semantic_similarity"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const RECORD_COLUMNS: &str = "id, source_collection, content, normalized_content, \
     content_fingerprint, embedding, cluster_id, is_canonical, created_at";

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn insert_record(&self, record: &KnowledgeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_records
                (id, source_collection, content, normalized_content, content_fingerprint,
                 embedding, cluster_id, is_canonical, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_collection = excluded.source_collection,
                content = excluded.content,
                normalized_content = excluded.normalized_content,
                content_fingerprint = excluded.content_fingerprint,
                embedding = excluded.embedding
            "#,
        )
        .bind(&record.id)
        .bind(record.source.as_str())
        .bind(&record.content)
        .bind(&record.normalized_content)
        .bind(&record.fingerprint)
        .bind(record.embedding.as_ref().map(|v| vec_to_blob(v)))
        .bind(&record.cluster_id)
        .bind(record.canonical as i64)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_unfingerprinted(&self, limit: usize) -> Result<Vec<KnowledgeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_records \
             WHERE content_fingerprint IS NULL \
             ORDER BY created_at, id LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn persist_normalization(
        &self,
        record_id: &str,
        normalized: &str,
        fingerprint: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE knowledge_records \
             SET normalized_content = ?, content_fingerprint = ? WHERE id = ?",
        )
        .bind(normalized)
        .bind(fingerprint)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("record {} not found", record_id);
        }
        Ok(())
    }

    async fn fetch_duplicate_groups(&self) -> Result<Vec<FingerprintGroup>> {
        // Only unclustered records participate; re-running after a full
        // pass finds nothing to group.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM knowledge_records
            WHERE cluster_id IS NULL AND content_fingerprint IN (
                SELECT content_fingerprint FROM knowledge_records
                WHERE content_fingerprint IS NOT NULL AND cluster_id IS NULL
                GROUP BY content_fingerprint
                HAVING COUNT(*) >= 2
            )
            ORDER BY content_fingerprint, created_at, id
            "#,
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut groups: Vec<FingerprintGroup> = Vec::new();
        for row in &rows {
            let record = row_to_record(row)?;
            let fp = record
                .fingerprint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("grouped record {} has no fingerprint", record.id))?;
            match groups.last_mut() {
                Some(group) if group.fingerprint == fp => group.members.push(record),
                _ => groups.push(FingerprintGroup {
                    fingerprint: fp,
                    members: vec![record],
                }),
            }
        }

        Ok(groups)
    }

    async fn create_cluster(&self, cluster: &NewCluster, members: &[NewMembership]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_clusters
                (id, canonical_record_id, member_count, has_installation, has_maintenance,
                 has_inspection, method, avg_semantic_similarity, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.id)
        .bind(&cluster.canonical_record_id)
        .bind(cluster.member_count)
        .bind(cluster.overlap.installation as i64)
        .bind(cluster.overlap.maintenance as i64)
        .bind(cluster.overlap.inspection as i64)
        .bind(cluster.method.as_str())
        .bind(cluster.avg_semantic_similarity)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for member in members {
            let tags = serde_json::to_string(member.source.activity_tags())?;
            sqlx::query(
                r#"
                INSERT INTO cluster_memberships
                    (record_id, cluster_id, method, similarity, source_collection,
                     activity_tags, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&member.record_id)
            .bind(&cluster.id)
            .bind(member.method.as_str())
            .bind(member.similarity)
            .bind(member.source.as_str())
            .bind(tags)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let updated = sqlx::query(
                "UPDATE knowledge_records SET cluster_id = ?, is_canonical = ? \
                 WHERE id = ? AND cluster_id IS NULL",
            )
            .bind(&cluster.id)
            .bind(member.canonical as i64)
            .bind(&member.record_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                bail!("record {} is already clustered", member.record_id);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_canonicals_with_embedding(&self) -> Result<Vec<KnowledgeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_records \
             WHERE is_canonical = 1 AND embedding IS NOT NULL \
             ORDER BY created_at, id",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn fetch_unclustered_with_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<KnowledgeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_records \
             WHERE cluster_id IS NULL AND embedding IS NOT NULL \
               AND content_fingerprint IS NOT NULL \
             ORDER BY created_at, id LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn attach_semantic_members(
        &self,
        cluster_id: &str,
        members: &[NewMembership],
    ) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut attached = 0u64;
        let mut tx = self.pool.begin().await?;

        for member in members {
            // Guarded update: a record that gained a cluster since the
            // candidate fetch is left alone.
            let updated = sqlx::query(
                "UPDATE knowledge_records SET cluster_id = ?, is_canonical = 0 \
                 WHERE id = ? AND cluster_id IS NULL",
            )
            .bind(cluster_id)
            .bind(&member.record_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                continue;
            }

            let tags = serde_json::to_string(member.source.activity_tags())?;
            sqlx::query(
                r#"
                INSERT INTO cluster_memberships
                    (record_id, cluster_id, method, similarity, source_collection,
                     activity_tags, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&member.record_id)
            .bind(cluster_id)
            .bind(member.method.as_str())
            .bind(member.similarity)
            .bind(member.source.as_str())
            .bind(tags)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            attached += 1;
        }

        tx.commit().await?;
        Ok(attached)
    }

    async fn refresh_cluster_rollup(&self, cluster_id: &str) -> Result<()> {
        let members = self.get_cluster_members(cluster_id).await?;
        if members.is_empty() {
            bail!("cluster {} has no members", cluster_id);
        }

        let overlap = OverlapFlags::union_of(members.iter().map(|m| m.source));
        let semantic: Vec<f64> = members
            .iter()
            .filter(|m| m.method == MatchMethod::Semantic)
            .map(|m| m.similarity)
            .collect();
        let avg_semantic = if semantic.is_empty() {
            None
        } else {
            Some(semantic.iter().sum::<f64>() / semantic.len() as f64)
        };
        let method = if semantic.is_empty() {
            ClusterMethod::Exact
        } else {
            ClusterMethod::ExactSemantic
        };
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE knowledge_clusters SET
                member_count = ?,
                has_installation = ?,
                has_maintenance = ?,
                has_inspection = ?,
                method = ?,
                avg_semantic_similarity = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(members.len() as i64)
        .bind(overlap.installation as i64)
        .bind(overlap.maintenance as i64)
        .bind(overlap.inspection as i64)
        .bind(method.as_str())
        .bind(avg_semantic)
        .bind(now)
        .bind(cluster_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        let row = sqlx::query(
            "SELECT id, canonical_record_id, member_count, has_installation, has_maintenance, \
             has_inspection, method, avg_semantic_similarity, created_at, updated_at \
             FROM knowledge_clusters WHERE id = ?",
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_cluster).transpose()
    }

    async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMembership>> {
        let rows = sqlx::query(
            "SELECT record_id, cluster_id, method, similarity, source_collection, \
             activity_tags, created_at \
             FROM cluster_memberships WHERE cluster_id = ? ORDER BY created_at, record_id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let method: String = row.get("method");
                let source: String = row.get("source_collection");
                let tags: String = row.get("activity_tags");
                Ok(ClusterMembership {
                    cluster_id: row.get("cluster_id"),
                    record_id: row.get("record_id"),
                    method: MatchMethod::parse(&method)?,
                    similarity: row.get("similarity"),
                    source: SourceCollection::parse(&source)?,
                    activity_tags: serde_json::from_str(&tags)?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_records")
            .fetch_one(&self.pool)
            .await?;

        let canonical_records: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_records WHERE is_canonical = 1")
                .fetch_one(&self.pool)
                .await?;

        let clustered_records: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_records WHERE cluster_id IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_clusters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_clusters")
            .fetch_one(&self.pool)
            .await?;

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
