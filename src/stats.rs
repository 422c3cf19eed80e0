//! Aggregate statistics and health overview.
//!
//! Provides a quick summary of the unified knowledge base: record counts,
//! canonical and clustered totals, the deduplication rate, and per-source
//! breakdowns. Used by `kunify stats` to give confidence that runs are
//! converging as expected. Pure read-only aggregation; a failure here never
//! fails the surrounding job.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteStore;
use crate::store::{AggregateStats, KnowledgeStore};

/// Compute aggregate counts, degrading to zero-valued fields with a logged
/// warning on failure.
pub async fn aggregate(store: &dyn KnowledgeStore) -> AggregateStats {
    match store.aggregate_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Warning: stats aggregation failed: {}", e);
            AggregateStats::default()
        }
    }
}

/// Per-source breakdown of record and cluster participation counts.
struct SourceStats {
    source: String,
    record_count: i64,
    clustered_count: i64,
    canonical_count: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let totals = aggregate(&store).await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Knowledge Unify — Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", totals.total_records);
    println!("  Clustered:   {}", totals.clustered_records);
    println!("  Canonical:   {}", totals.canonical_records);
    println!("  Clusters:    {}", totals.total_clusters);
    println!("  Dedup rate:  {:.1}%", totals.dedup_rate * 100.0);

    // Per-source breakdown
    let source_rows = sqlx::query(
        r#"
        SELECT
            source_collection,
            COUNT(*) AS record_count,
            SUM(CASE WHEN cluster_id IS NOT NULL THEN 1 ELSE 0 END) AS clustered_count,
            SUM(CASE WHEN is_canonical = 1 THEN 1 ELSE 0 END) AS canonical_count
        FROM knowledge_records
        GROUP BY source_collection
        ORDER BY record_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source_collection"),
            record_count: row.get("record_count"),
            clustered_count: row.get("clustered_count"),
            canonical_count: row.get("canonical_count"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<16} {:>8} {:>10} {:>10}",
            "SOURCE", "RECORDS", "CLUSTERED", "CANONICAL"
        );
        println!("  {}", "-".repeat(48));

        for s in &source_stats {
            println!(
                "  {:<16} {:>8} {:>10} {:>10}",
                s.source, s.record_count, s.clustered_count, s.canonical_count
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnowledgeRecord, SourceCollection};
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_aggregate_empty_store_is_all_zero() {
        let store = InMemoryStore::new();
        let stats = aggregate(&store).await;
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_clusters, 0);
        assert_eq!(stats.dedup_rate, 0.0);
    }

    #[tokio::test]
    async fn test_aggregate_counts_duplicates() {
        let store = InMemoryStore::new();
        for (id, cluster, canonical) in [
            ("r1", Some("c"), true),
            ("r2", Some("c"), false),
            ("r3", Some("c"), false),
            ("r4", None, false),
        ] {
            store
                .insert_record(&KnowledgeRecord {
                    id: id.to_string(),
                    source: SourceCollection::Installation,
                    content: "content".to_string(),
                    normalized_content: Some("content".to_string()),
                    fingerprint: Some("fp".to_string()),
                    embedding: None,
                    cluster_id: cluster.map(|s| s.to_string()),
                    canonical,
                    created_at: 0,
                })
                .await
                .unwrap();
        }

        let stats = aggregate(&store).await;
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.clustered_records, 3);
        assert_eq!(stats.canonical_records, 1);
        assert!((stats.dedup_rate - 0.5).abs() < 1e-12);
    }
}
