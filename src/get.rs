//! Cluster detail retrieval for the CLI.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteStore;
use crate::store::KnowledgeStore;

/// Print one cluster's summary and membership rows.
pub async fn run_get(config: &Config, cluster_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let cluster = match store.get_cluster(cluster_id).await? {
        Some(c) => c,
        None => {
            pool.close().await;
            bail!("Cluster not found: {}", cluster_id);
        }
    };

    println!("Cluster {}", cluster.id);
    println!("  canonical: {}", cluster.canonical_record_id);
    println!("  members:   {}", cluster.member_count);
    println!("  method:    {}", cluster.method.as_str());
    if let Some(avg) = cluster.avg_semantic_similarity {
        println!("  avg semantic similarity: {:.3}", avg);
    }
    println!(
        "  overlap:   installation={} maintenance={} inspection={}",
        cluster.overlap.installation, cluster.overlap.maintenance, cluster.overlap.inspection
    );
    println!();

    let members = store.get_cluster_members(cluster_id).await?;
    for member in &members {
        println!(
            "  {} [{}] {:.3} {} {:?}",
            member.record_id,
            member.method.as_str(),
            member.similarity,
            member.source.as_str(),
            member.activity_tags
        );
    }

    pool.close().await;
    Ok(())
}
