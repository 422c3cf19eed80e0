use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create knowledge_records table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_records (
            id TEXT PRIMARY KEY,
            source_collection TEXT NOT NULL,
            content TEXT NOT NULL,
            normalized_content TEXT,
            content_fingerprint TEXT,
            embedding BLOB,
            cluster_id TEXT,
            is_canonical INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create knowledge_clusters table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_clusters (
            id TEXT PRIMARY KEY,
            canonical_record_id TEXT NOT NULL,
            member_count INTEGER NOT NULL,
            has_installation INTEGER NOT NULL DEFAULT 0,
            has_maintenance INTEGER NOT NULL DEFAULT 0,
            has_inspection INTEGER NOT NULL DEFAULT 0,
            method TEXT NOT NULL,
            avg_semantic_similarity REAL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (canonical_record_id) REFERENCES knowledge_records(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create cluster_memberships table.
    // record_id is the primary key: a record belongs to at most one cluster
    // for its lifetime, enforced here at write time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cluster_memberships (
            record_id TEXT PRIMARY KEY,
            cluster_id TEXT NOT NULL,
            method TEXT NOT NULL,
            similarity REAL NOT NULL,
            source_collection TEXT NOT NULL,
            activity_tags TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (cluster_id) REFERENCES knowledge_clusters(id),
            FOREIGN KEY (record_id) REFERENCES knowledge_records(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_fingerprint ON knowledge_records(content_fingerprint)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_cluster_id ON knowledge_records(cluster_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_canonical ON knowledge_records(is_canonical)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memberships_cluster_id ON cluster_memberships(cluster_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
