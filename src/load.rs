//! Bulk record loading from a JSONL export.
//!
//! Stands in for the out-of-scope upstream ingestion path: each line is one
//! knowledge record with its source collection, raw content, and an
//! optional pre-computed embedding. Records are upserted by id; malformed
//! lines are warned about and skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{KnowledgeRecord, SourceCollection};
use crate::store::sqlite::SqliteStore;
use crate::store::KnowledgeStore;

/// One JSONL line of the export format.
#[derive(Debug, Deserialize)]
struct RecordLine {
    #[serde(default)]
    id: Option<String>,
    source: SourceCollection,
    content: String,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

pub async fn run_load(config: &Config, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open records file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let mut loaded = 0u64;
    let mut skipped = 0u64;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: RecordLine = match serde_json::from_str(&line) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Warning: skipping line {}: {}", lineno + 1, e);
                skipped += 1;
                continue;
            }
        };

        if let (Some(dims), Some(embedding)) =
            (config.unify.embedding_dims, parsed.embedding.as_ref())
        {
            if embedding.len() != dims {
                eprintln!(
                    "Warning: skipping line {}: embedding has {} dims, expected {}",
                    lineno + 1,
                    embedding.len(),
                    dims
                );
                skipped += 1;
                continue;
            }
        }

        let record = KnowledgeRecord {
            id: parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: parsed.source,
            content: parsed.content,
            normalized_content: None,
            fingerprint: None,
            embedding: parsed.embedding,
            cluster_id: None,
            canonical: false,
            created_at: parsed
                .created_at
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        };

        match store.insert_record(&record).await {
            Ok(()) => loaded += 1,
            Err(e) => {
                eprintln!("Warning: failed to store record {}: {}", record.id, e);
                skipped += 1;
            }
        }
    }

    println!("load {}", path.display());
    println!("  loaded: {} records", loaded);
    if skipped > 0 {
        println!("  skipped: {}", skipped);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
