use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub unify: UnifyConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Tunables for the unification pipeline.
///
/// The candidate pool bound and the per-cluster attachment cap are explicit
/// configuration so cap-hit behavior can be exercised deterministically in
/// tests.
#[derive(Debug, Deserialize, Clone)]
pub struct UnifyConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    #[serde(default = "default_max_semantic_per_cluster")]
    pub max_semantic_per_cluster: usize,
    #[serde(default = "default_cosine_accept")]
    pub cosine_accept: f64,
    #[serde(default = "default_cosine_combined")]
    pub cosine_combined: f64,
    #[serde(default = "default_jaccard_combined")]
    pub jaccard_combined: f64,
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,
    /// Expected embedding dimensionality. When set, `load` rejects vectors
    /// of any other length.
    #[serde(default)]
    pub embedding_dims: Option<usize>,
}

impl Default for UnifyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            candidate_pool: default_candidate_pool(),
            max_semantic_per_cluster: default_max_semantic_per_cluster(),
            cosine_accept: default_cosine_accept(),
            cosine_combined: default_cosine_combined(),
            jaccard_combined: default_jaccard_combined(),
            min_token_len: default_min_token_len(),
            embedding_dims: None,
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_candidate_pool() -> usize {
    50
}
fn default_max_semantic_per_cluster() -> usize {
    5
}
fn default_cosine_accept() -> f64 {
    0.93
}
fn default_cosine_combined() -> f64 {
    0.90
}
fn default_jaccard_combined() -> f64 {
    0.80
}
fn default_min_token_len() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.unify.batch_size == 0 {
        anyhow::bail!("unify.batch_size must be > 0");
    }
    if config.unify.candidate_pool == 0 {
        anyhow::bail!("unify.candidate_pool must be > 0");
    }
    if config.unify.max_semantic_per_cluster == 0 {
        anyhow::bail!("unify.max_semantic_per_cluster must be > 0");
    }

    for (name, value) in [
        ("unify.cosine_accept", config.unify.cosine_accept),
        ("unify.cosine_combined", config.unify.cosine_combined),
        ("unify.jaccard_combined", config.unify.jaccard_combined),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    if config.unify.cosine_combined > config.unify.cosine_accept {
        anyhow::bail!("unify.cosine_combined must not exceed unify.cosine_accept");
    }

    if config.unify.embedding_dims == Some(0) {
        anyhow::bail!("unify.embedding_dims must be > 0 when set");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kunify.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_defaults_applied() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "/tmp/kunify.sqlite"

[server]
bind = "127.0.0.1:7431"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.unify.batch_size, 100);
        assert_eq!(cfg.unify.candidate_pool, 50);
        assert_eq!(cfg.unify.max_semantic_per_cluster, 5);
        assert!((cfg.unify.cosine_accept - 0.93).abs() < 1e-12);
        assert!((cfg.unify.cosine_combined - 0.90).abs() < 1e-12);
        assert!((cfg.unify.jaccard_combined - 0.80).abs() < 1e-12);
        assert_eq!(cfg.unify.min_token_len, 3);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "/tmp/kunify.sqlite"

[unify]
cosine_accept = 1.5

[server]
bind = "127.0.0.1:7431"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_inverted_cosine_thresholds() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "/tmp/kunify.sqlite"

[unify]
cosine_accept = 0.85
cosine_combined = 0.90

[server]
bind = "127.0.0.1:7431"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
