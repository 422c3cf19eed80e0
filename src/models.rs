//! Core data models used throughout the unification pipeline.
//!
//! These types represent the knowledge records, clusters, and membership
//! rows that flow through the deduplication stages.

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// The source collection a knowledge record was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCollection {
    Installation,
    Maintenance,
    Inspection,
}

impl SourceCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCollection::Installation => "installation",
            SourceCollection::Maintenance => "maintenance",
            SourceCollection::Inspection => "inspection",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "installation" => Ok(SourceCollection::Installation),
            "maintenance" => Ok(SourceCollection::Maintenance),
            "inspection" => Ok(SourceCollection::Inspection),
            other => bail!(
                "Unknown source collection: '{}'. Must be installation, maintenance, or inspection.",
                other
            ),
        }
    }

    /// Activity tags consumed by downstream retrieval filters.
    ///
    /// The inspection collection covers both inspection and testing work,
    /// so it carries both tags.
    pub fn activity_tags(&self) -> &'static [&'static str] {
        match self {
            SourceCollection::Installation => &["installation"],
            SourceCollection::Maintenance => &["maintenance"],
            SourceCollection::Inspection => &["inspection", "testing"],
        }
    }
}

/// How a member record was matched into its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Semantic,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Semantic => "semantic",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "exact" => Ok(MatchMethod::Exact),
            "semantic" => Ok(MatchMethod::Semantic),
            other => bail!("Unknown match method: '{}'", other),
        }
    }
}

/// Which matching methods contributed members to a cluster.
///
/// Clusters are created by the exact stage; once the semantic stage attaches
/// any member the cluster is marked `exact+semantic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMethod {
    Exact,
    ExactSemantic,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMethod::Exact => "exact",
            ClusterMethod::ExactSemantic => "exact+semantic",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "exact" => Ok(ClusterMethod::Exact),
            "exact+semantic" => Ok(ClusterMethod::ExactSemantic),
            other => bail!("Unknown cluster method: '{}'", other),
        }
    }
}

/// A unit of textual knowledge ingested from one of the source collections.
#[derive(Debug, Clone)]
pub struct KnowledgeRecord {
    pub id: String,
    pub source: SourceCollection,
    pub content: String,
    pub normalized_content: Option<String>,
    pub fingerprint: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub cluster_id: Option<String>,
    pub canonical: bool,
    pub created_at: i64,
}

/// Pipeline state of a record, derived from which fields are populated.
///
/// The transition into `Clustered` is one-way: no stage ever re-clusters
/// or un-clusters a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Unfingerprinted,
    Fingerprinted,
    Clustered { canonical: bool },
}

impl KnowledgeRecord {
    pub fn state(&self) -> RecordState {
        if self.cluster_id.is_some() {
            RecordState::Clustered {
                canonical: self.canonical,
            }
        } else if self.fingerprint.is_some() {
            RecordState::Fingerprinted
        } else {
            RecordState::Unfingerprinted
        }
    }
}

/// Per-source-collection booleans marking which collections contributed
/// members to a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverlapFlags {
    pub installation: bool,
    pub maintenance: bool,
    pub inspection: bool,
}

impl OverlapFlags {
    pub fn set(&mut self, source: SourceCollection) {
        match source {
            SourceCollection::Installation => self.installation = true,
            SourceCollection::Maintenance => self.maintenance = true,
            SourceCollection::Inspection => self.inspection = true,
        }
    }

    /// Union of the source tags of an iterator of members.
    pub fn union_of<I: IntoIterator<Item = SourceCollection>>(sources: I) -> Self {
        let mut flags = OverlapFlags::default();
        for s in sources {
            flags.set(s);
        }
        flags
    }
}

/// One deduplicated unit of knowledge.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: String,
    pub canonical_record_id: String,
    pub member_count: i64,
    pub overlap: OverlapFlags,
    pub method: ClusterMethod,
    pub avg_semantic_similarity: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Join row linking a cluster to a member record.
#[derive(Debug, Clone)]
pub struct ClusterMembership {
    pub cluster_id: String,
    pub record_id: String,
    pub method: MatchMethod,
    pub similarity: f64,
    pub source: SourceCollection,
    pub activity_tags: Vec<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        fingerprint: Option<&str>,
        cluster: Option<&str>,
        canonical: bool,
    ) -> KnowledgeRecord {
        KnowledgeRecord {
            id: "r1".to_string(),
            source: SourceCollection::Installation,
            content: "content".to_string(),
            normalized_content: fingerprint.map(|_| "content".to_string()),
            fingerprint: fingerprint.map(|s| s.to_string()),
            embedding: None,
            cluster_id: cluster.map(|s| s.to_string()),
            canonical,
            created_at: 0,
        }
    }

    #[test]
    fn test_state_machine_progression() {
        assert_eq!(
            record(None, None, false).state(),
            RecordState::Unfingerprinted
        );
        assert_eq!(
            record(Some("fp"), None, false).state(),
            RecordState::Fingerprinted
        );
        assert_eq!(
            record(Some("fp"), Some("c1"), true).state(),
            RecordState::Clustered { canonical: true }
        );
        assert_eq!(
            record(Some("fp"), Some("c1"), false).state(),
            RecordState::Clustered { canonical: false }
        );
    }

    #[test]
    fn test_overlap_union() {
        let flags = OverlapFlags::union_of([
            SourceCollection::Installation,
            SourceCollection::Inspection,
            SourceCollection::Installation,
        ]);
        assert!(flags.installation);
        assert!(!flags.maintenance);
        assert!(flags.inspection);
    }

    #[test]
    fn test_activity_tags() {
        assert_eq!(
            SourceCollection::Installation.activity_tags(),
            &["installation"]
        );
        assert_eq!(
            SourceCollection::Inspection.activity_tags(),
            &["inspection", "testing"]
        );
    }

    #[test]
    fn test_source_parse_roundtrip() {
        for s in ["installation", "maintenance", "inspection"] {
            assert_eq!(SourceCollection::parse(s).unwrap().as_str(), s);
        }
        assert!(SourceCollection::parse("plumbing").is_err());
    }
}
