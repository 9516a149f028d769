//! Replica data model shared by the coordinator and engines

use serde::{Deserialize, Serialize};

/// Persisted replica metadata (`volume.meta`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Info {
    pub size: u64,
    pub sector_size: u64,
    pub dirty: bool,
    pub rebuilding: bool,
    pub revision_counter: i64,
    pub peer_count: u32,
    /// Active writable disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_file: Option<String>,
}

/// Optional base layer. Positive values override the replica defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackingFile {
    pub name: String,
    pub size: u64,
    pub sector_size: u64,
}

/// Bookkeeping about the other replicas of the volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDetails {
    pub replica_count: u32,
    pub quorum_replica_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveActionKind {
    /// Merge `source` into `target`
    Coalesce,
    /// Drop `source` from the chain
    Remove,
    /// Put `source` in the position of `target`
    Replace,
}

/// One ordered step needed to take a disk out of the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRemoveAction {
    pub action: RemoveActionKind,
    pub source: String,
    pub target: String,
}

/// Volume space usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolUsage {
    pub revision_counter: i64,
    pub sector_size: u64,
    pub used_logical_blocks: u64,
    pub used_blocks: u64,
}

/// Replica statistics exported to orchestration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub revision_counter: i64,
    pub replica_count: i64,
}
