//! Shared data types for progress aggregation.
//!
//! Everything here is FFI-ready (UniFFI records/enums) and serializable so the
//! render layer can consume snapshots either natively or as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════════════
// Input Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Output stream a line was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stdout,
    Stderr,
}

impl Channel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" | "out" => Some(Channel::Stdout),
            "stderr" | "err" => Some(Channel::Stderr),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregate Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse status of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    #[default]
    Idle,
    Running,
    Error,
    Completed,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Idle => "idle",
            ShardStatus::Running => "running",
            ShardStatus::Error => "error",
            ShardStatus::Completed => "completed",
        }
    }
}

/// Why a like was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct SkipBreakdown {
    pub duplicate: u64,
    pub already_done: u64,
    pub rate_limited: u64,
}

impl SkipBreakdown {
    pub fn total(&self) -> u64 {
        self.duplicate
            .saturating_add(self.already_done)
            .saturating_add(self.rate_limited)
    }
}

/// Progress counters shared by the session-wide live totals and every shard.
///
/// All numeric fields only move up within a session, except the two
/// `comments_*` gauges which are scoped to the post currently being processed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct ProgressCounters {
    pub links_collected: u64,
    pub links_target: u64,
    pub posts_processed: u64,
    pub posts_target: u64,
    pub current_post_index: u64,
    /// Comments collected for the current post.
    pub comments_collected: u64,
    /// Comment target for the current post.
    pub comments_target: u64,
    pub comments_total: u64,
    pub likes_done: u64,
    pub likes_skipped: u64,
    pub skipped: SkipBreakdown,
    pub replies_done: u64,
    pub event_log_path: Option<String>,
    pub last_post_id: Option<String>,
}

/// Progress and status of one shard (browser profile).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct ShardAggregate {
    pub shard_id: String,
    pub counters: ProgressCounters,
    /// Last seen phase tag; empty until one is seen.
    pub phase: String,
    /// Last human-readable action, bounded in length.
    pub action: String,
    pub status: ShardStatus,
    /// Non-empty exactly while `status` is `Error`.
    pub anomaly: String,
    /// Milliseconds since the Unix epoch; never decreases.
    pub updated_at: i64,
}

impl ShardAggregate {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            ..Default::default()
        }
    }
}

/// Derived totals across all shards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct GlobalAggregate {
    pub counters: ProgressCounters,
    pub shard_count: u32,
    pub running_shards: u32,
    pub error_shards: u32,
    pub completed_shards: u32,
    /// Overall status: error wins, then running, then completed.
    pub status: ShardStatus,
    pub anomaly: String,
    /// Distinct non-empty phases, bounded for display.
    pub phases: Vec<String>,
}

/// Evidence recorded for a post that was liked or replied to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct EngagementNote {
    pub post_id: String,
    pub count: u64,
    pub directory: String,
}

/// Render-ready view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Record)]
pub struct ProgressSnapshot {
    pub totals: GlobalAggregate,
    /// Session-wide counters, including facts that resolved to no shard.
    pub live: ProgressCounters,
    /// Phase/status for lines that resolved to no shard.
    pub unsharded: ShardAggregate,
    pub per_shard: HashMap<String, ShardAggregate>,
    pub expected_shards: Vec<String>,
    pub has_structured_feed: bool,
    pub notes: HashMap<String, EngagementNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parse_accepts_short_names() {
        assert_eq!(Channel::parse("STDERR"), Some(Channel::Stderr));
        assert_eq!(Channel::parse("out"), Some(Channel::Stdout));
        assert_eq!(Channel::parse("tty"), None);
    }

    #[test]
    fn shard_status_serializes_lowercase() {
        let json = serde_json::to_string(&ShardStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
