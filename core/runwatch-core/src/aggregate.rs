//! Merge rules for shard aggregates and the derived global view.
//!
//! Two policies live side by side here and must stay separate:
//!
//! - **Counters** are max-merged. They are a best-known lower bound, so stale
//!   or duplicated observations from the racing line and patch feeds are no-ops.
//! - **Status, phase, action and anomaly** are last-write-wins. They describe
//!   the latest known truth and may briefly flip when feeds interleave.
//!
//! Unifying the two would change what the renderer shows.

use crate::types::{GlobalAggregate, ProgressCounters, ShardAggregate, ShardStatus};
use std::collections::{BTreeMap, HashSet};

/// Raises `slot` to `value` if it is larger.
pub fn raise(slot: &mut u64, value: u64) {
    if value > *slot {
        *slot = value;
    }
}

/// Truncates to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 1 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// Which total a numbered summary line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryField {
    Processed,
    Comments,
    Likes,
    Replies,
}

impl SummaryField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "processed" => Some(SummaryField::Processed),
            "comments" => Some(SummaryField::Comments),
            "likes" => Some(SummaryField::Likes),
            "replies" => Some(SummaryField::Replies),
            _ => None,
        }
    }
}

impl ProgressCounters {
    pub fn raise_links(&mut self, collected: Option<u64>, target: Option<u64>) {
        if let Some(collected) = collected {
            raise(&mut self.links_collected, collected);
        }
        if let Some(target) = target {
            raise(&mut self.links_target, target);
        }
    }

    /// Records that post `index` (1-based) of `target` is now being processed.
    ///
    /// Only a strictly higher index resets the per-post comment gauges, so a
    /// re-delivered line for the same post changes nothing.
    pub fn enter_post(
        &mut self,
        index: u64,
        target: Option<u64>,
        post_id: Option<&str>,
        comment_limit: u64,
    ) {
        if index > self.current_post_index {
            self.current_post_index = index;
            self.comments_collected = 0;
            self.comments_target = comment_limit;
            if let Some(id) = post_id {
                self.last_post_id = Some(id.to_string());
            }
        } else if index == self.current_post_index && self.last_post_id.is_none() {
            self.last_post_id = post_id.map(str::to_string);
        }
        raise(&mut self.posts_processed, index.saturating_sub(1));
        if let Some(target) = target {
            raise(&mut self.posts_target, target);
        }
    }

    pub fn raise_current_comments(&mut self, collected: Option<u64>, target: Option<u64>) {
        if let Some(collected) = collected {
            raise(&mut self.comments_collected, collected);
        }
        if let Some(target) = target {
            raise(&mut self.comments_target, target);
        }
    }

    /// Applies an absolute total from a summary line.
    ///
    /// Summaries report totals rather than increments; they still go through
    /// `raise` so a late summary from an earlier point cannot roll numbers back.
    pub fn apply_summary(&mut self, field: SummaryField, value: u64) {
        match field {
            SummaryField::Processed => raise(&mut self.posts_processed, value),
            SummaryField::Comments => raise(&mut self.comments_total, value),
            SummaryField::Likes => raise(&mut self.likes_done, value),
            SummaryField::Replies => raise(&mut self.replies_done, value),
        }
    }

    /// Folds a round ledger's sums into the counters.
    pub fn apply_round_sums(&mut self, sums: &RoundTally, reported_total: Option<u64>) {
        raise(&mut self.skipped.duplicate, sums.duplicate);
        raise(&mut self.skipped.already_done, sums.already_done);
        raise(&mut self.skipped.rate_limited, sums.rate_limited);
        let skipped_total = self.skipped.total();
        raise(&mut self.likes_skipped, skipped_total);
        raise(&mut self.likes_done, sums.liked);
        if let Some(total) = reported_total {
            raise(&mut self.likes_done, total);
        }
    }

    pub fn record_event_log_path(&mut self, path: &str) {
        self.event_log_path = Some(path.to_string());
    }

    /// Adds every counter of `other` into `self` (used for global sums).
    fn accumulate(&mut self, other: &ProgressCounters) {
        self.links_collected = self.links_collected.saturating_add(other.links_collected);
        self.links_target = self.links_target.saturating_add(other.links_target);
        self.posts_processed = self.posts_processed.saturating_add(other.posts_processed);
        self.posts_target = self.posts_target.saturating_add(other.posts_target);
        self.current_post_index = self.current_post_index.saturating_add(other.current_post_index);
        self.comments_collected = self.comments_collected.saturating_add(other.comments_collected);
        self.comments_target = self.comments_target.saturating_add(other.comments_target);
        self.comments_total = self.comments_total.saturating_add(other.comments_total);
        self.likes_done = self.likes_done.saturating_add(other.likes_done);
        self.likes_skipped = self.likes_skipped.saturating_add(other.likes_skipped);
        self.skipped.duplicate = self.skipped.duplicate.saturating_add(other.skipped.duplicate);
        self.skipped.already_done = self
            .skipped
            .already_done
            .saturating_add(other.skipped.already_done);
        self.skipped.rate_limited = self
            .skipped
            .rate_limited
            .saturating_add(other.skipped.rate_limited);
        self.replies_done = self.replies_done.saturating_add(other.replies_done);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Like Round Ledger
// ═══════════════════════════════════════════════════════════════════════════════

/// Counts reported by one rate-limited like round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundTally {
    pub liked: u64,
    pub duplicate: u64,
    pub already_done: u64,
    pub rate_limited: u64,
}

impl RoundTally {
    fn raise_from(&mut self, other: &RoundTally) {
        raise(&mut self.liked, other.liked);
        raise(&mut self.duplicate, other.duplicate);
        raise(&mut self.already_done, other.already_done);
        raise(&mut self.rate_limited, other.rate_limited);
    }
}

/// Per-round tallies keyed by round number.
///
/// Rounds accumulate into the skip counters, but each round is stored once,
/// so replaying a round summary is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundLedger {
    rounds: BTreeMap<u32, RoundTally>,
}

impl RoundLedger {
    /// Records a round and returns the sums across all rounds.
    pub fn record(&mut self, round: u32, tally: RoundTally) -> RoundTally {
        self.rounds.entry(round).or_default().raise_from(&tally);
        self.sums()
    }

    pub fn sums(&self) -> RoundTally {
        self.rounds
            .values()
            .fold(RoundTally::default(), |mut acc, t| {
                acc.liked = acc.liked.saturating_add(t.liked);
                acc.duplicate = acc.duplicate.saturating_add(t.duplicate);
                acc.already_done = acc.already_done.saturating_add(t.already_done);
                acc.rate_limited = acc.rate_limited.saturating_add(t.rate_limited);
                acc
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shard Status Transitions
// ═══════════════════════════════════════════════════════════════════════════════

impl ShardAggregate {
    /// Moves to `Error`; an empty message falls back to the status name so
    /// `anomaly` is never blank while erroring.
    pub fn mark_error(&mut self, anomaly: &str) {
        self.status = ShardStatus::Error;
        self.anomaly = if anomaly.trim().is_empty() {
            ShardStatus::Error.as_str().to_string()
        } else {
            anomaly.to_string()
        };
    }

    pub fn mark_running(&mut self) {
        self.status = ShardStatus::Running;
        self.anomaly.clear();
    }

    pub fn mark_completed(&mut self) {
        self.status = ShardStatus::Completed;
        self.anomaly.clear();
    }

    pub fn touch(&mut self, now_millis: i64) {
        if now_millis > self.updated_at {
            self.updated_at = now_millis;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global Aggregate
// ═══════════════════════════════════════════════════════════════════════════════

/// Derives the global view. Pure: same inputs, same output.
///
/// With no shards the live totals and the implicit unsharded record are
/// reported as-is. Otherwise counters are summed across shards and the live
/// link target fills in when no shard has reported one.
pub fn compute_global<'a, I>(
    live: &ProgressCounters,
    unsharded: &ShardAggregate,
    shards: I,
    phase_display_limit: usize,
) -> GlobalAggregate
where
    I: IntoIterator<Item = &'a ShardAggregate>,
{
    let shards: Vec<&ShardAggregate> = shards.into_iter().collect();

    if shards.is_empty() {
        let phases = if unsharded.phase.is_empty() || phase_display_limit == 0 {
            Vec::new()
        } else {
            vec![unsharded.phase.clone()]
        };
        return GlobalAggregate {
            counters: live.clone(),
            status: unsharded.status,
            anomaly: unsharded.anomaly.clone(),
            phases,
            ..Default::default()
        };
    }

    let mut counters = ProgressCounters::default();
    let mut global = GlobalAggregate {
        shard_count: shards.len() as u32,
        ..Default::default()
    };
    let mut seen_phases = HashSet::new();
    let mut latest: Option<&ShardAggregate> = None;

    for shard in &shards {
        counters.accumulate(&shard.counters);
        match shard.status {
            ShardStatus::Running => global.running_shards += 1,
            ShardStatus::Error => {
                global.error_shards += 1;
                if global.anomaly.is_empty() {
                    global.anomaly = shard.anomaly.clone();
                }
            }
            ShardStatus::Completed => global.completed_shards += 1,
            ShardStatus::Idle => {}
        }
        if !shard.phase.is_empty()
            && global.phases.len() < phase_display_limit
            && seen_phases.insert(shard.phase.as_str())
        {
            global.phases.push(shard.phase.clone());
        }
        if latest.map_or(true, |l| shard.updated_at > l.updated_at) {
            latest = Some(*shard);
        }
    }

    if counters.links_target == 0 {
        counters.links_target = live.links_target;
    }
    // Informational fields follow the most recently updated shard.
    counters.event_log_path = live.event_log_path.clone();
    counters.last_post_id = latest
        .and_then(|s| s.counters.last_post_id.clone())
        .or_else(|| live.last_post_id.clone());

    global.status = if global.error_shards > 0 {
        ShardStatus::Error
    } else if global.running_shards > 0 {
        ShardStatus::Running
    } else if global.completed_shards == global.shard_count {
        ShardStatus::Completed
    } else {
        ShardStatus::Idle
    };
    global.counters = counters;
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SkipBreakdown;

    fn shard(id: &str, links: u64, status: ShardStatus, phase: &str) -> ShardAggregate {
        let mut s = ShardAggregate::new(id);
        s.counters.links_collected = links;
        s.status = status;
        s.phase = phase.to_string();
        if status == ShardStatus::Error {
            s.anomaly = format!("{id} broke");
        }
        s
    }

    #[test]
    fn raise_never_lowers() {
        let mut slot = 8;
        raise(&mut slot, 5);
        assert_eq!(slot, 8);
        raise(&mut slot, 12);
        assert_eq!(slot, 12);
    }

    #[test]
    fn truncate_keeps_short_text_and_marks_cuts() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("点赞失败了吗", 3), "点赞…");
    }

    #[test]
    fn entering_same_post_twice_keeps_comment_progress() {
        let mut counters = ProgressCounters::default();
        counters.enter_post(2, Some(10), Some("n2"), 20);
        counters.raise_current_comments(Some(7), None);
        counters.enter_post(2, Some(10), Some("n2"), 20);
        assert_eq!(counters.comments_collected, 7);
        assert_eq!(counters.posts_processed, 1);

        counters.enter_post(3, Some(10), Some("n3"), 20);
        assert_eq!(counters.comments_collected, 0);
        assert_eq!(counters.comments_target, 20);
        assert_eq!(counters.last_post_id.as_deref(), Some("n3"));
    }

    #[test]
    fn stale_post_line_does_not_move_backwards() {
        let mut counters = ProgressCounters::default();
        counters.enter_post(5, None, Some("n5"), 20);
        counters.enter_post(3, None, Some("n3"), 20);
        assert_eq!(counters.current_post_index, 5);
        assert_eq!(counters.posts_processed, 4);
        assert_eq!(counters.last_post_id.as_deref(), Some("n5"));
    }

    #[test]
    fn round_ledger_ignores_replayed_rounds() {
        let mut ledger = RoundLedger::default();
        let tally = RoundTally {
            liked: 2,
            duplicate: 1,
            already_done: 0,
            rate_limited: 1,
        };
        ledger.record(1, tally);
        let sums = ledger.record(1, tally);
        assert_eq!(sums, tally);

        let sums = ledger.record(2, tally);
        assert_eq!(sums.duplicate, 2);
        assert_eq!(sums.liked, 4);
    }

    #[test]
    fn round_sums_feed_skip_breakdown() {
        let mut counters = ProgressCounters::default();
        let sums = RoundTally {
            liked: 3,
            duplicate: 1,
            already_done: 2,
            rate_limited: 4,
        };
        counters.apply_round_sums(&sums, Some(15));
        assert_eq!(counters.likes_skipped, 7);
        assert_eq!(counters.likes_done, 15);
        assert_eq!(
            counters.skipped,
            SkipBreakdown {
                duplicate: 1,
                already_done: 2,
                rate_limited: 4
            }
        );
    }

    #[test]
    fn error_marks_fill_blank_anomaly() {
        let mut s = ShardAggregate::new("p1");
        s.mark_error("  ");
        assert_eq!(s.anomaly, "error");
        s.mark_running();
        assert!(s.anomaly.is_empty());
    }

    #[test]
    fn touch_is_monotonic() {
        let mut s = ShardAggregate::new("p1");
        s.touch(100);
        s.touch(50);
        assert_eq!(s.updated_at, 100);
    }

    #[test]
    fn global_without_shards_mirrors_live_totals() {
        let mut live = ProgressCounters::default();
        live.links_collected = 4;
        let mut unsharded = ShardAggregate::default();
        unsharded.phase = "Collect".to_string();
        unsharded.mark_running();

        let global = compute_global(&live, &unsharded, Vec::new(), 3);
        assert_eq!(global.counters, live);
        assert_eq!(global.shard_count, 0);
        assert_eq!(global.status, ShardStatus::Running);
        assert_eq!(global.phases, vec!["Collect".to_string()]);
    }

    #[test]
    fn global_sums_shards_and_counts_statuses() {
        let mut live = ProgressCounters::default();
        live.links_target = 90;
        let shards = vec![
            shard("p1", 3, ShardStatus::Running, "Collect"),
            shard("p2", 4, ShardStatus::Error, "Like"),
            shard("p3", 5, ShardStatus::Running, "Collect"),
            shard("p4", 0, ShardStatus::Idle, ""),
        ];

        let global = compute_global(&live, &ShardAggregate::default(), &shards, 3);
        assert_eq!(global.counters.links_collected, 12);
        assert_eq!(global.counters.links_target, 90);
        assert_eq!(global.shard_count, 4);
        assert_eq!(global.running_shards, 2);
        assert_eq!(global.error_shards, 1);
        assert_eq!(global.status, ShardStatus::Error);
        assert_eq!(global.anomaly, "p2 broke");
        assert_eq!(global.phases, vec!["Collect".to_string(), "Like".to_string()]);
    }

    #[test]
    fn global_phases_are_bounded() {
        let shards: Vec<_> = (0..6)
            .map(|i| shard(&format!("p{i}"), 0, ShardStatus::Running, &format!("Phase{i}")))
            .collect();
        let global = compute_global(
            &ProgressCounters::default(),
            &ShardAggregate::default(),
            &shards,
            2,
        );
        assert_eq!(global.phases.len(), 2);
    }

    #[test]
    fn global_completed_only_when_all_shards_complete() {
        let shards = vec![
            shard("p1", 0, ShardStatus::Completed, ""),
            shard("p2", 0, ShardStatus::Idle, ""),
        ];
        let global = compute_global(
            &ProgressCounters::default(),
            &ShardAggregate::default(),
            &shards,
            3,
        );
        assert_eq!(global.status, ShardStatus::Idle);
    }
}
