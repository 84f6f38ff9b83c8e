//! Session state: the single owner of every map, counter and registry.
//!
//! Extraction and patch parsing are pure and return facts; this module is the
//! only place those facts mutate anything. A session is not thread-safe; hosts
//! that share it across threads wrap it in a mutex (see `engine`).

use crate::aggregate::{compute_global, raise, truncate_chars, RoundLedger};
use crate::classify::{ErrorClassifier, VocabularyClassifier};
use crate::config::EngineConfig;
use crate::extract::{extract_line, Effect};
use crate::index::RunShardIndex;
use crate::patch::{parse_patch, PatchFacts, PatchStatus};
use crate::types::{Channel, EngagementNote, ProgressCounters, ProgressSnapshot, ShardAggregate};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Source of `updated_at` timestamps.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that always returns the same instant. Useful for deterministic snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
struct ShardState {
    aggregate: ShardAggregate,
    rounds: RoundLedger,
}

impl ShardState {
    fn new(shard_id: &str) -> Self {
        Self {
            aggregate: ShardAggregate::new(shard_id),
            rounds: RoundLedger::default(),
        }
    }
}

pub struct Session {
    config: EngineConfig,
    classifier: Box<dyn ErrorClassifier>,
    clock: Box<dyn Clock>,
    index: RunShardIndex,
    live: ProgressCounters,
    live_rounds: RoundLedger,
    /// Phase/status for facts that resolve to no shard.
    unsharded: ShardState,
    shards: BTreeMap<String, ShardState>,
    notes: HashMap<String, EngagementNote>,
    has_structured_feed: bool,
    last_parent_run_id: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            classifier: Box::new(VocabularyClassifier::default()),
            clock: Box::new(SystemClock),
            index: RunShardIndex::new(),
            live: ProgressCounters::default(),
            live_rounds: RoundLedger::default(),
            unsharded: ShardState::default(),
            shards: BTreeMap::new(),
            notes: HashMap::new(),
            has_structured_feed: false,
            last_parent_run_id: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drops all run data. Config, classifier and clock are kept.
    pub fn clear(&mut self) {
        self.index.clear();
        self.live = ProgressCounters::default();
        self.live_rounds = RoundLedger::default();
        self.unsharded = ShardState::default();
        self.shards.clear();
        self.notes.clear();
        self.has_structured_feed = false;
        self.last_parent_run_id = None;
    }

    pub fn accepts_run(&self, run_id: &str) -> bool {
        self.index.accepts(run_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle inputs
    // ─────────────────────────────────────────────────────────────────────────

    /// Raises the live link target floor. Never lowers it.
    pub fn raise_links_target(&mut self, target: u64) {
        raise(&mut self.live.links_target, target);
    }

    /// Replaces the expected shard set and re-seeds single-shard inheritance.
    pub fn set_shard_profiles(&mut self, shard_ids: &[String]) {
        self.index.replace_expected(shard_ids);
        self.index.seed_single_shard();
        self.sync_shards();
    }

    pub fn mark_active_run(&mut self, run_id: &str) {
        self.index.mark_active(run_id);
        self.index.seed_single_shard();
        self.sync_shards();
    }

    /// Creates an aggregate for every shard the index references.
    fn sync_shards(&mut self) {
        for shard_id in self.index.referenced_shards() {
            if !self.shards.contains_key(shard_id) {
                tracing::debug!(shard_id = %shard_id, "Tracking new shard");
                self.shards.insert(shard_id.clone(), ShardState::new(shard_id));
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Line feed
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies one output line. Returns true if anything was extracted.
    pub fn apply_line(&mut self, run_id: &str, channel: Channel, text: &str) -> bool {
        let extraction = extract_line(
            run_id,
            channel,
            text,
            self.last_parent_run_id.as_deref(),
            &self.config,
            self.classifier.as_ref(),
        );
        if extraction.is_empty() {
            return false;
        }

        let parent = extraction.parent_run_id.as_deref();
        if let Some(parent) = parent {
            if self.last_parent_run_id.as_deref() != Some(parent) {
                self.last_parent_run_id = Some(parent.to_string());
            }
        }

        for effect in extraction.effects.iter().filter(|e| e.is_association()) {
            self.apply_association(effect, parent);
        }
        self.sync_shards();

        let shard_id = self
            .index
            .resolve(extraction.inline_run_id.as_deref(), parent);
        if shard_id.is_none() {
            tracing::trace!(run_id = %run_id, "Line resolved to no shard");
        }

        for effect in extraction.effects.iter().filter(|e| !e.is_association()) {
            self.apply_fact(effect, shard_id.as_deref());
        }

        let now = self.clock.now_millis();
        self.record_mut(shard_id.as_deref()).aggregate.touch(now);
        true
    }

    fn apply_association(&mut self, effect: &Effect, parent: Option<&str>) {
        match effect {
            Effect::SeenRun(run) => self.index.mark_seen(run),
            Effect::ShardHint(shards) => {
                for shard in shards {
                    if self.index.expect_shard(shard) {
                        tracing::info!(
                            shard_id = %shard,
                            parent_run_id = ?parent,
                            "Discovered shard"
                        );
                    }
                    if let Some(parent) = parent {
                        self.index.set_parent_shard(parent, shard);
                    }
                }
            }
            Effect::ChildRun(child) => {
                if let Some(parent) = parent {
                    let inherited = self.index.inherit_child(parent, child);
                    tracing::debug!(
                        parent_run_id = %parent,
                        child_run_id = %child,
                        shard_id = ?inherited,
                        "Child run registered"
                    );
                }
            }
            _ => {}
        }
    }

    fn apply_fact(&mut self, effect: &Effect, shard_id: Option<&str>) {
        let comment_limit = u64::from(self.config.comment_limit);
        match effect {
            Effect::EventLogPath(path) => {
                self.live.record_event_log_path(path);
                self.record_mut(shard_id)
                    .aggregate
                    .counters
                    .record_event_log_path(path);
            }
            Effect::Phase(phase) => self.record_mut(shard_id).aggregate.phase = phase.clone(),
            Effect::Action(action) => self.record_mut(shard_id).aggregate.action = action.clone(),
            Effect::Status { anomaly, .. } => {
                let record = &mut self.record_mut(shard_id).aggregate;
                match anomaly {
                    Some(text) => record.mark_error(text),
                    None => record.mark_running(),
                }
            }
            Effect::Links { collected, target } => {
                self.live.raise_links(*collected, *target);
                if shard_id.is_some() {
                    self.record_mut(shard_id)
                        .aggregate
                        .counters
                        .raise_links(*collected, *target);
                }
            }
            Effect::CurrentPost {
                index,
                target,
                post_id,
            } => {
                let post_id = post_id.as_deref();
                self.live.enter_post(*index, *target, post_id, comment_limit);
                if shard_id.is_some() {
                    self.record_mut(shard_id)
                        .aggregate
                        .counters
                        .enter_post(*index, *target, post_id, comment_limit);
                }
            }
            Effect::CurrentComments { collected, target } => {
                self.live.raise_current_comments(*collected, *target);
                if shard_id.is_some() {
                    self.record_mut(shard_id)
                        .aggregate
                        .counters
                        .raise_current_comments(*collected, *target);
                }
            }
            Effect::Summary { field, value } => {
                self.live.apply_summary(*field, *value);
                if shard_id.is_some() {
                    self.record_mut(shard_id)
                        .aggregate
                        .counters
                        .apply_summary(*field, *value);
                }
            }
            Effect::LikeRound {
                round,
                tally,
                total,
            } => {
                let sums = self.live_rounds.record(*round, *tally);
                self.live.apply_round_sums(&sums, *total);
                if shard_id.is_some() {
                    let state = self.record_mut(shard_id);
                    let sums = state.rounds.record(*round, *tally);
                    state.aggregate.counters.apply_round_sums(&sums, *total);
                }
            }
            Effect::Evidence { count, directory } => {
                let post_id = shard_id
                    .and_then(|id| self.shards.get(id))
                    .and_then(|s| s.aggregate.counters.last_post_id.clone())
                    .or_else(|| self.live.last_post_id.clone());
                match post_id {
                    Some(post_id) => self.register_note(post_id, *count, directory),
                    None => {
                        tracing::debug!(directory = %directory, "Evidence without a current post")
                    }
                }
            }
            Effect::SeenRun(_) | Effect::ShardHint(_) | Effect::ChildRun(_) => {}
        }
    }

    fn register_note(&mut self, post_id: String, count: u64, directory: &str) {
        let note = self
            .notes
            .entry(post_id.clone())
            .or_insert_with(|| EngagementNote {
                post_id,
                ..Default::default()
            });
        raise(&mut note.count, count);
        note.directory = directory.to_string();
    }

    /// The record a fact lands on: the resolved shard, else the unsharded record.
    fn record_mut(&mut self, shard_id: Option<&str>) -> &mut ShardState {
        match shard_id {
            Some(id) => self
                .shards
                .entry(id.to_string())
                .or_insert_with(|| ShardState::new(id)),
            None => &mut self.unsharded,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Patch feed
    // ─────────────────────────────────────────────────────────────────────────

    /// Merges a structured state patch. Returns false if it was not an object.
    pub fn merge_patch(&mut self, run_id: &str, patch: &Value) -> bool {
        let Some(facts) = parse_patch(patch) else {
            tracing::debug!(run_id = %run_id, "Dropping non-object state patch");
            return false;
        };

        let run = facts
            .run_id
            .as_deref()
            .or(Some(run_id.trim()).filter(|r| !r.is_empty()))
            .map(str::to_string);

        if let Some(profile) = facts.profile.as_deref() {
            if self.index.expect_shard(profile) {
                tracing::info!(shard_id = %profile, "Discovered shard from state patch");
            }
            if let Some(run) = run.as_deref() {
                self.index.set_parent_shard(run, profile);
            }
            self.sync_shards();
        }

        let shard_id = facts
            .profile
            .clone()
            .or_else(|| self.index.resolve(None, run.as_deref()));

        merge_patch_counters(&mut self.live, &facts);
        let limits = TextLimits::from(&self.config);
        let now = self.clock.now_millis();
        let state = self.record_mut(shard_id.as_deref());
        if shard_id.is_some() {
            merge_patch_counters(&mut state.aggregate.counters, &facts);
        }
        apply_patch_status(&mut state.aggregate, &facts, limits);
        state.aggregate.touch(now);

        self.has_structured_feed = true;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Render
    // ─────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ProgressSnapshot {
        let totals = compute_global(
            &self.live,
            &self.unsharded.aggregate,
            self.shards.values().map(|s| &s.aggregate),
            self.config.phase_display_limit as usize,
        );
        ProgressSnapshot {
            totals,
            live: self.live.clone(),
            unsharded: self.unsharded.aggregate.clone(),
            per_shard: self
                .shards
                .iter()
                .map(|(id, s)| (id.clone(), s.aggregate.clone()))
                .collect(),
            expected_shards: self.index.expected_shards().to_vec(),
            has_structured_feed: self.has_structured_feed,
            notes: self.notes.clone(),
        }
    }
}

fn merge_patch_counters(counters: &mut ProgressCounters, facts: &PatchFacts) {
    counters.raise_links(facts.links_collected, facts.links_target);
    let slots = [
        (&mut counters.posts_processed, facts.posts_processed),
        (&mut counters.posts_target, facts.posts_target),
        (&mut counters.comments_total, facts.comments_total),
        (&mut counters.likes_done, facts.likes_done),
        (&mut counters.likes_skipped, facts.likes_skipped),
        (&mut counters.replies_done, facts.replies_done),
    ];
    for (slot, value) in slots {
        if let Some(value) = value {
            raise(slot, value);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextLimits {
    action: usize,
    anomaly: usize,
}

impl From<&EngineConfig> for TextLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            action: config.action_max_chars as usize,
            anomaly: config.anomaly_max_chars as usize,
        }
    }
}

/// Status, phase and action from a patch. Last write wins, unlike counters.
fn apply_patch_status(record: &mut ShardAggregate, facts: &PatchFacts, limits: TextLimits) {
    match facts.status {
        Some(PatchStatus::Error) => {
            record.mark_error(&truncate_chars(&facts.anomaly_text(), limits.anomaly));
        }
        Some(PatchStatus::Completed) => record.mark_completed(),
        Some(PatchStatus::Running) => record.mark_running(),
        None if facts.has_progress => match facts.error_text.as_deref() {
            Some(error) => record.mark_error(&truncate_chars(error, limits.anomaly)),
            None => record.mark_running(),
        },
        None => {}
    }
    if let Some(phase) = &facts.phase {
        record.phase = phase.clone();
    }
    if let Some(message) = &facts.message {
        record.action = truncate_chars(message, limits.action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShardStatus;
    use serde_json::json;

    fn session() -> Session {
        Session::default().with_clock(Box::new(FixedClock(1_000)))
    }

    #[test]
    fn hint_creates_shard_before_any_counter() {
        let mut s = session();
        s.apply_line("A", Channel::Stdout, "[shard-hint] profiles=p1,p2");
        let snap = s.snapshot();
        assert_eq!(snap.expected_shards, vec!["p1".to_string(), "p2".to_string()]);
        assert!(snap.per_shard.contains_key("p1"));
        assert!(snap.per_shard.contains_key("p2"));
    }

    #[test]
    fn unresolved_lines_update_live_totals_only() {
        let mut s = session();
        s.set_shard_profiles(&["p1".to_string(), "p2".to_string()]);
        s.apply_line("stray", Channel::Stdout, "[Collect] 4/10");

        let snap = s.snapshot();
        assert_eq!(snap.live.links_collected, 4);
        assert_eq!(snap.per_shard["p1"].counters.links_collected, 0);
        assert_eq!(snap.totals.counters.links_collected, 0);
        assert_eq!(snap.totals.counters.links_target, 10);
        assert_eq!(snap.unsharded.status, ShardStatus::Running);
    }

    #[test]
    fn evidence_registers_note_for_current_post() {
        let mut s = session();
        s.apply_line("A", Channel::Stdout, "[Process] Post 2/9 id=n2");
        s.apply_line("A", Channel::Stdout, "[Like] evidence: 2 files -> /ev/n2");
        s.apply_line("A", Channel::Stdout, "[Like] evidence: 1 files -> /ev/n2b");

        let note = &s.snapshot().notes["n2"];
        assert_eq!(note.count, 2);
        assert_eq!(note.directory, "/ev/n2b");
    }

    #[test]
    fn patch_error_then_completed() {
        let mut s = session();
        s.set_shard_profiles(&["s1".to_string()]);
        s.merge_patch("r1", &json!({"status": "failed", "message": "x".repeat(300)}));
        let shard = &s.snapshot().per_shard["s1"];
        assert_eq!(shard.status, ShardStatus::Error);
        assert_eq!(shard.anomaly.chars().count(), 160);
        assert_eq!(shard.action.chars().count(), 140);

        s.merge_patch("r1", &json!({"status": "done"}));
        let shard = &s.snapshot().per_shard["s1"];
        assert_eq!(shard.status, ShardStatus::Completed);
        assert!(shard.anomaly.is_empty());
    }

    #[test]
    fn progress_without_status_keeps_supplied_error() {
        let mut s = session();
        s.set_shard_profiles(&["s1".to_string()]);
        s.merge_patch("r1", &json!({"progress": {"processed": 1}, "error": "timeout"}));
        let shard = &s.snapshot().per_shard["s1"];
        assert_eq!(shard.status, ShardStatus::Error);
        assert_eq!(shard.anomaly, "timeout");

        s.merge_patch("r1", &json!({"stats": {"likes": 1}}));
        assert_eq!(s.snapshot().per_shard["s1"].status, ShardStatus::Running);
    }

    #[test]
    fn patch_profile_routes_directly() {
        let mut s = session();
        s.merge_patch("r1", &json!({"profile": "p7", "stats": {"replies": 3}}));
        let snap = s.snapshot();
        assert_eq!(snap.per_shard["p7"].counters.replies_done, 3);
        assert!(snap.expected_shards.contains(&"p7".to_string()));
        assert!(snap.has_structured_feed);
    }

    #[test]
    fn non_object_patch_does_not_flag_structured_feed() {
        let mut s = session();
        assert!(!s.merge_patch("r1", &json!(42)));
        assert!(!s.snapshot().has_structured_feed);
    }

    #[test]
    fn target_floor_only_rises() {
        let mut s = session();
        s.raise_links_target(50);
        s.raise_links_target(20);
        assert_eq!(s.snapshot().live.links_target, 50);
    }

    #[test]
    fn clear_matches_fresh_session() {
        let mut s = session();
        s.apply_line("A", Channel::Stdout, "[rid:A] [shard-hint] profiles=p1");
        s.apply_line("A", Channel::Stdout, "[Collect] 4/10");
        s.merge_patch("A", &json!({"progress": {"processed": 9}}));
        s.clear();
        assert_eq!(s.snapshot(), session().snapshot());
    }
}
