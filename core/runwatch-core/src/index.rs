//! Run id ↔ shard id bookkeeping.
//!
//! Built incrementally from hint lines, child-run markers and lifecycle calls.
//! Nothing is removed until the whole index is cleared on session reset.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunShardIndex {
    run_to_shard: HashMap<String, String>,
    /// Shard a parent run is currently driving. Children announced later inherit it.
    parent_run_current_shard: HashMap<String, String>,
    /// Children whose parent had no shard yet when they were announced.
    child_parent: HashMap<String, String>,
    /// Insertion-ordered, deduplicated.
    expected_shard_profiles: Vec<String>,
    active_run_ids: HashSet<String>,
    /// The activity filter only applies once a run id was explicitly marked active.
    filter_armed: bool,
}

impl RunShardIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn expected_shards(&self) -> &[String] {
        &self.expected_shard_profiles
    }

    pub fn is_expected(&self, shard_id: &str) -> bool {
        self.expected_shard_profiles.iter().any(|s| s == shard_id)
    }

    /// Adds a shard to the expected set. Returns true if it was new.
    pub fn expect_shard(&mut self, shard_id: &str) -> bool {
        if shard_id.is_empty() || self.is_expected(shard_id) {
            return false;
        }
        self.expected_shard_profiles.push(shard_id.to_string());
        true
    }

    /// Replaces the expected set, keeping the first occurrence of duplicates.
    pub fn replace_expected(&mut self, shard_ids: &[String]) {
        self.expected_shard_profiles.clear();
        for id in shard_ids {
            self.expect_shard(id.trim());
        }
    }

    pub fn sole_expected(&self) -> Option<&str> {
        match self.expected_shard_profiles.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Records `shard_id` as the shard `parent_run_id` is currently driving.
    pub fn set_parent_shard(&mut self, parent_run_id: &str, shard_id: &str) {
        if parent_run_id.is_empty() || shard_id.is_empty() {
            return;
        }
        self.parent_run_current_shard
            .insert(parent_run_id.to_string(), shard_id.to_string());
    }

    pub fn map_run(&mut self, run_id: &str, shard_id: &str) {
        if run_id.is_empty() || shard_id.is_empty() {
            return;
        }
        self.run_to_shard.insert(run_id.to_string(), shard_id.to_string());
    }

    /// Maps `child_run_id` to the parent's current shard.
    ///
    /// If the parent has no shard yet, the link is remembered and resolved
    /// lazily once the parent is hinted. Returns the inherited shard, if any.
    pub fn inherit_child(&mut self, parent_run_id: &str, child_run_id: &str) -> Option<String> {
        if parent_run_id.is_empty() || child_run_id.is_empty() || parent_run_id == child_run_id {
            return None;
        }
        match self.shard_for_parent(parent_run_id) {
            Some(shard) => {
                self.map_run(child_run_id, &shard);
                Some(shard)
            }
            None => {
                self.child_parent
                    .insert(child_run_id.to_string(), parent_run_id.to_string());
                None
            }
        }
    }

    fn shard_for_parent(&self, parent_run_id: &str) -> Option<String> {
        self.parent_run_current_shard
            .get(parent_run_id)
            .or_else(|| self.run_to_shard.get(parent_run_id))
            .cloned()
    }

    /// Direct mapping for a run id, including deferred child links.
    pub fn mapped_shard(&self, run_id: &str) -> Option<String> {
        if let Some(shard) = self.run_to_shard.get(run_id) {
            return Some(shard.clone());
        }
        self.child_parent
            .get(run_id)
            .and_then(|parent| self.shard_for_parent(parent))
    }

    /// Resolves which shard an event belongs to.
    ///
    /// Order: inline run id mapping, marker run id mapping, marker run id as a
    /// parent, the single expected shard, otherwise none.
    pub fn resolve(
        &self,
        inline_run_id: Option<&str>,
        marker_run_id: Option<&str>,
    ) -> Option<String> {
        if let Some(shard) = inline_run_id.and_then(|run| self.mapped_shard(run)) {
            return Some(shard);
        }
        if let Some(marker) = marker_run_id {
            if let Some(shard) = self.mapped_shard(marker) {
                return Some(shard);
            }
            if let Some(shard) = self.parent_run_current_shard.get(marker) {
                return Some(shard.clone());
            }
        }
        self.sole_expected().map(str::to_string)
    }

    /// Maps every known run id without a shard to the single expected shard.
    pub fn seed_single_shard(&mut self) {
        let Some(shard) = self.sole_expected().map(str::to_string) else {
            return;
        };
        let unmapped: Vec<String> = self
            .active_run_ids
            .iter()
            .filter(|run| !self.run_to_shard.contains_key(*run))
            .cloned()
            .collect();
        for run in unmapped {
            self.map_run(&run, &shard);
            self.parent_run_current_shard
                .entry(run)
                .or_insert_with(|| shard.clone());
        }
    }

    /// Records a run id seen in this session's own output.
    pub fn mark_seen(&mut self, run_id: &str) {
        if !run_id.is_empty() {
            self.active_run_ids.insert(run_id.to_string());
        }
    }

    /// Marks a run id as belonging to this session and arms the activity filter.
    pub fn mark_active(&mut self, run_id: &str) {
        if run_id.is_empty() {
            return;
        }
        self.filter_armed = true;
        self.active_run_ids.insert(run_id.to_string());
    }

    /// Whether an event from `run_id` belongs to this session.
    pub fn accepts(&self, run_id: &str) -> bool {
        if !self.filter_armed || run_id.is_empty() {
            return true;
        }
        self.active_run_ids.contains(run_id) || self.mapped_shard(run_id).is_some()
    }

    /// Every shard id referenced by a mapping, for lazy aggregate creation.
    pub fn referenced_shards(&self) -> impl Iterator<Item = &String> {
        self.run_to_shard
            .values()
            .chain(self.parent_run_current_shard.values())
            .chain(self.expected_shard_profiles.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_parent_current_shard() {
        let mut index = RunShardIndex::new();
        index.expect_shard("p1");
        index.set_parent_shard("r1", "p1");

        assert_eq!(index.inherit_child("r1", "c1").as_deref(), Some("p1"));
        assert_eq!(index.resolve(None, Some("c1")).as_deref(), Some("p1"));
    }

    #[test]
    fn child_announced_before_hint_resolves_later() {
        let mut index = RunShardIndex::new();
        assert_eq!(index.inherit_child("r1", "c1"), None);

        index.expect_shard("p1");
        index.expect_shard("p2");
        index.set_parent_shard("r1", "p2");
        assert_eq!(index.resolve(Some("c1"), None).as_deref(), Some("p2"));
    }

    #[test]
    fn resolution_prefers_inline_over_marker() {
        let mut index = RunShardIndex::new();
        index.expect_shard("p1");
        index.expect_shard("p2");
        index.map_run("a", "p1");
        index.map_run("b", "p2");

        assert_eq!(index.resolve(Some("b"), Some("a")).as_deref(), Some("p2"));
        assert_eq!(index.resolve(Some("zzz"), Some("a")).as_deref(), Some("p1"));
    }

    #[test]
    fn single_expected_shard_is_the_fallback() {
        let mut index = RunShardIndex::new();
        assert_eq!(index.resolve(None, Some("x")), None);
        index.expect_shard("only");
        assert_eq!(index.resolve(None, Some("x")).as_deref(), Some("only"));
        index.expect_shard("second");
        assert_eq!(index.resolve(None, Some("x")), None);
    }

    #[test]
    fn expected_set_is_deduplicated_in_order() {
        let mut index = RunShardIndex::new();
        index.replace_expected(&["b".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(index.expected_shards(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn filter_is_open_until_armed() {
        let mut index = RunShardIndex::new();
        index.mark_seen("child");
        assert!(index.accepts("stranger"));

        index.mark_active("mine");
        assert!(index.accepts("mine"));
        assert!(index.accepts("child"));
        assert!(index.accepts(""));
        assert!(!index.accepts("stranger"));
    }

    #[test]
    fn seeding_maps_known_runs_to_the_only_shard() {
        let mut index = RunShardIndex::new();
        index.mark_active("r1");
        index.replace_expected(&["p1".to_string()]);
        index.seed_single_shard();
        assert_eq!(index.mapped_shard("r1").as_deref(), Some("p1"));
    }
}
