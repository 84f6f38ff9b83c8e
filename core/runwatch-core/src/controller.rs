//! Per-run lifecycle around a [`Session`].
//!
//! `idle → active → disposed`. Events are only applied while active; anything
//! delivered before `reset` or after `dispose` is dropped. The controller owns
//! the collaborator hooks: the render sink, the optional snapshot pull source,
//! and the feed subscriptions it must release on dispose.

use crate::config::EngineConfig;
use crate::session::Session;
use crate::types::{Channel, ProgressSnapshot};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    Disposed,
}

/// Receives a snapshot after every applied line or patch.
pub trait RenderSink: Send {
    fn render(&self, snapshot: &ProgressSnapshot);
}

impl<F> RenderSink for F
where
    F: Fn(&ProgressSnapshot) + Send,
{
    fn render(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// One-shot backfill from the process-state collaborator.
pub trait SnapshotSource: Send {
    /// Returns the current structured state for `run_id`, if any.
    fn pull_snapshot(&self, run_id: &str) -> Option<Value>;
}

/// A registration with an external push source (line stream or patch stream).
pub trait FeedSubscription: Send {
    fn unsubscribe(&mut self);
}

impl<F> FeedSubscription for F
where
    F: FnMut() + Send,
{
    fn unsubscribe(&mut self) {
        self()
    }
}

pub struct SessionController {
    phase: SessionPhase,
    session: Session,
    render: Option<Box<dyn RenderSink>>,
    snapshot_source: Option<Box<dyn SnapshotSource>>,
    subscriptions: Vec<Box<dyn FeedSubscription>>,
    /// Run ids already backfilled this session.
    pulled_runs: HashSet<String>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(Session::default())
    }
}

impl SessionController {
    pub fn new(session: Session) -> Self {
        Self {
            phase: SessionPhase::Idle,
            session,
            render: None,
            snapshot_source: None,
            subscriptions: Vec::new(),
            pulled_runs: HashSet::new(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(Session::new(config))
    }

    pub fn with_render_sink(mut self, sink: Box<dyn RenderSink>) -> Self {
        self.render = Some(sink);
        self
    }

    pub fn with_snapshot_source(mut self, source: Box<dyn SnapshotSource>) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Registers a feed subscription to release on dispose.
    pub fn attach_subscription(&mut self, subscription: Box<dyn FeedSubscription>) {
        self.subscriptions.push(subscription);
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a new run: wipes all state and becomes active. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.session.clear();
        self.pulled_runs.clear();
        if self.phase != SessionPhase::Active {
            tracing::info!(from = ?self.phase, "Run session activated");
        }
        self.phase = SessionPhase::Active;
        self.emit();
    }

    /// Unsubscribes from every feed and wipes state. Idempotent.
    pub fn dispose(&mut self) {
        if self.phase == SessionPhase::Disposed {
            return;
        }
        for mut subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.session.clear();
        self.pulled_runs.clear();
        self.phase = SessionPhase::Disposed;
        tracing::info!("Run session disposed");
    }

    pub fn set_expected_shard_target(&mut self, target: u64) {
        if !self.is_active() {
            return;
        }
        self.session.raise_links_target(target);
        self.emit();
    }

    pub fn set_shard_profiles(&mut self, shard_ids: &[String]) {
        if !self.is_active() {
            return;
        }
        self.session.set_shard_profiles(shard_ids);
        self.emit();
    }

    /// Marks a run id as this session's own and backfills it once.
    pub fn set_active_run_id(&mut self, run_id: &str) {
        if !self.is_active() || run_id.trim().is_empty() {
            return;
        }
        let run_id = run_id.trim();
        self.session.mark_active_run(run_id);

        if self.pulled_runs.insert(run_id.to_string()) {
            let pulled = self
                .snapshot_source
                .as_ref()
                .and_then(|source| source.pull_snapshot(run_id));
            if let Some(patch) = pulled {
                tracing::debug!(run_id = %run_id, "Backfilling run from pulled snapshot");
                self.session.merge_patch(run_id, &patch);
            }
        }
        self.emit();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feed entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Handles one emitted line. Returns true if the snapshot changed.
    pub fn on_line(&mut self, run_id: &str, channel: Channel, text: &str) -> bool {
        if !self.admits(run_id) {
            return false;
        }
        let applied = self.session.apply_line(run_id, channel, text);
        if applied {
            self.emit();
        }
        applied
    }

    /// Handles one structured state patch. Returns true if it was merged.
    pub fn on_state_patch(&mut self, run_id: &str, patch: &Value) -> bool {
        if !self.admits(run_id) {
            return false;
        }
        let merged = self.session.merge_patch(run_id, patch);
        if merged {
            self.emit();
        }
        merged
    }

    fn admits(&self, run_id: &str) -> bool {
        if !self.is_active() {
            tracing::trace!(
                run_id = %run_id,
                phase = ?self.phase,
                "Ignoring event outside active session"
            );
            return false;
        }
        if !self.session.accepts_run(run_id) {
            tracing::debug!(run_id = %run_id, "Ignoring event from unrelated run");
            return false;
        }
        true
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.session.snapshot()
    }

    fn emit(&self) {
        if let Some(sink) = &self.render {
            sink.render(&self.session.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FixedClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn controller() -> SessionController {
        SessionController::new(Session::default().with_clock(Box::new(FixedClock(5))))
    }

    struct StaticSource {
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotSource for StaticSource {
        fn pull_snapshot(&self, run_id: &str) -> Option<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (run_id == "r1").then(|| json!({"progress": {"processed": 6, "total": 30}}))
        }
    }

    #[test]
    fn idle_controller_ignores_events() {
        let mut c = controller();
        assert!(!c.on_line("r1", Channel::Stdout, "[Collect] 1/2"));
        assert_eq!(c.phase(), SessionPhase::Idle);
        assert_eq!(c.snapshot().live.links_collected, 0);
    }

    #[test]
    fn reset_activates_and_is_reentrant() {
        let mut c = controller();
        c.reset();
        assert!(c.on_line("r1", Channel::Stdout, "[Collect] 1/2"));
        c.reset();
        assert!(c.is_active());
        assert_eq!(c.snapshot().live.links_collected, 0);
    }

    #[test]
    fn dispose_unsubscribes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut c = controller();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            c.attach_subscription(Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }
        c.reset();
        c.dispose();
        c.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.phase(), SessionPhase::Disposed);
        assert!(!c.on_state_patch("r1", &json!({"progress": {"processed": 1}})));
    }

    #[test]
    fn active_run_is_backfilled_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut c = controller().with_snapshot_source(Box::new(StaticSource {
            calls: Arc::clone(&calls),
        }));
        c.reset();
        c.set_active_run_id("r1");
        c.set_active_run_id("r1");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snap = c.snapshot();
        assert_eq!(snap.live.links_collected, 6);
        assert!(snap.has_structured_feed);
    }

    #[test]
    fn armed_filter_drops_unrelated_runs() {
        let mut c = controller();
        c.reset();
        c.set_active_run_id("mine");
        assert!(!c.on_line("other", Channel::Stdout, "[Collect] 9/9"));
        assert!(c.on_line("mine", Channel::Stdout, "[Logger] runId=child"));
        assert!(c.on_line("child", Channel::Stdout, "[Collect] 2/9"));
        assert_eq!(c.snapshot().live.links_collected, 2);
    }

    #[test]
    fn render_sink_sees_every_applied_event() {
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let mut c = controller().with_render_sink(Box::new(move |snap: &ProgressSnapshot| {
            sink_seen.lock().unwrap().push(snap.live.links_collected);
        }));
        c.reset();
        c.on_line("r1", Channel::Stdout, "[Collect] 3/10");
        c.on_line("r1", Channel::Stdout, "   ");
        c.on_state_patch("r1", &json!({"progress": {"processed": 5}}));

        assert_eq!(*seen.lock().unwrap(), vec![0, 3, 5]);
    }

    #[test]
    fn lifecycle_setters_require_active_session() {
        let mut c = controller();
        c.set_expected_shard_target(40);
        c.set_shard_profiles(&["p1".to_string()]);
        assert_eq!(c.snapshot().live.links_target, 0);
        assert!(c.snapshot().expected_shards.is_empty());

        c.reset();
        c.set_expected_shard_target(40);
        c.set_shard_profiles(&["p1".to_string()]);
        assert_eq!(c.snapshot().live.links_target, 40);
        assert_eq!(c.snapshot().expected_shards, vec!["p1".to_string()]);
    }
}
