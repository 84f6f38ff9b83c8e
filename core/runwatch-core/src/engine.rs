//! RunwatchEngine - the FFI entry point for run-progress hosts.
//!
//! Wraps a [`SessionController`] in a single mutex so Swift/Kotlin/Python
//! supervisors can push lines and patches from any thread. State patches cross
//! the boundary as JSON strings.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use runwatch_core::{Channel, RunwatchEngine};
//!
//! let engine = RunwatchEngine::new();
//! engine.reset();
//! engine.set_shard_profiles(vec!["p1".into()]);
//! engine.on_line("r1".into(), Channel::Stdout, "[Phase2Collect] 3/50".into());
//! let snapshot = engine.snapshot();
//! ```

use crate::config::{load_engine_config_strict, EngineConfig};
use crate::controller::SessionController;
use crate::error::RunwatchFfiError;
use crate::types::{Channel, ProgressSnapshot};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[derive(uniffi::Object)]
pub struct RunwatchEngine {
    controller: Mutex<SessionController>,
}

impl RunwatchEngine {
    /// Wraps an already configured controller. Not exposed to FFI.
    pub fn from_controller(controller: SessionController) -> Self {
        Self {
            controller: Mutex::new(controller),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionController> {
        // A panicking render sink must not take the whole engine down.
        self.controller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RunwatchEngine {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

#[uniffi::export]
impl RunwatchEngine {
    /// Creates an engine with default limits plus environment overrides.
    #[uniffi::constructor]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default().with_env_overrides())
    }

    #[uniffi::constructor]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::from_controller(SessionController::with_config(config))
    }

    /// Creates an engine from a JSON config file. Fails if the file is missing or invalid.
    #[uniffi::constructor]
    pub fn from_config_file(path: String) -> Result<Self, RunwatchFfiError> {
        let config = load_engine_config_strict(&PathBuf::from(path))?.with_env_overrides();
        Ok(Self::with_config(config))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle API
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn set_expected_shard_target(&self, target: u64) {
        self.lock().set_expected_shard_target(target);
    }

    pub fn set_shard_profiles(&self, shard_ids: Vec<String>) {
        self.lock().set_shard_profiles(&shard_ids);
    }

    pub fn set_active_run_id(&self, run_id: String) {
        self.lock().set_active_run_id(&run_id);
    }

    pub fn dispose(&self) {
        self.lock().dispose();
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_active()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Feed API
    // ─────────────────────────────────────────────────────────────────────────────

    /// Returns true if the line changed the snapshot.
    pub fn on_line(&self, run_id: String, channel: Channel, text: String) -> bool {
        self.lock().on_line(&run_id, channel, &text)
    }

    /// Merges a JSON state patch. Unparseable JSON is dropped and returns false.
    pub fn on_state_patch_json(&self, run_id: String, patch_json: String) -> bool {
        match serde_json::from_str::<serde_json::Value>(&patch_json) {
            Ok(patch) => self.lock().on_state_patch(&run_id, &patch),
            Err(e) => {
                tracing::debug!(run_id = %run_id, error = %e, "Dropping unparseable state patch");
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Render API
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }

    pub fn snapshot_json(&self) -> Result<String, RunwatchFfiError> {
        serde_json::to_string(&self.snapshot()).map_err(|e| RunwatchFfiError::from(e.to_string()))
    }
}
