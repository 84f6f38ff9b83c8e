//! # runwatch-core
//!
//! Live progress aggregation for multi-shard automation runs. Consumes the raw
//! log lines and structured state patches a supervisor receives from its child
//! processes and folds them into per-shard and global progress snapshots.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime, no threads. Every mutation happens inside
//!   `on_line` / `on_state_patch`.
//! - **Never fails on input**: Garbled lines and patches are dropped, not reported.
//! - **Counters only go up**: Duplicate and out-of-order facts converge (max-merge).
//! - **FFI-ready**: UniFFI annotations enable Swift, Kotlin, Python bindings.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use runwatch_core::{Channel, SessionController};
//!
//! let mut controller = SessionController::default();
//! controller.reset();
//! controller.on_line("r1", Channel::Stdout, "[rid:r1] [shard-hint] profiles=p1");
//! controller.on_line("r1", Channel::Stdout, "[Phase2Collect] 3/50");
//! let snapshot = controller.snapshot();
//! ```

// UniFFI scaffolding for Swift/Kotlin/Python bindings
uniffi::setup_scaffolding!();

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod patch;
pub mod patterns;
pub mod session;
pub mod types;

pub use aggregate::{compute_global, RoundLedger, RoundTally, SummaryField};
pub use classify::{ErrorClassifier, VocabularyClassifier, ERROR_VOCABULARY};
pub use config::*;
pub use controller::{FeedSubscription, RenderSink, SessionController, SessionPhase, SnapshotSource};
pub use engine::RunwatchEngine;
pub use error::{Result, RunwatchError, RunwatchFfiError};
pub use extract::{extract_line, Effect, LineExtraction};
pub use index::RunShardIndex;
pub use patch::{parse_patch, PatchFacts, PatchStatus};
pub use session::{Clock, FixedClock, Session, SystemClock};
pub use types::*;
