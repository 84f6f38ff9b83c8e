//! Captured-log parsing and replay.
//!
//! A capture holds one event per line:
//!
//! - `<run_id>\t<stdout|stderr>\t<text>`: an output line
//! - `<run_id>\tpatch\t<json>`: a state patch, interleaved with the lines
//! - anything else: a stdout line attributed to the default run id
//!
//! Separate patch files are JSONL of `{"run_id": "...", "patch": {...}}` and
//! are applied after the capture.

use runwatch_core::{Channel, Result, RunwatchError, SessionController};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum CapturedEvent {
    Line {
        run_id: String,
        channel: Channel,
        text: String,
    },
    Patch {
        run_id: String,
        patch: Value,
    },
}

#[derive(Debug, Deserialize)]
struct PatchRecord {
    #[serde(default, alias = "runId")]
    run_id: String,
    patch: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub ignored: usize,
}

/// Parses one capture line. Blank lines yield `None`.
///
/// Malformed JSON in an inline patch is an error; the capture is a fixture
/// and a broken one should be reported, not silently skipped.
pub fn parse_capture_line(
    line_no: usize,
    line: &str,
    default_run_id: &str,
) -> Result<Option<CapturedEvent>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut parts = line.splitn(3, '\t');
    if let (Some(run_id), Some(kind), Some(rest)) = (parts.next(), parts.next(), parts.next()) {
        if kind.trim().eq_ignore_ascii_case("patch") {
            let patch = serde_json::from_str(rest).map_err(|e| RunwatchError::MalformedInput {
                line: line_no,
                details: format!("inline patch: {e}"),
            })?;
            return Ok(Some(CapturedEvent::Patch {
                run_id: run_id.trim().to_string(),
                patch,
            }));
        }
        if let Some(channel) = Channel::parse(kind) {
            return Ok(Some(CapturedEvent::Line {
                run_id: run_id.trim().to_string(),
                channel,
                text: rest.to_string(),
            }));
        }
    }

    Ok(Some(CapturedEvent::Line {
        run_id: default_run_id.to_string(),
        channel: Channel::Stdout,
        text: line.to_string(),
    }))
}

pub fn parse_capture(content: &str, default_run_id: &str) -> Result<Vec<CapturedEvent>> {
    let mut events = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if let Some(event) = parse_capture_line(i + 1, line, default_run_id)? {
            events.push(event);
        }
    }
    Ok(events)
}

pub fn parse_patch_file(content: &str, default_run_id: &str) -> Result<Vec<CapturedEvent>> {
    let mut events = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: PatchRecord =
            serde_json::from_str(line).map_err(|e| RunwatchError::MalformedInput {
                line: i + 1,
                details: e.to_string(),
            })?;
        let run_id = if record.run_id.trim().is_empty() {
            default_run_id.to_string()
        } else {
            record.run_id
        };
        events.push(CapturedEvent::Patch {
            run_id,
            patch: record.patch,
        });
    }
    Ok(events)
}

/// Feeds events to the controller in order.
pub fn replay(controller: &mut SessionController, events: &[CapturedEvent]) -> ReplayStats {
    let mut stats = ReplayStats::default();
    for event in events {
        let applied = match event {
            CapturedEvent::Line {
                run_id,
                channel,
                text,
            } => controller.on_line(run_id, *channel, text),
            CapturedEvent::Patch { run_id, patch } => controller.on_state_patch(run_id, patch),
        };
        if applied {
            stats.applied += 1;
        } else {
            stats.ignored += 1;
        }
    }
    tracing::debug!(applied = stats.applied, ignored = stats.ignored, "Replay batch finished");
    stats
}

pub fn read_input(path: &std::path::Path) -> Result<String> {
    fs_err::read_to_string(path).map_err(|source| RunwatchError::Io {
        context: "reading replay input".to_string(),
        source,
    })
}
