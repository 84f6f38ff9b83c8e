//! Structured state-patch parsing.
//!
//! Patches arrive loosely typed: counters may be nested under `progress` /
//! `stats` or flattened at the top level, keys may be camelCase or snake_case,
//! and numbers may be strings. Anything unrecognized is ignored.

use serde_json::{Map, Value};

/// Status carried by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    Running,
    Error,
    Completed,
}

impl PatchStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "failed" | "failure" | "error" | "errored" => Some(PatchStatus::Error),
            "completed" | "complete" | "done" | "success" | "succeeded" => {
                Some(PatchStatus::Completed)
            }
            "running" | "started" | "in_progress" | "active" => Some(PatchStatus::Running),
            _ => None,
        }
    }
}

/// Facts recognized in one patch. `None` means the field was absent or unusable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchFacts {
    pub links_collected: Option<u64>,
    pub links_target: Option<u64>,
    pub posts_processed: Option<u64>,
    pub posts_target: Option<u64>,
    pub comments_total: Option<u64>,
    pub likes_done: Option<u64>,
    pub likes_skipped: Option<u64>,
    pub replies_done: Option<u64>,
    pub status: Option<PatchStatus>,
    /// The raw status string, used as anomaly text when nothing better exists.
    pub status_text: Option<String>,
    pub error_text: Option<String>,
    /// `progress` or `stats` was present.
    pub has_progress: bool,
    pub phase: Option<String>,
    pub message: Option<String>,
    pub run_id: Option<String>,
    pub profile: Option<String>,
}

impl PatchFacts {
    /// Anomaly text for an error status: error, then message, then status.
    pub fn anomaly_text(&self) -> String {
        self.error_text
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.status_text.clone())
            .unwrap_or_default()
    }
}

const LINKS_COLLECTED_NESTED: &[&str] =
    &["processed", "collected", "linksCollected", "links_collected"];
const LINKS_COLLECTED_FLAT: &[&str] =
    &["linksCollected", "links_collected", "collected", "processed"];
const LINKS_TARGET_NESTED: &[&str] = &["total", "target", "linksTarget", "links_target"];
const LINKS_TARGET_FLAT: &[&str] = &["linksTarget", "links_target", "target", "total"];
const POSTS_PROCESSED_NESTED: &[&str] =
    &["postsProcessed", "posts_processed", "posts", "processed"];
const POSTS_PROCESSED_FLAT: &[&str] = &["postsProcessed", "posts_processed"];
const POSTS_TARGET: &[&str] = &["postsTarget", "posts_target"];
const COMMENTS: &[&str] = &["commentsCollected", "comments_collected", "comments"];
const LIKES: &[&str] = &["likesDone", "likes_done", "likes", "liked"];
const LIKES_SKIPPED_NESTED: &[&str] = &["likesSkipped", "likes_skipped", "skipped"];
const LIKES_SKIPPED_FLAT: &[&str] = &["likesSkipped", "likes_skipped"];
const REPLIES: &[&str] = &["repliesDone", "replies_done", "replies", "replied"];

/// Parses a patch. Returns `None` only when the payload is not an object.
pub fn parse_patch(patch: &Value) -> Option<PatchFacts> {
    let root = patch.as_object()?;
    let progress = root.get("progress").and_then(Value::as_object);
    let stats = root.get("stats").and_then(Value::as_object);

    let status_text = string_field(root, &["status", "state"]);
    let status = status_text.as_deref().and_then(PatchStatus::parse);

    Some(PatchFacts {
        links_collected: lookup(progress, LINKS_COLLECTED_NESTED, root, LINKS_COLLECTED_FLAT),
        links_target: lookup(progress, LINKS_TARGET_NESTED, root, LINKS_TARGET_FLAT),
        posts_processed: lookup(stats, POSTS_PROCESSED_NESTED, root, POSTS_PROCESSED_FLAT),
        posts_target: lookup(stats, POSTS_TARGET, root, POSTS_TARGET),
        comments_total: lookup(stats, COMMENTS, root, COMMENTS),
        likes_done: lookup(stats, LIKES, root, LIKES),
        likes_skipped: lookup(stats, LIKES_SKIPPED_NESTED, root, LIKES_SKIPPED_FLAT),
        replies_done: lookup(stats, REPLIES, root, REPLIES),
        status,
        status_text,
        error_text: error_field(root),
        has_progress: progress.is_some() || stats.is_some(),
        phase: string_field(root, &["phase"]),
        message: string_field(root, &["message", "step"]),
        run_id: string_field(root, &["runId", "run_id"]),
        profile: string_field(root, &["profile", "profileId", "profile_id", "shard"]),
    })
}

fn lookup(
    section: Option<&Map<String, Value>>,
    nested_keys: &[&str],
    root: &Map<String, Value>,
    flat_keys: &[&str],
) -> Option<u64> {
    section
        .and_then(|s| first_count(s, nested_keys))
        .or_else(|| first_count(root, flat_keys))
}

fn first_count(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| map.get(*k).and_then(as_count))
}

/// Floors a JSON number (or numeric string). Negative and non-finite values are dropped.
pub fn as_count(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Some(u);
            }
            n.as_f64()?
        }
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    Some(n.floor() as u64)
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        map.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn error_field(root: &Map<String, Value>) -> Option<String> {
    match root.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Object(obj)) => string_field(obj, &["message", "error"]),
        _ => string_field(root, &["errorMessage", "error_message"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_progress_shape() {
        let facts = parse_patch(&json!({"progress": {"processed": 12, "total": 60}})).unwrap();
        assert_eq!(facts.links_collected, Some(12));
        assert_eq!(facts.links_target, Some(60));
        assert!(facts.has_progress);
        assert_eq!(facts.status, None);
    }

    #[test]
    fn flattened_shape_and_camel_case() {
        let facts = parse_patch(&json!({
            "linksCollected": "7",
            "linksTarget": 30.9,
            "postsProcessed": 2,
            "likes": 5
        }))
        .unwrap();
        assert_eq!(facts.links_collected, Some(7));
        assert_eq!(facts.links_target, Some(30));
        assert_eq!(facts.posts_processed, Some(2));
        assert_eq!(facts.likes_done, Some(5));
        assert!(!facts.has_progress);
    }

    #[test]
    fn stats_section_maps_to_post_counters() {
        let facts = parse_patch(&json!({
            "stats": {"processed": 4, "comments": 31, "replies": 2, "skipped": 3}
        }))
        .unwrap();
        assert_eq!(facts.posts_processed, Some(4));
        assert_eq!(facts.links_collected, None);
        assert_eq!(facts.comments_total, Some(31));
        assert_eq!(facts.replies_done, Some(2));
        assert_eq!(facts.likes_skipped, Some(3));
    }

    #[test]
    fn bad_numbers_are_skipped_individually() {
        let facts = parse_patch(&json!({
            "progress": {"processed": -3, "total": "lots"},
            "stats": {"likes": 2}
        }))
        .unwrap();
        assert_eq!(facts.links_collected, None);
        assert_eq!(facts.links_target, None);
        assert_eq!(facts.likes_done, Some(2));
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(PatchStatus::parse("FAILED"), Some(PatchStatus::Error));
        assert_eq!(PatchStatus::parse("success"), Some(PatchStatus::Completed));
        assert_eq!(PatchStatus::parse("queued"), None);
    }

    #[test]
    fn anomaly_text_prefers_error_then_message_then_status() {
        let facts = parse_patch(&json!({"status": "failed"})).unwrap();
        assert_eq!(facts.anomaly_text(), "failed");

        let facts = parse_patch(&json!({"status": "error", "message": "captcha"})).unwrap();
        assert_eq!(facts.anomaly_text(), "captcha");

        let facts = parse_patch(&json!({
            "status": "error",
            "message": "step 3",
            "error": {"message": "login expired"}
        }))
        .unwrap();
        assert_eq!(facts.anomaly_text(), "login expired");
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(parse_patch(&json!([1, 2])).is_none());
        assert!(parse_patch(&json!("done")).is_none());
        assert!(parse_patch(&Value::Null).is_none());
    }

    #[test]
    fn run_and_profile_hints() {
        let facts = parse_patch(&json!({"runId": "r9", "profileId": "p2", "step": "scrolling"}))
            .unwrap();
        assert_eq!(facts.run_id.as_deref(), Some("r9"));
        assert_eq!(facts.profile.as_deref(), Some("p2"));
        assert_eq!(facts.message.as_deref(), Some("scrolling"));
    }
}
