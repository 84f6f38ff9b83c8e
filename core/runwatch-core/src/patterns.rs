//! Compiled regex patterns for parsing automation log lines.
//!
//! These patterns are compiled once on first use and reused by every session.
//! Update these when the automation CLI changes its log format.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Prefix Stripping Regexes
// ═══════════════════════════════════════════════════════════════════════════════

/// Leading `[rid:<id>]` (or `[run:<id>]`) tag added by the supervisor.
pub static RE_RUN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[(?:rid|run):\s*([A-Za-z0-9._:-]+)\]\s*").unwrap());
pub static RE_TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?|\d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+",
    )
    .unwrap()
});
pub static RE_LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\[\]]{1,64})\]\s*(.*)$").unwrap());
pub static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Run / Shard Association Regexes
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_RUN_ID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:runId|run_id)=([A-Za-z0-9._:-]+)").unwrap());
pub static RE_CHILD_RUN_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:childRunId|child_run_id)=([A-Za-z0-9._:-]+)").unwrap());
pub static RE_SHARD_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[shard-hint\]\s*(?:profiles|shards)\s*=\s*([^\s,]+(?:\s*,\s*[^\s,]+)*)")
        .unwrap()
});
pub static RE_PROFILE_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\bprofile=|\bProfile:\s*)([A-Za-z0-9._-]+)").unwrap());
pub static RE_EVENT_LOG_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'<>|,;=]*(?:events\.jsonl|\.events\.ndjson))(?:[\s"'<>|,;]|$)"#).unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════════
// Status Regexes
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_EXIT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bexit(?:ed)?(?:\s+with)?[\s_]*code[\s:=]*(-?\d+)").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Progress Regexes
// ═══════════════════════════════════════════════════════════════════════════════

/// `[Phase2Collect] 3/50`: any leading tag mentioning "collect".
pub static RE_COLLECT_TAGGED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\[[^\]]*collect[^\]]*\]\s*(\d+)\s*/\s*(\d+)").unwrap());
/// `[links 3/50]` or `[collected: 3/50]` anywhere in the line.
pub static RE_COLLECT_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(?:links|collected)[:\s]\s*(\d+)\s*/\s*(\d+)\]").unwrap());
pub static RE_POST_PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bpost\s*#?\s*(\d+)\s*/\s*(\d+)(?:.*?\b(?:note_?id|post_?id|id)\s*[=:]\s*([A-Za-z0-9_-]+))?",
    )
    .unwrap()
});
pub static RE_COMMENTS_PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bcomments?\s+(?:collected\s+)?(\d+)(?:\s*/\s*(\d+))?").unwrap()
});
pub static RE_SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\d+\s*[.)]\s*(processed|comments|likes|replies)\s*[:=]\s*(\S+)").unwrap()
});
pub static RE_LIKE_ROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[LikeRound\s*#?\s*(\d+)\]").unwrap());
pub static RE_KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_]+)=(-?\d+)").unwrap());
pub static RE_EVIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:evidence:\s*(\d+)\s+files?\s*->\s*|saved\s+(\d+)\s+screenshots?\s+to\s+)(\S+)",
    )
    .unwrap()
});
