//! Line extraction: one raw log line in, a list of effects out.
//!
//! Extraction is a pure, ordered dispatch over `(pattern, handler)` rules.
//! Handlers never touch session state; they describe what should change and
//! the session applies those effects. A line that matches nothing yields only
//! the generic phase/status effects, and an empty line yields nothing.

mod progress;

use crate::aggregate::{truncate_chars, RoundTally, SummaryField};
use crate::classify::ErrorClassifier;
use crate::config::EngineConfig;
use crate::patterns::*;
use crate::types::{Channel, ShardStatus};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// A single fact extracted from a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A run id that belongs to this session.
    SeenRun(String),
    /// Shards the line's parent run is driving; the last one becomes current.
    ShardHint(Vec<String>),
    /// A run spawned by the line's parent run.
    ChildRun(String),
    EventLogPath(String),
    Phase(String),
    Action(String),
    Status {
        status: ShardStatus,
        anomaly: Option<String>,
    },
    Links {
        collected: Option<u64>,
        target: Option<u64>,
    },
    CurrentPost {
        index: u64,
        target: Option<u64>,
        post_id: Option<String>,
    },
    CurrentComments {
        collected: Option<u64>,
        target: Option<u64>,
    },
    Summary {
        field: SummaryField,
        value: u64,
    },
    LikeRound {
        round: u32,
        tally: RoundTally,
        total: Option<u64>,
    },
    Evidence {
        count: u64,
        directory: String,
    },
}

impl Effect {
    /// Effects that only touch the run/shard index.
    pub fn is_association(&self) -> bool {
        matches!(
            self,
            Effect::SeenRun(_) | Effect::ShardHint(_) | Effect::ChildRun(_)
        )
    }
}

/// Result of extracting one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineExtraction {
    pub effects: Vec<Effect>,
    /// Run id from a leading `[rid:...]` tag.
    pub tag_run_id: Option<String>,
    /// First `runId=` token in the line.
    pub inline_run_id: Option<String>,
    /// Run id that owns this line: tag, then callback run id, then the hint.
    pub parent_run_id: Option<String>,
}

impl LineExtraction {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Everything a rule handler may look at.
pub(crate) struct LineContext<'a> {
    channel: Channel,
    /// Prefix-stripped line.
    body: &'a str,
    parent_run_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// The trimmed line including any `[rid:...]` prefix.
    Raw,
    /// The line with run tag and timestamp stripped.
    Body,
}

type Handler = fn(&Captures<'_>, &LineContext<'_>, &mut Vec<Effect>);

struct Rule {
    name: &'static str,
    pattern: &'static Lazy<Regex>,
    scope: Scope,
    /// Apply to every match instead of the first one.
    every_match: bool,
    handler: Handler,
}

/// Association rules, in priority order. Phase/status derivation runs after
/// these and the progress sub-parsers run last.
static ASSOCIATION_RULES: &[Rule] = &[
    Rule {
        name: "run_id_token",
        pattern: &RE_RUN_ID_TOKEN,
        scope: Scope::Raw,
        every_match: true,
        handler: on_run_id_token,
    },
    Rule {
        name: "shard_hint",
        pattern: &RE_SHARD_HINT,
        scope: Scope::Body,
        every_match: false,
        handler: on_shard_hint,
    },
    Rule {
        name: "profile_inline",
        pattern: &RE_PROFILE_INLINE,
        scope: Scope::Body,
        every_match: false,
        handler: on_profile_inline,
    },
    Rule {
        name: "child_run_inherit",
        pattern: &RE_RUN_ID_TOKEN,
        scope: Scope::Raw,
        every_match: true,
        handler: on_child_run,
    },
    Rule {
        name: "child_run_explicit",
        pattern: &RE_CHILD_RUN_TOKEN,
        scope: Scope::Raw,
        every_match: true,
        handler: on_explicit_child_run,
    },
    Rule {
        name: "event_log_path",
        pattern: &RE_EVENT_LOG_PATH,
        scope: Scope::Body,
        every_match: false,
        handler: on_event_log_path,
    },
];

/// Names of all rules in evaluation order.
pub fn rule_names() -> Vec<&'static str> {
    ASSOCIATION_RULES
        .iter()
        .map(|r| r.name)
        .chain(std::iter::once("phase_status"))
        .chain(progress::PROGRESS_RULES.iter().map(|r| r.name))
        .collect()
}

/// Extracts effects from one line.
///
/// `run_id` is the run the supervisor attributed the line to (may be empty);
/// `parent_hint` is the last parent run the session saw, used when neither a
/// tag nor a callback run id is available.
pub fn extract_line(
    run_id: &str,
    channel: Channel,
    text: &str,
    parent_hint: Option<&str>,
    config: &EngineConfig,
    classifier: &dyn ErrorClassifier,
) -> LineExtraction {
    let raw = text.trim();
    if raw.is_empty() {
        return LineExtraction::default();
    }

    let (tag_run_id, after_tag) = match RE_RUN_TAG.captures(raw) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0, |m| m.end());
            (caps.get(1).map(|m| m.as_str()), &raw[whole..])
        }
        None => (None, raw),
    };
    let body = match RE_TIMESTAMP_PREFIX.find(after_tag) {
        Some(m) => &after_tag[m.end()..],
        None => after_tag,
    }
    .trim();

    let callback_run = Some(run_id.trim()).filter(|r| !r.is_empty());
    let parent_run_id = tag_run_id
        .or(callback_run)
        .or(parent_hint.filter(|r| !r.is_empty()));

    let ctx = LineContext {
        channel,
        body,
        parent_run_id,
    };

    let mut effects = Vec::new();
    if let Some(tag) = tag_run_id {
        effects.push(Effect::SeenRun(tag.to_string()));
    }
    run_rules(ASSOCIATION_RULES, raw, &ctx, &mut effects);
    derive_phase_status(&ctx, config, classifier, &mut effects);
    run_rules(progress::PROGRESS_RULES, raw, &ctx, &mut effects);

    LineExtraction {
        effects,
        tag_run_id: tag_run_id.map(str::to_string),
        inline_run_id: RE_RUN_ID_TOKEN
            .captures(raw)
            .map(|caps| caps[1].to_string()),
        parent_run_id: parent_run_id.map(str::to_string),
    }
}

fn run_rules(rules: &[Rule], raw: &str, ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    for rule in rules {
        let target = match rule.scope {
            Scope::Raw => raw,
            Scope::Body => ctx.body,
        };
        if rule.every_match {
            for caps in rule.pattern.captures_iter(target) {
                tracing::trace!(rule = rule.name, "Line rule matched");
                (rule.handler)(&caps, ctx, effects);
            }
        } else if let Some(caps) = rule.pattern.captures(target) {
            tracing::trace!(rule = rule.name, "Line rule matched");
            (rule.handler)(&caps, ctx, effects);
        }
    }
}

/// Parses a captured count; overflow or junk skips just that field.
pub(crate) fn parse_count(caps: &Captures<'_>, group: usize) -> Option<u64> {
    caps.get(group).and_then(|m| m.as_str().parse::<u64>().ok())
}

/// Collapses runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Association Handlers
// ═══════════════════════════════════════════════════════════════════════════════

fn on_run_id_token(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    effects.push(Effect::SeenRun(caps[1].to_string()));
}

fn on_shard_hint(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let shards: Vec<String> = caps[1]
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if !shards.is_empty() {
        effects.push(Effect::ShardHint(shards));
    }
}

fn on_profile_inline(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    effects.push(Effect::ShardHint(vec![caps[1].to_string()]));
}

fn on_child_run(caps: &Captures<'_>, ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let run = &caps[1];
    if ctx.parent_run_id.is_some_and(|parent| parent != run) {
        effects.push(Effect::ChildRun(run.to_string()));
    }
}

fn on_explicit_child_run(caps: &Captures<'_>, ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let run = caps[1].to_string();
    effects.push(Effect::SeenRun(run.clone()));
    if ctx.parent_run_id.is_some_and(|parent| parent != run) {
        effects.push(Effect::ChildRun(run));
    }
}

fn on_event_log_path(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    effects.push(Effect::EventLogPath(caps[1].to_string()));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Phase / Action / Status
// ═══════════════════════════════════════════════════════════════════════════════

fn derive_phase_status(
    ctx: &LineContext<'_>,
    config: &EngineConfig,
    classifier: &dyn ErrorClassifier,
    effects: &mut Vec<Effect>,
) {
    let remainder = match RE_LEADING_TAG.captures(ctx.body) {
        Some(caps) => {
            let phase = caps[1].trim();
            if !phase.is_empty() {
                effects.push(Effect::Phase(phase.to_string()));
            }
            caps.get(2).map_or("", |m| m.as_str())
        }
        None => ctx.body,
    };

    let action = truncate_chars(
        &collapse_whitespace(remainder),
        config.action_max_chars as usize,
    );
    if !action.is_empty() {
        effects.push(Effect::Action(action.clone()));
    }

    if classifier.looks_like_error(ctx.channel, ctx.body) {
        let anomaly = if action.is_empty() {
            truncate_chars(&collapse_whitespace(ctx.body), config.action_max_chars as usize)
        } else {
            action
        };
        effects.push(Effect::Status {
            status: ShardStatus::Error,
            anomaly: Some(anomaly),
        });
    } else {
        effects.push(Effect::Status {
            status: ShardStatus::Running,
            anomaly: None,
        });
    }
}
