//! Domain progress sub-parsers: link collection, per-post progress, summary
//! totals, rate-limited like rounds and evidence folders.

use super::{parse_count, Effect, LineContext, Rule, Scope};
use crate::aggregate::{RoundTally, SummaryField};
use crate::patterns::*;
use regex::Captures;

pub(super) static PROGRESS_RULES: &[Rule] = &[
    Rule {
        name: "link_collect_tagged",
        pattern: &RE_COLLECT_TAGGED,
        scope: Scope::Body,
        every_match: false,
        handler: on_links,
    },
    Rule {
        name: "link_collect_bracket",
        pattern: &RE_COLLECT_BRACKET,
        scope: Scope::Body,
        every_match: false,
        handler: on_links,
    },
    Rule {
        name: "current_post",
        pattern: &RE_POST_PROGRESS,
        scope: Scope::Body,
        every_match: false,
        handler: on_current_post,
    },
    Rule {
        name: "current_comments",
        pattern: &RE_COMMENTS_PROGRESS,
        scope: Scope::Body,
        every_match: false,
        handler: on_current_comments,
    },
    Rule {
        name: "summary_total",
        pattern: &RE_SUMMARY_LINE,
        scope: Scope::Body,
        every_match: false,
        handler: on_summary,
    },
    Rule {
        name: "like_round",
        pattern: &RE_LIKE_ROUND,
        scope: Scope::Body,
        every_match: false,
        handler: on_like_round,
    },
    Rule {
        name: "evidence_path",
        pattern: &RE_EVIDENCE,
        scope: Scope::Body,
        every_match: false,
        handler: on_evidence,
    },
];

fn on_links(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let collected = parse_count(caps, 1);
    let target = parse_count(caps, 2);
    if collected.is_some() || target.is_some() {
        effects.push(Effect::Links { collected, target });
    }
}

fn on_current_post(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let Some(index) = parse_count(caps, 1) else {
        return;
    };
    effects.push(Effect::CurrentPost {
        index,
        target: parse_count(caps, 2),
        post_id: caps.get(3).map(|m| m.as_str().to_string()),
    });
}

fn on_current_comments(caps: &Captures<'_>, ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    // Numbered summaries ("2. comments = 40") are totals, not per-post progress.
    if RE_SUMMARY_LINE.is_match(ctx.body) {
        return;
    }
    let collected = parse_count(caps, 1);
    let target = parse_count(caps, 2);
    if collected.is_some() || target.is_some() {
        effects.push(Effect::CurrentComments { collected, target });
    }
}

fn on_summary(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let Some(field) = SummaryField::parse(&caps[1]) else {
        return;
    };
    if let Some(value) = parse_count(caps, 2) {
        effects.push(Effect::Summary { field, value });
    }
}

fn on_like_round(caps: &Captures<'_>, ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let Some(round) = caps[1].parse::<u32>().ok() else {
        return;
    };

    let mut tally = RoundTally::default();
    let mut total = None;
    for kv in RE_KEY_VALUE.captures_iter(ctx.body) {
        let Ok(value) = kv[2].parse::<u64>() else {
            continue;
        };
        match kv[1].to_ascii_lowercase().as_str() {
            "liked" | "likes" => tally.liked = value,
            "dup" | "duplicate" | "skipped_dup" => tally.duplicate = value,
            "done" | "already" | "already_done" | "skipped_done" => tally.already_done = value,
            "limited" | "rate_limited" | "skipped_limited" => tally.rate_limited = value,
            "total" | "total_liked" => total = Some(value),
            _ => {}
        }
    }

    effects.push(Effect::LikeRound { round, tally, total });
    if tally.rate_limited > 0 {
        effects.push(Effect::Action(format!(
            "like round {}: {} rate-limited",
            round, tally.rate_limited
        )));
    }
}

fn on_evidence(caps: &Captures<'_>, _ctx: &LineContext<'_>, effects: &mut Vec<Effect>) {
    let Some(count) = parse_count(caps, 1).or_else(|| parse_count(caps, 2)) else {
        return;
    };
    let directory = caps[3].trim_end_matches(&['.', ',', ';'][..]).to_string();
    if !directory.is_empty() {
        effects.push(Effect::Evidence { count, directory });
    }
}

#[cfg(test)]
mod tests {
    use crate::aggregate::{RoundTally, SummaryField};
    use crate::classify::VocabularyClassifier;
    use crate::config::EngineConfig;
    use crate::extract::{extract_line, Effect};
    use crate::types::Channel;

    fn effects(text: &str) -> Vec<Effect> {
        extract_line(
            "A",
            Channel::Stdout,
            text,
            None,
            &EngineConfig::default(),
            &VocabularyClassifier::default(),
        )
        .effects
    }

    #[test]
    fn tagged_collect_progress() {
        assert!(effects("[Phase2Collect] 3/50").contains(&Effect::Links {
            collected: Some(3),
            target: Some(50),
        }));
    }

    #[test]
    fn bracket_collect_progress() {
        assert!(effects("scrolling feed [links 7/40]").contains(&Effect::Links {
            collected: Some(7),
            target: Some(40),
        }));
        assert!(effects("[collected: 9/40] ok").contains(&Effect::Links {
            collected: Some(9),
            target: Some(40),
        }));
    }

    #[test]
    fn overflowing_count_skips_only_that_field() {
        let found = effects("[Collect] 99999999999999999999999/50");
        assert!(found.contains(&Effect::Links {
            collected: None,
            target: Some(50),
        }));
    }

    #[test]
    fn current_post_with_id() {
        assert!(effects("[Process] Post 3/20 note_id=64ab").contains(&Effect::CurrentPost {
            index: 3,
            target: Some(20),
            post_id: Some("64ab".to_string()),
        }));
    }

    #[test]
    fn current_comments_progress() {
        assert!(effects("[Comments] comments collected 5/20").contains(
            &Effect::CurrentComments {
                collected: Some(5),
                target: Some(20),
            }
        ));
    }

    #[test]
    fn numbered_summary_lines() {
        let found = effects("  2. comments: 40");
        assert!(found.contains(&Effect::Summary {
            field: SummaryField::Comments,
            value: 40,
        }));
        assert!(!found
            .iter()
            .any(|e| matches!(e, Effect::CurrentComments { .. })));

        assert!(effects("3) likes=9").contains(&Effect::Summary {
            field: SummaryField::Likes,
            value: 9,
        }));
    }

    #[test]
    fn summary_with_non_numeric_value_is_dropped() {
        assert!(!effects("1. processed: many")
            .iter()
            .any(|e| matches!(e, Effect::Summary { .. })));
    }

    #[test]
    fn like_round_tallies_and_overrides_action() {
        let found = effects("[LikeRound #4] liked=2 dup=1 done=0 limited=3 total=15");
        assert!(found.contains(&Effect::LikeRound {
            round: 4,
            tally: RoundTally {
                liked: 2,
                duplicate: 1,
                already_done: 0,
                rate_limited: 3,
            },
            total: Some(15),
        }));
        assert_eq!(
            found.iter().rev().find_map(|e| match e {
                Effect::Action(a) => Some(a.as_str()),
                _ => None,
            }),
            Some("like round 4: 3 rate-limited")
        );
    }

    #[test]
    fn evidence_markers() {
        assert!(effects("[Like] evidence: 3 files -> /data/ev/64ab").contains(
            &Effect::Evidence {
                count: 3,
                directory: "/data/ev/64ab".to_string(),
            }
        ));
        assert!(effects("saved 2 screenshots to /data/ev/x.").contains(&Effect::Evidence {
            count: 2,
            directory: "/data/ev/x".to_string(),
        }));
    }
}
