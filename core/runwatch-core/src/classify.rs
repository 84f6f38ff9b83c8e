//! "Looks like an error" heuristics for raw log lines.
//!
//! The vocabulary is fuzzy and not exhaustive. It lives behind a trait so a
//! host can swap in its own classifier without touching merge logic.

use crate::patterns::RE_EXIT_CODE;
use crate::types::Channel;

/// English and Chinese words the automation CLI uses when something breaks.
pub const ERROR_VOCABULARY: &[&str] = &[
    "error",
    "fail",
    "exception",
    "traceback",
    "fatal",
    "panic",
    "错误",
    "失败",
    "异常",
    "报错",
];

/// Decides whether a line should put its shard into the error state.
pub trait ErrorClassifier: Send + Sync {
    fn looks_like_error(&self, channel: Channel, text: &str) -> bool;
}

/// Default classifier: stderr, vocabulary match, or a non-zero exit code.
#[derive(Debug, Clone)]
pub struct VocabularyClassifier {
    vocabulary: Vec<String>,
}

impl Default for VocabularyClassifier {
    fn default() -> Self {
        Self::new(ERROR_VOCABULARY.iter().map(|w| w.to_string()).collect())
    }
}

impl VocabularyClassifier {
    pub fn new(vocabulary: Vec<String>) -> Self {
        Self {
            vocabulary: vocabulary.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl ErrorClassifier for VocabularyClassifier {
    fn looks_like_error(&self, channel: Channel, text: &str) -> bool {
        if channel == Channel::Stderr {
            return true;
        }
        let lowered = text.to_lowercase();
        if self.vocabulary.iter().any(|w| lowered.contains(w.as_str())) {
            return true;
        }
        has_nonzero_exit_code(text)
    }
}

/// True when the line reports an exit code other than zero.
pub fn has_nonzero_exit_code(text: &str) -> bool {
    RE_EXIT_CODE
        .captures_iter(text)
        .filter_map(|cap| cap[1].parse::<i64>().ok())
        .any(|code| code != 0)
}
