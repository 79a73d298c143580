//! True/false literal sets and answer-shape compatibility.

use crate::config::ProviderConfig;
use crate::types::QuestionType;
use rand::Rng;

const DEFAULT_TRUE: [&str; 5] = ["正确", "对", "T", "True", "true"];
const DEFAULT_FALSE: [&str; 5] = ["错误", "错", "F", "False", "false"];

/// Surface forms a question bank may use for "true" and "false".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgementSets {
    pub true_list: Vec<String>,
    pub false_list: Vec<String>,
}

impl Default for JudgementSets {
    fn default() -> Self {
        Self {
            true_list: DEFAULT_TRUE.iter().map(|s| s.to_string()).collect(),
            false_list: DEFAULT_FALSE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl JudgementSets {
    /// Both `true_list` and `false_list` must be set to replace the defaults.
    pub fn from_config(conf: &ProviderConfig) -> Self {
        let true_list = conf.get_list("true_list");
        let false_list = conf.get_list("false_list");
        if true_list.is_empty() || false_list.is_empty() {
            return Self::default();
        }
        Self {
            true_list,
            false_list,
        }
    }

    /// `Some(true)` / `Some(false)` on a set match, `None` otherwise.
    pub fn classify(&self, answer: &str) -> Option<bool> {
        let answer = answer.trim();
        if self.true_list.iter().any(|s| s == answer) {
            Some(true)
        } else if self.false_list.iter().any(|s| s == answer) {
            Some(false)
        } else {
            None
        }
    }

    /// Classify, falling back to a coin flip for unrecognized literals.
    pub fn resolve(&self, answer: &str) -> bool {
        match self.classify(answer) {
            Some(value) => value,
            None => {
                tracing::error!(
                    "Cannot tell whether '{}' means true or false; choosing at random. \
                     Add it to true_list or false_list",
                    answer.trim()
                );
                rand::thread_rng().gen_bool(0.5)
            }
        }
    }
}

/// Whether a question-bank answer has a shape the question type accepts.
pub fn is_compatible(answer: &str, kind: QuestionType, sets: &JudgementSets) -> bool {
    let lines = answer.lines().filter(|l| !l.trim().is_empty()).count();
    match kind {
        QuestionType::Judgement => sets.classify(answer).is_some(),
        QuestionType::Single => lines == 1,
        _ => lines >= 1,
    }
}
