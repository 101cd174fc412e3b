pub mod bank;
pub mod clock;
pub mod error;
pub mod scoring;
pub mod session;

use std::fmt;

pub use bank::QuestionBank;
pub use clock::SystemClock;
pub use error::SessionError;
pub use scoring::{ExamResult, ItemResult};
pub use session::{
    Answer, ExamConfiguration, ExamSession, Feedback, Notice, ShortfallPolicy, Stage, ViewState,
};

/// Used when neither the record nor the configuration carries a time limit.
pub const DEFAULT_TIME_LIMIT_SECONDS: u32 = 60;

/// One of the five choice slots of a question, `a` to `e`.
///
/// Stored and compared in lowercase, displayed in uppercase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    A,
    B,
    C,
    D,
    E,
}

impl Label {
    pub const ALL: [Label; 5] = [Label::A, Label::B, Label::C, Label::D, Label::E];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Case-insensitive, ignores surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Label> {
        match raw.trim().to_lowercase().as_str() {
            "a" => Some(Label::A),
            "b" => Some(Label::B),
            "c" => Some(Label::C),
            "d" => Some(Label::D),
            "e" => Some(Label::E),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        ['a', 'b', 'c', 'd', 'e'][self.index()]
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScoringMode {
    /// Correctness and explanation right after every answer.
    Immediate,
    /// Nothing is revealed until the last question is done.
    Deferred,
}

/// A validated row of the question bank. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuestionRecord {
    pub category: String,
    pub text: String,
    pub choices: [String; 5],
    pub correct: Label,
    pub explanation: Option<String>,
    pub time_limit_seconds: Option<u32>,
    pub image: Option<String>,
}

impl QuestionRecord {
    pub fn choice(&self, label: Label) -> &str {
        &self.choices[label.index()]
    }

    pub fn correct_text(&self) -> &str {
        self.choice(self.correct)
    }

    /// Labels whose choice text is non-empty; those are the only ones offered.
    pub fn offered_labels(&self) -> Vec<Label> {
        Label::ALL
            .into_iter()
            .filter(|label| !self.choice(*label).is_empty())
            .collect()
    }

    pub fn time_limit(&self, default_seconds: u32) -> u32 {
        self.time_limit_seconds.unwrap_or(default_seconds)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(category: &str, number: usize, correct: Label) -> QuestionRecord {
    QuestionRecord {
        category: category.to_string(),
        text: format!("{} question {}", category, number),
        choices: [
            format!("first {}", number),
            format!("second {}", number),
            format!("third {}", number),
            format!("fourth {}", number),
            format!("fifth {}", number),
        ],
        correct,
        explanation: Some(format!("because {}", number)),
        time_limit_seconds: None,
        image: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!(Label::parse(" C "), Some(Label::C));
        assert_eq!(Label::parse("e"), Some(Label::E));
        assert_eq!(Label::parse("f"), None);
        assert_eq!(Label::parse(""), None);
    }

    #[test]
    fn labels_display_uppercase() {
        assert_eq!(Label::D.to_string(), "D");
        assert_eq!(Label::D.as_char(), 'd');
        assert_eq!(Label::ALL[1].index(), 1);
    }

    #[test]
    fn empty_choices_are_not_offered() {
        let mut record = sample_record("verbal", 1, Label::A);
        record.choices[4] = String::new();
        assert_eq!(record.offered_labels(), vec![Label::A, Label::B, Label::C, Label::D]);
        assert_eq!(record.time_limit(45), 45);
        record.time_limit_seconds = Some(90);
        assert_eq!(record.time_limit(45), 90);
    }
}
