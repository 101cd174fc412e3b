use std::path::PathBuf;

use thiserror::Error;

use super::session::Stage;
use super::Label;

/// Fatal problems while reading the question bank. No session can start.
#[derive(Debug, Error)]
pub enum BankLoadError {
    #[error("failed to open question bank '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read question bank: {0}")]
    Csv(#[from] csv::Error),

    #[error("question bank is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("question bank contains no usable questions")]
    Empty,
}

/// A single bad row. The row is left out and loading carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedRecordError {
    #[error("row {row}: answer {answer:?} is not one of a-e")]
    InvalidLabel { row: usize, answer: String },

    #[error("row {row}: answer {label} points at an empty choice")]
    EmptyCorrectChoice { row: usize, label: Label },

    #[error("row {row}: time limit {value:?} is not a positive whole number of seconds")]
    InvalidTimeLimit { row: usize, value: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Also covers categories that do not exist at all.
    #[error("category '{category}' has no questions")]
    InsufficientQuestions { category: String },

    #[error("category '{category}' has {available} questions, {requested} were requested")]
    ShortOfRequested {
        category: String,
        requested: usize,
        available: usize,
    },

    #[error("invalid exam configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot {action} while {stage:?}")]
    InvalidTransition { action: &'static str, stage: Stage },

    #[error("question {} was already answered", .question + 1)]
    AlreadyAnswered { question: usize },

    #[error("the exam is already complete")]
    SessionComplete,

    #[error("the exam is not complete yet")]
    NotComplete,

    #[error("choice {0} is not offered for this question")]
    UnknownChoice(Label),

    #[error("session state is inconsistent: {0}")]
    Corrupted(String),
}
