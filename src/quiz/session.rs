use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use super::bank::QuestionBank;
use super::clock::Clock;
use super::error::SessionError;
use super::{Label, QuestionRecord, ScoringMode};

/// What to do when a category holds fewer questions than were asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ShortfallPolicy {
    /// Shrink the exam to what is available and log a warning.
    #[default]
    Degrade,
    /// Refuse to start.
    Reject,
}

/// Everything the user picks before an exam starts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExamConfiguration {
    pub category: String,
    pub requested_count: usize,
    pub scoring_mode: ScoringMode,
    pub default_time_limit_seconds: u32,
    #[serde(default)]
    pub shortfall: ShortfallPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Presenting,
    /// Only reachable in immediate mode: the answer is final and feedback is on screen.
    AwaitingConfirmation,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Answer {
    Unanswered,
    Chosen(Label),
    TimedOut,
}

impl Answer {
    pub fn label(self) -> Option<Label> {
        match self {
            Answer::Chosen(label) => Some(label),
            Answer::Unanswered | Answer::TimedOut => None,
        }
    }
}

/// Correctness of the current question. Only ever built in immediate mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub answer: Answer,
    pub chosen_text: Option<String>,
    pub correct: Label,
    pub correct_text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

/// Something that happened during the transition that produced a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The question at this index ran out of time.
    TimedOut { question: usize },
}

/// Read-only projection of a session for whoever draws the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub stage: Stage,
    pub index: usize,
    pub total: usize,
    /// `None` once the exam is complete.
    pub question: Option<QuestionRecord>,
    pub time_limit_seconds: u32,
    pub remaining_seconds: u32,
    pub feedback: Option<Feedback>,
    pub notice: Option<Notice>,
}

/// One attempt at an exam.
///
/// The only way to change a session is through [`tick`](Self::tick),
/// [`submit_answer`](Self::submit_answer) and [`advance`](Self::advance);
/// [`reset`](Self::reset) consumes it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExamSession {
    id: u64,
    configuration: ExamConfiguration,
    questions: Vec<QuestionRecord>,
    current: usize,
    started_at: Vec<Option<DateTime<Utc>>>,
    answers: Vec<Answer>,
    stage: Stage,
}

/// Whole seconds left, rounded up, so it hits 0 exactly when the limit is used up.
fn remaining_seconds(limit_seconds: u32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    // A clock that went backwards counts as no time elapsed
    let elapsed_ms = (now - started_at).num_milliseconds().max(0);
    let left_ms = i64::from(limit_seconds) * 1000 - elapsed_ms;
    if left_ms <= 0 {
        0
    } else {
        ((left_ms + 999) / 1000) as u32
    }
}

impl ExamSession {
    /// Samples a fresh question set for `configuration`.
    pub fn start<R: Rng + ?Sized>(
        bank: &QuestionBank,
        configuration: ExamConfiguration,
        rng: &mut R,
    ) -> Result<Self, SessionError> {
        if configuration.requested_count == 0 {
            return Err(SessionError::InvalidConfiguration(
                "at least one question must be requested".to_string(),
            ));
        }
        if configuration.default_time_limit_seconds == 0 {
            return Err(SessionError::InvalidConfiguration(
                "the time limit must be positive".to_string(),
            ));
        }

        let matching: Vec<&QuestionRecord> = bank.in_category(&configuration.category).collect();
        if matching.is_empty() {
            return Err(SessionError::InsufficientQuestions {
                category: configuration.category,
            });
        }

        let available = matching.len();
        let count = if available < configuration.requested_count {
            match configuration.shortfall {
                ShortfallPolicy::Reject => {
                    return Err(SessionError::ShortOfRequested {
                        category: configuration.category,
                        requested: configuration.requested_count,
                        available,
                    })
                }
                ShortfallPolicy::Degrade => {
                    warn!(
                        "Category '{}' has only {} questions, {} requested; using {}",
                        configuration.category, available, configuration.requested_count, available
                    );
                    available
                }
            }
        } else {
            configuration.requested_count
        };

        let mut questions: Vec<QuestionRecord> = matching
            .choose_multiple(rng, count)
            .map(|record| (*record).clone())
            .collect();
        // This order is the presentation order for the whole session
        questions.shuffle(rng);

        info!(
            "Starting exam: category '{}', {} questions, {:?} scoring",
            configuration.category, count, configuration.scoring_mode
        );

        Ok(Self {
            id: rng.gen(),
            configuration,
            started_at: vec![None; count],
            answers: vec![Answer::Unanswered; count],
            questions,
            current: 0,
            stage: Stage::Presenting,
        })
    }

    /// Re-evaluates the countdown. Called on every refresh, with or without user input.
    pub fn tick(&mut self, clock: &impl Clock) -> Result<ViewState, SessionError> {
        if self.stage == Stage::Complete {
            return Err(SessionError::SessionComplete);
        }
        let now = clock.now();
        let notice = self.expire_if_due(now);
        Ok(self.present(now, notice))
    }

    /// Records `label` for the current question.
    ///
    /// An answer that arrives after the time ran out is discarded and the
    /// timeout is applied instead; the returned view carries the notice.
    pub fn submit_answer(
        &mut self,
        label: Label,
        clock: &impl Clock,
    ) -> Result<ViewState, SessionError> {
        match self.stage {
            Stage::Complete => return Err(SessionError::SessionComplete),
            Stage::AwaitingConfirmation => {
                return Err(SessionError::AlreadyAnswered {
                    question: self.current,
                })
            }
            Stage::Presenting => {}
        }

        let now = clock.now();
        if let Some(notice) = self.expire_if_due(now) {
            debug!("Answer {} for question {} arrived too late", label, self.current + 1);
            return Ok(self.present(now, Some(notice)));
        }

        if self.questions[self.current].choice(label).is_empty() {
            return Err(SessionError::UnknownChoice(label));
        }

        self.answers[self.current] = Answer::Chosen(label);
        match self.configuration.scoring_mode {
            ScoringMode::Immediate => self.stage = Stage::AwaitingConfirmation,
            ScoringMode::Deferred => self.step_forward(),
        }
        Ok(self.present(now, None))
    }

    /// Leaves the feedback screen for the next question.
    pub fn advance(&mut self, clock: &impl Clock) -> Result<ViewState, SessionError> {
        match self.stage {
            Stage::AwaitingConfirmation => {}
            Stage::Complete => return Err(SessionError::SessionComplete),
            stage => {
                return Err(SessionError::InvalidTransition {
                    action: "advance",
                    stage,
                })
            }
        }
        self.step_forward();
        Ok(self.present(clock.now(), None))
    }

    /// Throws the attempt away. Only the configuration survives, to allow a retry
    /// with a freshly drawn question set.
    pub fn reset(self) -> ExamConfiguration {
        info!("Discarding exam session {:x}", self.id);
        self.configuration
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn configuration(&self) -> &ExamConfiguration {
        &self.configuration
    }

    pub fn questions(&self) -> &[QuestionRecord] {
        &self.questions
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// `Some((requested, actual))` when the exam had to be shrunk.
    pub fn shortfall(&self) -> Option<(usize, usize)> {
        (self.len() < self.configuration.requested_count)
            .then(|| (self.configuration.requested_count, self.len()))
    }

    /// Seconds left on the current question without touching the session.
    pub fn remaining(&self, clock: &impl Clock) -> Option<u32> {
        let started = (*self.started_at.get(self.current)?)?;
        Some(remaining_seconds(self.current_time_limit(), started, clock.now()))
    }

    /// Validates a session that came back from storage.
    pub fn check(&self) -> Result<(), SessionError> {
        let len = self.questions.len();
        if len == 0 {
            return Err(SessionError::Corrupted("no questions".to_string()));
        }
        if self.answers.len() != len || self.started_at.len() != len {
            return Err(SessionError::Corrupted(format!(
                "{} questions but {} answers and {} start times",
                len,
                self.answers.len(),
                self.started_at.len()
            )));
        }
        match self.stage {
            Stage::Complete if self.current != len => Err(SessionError::Corrupted(format!(
                "complete at question {} of {}",
                self.current, len
            ))),
            Stage::Presenting | Stage::AwaitingConfirmation if self.current >= len => Err(
                SessionError::Corrupted(format!("question {} out of {}", self.current, len)),
            ),
            Stage::AwaitingConfirmation
                if self.configuration.scoring_mode == ScoringMode::Deferred =>
            {
                Err(SessionError::Corrupted(
                    "feedback stage in deferred mode".to_string(),
                ))
            }
            Stage::AwaitingConfirmation if self.answers[self.current] == Answer::Unanswered => Err(
                SessionError::Corrupted("feedback stage without an answer".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn current_time_limit(&self) -> u32 {
        self.questions
            .get(self.current)
            .map(|q| q.time_limit(self.configuration.default_time_limit_seconds))
            .unwrap_or(self.configuration.default_time_limit_seconds)
    }

    /// Arms the current question's timer on first sight and applies a timeout
    /// when it has run out.
    fn expire_if_due(&mut self, now: DateTime<Utc>) -> Option<Notice> {
        if self.stage != Stage::Presenting {
            return None;
        }
        let started = *self.started_at[self.current].get_or_insert(now);
        if remaining_seconds(self.current_time_limit(), started, now) > 0 {
            return None;
        }

        let question = self.current;
        debug!("Question {} of session {:x} timed out", question + 1, self.id);
        self.answers[question] = Answer::TimedOut;
        match self.configuration.scoring_mode {
            ScoringMode::Immediate => self.stage = Stage::AwaitingConfirmation,
            ScoringMode::Deferred => self.step_forward(),
        }
        Some(Notice::TimedOut { question })
    }

    fn step_forward(&mut self) {
        self.current += 1;
        if self.current >= self.questions.len() {
            self.current = self.questions.len();
            self.stage = Stage::Complete;
            info!("Exam session {:x} complete", self.id);
        } else {
            self.stage = Stage::Presenting;
        }
    }

    /// Builds the view; a presenting question counts as displayed from here on.
    fn present(&mut self, now: DateTime<Utc>, notice: Option<Notice>) -> ViewState {
        let total = self.questions.len();
        if self.stage == Stage::Complete {
            return ViewState {
                stage: Stage::Complete,
                index: total,
                total,
                question: None,
                time_limit_seconds: 0,
                remaining_seconds: 0,
                feedback: None,
                notice,
            };
        }

        let limit = self.current_time_limit();
        let question = &self.questions[self.current];
        let (remaining, feedback) = match self.stage {
            Stage::Presenting => {
                let started = *self.started_at[self.current].get_or_insert(now);
                (remaining_seconds(limit, started, now), None)
            }
            _ => {
                let answer = self.answers[self.current];
                let feedback = Feedback {
                    answer,
                    chosen_text: answer.label().map(|l| question.choice(l).to_string()),
                    correct: question.correct,
                    correct_text: question.correct_text().to_string(),
                    is_correct: answer.label() == Some(question.correct),
                    explanation: question.explanation.clone(),
                };
                (0, Some(feedback))
            }
        };

        ViewState {
            stage: self.stage,
            index: self.current,
            total,
            question: Some(question.clone()),
            time_limit_seconds: limit,
            remaining_seconds: remaining,
            feedback,
            notice,
        }
    }
}
