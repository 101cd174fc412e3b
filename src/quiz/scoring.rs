use super::error::SessionError;
use super::session::{Answer, ExamSession, Stage};
use super::Label;

/// One line of the results page.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ItemResult {
    pub question: String,
    pub answer: Answer,
    pub chosen_text: Option<String>,
    pub correct: Label,
    pub correct_text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExamResult {
    pub total_score: usize,
    pub count: usize,
    pub items: Vec<ItemResult>,
}

impl ExamResult {
    pub fn timed_out(&self) -> usize {
        self.items.iter().filter(|i| i.answer == Answer::TimedOut).count()
    }

    pub fn unanswered(&self) -> usize {
        self.items.iter().filter(|i| i.answer == Answer::Unanswered).count()
    }
}

impl ExamSession {
    /// Grades a finished session. Reads only, so it can be called any number of times.
    pub fn score(&self) -> Result<ExamResult, SessionError> {
        if self.stage() != Stage::Complete {
            return Err(SessionError::NotComplete);
        }

        let items: Vec<ItemResult> = self
            .questions()
            .iter()
            .zip(self.answers())
            .map(|(question, answer)| {
                let chosen = answer.label();
                ItemResult {
                    question: question.text.clone(),
                    answer: *answer,
                    chosen_text: chosen.map(|l| question.choice(l).to_string()),
                    correct: question.correct,
                    correct_text: question.correct_text().to_string(),
                    // Timeouts and blanks carry no label, so they can never match
                    is_correct: chosen == Some(question.correct),
                    explanation: question.explanation.clone(),
                }
            })
            .collect();

        Ok(ExamResult {
            total_score: items.iter().filter(|i| i.is_correct).count(),
            count: items.len(),
            items,
        })
    }
}
