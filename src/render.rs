//! Everything the bot shows, as plain data. No network calls in here.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};
use teloxide::utils::html;

use crate::quiz::{
    Answer, ExamResult, Feedback, ItemResult, Label, QuestionBank, ScoringMode, SessionError,
    ViewState,
};

/// Telegram caps messages at 4096 characters; leave room for markup.
const MAX_MESSAGE_CHARS: usize = 3500;

/// Caps on single escaped fields, chosen so one results item always fits in a message.
const MAX_QUESTION_CHARS: usize = 1000;
const MAX_CHOICE_CHARS: usize = 400;
const MAX_EXPLANATION_CHARS: usize = 1200;

pub const IMMEDIATE_MODE: &str = "Відповіді одразу";
pub const DEFERRED_MODE: &str = "Відповіді в кінці";
pub const DEFAULT_TIME_LIMIT: &str = "Як у питаннях";
pub const RETRY: &str = "Ще раз";
pub const NEW_SETTINGS: &str = "Нові налаштування";
pub const SHOW_RESULTS: &str = "Показати результат";
pub const RESET_COMMAND: &str = "/reset";

pub const ALREADY_ANSWERED: &str = "Відповідь уже зараховано";
pub const QUESTION_CLOSED: &str = "Це питання вже закрите";
pub const EXAM_OVER: &str = "Цей тест уже завершено";

pub const RULES_TEXT: &str = "Привіт! Це тренажер SPI.\n\n\
• На кожне питання є обмежений час\n\
• Можна бачити пояснення одразу після відповіді або лише в кінці\n\
• Наприкінці буде показано результат\n\n\
Команда /reset будь-коли повертає до вибору розділу.";

/// A button press on an exam message. Every action names the question it was
/// drawn for, so presses on old messages can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Answer { question: usize, label: Label },
    Next { question: usize },
    Refresh { question: usize },
}

impl CallbackAction {
    pub fn question(self) -> usize {
        match self {
            CallbackAction::Answer { question, .. }
            | CallbackAction::Next { question }
            | CallbackAction::Refresh { question } => question,
        }
    }

    pub fn encode(self) -> String {
        match self {
            CallbackAction::Answer { question, label } => {
                format!("a:{}:{}", question, label.as_char())
            }
            CallbackAction::Next { question } => format!("n:{}", question),
            CallbackAction::Refresh { question } => format!("r:{}", question),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let kind = parts.next()?;
        let question = parts.next()?.parse().ok()?;
        let action = match (kind, parts.next()) {
            ("a", Some(label)) => CallbackAction::Answer {
                question,
                label: Label::parse(label)?,
            },
            ("n", None) => CallbackAction::Next { question },
            ("r", None) => CallbackAction::Refresh { question },
            _ => return None,
        };
        match parts.next() {
            Some(_) => None,
            None => Some(action),
        }
    }
}

/// `/reset`, also in the `/reset@botname` form used in group chats.
pub fn is_reset_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    match command.strip_prefix(RESET_COMMAND) {
        Some(rest) => rest.is_empty() || rest.starts_with('@'),
        None => false,
    }
}

pub fn remaining_toast(seconds: u32) -> String {
    format!("⏱ Залишилось {} с", seconds)
}

/// HTML-escapes `text`, cutting it with `…` so the escaped form has at most `max` chars.
/// Escape sequences are never split.
fn clipped(text: &str, max: usize) -> String {
    let escaped = html::escape(text);
    if escaped.chars().count() <= max {
        return escaped;
    }
    let budget = max.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0; 4];
    for c in text.chars() {
        let piece = html::escape(c.encode_utf8(&mut buf));
        let width = piece.chars().count();
        if used + width > budget {
            break;
        }
        used += width;
        out.push_str(&piece);
    }
    out.push('…');
    out
}

pub fn category_prompt(bank: &QuestionBank) -> (String, KeyboardMarkup) {
    let categories = bank.categories();
    let lines = categories
        .iter()
        .map(|c| format!("• {} — {} питань", c, bank.count_in(c)))
        .collect::<Vec<_>>()
        .join("\n");
    let keyboard = KeyboardMarkup::new(
        categories
            .iter()
            .map(|c| vec![KeyboardButton::new(c.to_string())])
            .collect::<Vec<_>>(),
    )
    .resize_keyboard(true);
    (format!("Обери розділ:\n{}", lines), keyboard)
}

/// A handful of round numbers up to `max`, always including `max` itself.
pub fn amount_keyboard(max: usize) -> KeyboardMarkup {
    let mut amounts: Vec<usize> = [5, 10, 20, 40].into_iter().filter(|a| *a < max).collect();
    amounts.push(max);
    KeyboardMarkup::new(vec![amounts
        .into_iter()
        .map(|a| KeyboardButton::new(a.to_string()))
        .collect::<Vec<_>>()])
    .resize_keyboard(true)
}

pub fn mode_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(IMMEDIATE_MODE),
        KeyboardButton::new(DEFERRED_MODE),
    ]])
    .resize_keyboard(true)
}

pub fn parse_mode(text: &str) -> Option<ScoringMode> {
    match text {
        IMMEDIATE_MODE => Some(ScoringMode::Immediate),
        DEFERRED_MODE => Some(ScoringMode::Deferred),
        _ => None,
    }
}

pub fn time_limit_keyboard(default_seconds: u32) -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new("30"),
            KeyboardButton::new("60"),
            KeyboardButton::new("90"),
            KeyboardButton::new("120"),
        ],
        vec![KeyboardButton::new(format!("{} ({} с)", DEFAULT_TIME_LIMIT, default_seconds))],
    ])
    .resize_keyboard(true)
}

pub fn results_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(RETRY), KeyboardButton::new(NEW_SETTINGS)],
        vec![KeyboardButton::new(SHOW_RESULTS)],
    ])
    .resize_keyboard(true)
}

fn choice_line(label: Label, text: &str) -> String {
    format!("{}. {}", label, clipped(text, MAX_CHOICE_CHARS))
}

/// The question screen. Only meaningful for a view that still has a question.
pub fn question_text(view: &ViewState) -> String {
    let Some(question) = &view.question else {
        return String::new();
    };
    let mut text = format!(
        "<b>Q{}/{}</b>\n\n{}\n\n",
        view.index + 1,
        view.total,
        html::bold(&clipped(&question.text, MAX_QUESTION_CHARS))
    );
    for label in question.offered_labels() {
        text.push_str(&choice_line(label, question.choice(label)));
        text.push('\n');
    }
    if let Some(image) = &question.image {
        text.push_str(&format!("\n🖼 {}\n", html::escape(image)));
    }
    text.push_str(&format!(
        "\n⏱ Залишилось: {} с з {}",
        view.remaining_seconds, view.time_limit_seconds
    ));
    text
}

pub fn answer_keyboard(view: &ViewState) -> InlineKeyboardMarkup {
    let labels = view
        .question
        .as_ref()
        .map(|q| q.offered_labels())
        .unwrap_or_default();
    let answers = labels
        .into_iter()
        .map(|label| {
            InlineKeyboardButton::callback(
                label.to_string(),
                CallbackAction::Answer {
                    question: view.index,
                    label,
                }
                .encode(),
            )
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![
        answers,
        vec![InlineKeyboardButton::callback(
            "⏱ Скільки часу?",
            CallbackAction::Refresh { question: view.index }.encode(),
        )],
    ])
}

pub fn next_keyboard(view: &ViewState) -> InlineKeyboardMarkup {
    let caption = if view.index + 1 == view.total { "Результат ▶" } else { "Далі ▶" };
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        caption,
        CallbackAction::Next { question: view.index }.encode(),
    )]])
}

fn your_answer(answer: Answer, chosen_text: Option<&str>) -> String {
    match (answer, chosen_text) {
        (Answer::Chosen(label), Some(text)) => choice_line(label, text),
        (Answer::Chosen(label), None) => label.to_string(),
        (Answer::TimedOut, _) => "⌛ час вийшов".to_string(),
        (Answer::Unanswered, _) => "немає відповіді".to_string(),
    }
}

/// Feedback screen of immediate mode.
pub fn feedback_text(view: &ViewState, feedback: &Feedback) -> String {
    let verdict = if feedback.is_correct {
        "🎉 Правильно!"
    } else if feedback.answer == Answer::TimedOut {
        "⌛ Час вийшов!"
    } else {
        "❌ Неправильно"
    };
    let mut text = format!(
        "<b>Q{}/{}</b> {}\n\nТвоя відповідь: {}\nПравильна відповідь: {}",
        view.index + 1,
        view.total,
        verdict,
        your_answer(feedback.answer, feedback.chosen_text.as_deref()),
        choice_line(feedback.correct, &feedback.correct_text)
    );
    if let Some(explanation) = &feedback.explanation {
        let explanation = clipped(explanation, MAX_EXPLANATION_CHARS);
        text.push_str(&format!("\n\n📘 Пояснення: {}", explanation));
    }
    text
}

/// What the user reads when an exam cannot start.
pub fn start_failure(error: &SessionError) -> String {
    match error {
        SessionError::InsufficientQuestions { category } => {
            format!("У розділі «{}» немає жодного питання. Обери інший.", category)
        }
        SessionError::ShortOfRequested {
            category,
            requested,
            available,
        } => format!(
            "У розділі «{}» лише {} питань, а ти просиш {}. Обери менше або інший розділ.",
            category, available, requested
        ),
        other => format!("Не вдалося почати тест: {}", other),
    }
}

pub fn shortfall_warning(requested: usize, actual: usize) -> String {
    format!(
        "⚠️ У розділі лише {} питань, тому замість {} буде {}.",
        actual, requested, actual
    )
}

pub fn timeout_notice(question: usize) -> String {
    format!("⌛ Час на питання {} вийшов, його зараховано як без відповіді.", question + 1)
}

fn item_text(number: usize, item: &ItemResult) -> String {
    let mut text = format!(
        "<b>Q{}</b>: {} {}\nТвоя відповідь: {}\nПравильна відповідь: {}",
        number,
        clipped(&item.question, MAX_QUESTION_CHARS),
        if item.is_correct { "✅" } else { "❌" },
        your_answer(item.answer, item.chosen_text.as_deref()),
        choice_line(item.correct, &item.correct_text)
    );
    if let Some(explanation) = &item.explanation {
        text.push_str(&format!("\n📘 {}", clipped(explanation, MAX_EXPLANATION_CHARS)));
    }
    text
}

/// The results page, split so that no message goes over the Telegram limit.
/// The final score always comes last.
pub fn result_messages(result: &ExamResult) -> Vec<String> {
    let mut messages = vec!["📊 <b>Результати</b>".to_string()];
    for (i, item) in result.items.iter().enumerate() {
        let block = item_text(i + 1, item);
        let current = messages.last().map(|m| m.chars().count()).unwrap_or(0);
        match messages.last_mut() {
            Some(last) if current + block.chars().count() + 2 <= MAX_MESSAGE_CHARS => {
                last.push_str("\n\n");
                last.push_str(&block);
            }
            _ => messages.push(block),
        }
    }

    let mut summary = format!("🎯 Підсумок: {}/{}", result.total_score, result.count);
    if result.timed_out() > 0 {
        summary.push_str(&format!("\n⌛ Без відповіді через час: {}", result.timed_out()));
    }
    messages.push(summary);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::clock::ManualClock;
    use crate::quiz::session::tests::start;
    use crate::quiz::{Stage, DEFAULT_TIME_LIMIT_SECONDS};

    #[test]
    fn callback_actions_survive_encoding() {
        for action in [
            CallbackAction::Answer { question: 12, label: Label::C },
            CallbackAction::Next { question: 0 },
            CallbackAction::Refresh { question: 39 },
        ] {
            assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
        }
        assert_eq!(CallbackAction::Answer { question: 3, label: Label::E }.encode(), "a:3:e");
    }

    #[test]
    fn malformed_callback_data_is_ignored() {
        for data in ["", "a", "a:1", "a:1:z", "a:x:b", "n:1:2", "q:1", "r:-1", "a:1:b:c"] {
            assert_eq!(CallbackAction::parse(data), None, "{:?}", data);
        }
    }

    #[test]
    fn question_screen_lists_choices_and_time() {
        let clock = ManualClock::new();
        let mut session = start("verbal", 3, ScoringMode::Immediate, 1);
        let view = session.tick(&clock).unwrap();
        let text = question_text(&view);
        let question = view.question.as_ref().unwrap();

        assert!(text.starts_with("<b>Q1/3</b>"));
        assert!(text.contains(&format!("A. {}", question.choices[0])));
        assert!(text.contains(&format!("E. {}", question.choices[4])));
        assert!(text.contains("60 с з 60"));

        let keyboard = answer_keyboard(&view);
        assert_eq!(keyboard.inline_keyboard[0].len(), 5);
        assert_eq!(keyboard.inline_keyboard[1].len(), 1);
    }

    #[test]
    fn question_text_is_escaped() {
        let clock = ManualClock::new();
        let mut session = start("verbal", 1, ScoringMode::Immediate, 1);
        let mut view = session.tick(&clock).unwrap();
        view.question.as_mut().unwrap().text = "2 < 3 & 4 > 1".to_string();
        assert!(question_text(&view).contains("2 &lt; 3 &amp; 4 &gt; 1"));
    }

    #[test]
    fn feedback_mentions_timeouts_and_correct_answer() {
        let clock = ManualClock::new();
        let mut session = start("verbal", 2, ScoringMode::Immediate, 1);
        session.tick(&clock).unwrap();
        clock.advance_secs(i64::from(DEFAULT_TIME_LIMIT_SECONDS));
        let view = session.tick(&clock).unwrap();
        assert_eq!(view.stage, Stage::AwaitingConfirmation);

        let feedback = view.feedback.clone().unwrap();
        let text = feedback_text(&view, &feedback);
        assert!(text.contains("Час вийшов"));
        assert!(text.contains(&format!("{}. ", feedback.correct)));
        assert!(text.contains("Пояснення"));
    }

    #[test]
    fn long_results_are_split_with_the_score_last() {
        let clock = ManualClock::new();
        let mut session = start("verbal", 40, ScoringMode::Deferred, 4);
        session.tick(&clock).unwrap();
        while session.stage() != Stage::Complete {
            let label = session.questions()[session.current_index()].correct;
            session.submit_answer(label, &clock).unwrap();
        }
        let mut result = session.score().unwrap();
        for item in &mut result.items {
            item.explanation = Some("x".repeat(400));
        }

        let messages = result_messages(&result);
        assert!(messages.len() > 2);
        assert!(messages.iter().all(|m| m.chars().count() <= MAX_MESSAGE_CHARS));
        assert_eq!(messages.last().unwrap(), "🎯 Підсумок: 40/40");
        let items: usize = messages.iter().map(|m| m.matches("✅").count()).sum();
        assert_eq!(items, 40);
    }

    #[test]
    fn oversized_explanation_still_fits_one_message() {
        let clock = ManualClock::new();
        let mut session = start("verbal", 2, ScoringMode::Deferred, 4);
        session.tick(&clock).unwrap();
        while session.stage() != Stage::Complete {
            let label = session.questions()[session.current_index()].correct;
            session.submit_answer(label, &clock).unwrap();
        }
        let mut result = session.score().unwrap();
        result.items[0].explanation = Some("a < b & ".repeat(625));
        result.items[0].question = "q".repeat(5000);

        let messages = result_messages(&result);
        assert!(messages.iter().all(|m| m.chars().count() <= MAX_MESSAGE_CHARS));
        assert!(messages.iter().any(|m| m.contains("…")));
        assert_eq!(messages.last().unwrap(), "🎯 Підсумок: 2/2");
    }

    #[test]
    fn clipping_keeps_escapes_whole() {
        assert_eq!(clipped("2 < 3", 20), "2 &lt; 3");
        assert_eq!(clipped("&&&&", 11), "&amp;&amp;…");
        assert_eq!(clipped("&&&&", 10), "&amp;…");
        assert_eq!(clipped("abcdef", 4), "abc…");
    }

    #[test]
    fn reset_command_accepts_bot_mentions() {
        assert!(is_reset_command("/reset"));
        assert!(is_reset_command("/reset@spi_exam_bot"));
        assert!(is_reset_command(" /reset now"));
        assert!(!is_reset_command("/resetting"));
        assert!(!is_reset_command("reset"));
        assert!(!is_reset_command(""));
    }

    #[test]
    fn amount_keyboard_is_capped_by_the_maximum() {
        let keyboard = amount_keyboard(15);
        let labels: Vec<&str> = keyboard.keyboard[0].iter().map(|b| b.text.as_str()).collect();
        assert_eq!(labels, vec!["5", "10", "15"]);
    }

    #[test]
    fn start_failures_name_the_category() {
        let text = start_failure(&SessionError::ShortOfRequested {
            category: "verbal".to_string(),
            requested: 40,
            available: 12,
        });
        assert!(text.contains("«verbal»"));
        assert!(text.contains("12"));
        assert!(text.contains("40"));
    }

    #[test]
    fn modes_round_trip_through_button_text() {
        assert_eq!(parse_mode(IMMEDIATE_MODE), Some(ScoringMode::Immediate));
        assert_eq!(parse_mode(DEFERRED_MODE), Some(ScoringMode::Deferred));
        assert_eq!(parse_mode("whatever"), None);
    }
}
