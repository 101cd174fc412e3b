use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use teloxide::prelude::*;
use teloxide::types::{KeyboardRemove, ParseMode};

use crate::config::Config;
use crate::quiz::clock::Clock;
use crate::quiz::{
    ExamConfiguration, ExamSession, Notice, QuestionBank, ScoringMode, SessionError, Stage,
    SystemClock, ViewState,
};
use crate::render::{self, CallbackAction};
use crate::{ask_category, ExamDialogue, HandlerResult, State, UserInfoStorage};

/// Extra wait before a timeout check, so the check lands after the limit and not just before it.
const TIMER_SLACK: Duration = Duration::from_millis(300);

/// How to treat an action the current stage does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Hand the error to the dispatcher so it gets logged as a failure.
    Strict,
    /// Log and carry on as if nothing was pressed.
    Lenient,
}

impl TransitionPolicy {
    fn reject(self, chat_id: ChatId, error: SessionError) -> HandlerResult {
        match self {
            TransitionPolicy::Strict => {
                error!("Rejected transition in chat {}: {}", chat_id, error);
                Err(error.into())
            }
            TransitionPolicy::Lenient => {
                warn!("Ignoring transition in chat {}: {}", chat_id, error);
                Ok(())
            }
        }
    }
}

/// One async mutex per chat. Every read-modify-write of an exam session holds it,
/// so button presses and timeout checks never interleave.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatLocks {
    /// Entries nobody holds or waits on are dropped, so the map only keeps busy chats.
    pub fn get(&self, chat_id: ChatId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(chat_id).or_default().clone()
    }
}

/// Shared handles every exam handler needs.
#[derive(Clone)]
pub struct ExamEnv {
    pub storage: UserInfoStorage,
    pub locks: Arc<ChatLocks>,
    pub config: Arc<Config>,
    pub bank: Arc<QuestionBank>,
}

impl ExamEnv {
    fn dialogue(&self, chat_id: ChatId) -> ExamDialogue {
        ExamDialogue::new(self.storage.clone(), chat_id)
    }
}

/// What a delayed timeout check should do with the stored session.
#[derive(Debug, PartialEq)]
enum TimerOutcome {
    /// The session moved on since the timer was armed.
    Stale,
    /// Woke up before the limit, wait this many more seconds.
    Rearm(u32),
    Expired(ViewState),
}

fn timer_outcome(
    session: &mut ExamSession,
    session_id: u64,
    question: usize,
    clock: &impl Clock,
) -> Result<TimerOutcome, SessionError> {
    if session.id() != session_id
        || session.current_index() != question
        || session.stage() != Stage::Presenting
    {
        return Ok(TimerOutcome::Stale);
    }
    if let Some(remaining) = session.remaining(clock).filter(|s| *s > 0) {
        return Ok(TimerOutcome::Rearm(remaining));
    }
    Ok(TimerOutcome::Expired(session.tick(clock)?))
}

/// What a button press amounts to once it reaches the session.
#[derive(Debug, PartialEq)]
enum CallbackOutcome {
    /// The press belongs to a question that is already closed.
    Closed,
    /// Only a short popup, the screen stays as it is.
    Toast(String),
    Show(ViewState),
    Rejected(SessionError),
}

fn route_callback(
    session: &mut ExamSession,
    action: CallbackAction,
    clock: &impl Clock,
) -> CallbackOutcome {
    if action.question() != session.current_index() {
        return CallbackOutcome::Closed;
    }

    let outcome = match action {
        CallbackAction::Answer { label, .. } => session.submit_answer(label, clock),
        CallbackAction::Next { .. } => session.advance(clock),
        CallbackAction::Refresh { .. } => session.tick(clock),
    };

    match outcome {
        Ok(view) if matches!(action, CallbackAction::Refresh { .. }) && view.notice.is_none() => {
            CallbackOutcome::Toast(match view.stage {
                Stage::Presenting => render::remaining_toast(view.remaining_seconds),
                _ => render::ALREADY_ANSWERED.to_string(),
            })
        }
        Ok(view) => CallbackOutcome::Show(view),
        Err(SessionError::AlreadyAnswered { .. }) => {
            CallbackOutcome::Toast(render::ALREADY_ANSWERED.to_string())
        }
        Err(e) => CallbackOutcome::Rejected(e),
    }
}

/// The running exam in a stored dialogue state, if it is one and it holds together.
fn stored_session(state: Option<State>) -> Result<Option<ExamSession>, SessionError> {
    match state {
        Some(State::Exam { session }) => session.check().map(|()| Some(session)),
        _ => Ok(None),
    }
}

/// The dialogue state a session is stored under once it reaches `stage`.
fn stored_state(session: ExamSession, stage: Stage) -> State {
    match stage {
        Stage::Complete => State::Finished { session },
        Stage::Presenting | Stage::AwaitingConfirmation => State::Exam { session },
    }
}

/// Samples a new exam and shows its first question. The caller holds the chat lock.
pub async fn start_exam(
    bot: &Bot,
    env: &ExamEnv,
    chat_id: ChatId,
    configuration: ExamConfiguration,
) -> HandlerResult {
    let started = ExamSession::start(&env.bank, configuration, &mut rand::thread_rng());
    let mut session = match started {
        Ok(session) => session,
        Err(e) => {
            info!("Exam for chat {} not started: {}", chat_id, e);
            bot.send_message(chat_id, render::start_failure(&e)).await?;
            env.dialogue(chat_id).update(State::ReceiveCategory).await?;
            return ask_category(bot, chat_id, &env.bank).await;
        }
    };

    if let Some((requested, actual)) = session.shortfall() {
        bot.send_message(chat_id, render::shortfall_warning(requested, actual))
            .await?;
    }
    bot.send_message(chat_id, "Чудово! Почнемо тест!")
        .reply_markup(KeyboardRemove::new())
        .await?;

    let view = session.tick(&SystemClock)?;
    publish(bot, env, chat_id, session, view).await
}

/// Stores the session, then shows `view`. Schedules the timeout check for a
/// freshly presented question.
async fn publish(
    bot: &Bot,
    env: &ExamEnv,
    chat_id: ChatId,
    session: ExamSession,
    view: ViewState,
) -> HandlerResult {
    let dialogue = env.dialogue(chat_id);
    let deferred = session.configuration().scoring_mode == ScoringMode::Deferred;
    let session_id = session.id();

    dialogue.update(stored_state(session.clone(), view.stage)).await?;

    if let (Some(Notice::TimedOut { question }), true) = (view.notice, deferred) {
        bot.send_message(chat_id, render::timeout_notice(question)).await?;
    }

    match view.stage {
        Stage::Presenting => {
            bot.send_message(chat_id, render::question_text(&view))
                .parse_mode(ParseMode::Html)
                .reply_markup(render::answer_keyboard(&view))
                .await?;
            schedule_timeout(
                bot.clone(),
                env.clone(),
                chat_id,
                session_id,
                view.index,
                view.remaining_seconds,
            );
        }
        Stage::AwaitingConfirmation => {
            if let Some(feedback) = &view.feedback {
                bot.send_message(chat_id, render::feedback_text(&view, feedback))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(render::next_keyboard(&view))
                    .await?;
            }
        }
        Stage::Complete => show_results(bot, chat_id, &session).await?,
    }
    Ok(())
}

async fn show_results(bot: &Bot, chat_id: ChatId, session: &ExamSession) -> HandlerResult {
    let result = session.score()?;
    info!(
        "Chat {} scored {}/{} ({} timed out, {} unanswered)",
        chat_id,
        result.total_score,
        result.count,
        result.timed_out(),
        result.unanswered()
    );
    let messages = render::result_messages(&result);
    let last = messages.len().saturating_sub(1);
    for (i, text) in messages.into_iter().enumerate() {
        let request = bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
        if i == last {
            request.reply_markup(render::results_keyboard()).await?;
        } else {
            request.await?;
        }
    }
    Ok(())
}

/// A stored session that fails validation takes the chat back to the start screen.
async fn collapse(bot: &Bot, env: &ExamEnv, chat_id: ChatId, error: SessionError) -> HandlerResult {
    error!("Dropping broken session of chat {}: {}", chat_id, error);
    env.dialogue(chat_id).update(State::ReceiveCategory).await?;
    bot.send_message(chat_id, "Щось пішло не так із тестом, почнімо спочатку.")
        .await?;
    ask_category(bot, chat_id, &env.bank).await
}

/// Loads the chat's running exam. `Ok(None)` when there is none or it had to be dropped.
async fn load_session(
    bot: &Bot,
    env: &ExamEnv,
    chat_id: ChatId,
) -> Result<Option<ExamSession>, Box<dyn std::error::Error + Send + Sync>> {
    match stored_session(env.dialogue(chat_id).get().await?) {
        Ok(session) => Ok(session),
        Err(e) => {
            collapse(bot, env, chat_id, e).await?;
            Ok(None)
        }
    }
}

fn schedule_timeout(
    bot: Bot,
    env: ExamEnv,
    chat_id: ChatId,
    session_id: u64,
    question: usize,
    remaining: u32,
) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(u64::from(remaining)) + TIMER_SLACK).await;
        if let Err(e) = fire_timeout(&bot, &env, chat_id, session_id, question).await {
            warn!("Timeout check for chat {} failed: {}", chat_id, e);
        }
    });
}

/// Ticks the stored session if it is still on the question the timer was armed for.
async fn fire_timeout(
    bot: &Bot,
    env: &ExamEnv,
    chat_id: ChatId,
    session_id: u64,
    question: usize,
) -> HandlerResult {
    let lock = env.locks.get(chat_id);
    let _guard = lock.lock().await;

    let Some(mut session) = load_session(bot, env, chat_id).await? else {
        return Ok(());
    };
    match timer_outcome(&mut session, session_id, question, &SystemClock)? {
        TimerOutcome::Stale => {
            debug!("Stale timer for question {} in chat {}", question + 1, chat_id);
            Ok(())
        }
        TimerOutcome::Rearm(remaining) => {
            let (bot, env) = (bot.clone(), env.clone());
            schedule_timeout(bot, env, chat_id, session_id, question, remaining);
            Ok(())
        }
        TimerOutcome::Expired(view) => publish(bot, env, chat_id, session, view).await,
    }
}

/// Inline button presses on exam messages.
pub async fn exam_callback(bot: Bot, q: CallbackQuery, env: ExamEnv) -> HandlerResult {
    let Some(chat_id) = q.message.as_ref().map(|m| m.chat.id) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        warn!("Unknown callback data {:?} in chat {}", q.data, chat_id);
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let lock = env.locks.get(chat_id);
    let _guard = lock.lock().await;

    let Some(mut session) = load_session(&bot, &env, chat_id).await? else {
        bot.answer_callback_query(q.id).text(render::EXAM_OVER).await?;
        return Ok(());
    };

    match route_callback(&mut session, action, &SystemClock) {
        CallbackOutcome::Closed => {
            debug!(
                "Press for question {} while on {} in chat {}",
                action.question() + 1,
                session.current_index() + 1,
                chat_id
            );
            bot.answer_callback_query(q.id).text(render::QUESTION_CLOSED).await?;
            Ok(())
        }
        CallbackOutcome::Toast(toast) => {
            env.dialogue(chat_id).update(State::Exam { session }).await?;
            bot.answer_callback_query(q.id).text(toast).await?;
            Ok(())
        }
        CallbackOutcome::Show(view) => {
            bot.answer_callback_query(q.id).await?;
            publish(&bot, &env, chat_id, session, view).await
        }
        CallbackOutcome::Rejected(e) => {
            bot.answer_callback_query(q.id).await?;
            env.config.transition_policy.reject(chat_id, e)
        }
    }
}

/// Any text during an exam re-renders the current screen with a fresh countdown.
pub async fn exam_message(bot: Bot, msg: Message, env: ExamEnv) -> HandlerResult {
    let chat_id = msg.chat.id;
    let lock = env.locks.get(chat_id);
    let _guard = lock.lock().await;

    let Some(mut session) = load_session(&bot, &env, chat_id).await? else {
        return Ok(());
    };
    let view = session.tick(&SystemClock)?;
    publish(&bot, &env, chat_id, session, view).await
}

/// The results screen: retry with the same settings, change them, or see the results again.
pub async fn finished(
    bot: Bot,
    dialogue: ExamDialogue,
    msg: Message,
    session: ExamSession,
    env: ExamEnv,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    match msg.text() {
        Some(render::RETRY) => {
            let lock = env.locks.get(chat_id);
            let _guard = lock.lock().await;
            let configuration = session.reset();
            start_exam(&bot, &env, chat_id, configuration).await
        }
        Some(render::NEW_SETTINGS) => {
            session.reset();
            dialogue.update(State::ReceiveCategory).await?;
            ask_category(&bot, chat_id, &env.bank).await
        }
        Some(render::SHOW_RESULTS) => show_results(&bot, chat_id, &session).await,
        _ => {
            bot.send_message(chat_id, "Обери, що робити далі")
                .reply_markup(render::results_keyboard())
                .await?;
            Ok(())
        }
    }
}

/// `/reset`: drops whatever exam is running and goes back to choosing a category.
/// Passing the access code is not undone.
pub async fn reset(
    bot: Bot,
    dialogue: ExamDialogue,
    msg: Message,
    state: State,
    env: ExamEnv,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let gated = matches!(state, State::Start | State::ReceiveAccessCode);
    if gated && env.config.access_code.is_some() {
        bot.send_message(chat_id, "Спершу введи код доступу").await?;
        dialogue.update(State::ReceiveAccessCode).await?;
        return Ok(());
    }

    let lock = env.locks.get(chat_id);
    let _guard = lock.lock().await;
    // Re-read under the lock, a timeout may have moved the session meanwhile
    match dialogue.get().await? {
        Some(State::Exam { session }) | Some(State::Finished { session }) => {
            session.reset();
        }
        _ => {}
    }
    dialogue.update(State::ReceiveCategory).await?;
    ask_category(&bot, chat_id, &env.bank).await
}
