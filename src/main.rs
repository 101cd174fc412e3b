mod config;
mod exam;
mod quiz;
mod render;

use std::sync::Arc;

use config::Config;
use dotenv::dotenv;
use exam::{ChatLocks, ExamEnv};
use quiz::{ExamConfiguration, QuestionBank, ScoringMode};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::KeyboardRemove,
};

type ExamDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Where each chat is. Stored as JSON in SQLite, so a running exam survives restarts.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveAccessCode,
    ReceiveCategory,
    ReceiveAmountOfQuestions {
        category: String,
    },
    ReceiveScoringMode {
        category: String,
        amount: usize,
    },
    ReceiveTimeLimit {
        category: String,
        amount: usize,
        mode: ScoringMode,
    },
    Exam {
        session: quiz::ExamSession,
    },
    Finished {
        session: quiz::ExamSession,
    },
}

type UserInfoStorage = std::sync::Arc<ErasedStorage<State>>;

/// Bounds for a time limit typed in by hand.
const MIN_TIME_LIMIT: u32 = 5;
const MAX_TIME_LIMIT: u32 = 600;

#[tokio::main]
async fn main() -> HandlerResult {
    let env_file = dotenv();
    pretty_env_logger::init();
    if env_file.is_err() {
        log::warn!("No .env file found, using the process environment only");
    }
    log::info!("Starting exam bot...");

    let config = Config::from_env()?;

    let bank = match QuestionBank::open(&config.questions_path) {
        Ok(bank) => bank,
        Err(e) => {
            log::error!("Cannot start without a question bank: {}", e);
            return Err(e.into());
        }
    };

    if !bank.rejected().is_empty() {
        log::warn!("{} malformed rows were left out of the bank", bank.rejected().len());
    }

    let bot = Bot::from_env();

    log::info!("Opening dialogue storage at {}", config.db_path);
    let storage: UserInfoStorage = SqliteStorage::open(&config.db_path, Json).await?.erase();

    let env = ExamEnv {
        storage: storage.clone(),
        locks: Arc::new(ChatLocks::default()),
        config: Arc::new(config),
        bank: Arc::new(bank),
    };

    let messages = Update::filter_message()
        .enter_dialogue::<Message, ErasedStorage<State>, State>()
        .branch(
            dptree::filter(|msg: Message| msg.text().map_or(false, render::is_reset_command))
                .endpoint(exam::reset),
        )
        .branch(dptree::case![State::Start].endpoint(start))
        .branch(dptree::case![State::ReceiveAccessCode].endpoint(receive_access_code))
        .branch(dptree::case![State::ReceiveCategory].endpoint(receive_category))
        .branch(
            dptree::case![State::ReceiveAmountOfQuestions { category }]
                .endpoint(receive_amount_of_questions),
        )
        .branch(
            dptree::case![State::ReceiveScoringMode { category, amount }]
                .endpoint(receive_scoring_mode),
        )
        .branch(
            dptree::case![State::ReceiveTimeLimit { category, amount, mode }]
                .endpoint(receive_time_limit),
        )
        .branch(dptree::case![State::Exam { session }].endpoint(exam::exam_message))
        .branch(dptree::case![State::Finished { session }].endpoint(exam::finished));

    let buttons = Update::filter_callback_query().endpoint(exam::exam_callback);

    Dispatcher::builder(bot, dptree::entry().branch(messages).branch(buttons))
        .dependencies(dptree::deps![storage, env])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

async fn ask_category(bot: &Bot, chat_id: ChatId, bank: &QuestionBank) -> HandlerResult {
    let (text, keyboard) = render::category_prompt(bank);
    bot.send_message(chat_id, text).reply_markup(keyboard).await?;
    Ok(())
}

async fn start(bot: Bot, dialogue: ExamDialogue, msg: Message, env: ExamEnv) -> HandlerResult {
    bot.send_message(msg.chat.id, render::RULES_TEXT).await?;

    if env.config.access_code.is_some() {
        bot.send_message(msg.chat.id, "Введи код доступу")
            .reply_markup(KeyboardRemove::new())
            .await?;
        dialogue.update(State::ReceiveAccessCode).await?;
        return Ok(());
    }

    ask_category(&bot, msg.chat.id, &env.bank).await?;
    dialogue.update(State::ReceiveCategory).await?;
    Ok(())
}

async fn receive_access_code(
    bot: Bot,
    dialogue: ExamDialogue,
    msg: Message,
    env: ExamEnv,
) -> HandlerResult {
    let expected = env.config.access_code.as_deref();
    match msg.text().map(str::trim) {
        Some(code) if expected.map_or(true, |expected| expected == code) => {
            log::info!("Chat {} passed the access check", msg.chat.id);
            bot.send_message(msg.chat.id, "Код прийнято").await?;
            ask_category(&bot, msg.chat.id, &env.bank).await?;
            dialogue.update(State::ReceiveCategory).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Невірний код, спробуй ще раз")
                .await?;
        }
    }
    Ok(())
}

async fn receive_category(
    bot: Bot,
    dialogue: ExamDialogue,
    msg: Message,
    env: ExamEnv,
) -> HandlerResult {
    let category = match msg.text().map(str::trim) {
        Some(text) if env.bank.count_in(text) > 0 => text.to_string(),
        _ => {
            bot.send_message(msg.chat.id, "Будь ласка, виберіть один з розділів")
                .await?;
            return ask_category(&bot, msg.chat.id, &env.bank).await;
        }
    };

    let max = env.config.max_questions;
    bot.send_message(
        msg.chat.id,
        format!(
            "У розділі «{}» {} питань. Обери кількість питань (1–{})",
            category,
            env.bank.count_in(&category),
            max
        ),
    )
    .reply_markup(render::amount_keyboard(max))
    .await?;

    dialogue
        .update(State::ReceiveAmountOfQuestions { category })
        .await?;
    Ok(())
}

async fn receive_amount_of_questions(
    bot: Bot,
    dialogue: ExamDialogue,
    category: String,
    msg: Message,
    env: ExamEnv,
) -> HandlerResult {
    let max = env.config.max_questions;
    let amount = match msg.text().map(|t| t.trim().parse::<usize>()) {
        Some(Ok(amount)) => amount,
        _ => {
            bot.send_message(msg.chat.id, "Будь ласка, введіть число")
                .await?;
            return Ok(());
        }
    };
    if amount == 0 || amount > max {
        bot.send_message(msg.chat.id, format!("Кількість питань має бути від 1 до {}", max))
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "Коли показувати правильні відповіді?")
        .reply_markup(render::mode_keyboard())
        .await?;
    dialogue
        .update(State::ReceiveScoringMode { category, amount })
        .await?;
    Ok(())
}

async fn receive_scoring_mode(
    bot: Bot,
    dialogue: ExamDialogue,
    (category, amount): (String, usize),
    msg: Message,
    env: ExamEnv,
) -> HandlerResult {
    let Some(mode) = msg.text().and_then(render::parse_mode) else {
        bot.send_message(msg.chat.id, "Будь ласка, виберіть один з варіантів")
            .reply_markup(render::mode_keyboard())
            .await?;
        return Ok(());
    };

    bot.send_message(msg.chat.id, "Скільки секунд на одне питання?")
        .reply_markup(render::time_limit_keyboard(env.config.default_time_limit_seconds))
        .await?;
    dialogue
        .update(State::ReceiveTimeLimit { category, amount, mode })
        .await?;
    Ok(())
}

/// Button text `Як у питаннях (…)` keeps the configured default, a number sets a new one.
fn parse_time_limit_choice(text: &str, default_seconds: u32) -> Option<u32> {
    let text = text.trim();
    if text.starts_with(render::DEFAULT_TIME_LIMIT) {
        return Some(default_seconds);
    }
    text.parse::<u32>()
        .ok()
        .filter(|s| (MIN_TIME_LIMIT..=MAX_TIME_LIMIT).contains(s))
}

async fn receive_time_limit(
    bot: Bot,
    (category, amount, mode): (String, usize, ScoringMode),
    msg: Message,
    env: ExamEnv,
) -> HandlerResult {
    let default_seconds = env.config.default_time_limit_seconds;
    let Some(seconds) = msg.text().and_then(|t| parse_time_limit_choice(t, default_seconds)) else {
        bot.send_message(
            msg.chat.id,
            format!("Введіть число секунд від {} до {}", MIN_TIME_LIMIT, MAX_TIME_LIMIT),
        )
        .reply_markup(render::time_limit_keyboard(default_seconds))
        .await?;
        return Ok(());
    };

    let configuration = ExamConfiguration {
        category,
        requested_count: amount,
        scoring_mode: mode,
        default_time_limit_seconds: seconds,
        shortfall: env.config.shortfall,
    };

    let lock = env.locks.get(msg.chat.id);
    let _guard = lock.lock().await;
    exam::start_exam(&bot, &env, msg.chat.id, configuration).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_limit_choice_accepts_default_button_and_bounded_numbers() {
        assert_eq!(parse_time_limit_choice("Як у питаннях (60 с)", 60), Some(60));
        assert_eq!(parse_time_limit_choice(" 90 ", 60), Some(90));
        assert_eq!(parse_time_limit_choice("4", 60), None);
        assert_eq!(parse_time_limit_choice("601", 60), None);
        assert_eq!(parse_time_limit_choice("soon", 60), None);
    }
}
