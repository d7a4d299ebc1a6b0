use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageEntityKind, ParseMode};
use teloxide::utils::html;
use tracing::{debug, error, info, warn};

use crate::config::{AiProvider, TelegramConfig};
use crate::platform::InboundMessage;
use crate::responder::Responder;

/// Stay under Telegram's 4096 char message limit
const MAX_MESSAGE_LEN: usize = 4000;

pub const SEND_FAILURE_TEXT: &str = "Sorry, I couldn't send the response back. Please try again.";

/// Split long messages on newline or space boundaries
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Command name without the leading slash or an `@botname` suffix
fn parse_command(text: &str) -> Option<&str> {
    let word = text.strip_prefix('/')?.split(char::is_whitespace).next()?;
    word.split('@').next().filter(|name| !name.is_empty())
}

/// Only a bot command entity at offset 0 makes the message a command
fn command_name<'a>(msg: &Message, text: &'a str) -> Option<&'a str> {
    let leading_command = msg.entities().is_some_and(|entities| {
        entities
            .iter()
            .any(|e| e.offset == 0 && matches!(e.kind, MessageEntityKind::BotCommand))
    });
    if leading_command {
        parse_command(text)
    } else {
        None
    }
}

/// Keep the message if its sender is allow-listed; an empty list admits everyone
fn allowed_sender(msg: Message, allowed_user_ids: &[u64]) -> Option<Message> {
    if allowed_user_ids.is_empty() {
        return Some(msg);
    }
    let user = msg.from.as_ref()?;
    if allowed_user_ids.contains(&user.id.0) {
        Some(msg)
    } else {
        None
    }
}

fn mention_html(user_id: u64, name: &str) -> String {
    format!("<a href=\"tg://user?id={}\">{}</a>", user_id, html::escape(name))
}

fn start_message(mention: &str, provider: AiProvider) -> String {
    format!(
        "Hi {}!\n\n\
         I'm an AI chat bot powered by {}.\n\n\
         Just send me any message, and I'll do my best to respond. \
         I can handle short questions or longer discussions.\n\n\
         Let's chat!",
        mention,
        provider.display_name()
    )
}

fn inbound_from(msg: &Message, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id: msg.chat.id.0,
        user_id: msg.from.as_ref().map(|user| user.id.0),
        user_name: msg
            .from
            .as_ref()
            .map(|user| user.full_name())
            .unwrap_or_else(|| "unknown".to_string()),
        text: text.to_string(),
    }
}

/// Create the bot handle, pointing it at a custom Bot API server when configured
pub fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    let bot = Bot::new(&config.bot_token);
    match &config.api_url {
        Some(raw) => {
            let url = reqwest::Url::parse(raw)
                .with_context(|| format!("Invalid TELEGRAM_API_URL: {}", raw))?;
            info!("Using Telegram Bot API at {}", url);
            Ok(bot.set_api_url(url))
        }
        None => Ok(bot),
    }
}

/// Run the Telegram bot platform until the process is interrupted
pub async fn run(bot: Bot, responder: Arc<Responder>, allowed_user_ids: Vec<u64>) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter_map(move |msg: Message| allowed_sender(msg, &allowed_user_ids))
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![responder])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error from the update handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, responder: Arc<Responder>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Ok(()),
    };

    if let Some(command) = command_name(&msg, text) {
        if command == "start" {
            let mention = match msg.from.as_ref() {
                Some(user) => mention_html(user.id.0, &user.full_name()),
                None => "there".to_string(),
            };
            bot.send_message(msg.chat.id, start_message(&mention, responder.provider()))
                .parse_mode(ParseMode::Html)
                .await?;
        } else {
            debug!("Ignoring command /{}", command);
        }
        return Ok(());
    }

    let inbound = inbound_from(&msg, text);
    info!(
        "Telegram message from {} ({:?}) in chat {}",
        inbound.user_name, inbound.user_id, inbound.chat_id
    );

    if let Err(e) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
        warn!("Failed to send typing indicator: {}", e);
    }

    let reply = responder.respond(&inbound.text).await;

    if deliver(&bot, ChatId(inbound.chat_id), &reply).await {
        debug!("Reply delivered to chat {}", inbound.chat_id);
    }

    Ok(())
}

/// Send the reply in chunks. On the first failed send, try the fallback text
/// once and give up. Returns whether the whole reply went out.
async fn deliver(bot: &Bot, chat_id: ChatId, reply: &str) -> bool {
    for chunk in split_message(reply, MAX_MESSAGE_LEN) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            error!("Error sending message back to Telegram: {}", e);
            if let Err(e) = bot.send_message(chat_id, SEND_FAILURE_TEXT).await {
                error!("Failed to send fallback message: {}", e);
            }
            return false;
        }
    }
    true
}
