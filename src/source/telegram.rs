use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CallbackEvent, EventSource, ListenScope, LiveEvent};
use crate::record::{Record, DISCRIMINATOR};

/// Bot API message fields that carry media, in lookup order.
const MEDIA_FIELDS: &[(&str, &str)] = &[
    ("photo", "MessageMediaPhoto"),
    ("video", "MessageMediaVideo"),
    ("animation", "MessageMediaAnimation"),
    ("audio", "MessageMediaAudio"),
    ("voice", "MessageMediaVoice"),
    ("video_note", "MessageMediaVideoNote"),
    ("document", "MessageMediaDocument"),
    ("sticker", "MessageMediaSticker"),
    ("location", "MessageMediaGeo"),
    ("venue", "MessageMediaVenue"),
    ("contact", "MessageMediaContact"),
    ("poll", "MessageMediaPoll"),
    ("dice", "MessageMediaDice"),
];

/// Live listener running a teloxide bot dispatcher.
pub struct TelegramSource {
    bot: Bot,
}

impl TelegramSource {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }
}

/// Shared handler state: where events go and which chats count.
struct Forwarder {
    scope: ListenScope,
    events: mpsc::Sender<LiveEvent>,
}

impl Forwarder {
    async fn send(&self, event: LiveEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver closed; dropping update");
        }
    }
}

#[async_trait]
impl EventSource for TelegramSource {
    async fn listen(
        &self,
        scope: ListenScope,
        events: mpsc::Sender<LiveEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("Starting Telegram listener ({:?})...", scope);

        let forwarder = Arc::new(Forwarder { scope, events });

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(on_message))
            .branch(Update::filter_edited_message().endpoint(on_edited_message))
            .branch(Update::filter_callback_query().endpoint(on_callback_query));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![forwarder])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        let shutdown = dispatcher.shutdown_token();
        let mut task = tokio::spawn(async move { dispatcher.dispatch().await });

        let stopped_on_its_own = tokio::select! {
            _ = cancel.cancelled() => false,
            res = &mut task => {
                res.context("Telegram dispatcher task failed")?;
                true
            }
        };

        if !stopped_on_its_own {
            info!("Stopping Telegram listener...");
            match shutdown.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!("Dispatcher was not running: {:?}", e),
            }
            task.await.context("Telegram dispatcher task failed")?;
        }

        info!("Telegram listener stopped");
        Ok(())
    }
}

async fn on_message(msg: Message, forwarder: Arc<Forwarder>) -> ResponseResult<()> {
    forward_message(&msg, false, &forwarder).await;
    Ok(())
}

async fn on_edited_message(msg: Message, forwarder: Arc<Forwarder>) -> ResponseResult<()> {
    forward_message(&msg, true, &forwarder).await;
    Ok(())
}

async fn forward_message(msg: &Message, edited: bool, forwarder: &Forwarder) {
    let raw = match serde_json::to_value(msg) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode message {}: {}", msg.id.0, e);
            return;
        }
    };
    if !in_scope(&forwarder.scope, &raw["chat"]) {
        return;
    }

    info!(
        "Message {} in chat {}",
        if edited { "edited" } else { "new" },
        msg.chat.id.0
    );
    let record = normalize_message(&raw);
    let event = if edited {
        LiveEvent::Edited(record)
    } else {
        LiveEvent::NewMessage(record)
    };
    forwarder.send(event).await;
}

async fn on_callback_query(
    bot: Bot,
    query: CallbackQuery,
    forwarder: Arc<Forwarder>,
) -> ResponseResult<()> {
    // Answer first so the client stops its loading indicator.
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        debug!("Failed to answer callback query: {}", e);
    }

    let raw = match serde_json::to_value(&query) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode callback query: {}", e);
            return Ok(());
        }
    };
    if !in_scope(&forwarder.scope, &raw["message"]["chat"]) {
        return Ok(());
    }

    let event = callback_event(&raw);
    info!(
        "Callback query in chat {:?} from user {:?}",
        event.chat_id, event.sender_id
    );
    forwarder.send(LiveEvent::Callback(event)).await;
    Ok(())
}

/// Whether a Bot API chat object falls inside the listen scope.
pub fn in_scope(scope: &ListenScope, chat: &Value) -> bool {
    let chat_id = chat.get("id").and_then(Value::as_i64);
    match scope {
        ListenScope::All => true,
        // Private chats are the only ones with positive ids.
        ListenScope::Private => {
            chat.get("type").and_then(Value::as_str) == Some("private")
                || chat_id.is_some_and(|id| id > 0)
        }
        ListenScope::Chat(wanted) => match wanted.parse::<i64>() {
            Ok(id) => chat_id == Some(id),
            Err(_) => {
                let wanted = wanted.trim_start_matches('@');
                chat.get("username")
                    .and_then(Value::as_str)
                    .is_some_and(|u| u.eq_ignore_ascii_case(wanted))
            }
        },
    }
}

fn peer(chat: &Value) -> Value {
    let Some(id) = chat.get("id").and_then(Value::as_i64) else {
        return Value::Null;
    };
    match chat.get("type").and_then(Value::as_str) {
        Some("private") => json!({"_": "PeerUser", "user_id": id}),
        Some("channel") | Some("supergroup") => json!({"_": "PeerChannel", "channel_id": id}),
        Some(_) => json!({"_": "PeerChat", "chat_id": id}),
        None if id > 0 => json!({"_": "PeerUser", "user_id": id}),
        None => json!({"_": "PeerChat", "chat_id": id}),
    }
}

/// Reshape a Bot API message into the pipeline's record layout.
pub fn normalize_message(raw: &Value) -> Record {
    let mut record = Map::new();
    let mut put = |key: &str, value: Value| {
        if !value.is_null() {
            record.insert(key.to_string(), value);
        }
    };

    put(DISCRIMINATOR, json!("Message"));
    put("id", raw["message_id"].clone());
    put("peer_id", peer(&raw["chat"]));
    put("date", raw["date"].clone());
    put("edit_date", raw["edit_date"].clone());
    put("out", json!(false));

    let body = raw
        .get("text")
        .or_else(|| raw.get("caption"))
        .cloned()
        .unwrap_or_else(|| json!(""));
    put("message", body);

    let from_id = if let Some(user_id) = raw["from"].get("id") {
        json!({"_": "PeerUser", "user_id": user_id})
    } else if let Some(channel_id) = raw["sender_chat"].get("id") {
        json!({"_": "PeerChannel", "channel_id": channel_id})
    } else {
        Value::Null
    };
    put("from_id", from_id);

    let fwd = raw
        .get("forward_origin")
        .or_else(|| raw.get("forward_from"))
        .or_else(|| raw.get("forward_from_chat"))
        .cloned()
        .unwrap_or(Value::Null);
    put("fwd_from", fwd);

    if let Some(reply_id) = raw["reply_to_message"].get("message_id") {
        put(
            "reply_to",
            json!({"_": "MessageReplyHeader", "reply_to_msg_id": reply_id}),
        );
    }

    if let Some((field, kind)) = MEDIA_FIELDS
        .iter()
        .find(|(field, _)| raw.get(*field).is_some_and(|v| !v.is_null()))
    {
        let mut media = Map::new();
        media.insert(DISCRIMINATOR.to_string(), json!(kind));
        media.insert(field.to_string(), raw[*field].clone());
        put("media", Value::Object(media));
    }

    let entities = raw
        .get("entities")
        .or_else(|| raw.get("caption_entities"))
        .cloned()
        .unwrap_or(Value::Null);
    put("entities", entities);
    put("grouped_id", raw["media_group_id"].clone());
    put("reply_markup", raw["reply_markup"].clone());

    Value::Object(record)
}

/// Extract a callback event from a Bot API callback query.
pub fn callback_event(raw: &Value) -> CallbackEvent {
    let message = &raw["message"];
    CallbackEvent {
        id: raw["id"].as_str().map(str::to_string),
        chat_id: message["chat"]["id"].as_i64(),
        message_id: message["message_id"].as_i64(),
        sender_id: raw["from"]["id"].as_i64(),
        chat_instance: raw["chat_instance"].as_str().map(str::to_string),
        data: raw["data"].as_str().map(str::to_string),
        message: message
            .get("message_id")
            .is_some()
            .then(|| normalize_message(message)),
    }
}
