pub mod replay;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::range::FetchRange;
use crate::record::Record;

/// Fetches stored message history for a chat.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Yield records honoring `range`: exclusive `min_id`/`max_id`, oldest
    /// first when `range.reverse()`, at most `range.max_items()` records.
    async fn fetch(&self, chat: &str, range: &FetchRange) -> Result<BoxStream<'static, Record>>;
}

/// Which chats a live listener reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenScope {
    All,
    Private,
    /// Numeric chat id or `@username`.
    Chat(String),
}

/// A button press on an inline keyboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackEvent {
    pub id: Option<String>,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub chat_instance: Option<String>,
    pub data: Option<String>,
    /// The message carrying the pressed button, as a raw record.
    pub message: Option<Record>,
}

/// One inbound event from a live listener.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    NewMessage(Record),
    Edited(Record),
    Callback(CallbackEvent),
}

/// Pushes live events into `events` until `cancel` fires or the source ends.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn listen(
        &self,
        scope: ListenScope,
        events: mpsc::Sender<LiveEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}
