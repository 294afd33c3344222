use std::sync::mpsc::Receiver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{GameId, Identity, PlayerId};
use crate::store::StoreError;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: PlayerId,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: &Identity, text: impl Into<String>) -> Self {
        Self {
            sender: sender.id.clone(),
            sender_name: sender.name.clone(),
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Append-only per-game message log.
pub trait ChatLog: Send + Sync {
    /// Appends a message. The log assigns the final timestamp so that log
    /// order and timestamp order agree.
    fn append(&self, game: &GameId, message: ChatMessage) -> Result<(), StoreError>;

    /// Every message of the game in order, backlog first, then new ones as
    /// they are appended.
    fn watch_chat(&self, game: &GameId) -> Result<Receiver<ChatMessage>, StoreError>;
}
