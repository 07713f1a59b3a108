//! Messaging platform seam (Telegram Bot API).
//!
//! Core logic talks to [`MessagingPlatform`]; [`TelegramClient`] is the production
//! implementation, tests substitute recording fakes.

mod client;
mod types;

use std::time::Duration;

use thiserror::Error;

use crate::scenario::AssetKind;

pub use client::{TelegramClient, DEFAULT_API_BASE};
pub use types::{
    Chat, KeyboardButton, Message, ReplyKeyboardMarkup, Update, User, WebAppInfo,
};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Bot API transport error: {0}")]
    Transport(String),

    #[error("Bot API call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bot API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("Bot API response could not be decoded: {0}")]
    Decode(String),
}

impl TelegramError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TelegramError::Timeout(timeout)
        } else if err.is_decode() {
            TelegramError::Decode(err.to_string())
        } else {
            TelegramError::Transport(err.to_string())
        }
    }
}

/// Asset payload: bytes to upload, or a URL the platform fetches itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Upload { file_name: String, bytes: Vec<u8> },
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAsset {
    pub kind: AssetKind,
    pub source: AssetSource,
    pub caption: Option<String>,
}

/// Outbound calls the pipeline needs from the messaging platform.
#[async_trait::async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// `sendPhoto` / `sendDocument` depending on `asset.kind`.
    async fn send_asset(&self, chat_id: i64, asset: OutgoingAsset) -> Result<(), TelegramError>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboardMarkup>,
    ) -> Result<(), TelegramError>;

    /// `getChat` for a public `@handle`; returns the chat id.
    async fn resolve_handle(&self, handle: &str) -> Result<i64, TelegramError>;
}
