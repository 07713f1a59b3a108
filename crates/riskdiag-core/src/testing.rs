//! Recording fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::telegram::{MessagingPlatform, OutgoingAsset, ReplyKeyboardMarkup, TelegramError};

#[derive(Default)]
pub(crate) struct RecordingPlatform {
    pub assets: Mutex<Vec<(i64, OutgoingAsset)>>,
    pub messages: Mutex<Vec<(i64, String, Option<ReplyKeyboardMarkup>)>>,
    pub lookups: Mutex<Vec<String>>,
    /// `@handle` (without `@`) -> chat id answers for `resolve_handle`.
    pub handles: HashMap<String, i64>,
    /// Chat ids whose sends fail with an API error (e.g. bot blocked).
    pub blocked: Vec<i64>,
    /// Delay applied to every send, to exercise timeouts.
    pub send_delay: Option<Duration>,
    /// Delay applied to every handle lookup.
    pub lookup_delay: Option<Duration>,
}

impl RecordingPlatform {
    pub fn with_handle(mut self, handle: &str, chat_id: i64) -> Self {
        self.handles.insert(handle.to_string(), chat_id);
        self
    }

    pub fn sent_assets(&self) -> Vec<(i64, OutgoingAsset)> {
        self.assets.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(i64, String, Option<ReplyKeyboardMarkup>)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    fn check_blocked(&self, chat_id: i64) -> Result<(), TelegramError> {
        if self.blocked.contains(&chat_id) {
            return Err(TelegramError::Api {
                code: Some(403),
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessagingPlatform for RecordingPlatform {
    async fn send_asset(&self, chat_id: i64, asset: OutgoingAsset) -> Result<(), TelegramError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_blocked(chat_id)?;
        self.assets.lock().unwrap().push((chat_id, asset));
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        self.check_blocked(chat_id)?;
        self.messages
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), keyboard));
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<i64, TelegramError> {
        self.lookups.lock().unwrap().push(handle.to_string());
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        self.handles
            .get(handle.trim_start_matches('@'))
            .copied()
            .ok_or_else(|| TelegramError::Api {
                code: Some(400),
                description: "Bad Request: chat not found".into(),
            })
    }
}
