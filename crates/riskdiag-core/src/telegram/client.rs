//! reqwest-backed Bot API client.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use super::types::{ApiResponse, Chat, ReplyKeyboardMarkup};
use super::{AssetSource, MessagingPlatform, OutgoingAsset, TelegramError};
use crate::scenario::AssetKind;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Every request (send, lookup, webhook registration) is bounded by `timeout`.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelegramError::Transport(e.to_string()))?;
        let api_base = api_base.into();
        Ok(Self {
            client,
            api_base: if api_base.trim().is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.trim_end_matches('/').to_string()
            },
            token: token.into(),
            timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TelegramError> {
        let response = request
            .send()
            .await
            .map_err(|e| TelegramError::from_reqwest(e, self.timeout))?;
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TelegramError::from_reqwest(e, self.timeout))?;

        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| "no description".to_string());
            tracing::warn!(method, code = ?envelope.error_code, %description, "Bot API call rejected");
            return Err(TelegramError::Api {
                code: envelope.error_code,
                description,
            });
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::Decode(format!("{} returned no result", method)))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        self.call(method, self.client.post(self.method_url(method)).json(body))
            .await
    }

    /// Points the bot's webhook at `url`. `secret_token` is echoed back by the platform in
    /// the `X-Telegram-Bot-Api-Secret-Token` header of every delivery.
    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "edited_message"],
        });
        if let Some(secret) = secret_token {
            body["secret_token"] = serde_json::Value::String(secret.to_string());
        }
        let _: bool = self.call_json("setWebhook", &body).await?;
        tracing::info!(%url, "bot webhook registered");
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessagingPlatform for TelegramClient {
    async fn send_asset(&self, chat_id: i64, asset: OutgoingAsset) -> Result<(), TelegramError> {
        let (method, field) = match asset.kind {
            AssetKind::Photo => ("sendPhoto", "photo"),
            AssetKind::Document => ("sendDocument", "document"),
        };

        let _: serde_json::Value = match asset.source {
            AssetSource::Url(url) => {
                let mut body = serde_json::json!({ "chat_id": chat_id });
                body[field] = serde_json::Value::String(url);
                if let Some(caption) = asset.caption {
                    body["caption"] = serde_json::Value::String(caption);
                }
                self.call_json(method, &body).await?
            }
            AssetSource::Upload { file_name, bytes } => {
                let mut form = Form::new()
                    .text("chat_id", chat_id.to_string())
                    .part(field, Part::bytes(bytes).file_name(file_name));
                if let Some(caption) = asset.caption {
                    form = form.text("caption", caption);
                }
                self.call(method, self.client.post(self.method_url(method)).multipart(form))
                    .await?
            }
        };
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = keyboard {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| TelegramError::Decode(e.to_string()))?;
        }
        let _: serde_json::Value = self.call_json("sendMessage", &body).await?;
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<i64, TelegramError> {
        let handle = handle.trim().trim_start_matches('@');
        let body = serde_json::json!({ "chat_id": format!("@{}", handle) });
        let chat: Chat = self.call_json("getChat", &body).await?;
        Ok(chat.id)
    }
}
