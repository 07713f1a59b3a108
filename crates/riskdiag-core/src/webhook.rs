//! Webhook Dispatcher: inbound bot updates.
//!
//! Every update moves through `Received -> Parsed -> Routed`; the HTTP layer acknowledges
//! whatever stage was reached. A message with a sender always refreshes the chat binding
//! before any handler runs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::chat_registry::{ChatBinding, ChatRegistry};
use crate::telegram::{Message, MessagingPlatform, ReplyKeyboardMarkup, TelegramError, Update};

pub const WELCOME_TEXT: &str = "Привет! 👋 Нажми кнопку ниже, чтобы пройти диагностику IT-рисков:";
pub const WELCOME_BUTTON: &str = "🚀 Открыть диагностику IT-рисков";
pub const HELP_TEXT: &str = "Нажми /start и открой диагностику IT-рисков. \
После отправки формы материалы по выбранному сценарию придут в этот чат.";

/// Header the platform echoes back when the webhook was registered with a secret token.
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// What a message means to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// `/name args`; `name` is lowercased, any `@botname` suffix dropped.
    Command { name: String, args: String },
    Text(String),
    Other,
}

impl UpdateKind {
    pub fn of(message: &Message) -> Self {
        let Some(text) = message.text.as_deref().map(str::trim) else {
            return UpdateKind::Other;
        };
        let Some(rest) = text.strip_prefix('/') else {
            return UpdateKind::Text(text.to_string());
        };
        let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        if name.is_empty() {
            return UpdateKind::Text(text.to_string());
        }
        UpdateKind::Command {
            name,
            args: args.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Received,
    Parsed,
    Routed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Start,
    Help,
    Ignored,
}

/// Trace of one dispatch, for logs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub stage: DispatchStage,
    pub update_id: Option<i64>,
    pub binding: Option<ChatBinding>,
    pub route: Option<Route>,
    /// Secret header missing or wrong; the body was not looked at.
    pub rejected: bool,
}

impl DispatchReport {
    fn received() -> Self {
        Self {
            stage: DispatchStage::Received,
            update_id: None,
            binding: None,
            route: None,
            rejected: false,
        }
    }
}

pub struct WebhookDispatcher {
    registry: ChatRegistry,
    platform: Arc<dyn MessagingPlatform>,
    web_app_url: String,
    webhook_secret: Option<String>,
    reply_timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        registry: ChatRegistry,
        platform: Arc<dyn MessagingPlatform>,
        web_app_url: impl Into<String>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            platform,
            web_app_url: web_app_url.into(),
            webhook_secret: None,
            reply_timeout,
        }
    }

    /// Require the secret-token header on every update. Blank secrets are ignored.
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub async fn dispatch(&self, secret_header: Option<&str>, body: &[u8]) -> DispatchReport {
        let mut report = DispatchReport::received();

        if let Some(expected) = &self.webhook_secret {
            let ok = secret_header
                .map(|got| bool::from(got.as_bytes().ct_eq(expected.as_bytes())))
                .unwrap_or(false);
            if !ok {
                tracing::warn!("webhook update with missing or wrong secret token dropped");
                report.rejected = true;
                return report;
            }
        }

        let update: Update = match serde_json::from_slice(body) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, len = body.len(), "unparseable webhook update");
                return report;
            }
        };
        report.stage = DispatchStage::Parsed;
        report.update_id = Some(update.update_id);

        let Some(message) = update.any_message() else {
            tracing::debug!(update_id = update.update_id, "update without a message ignored");
            report.stage = DispatchStage::Routed;
            report.route = Some(Route::Ignored);
            return report;
        };

        if let Some(from) = &message.from {
            report.binding = Some(self.registry.record(from.id, message.chat.id));
        }

        let route = match UpdateKind::of(message) {
            UpdateKind::Command { name, .. } => match name.as_str() {
                "start" => Route::Start,
                "help" => Route::Help,
                _ => Route::Ignored,
            },
            UpdateKind::Text(_) | UpdateKind::Other => Route::Ignored,
        };
        report.stage = DispatchStage::Routed;
        report.route = Some(route);

        let chat_id = message.chat.id;
        let sent = match route {
            Route::Start => {
                let keyboard = ReplyKeyboardMarkup::web_app_button(WELCOME_BUTTON, &self.web_app_url);
                self.reply(chat_id, WELCOME_TEXT, Some(keyboard)).await
            }
            Route::Help => self.reply(chat_id, HELP_TEXT, None).await,
            Route::Ignored => Ok(()),
        };
        if let Err(e) = sent {
            tracing::warn!(chat_id, ?route, error = %e, "reply failed");
        }

        report
    }

    async fn reply(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        tokio::time::timeout(
            self.reply_timeout,
            self.platform.send_message(chat_id, text, keyboard),
        )
        .await
        .map_err(|_| TelegramError::Timeout(self.reply_timeout))?
    }
}
