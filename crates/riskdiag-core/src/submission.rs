//! Lead form submission: request body, validation, and the validated request the
//! resolver works from.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::identity::SignedPayload;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static email pattern")
});

/// Rejected form input. The message is shown to the submitter as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Введите имя.")]
    EmptyName,

    #[error("Введите корректный email.")]
    InvalidEmail,
}

/// `POST /submit` body as the web app sends it. Every field is optional on the wire;
/// [`SubmitForm::validate`] decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// String or number; the web app sends whatever `data-scenario` held.
    #[serde(default)]
    pub scenario: Option<serde_json::Value>,
    /// Free-text contact: `@handle`, numeric id, or a phone number.
    #[serde(default)]
    pub telegram: Option<String>,
    /// `Telegram.WebApp.initData` when opened inside the bot.
    #[serde(default)]
    pub init_data: Option<String>,
    /// `Telegram.WebApp.initDataUnsafe.user.id`.
    #[serde(default)]
    pub telegram_user_id: Option<i64>,
    /// Login Widget callback object.
    #[serde(default)]
    pub telegram_auth: Option<serde_json::Value>,
}

/// A validated submission. Identity-related fields are still untrusted hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub name: String,
    pub email: String,
    pub scenario_id: String,
    pub raw_identity_hint: Option<String>,
    pub signed_identity_payload: Option<SignedPayload>,
    pub client_supplied_user_id: Option<i64>,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

impl SubmitForm {
    pub fn validate(self) -> Result<SubmissionRequest, ValidationError> {
        let name = trimmed(self.name).ok_or(ValidationError::EmptyName)?;
        let email = trimmed(self.email)
            .filter(|e| is_valid_email(e))
            .ok_or(ValidationError::InvalidEmail)?;

        let scenario_id = match self.scenario {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
        };

        // Init data comes from the platform's own client, so it is preferred over the widget.
        let signed_identity_payload = match trimmed(self.init_data) {
            Some(raw) => Some(SignedPayload::WebAppInitData(raw)),
            None => self
                .telegram_auth
                .filter(|v| !v.is_null())
                .and_then(|v| match SignedPayload::from_login_widget(&v) {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring malformed login widget payload");
                        None
                    }
                }),
        };

        Ok(SubmissionRequest {
            name,
            email,
            scenario_id,
            raw_identity_hint: trimmed(self.telegram),
            signed_identity_payload,
            client_supplied_user_id: self.telegram_user_id,
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
