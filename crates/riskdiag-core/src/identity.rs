//! Identity Verifier: checks Telegram-signed identity payloads.
//!
//! Two client surfaces hand us a signed bundle of fields:
//! - the Login Widget callback (`telegram_auth`), flat fields with `id`, `first_name`, ...;
//! - the in-app browser (`Telegram.WebApp.initData`), a query string whose `user` field is JSON.
//!
//! Both are checked the same way: drop `hash`, sort the remaining keys, join as `key=value`
//! lines, HMAC-SHA256 with a secret derived from the bot token, compare in constant time.
//! Only the secret derivation differs per surface.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HASH_FIELD: &str = "hash";
const USER_FIELD: &str = "user";
const WEB_APP_KEY: &[u8] = b"WebAppData";

/// Why a signed payload was not accepted. Never fatal: resolution moves on to the next strategy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("payload has no hash field")]
    MissingHash,

    #[error("hash is not valid hex")]
    MalformedHash,

    #[error("signature mismatch")]
    Mismatch,

    #[error("payload is malformed: {0}")]
    Malformed(String),

    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),

    #[error("auth_date {auth_date} is older than {max_age_secs}s")]
    Expired { auth_date: i64, max_age_secs: u64 },
}

/// A signed identity bundle as received from the browser. Not trusted until verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedPayload {
    /// Fields posted by the Login Widget `data-onauth` callback.
    LoginWidget(BTreeMap<String, String>),
    /// Raw `initData` query string from the in-app browser.
    WebAppInitData(String),
}

impl SignedPayload {
    /// Builds a Login Widget payload from the JSON object the widget produced.
    /// Numbers and booleans are rendered the way the widget signs them; nulls are dropped.
    pub fn from_login_widget(value: &serde_json::Value) -> Result<Self, SignatureError> {
        let object = value
            .as_object()
            .ok_or_else(|| SignatureError::Malformed("login widget payload is not an object".into()))?;

        let mut fields = BTreeMap::new();
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(SignatureError::Malformed(format!(
                        "field `{}` is not a scalar",
                        key
                    )))
                }
            };
            fields.insert(key.clone(), rendered);
        }
        Ok(SignedPayload::LoginWidget(fields))
    }

    fn surface(&self) -> &'static str {
        match self {
            SignedPayload::LoginWidget(_) => "login_widget",
            SignedPayload::WebAppInitData(_) => "web_app",
        }
    }
}

/// An identity whose signature checked out. Fields are private and there is no public
/// constructor: the only way to obtain one is [`IdentityVerifier::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    id: i64,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
    auth_date: i64,
    raw_fields: Vec<(String, String)>,
}

impl VerifiedIdentity {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn auth_date(&self) -> i64 {
        self.auth_date
    }

    /// Signed fields (without `hash`) in canonical key order.
    pub fn raw_fields(&self) -> &[(String, String)] {
        &self.raw_fields
    }
}

/// `user` object embedded in Web App init data.
#[derive(Debug, Deserialize)]
struct EmbeddedUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Validates signed payloads against the bot token. Pure: no I/O, no shared state.
#[derive(Clone)]
pub struct IdentityVerifier {
    bot_token: String,
    max_auth_age_secs: Option<u64>,
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("bot_token", &"<redacted>")
            .field("max_auth_age_secs", &self.max_auth_age_secs)
            .finish()
    }
}

impl IdentityVerifier {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            max_auth_age_secs: None,
        }
    }

    /// Reject payloads whose `auth_date` is older than `secs` (relative to the verification time).
    pub fn with_max_auth_age(mut self, secs: Option<u64>) -> Self {
        self.max_auth_age_secs = secs;
        self
    }

    /// Verifies `payload` as of the current wall clock.
    pub fn verify(&self, payload: &SignedPayload) -> Result<VerifiedIdentity, SignatureError> {
        self.verify_at(payload, chrono::Utc::now().timestamp())
    }

    /// Verifies `payload` as of `now` (unix seconds). `now` only matters when a max age is set.
    pub fn verify_at(
        &self,
        payload: &SignedPayload,
        now: i64,
    ) -> Result<VerifiedIdentity, SignatureError> {
        let (mut fields, secret) = match payload {
            SignedPayload::LoginWidget(fields) => (fields.clone(), self.login_widget_secret()),
            SignedPayload::WebAppInitData(raw) => (parse_init_data(raw)?, self.web_app_secret()?),
        };

        let received = fields.remove(HASH_FIELD).ok_or(SignatureError::MissingHash)?;
        let signature = hex::decode(received.trim()).map_err(|_| SignatureError::MalformedHash)?;

        let mut mac =
            HmacSha256::new_from_slice(&secret).map_err(|_| SignatureError::Mismatch)?;
        mac.update(data_check_string(&fields).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::Mismatch)?;

        let identity = extract_identity(fields)?;

        if let Some(max_age_secs) = self.max_auth_age_secs {
            if now.saturating_sub(identity.auth_date) > max_age_secs as i64 {
                return Err(SignatureError::Expired {
                    auth_date: identity.auth_date,
                    max_age_secs,
                });
            }
        }

        tracing::debug!(
            surface = payload.surface(),
            user_id = identity.id,
            "signed identity verified"
        );
        Ok(identity)
    }

    fn login_widget_secret(&self) -> Vec<u8> {
        Sha256::digest(self.bot_token.as_bytes()).to_vec()
    }

    fn web_app_secret(&self) -> Result<Vec<u8>, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(WEB_APP_KEY).map_err(|_| SignatureError::Mismatch)?;
        mac.update(self.bot_token.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Canonical `key=value` lines, keys in byte order (BTreeMap order), `\n`-joined.
fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits an `application/x-www-form-urlencoded` init data string. Later duplicates win.
fn parse_init_data(raw: &str) -> Result<BTreeMap<String, String>, SignatureError> {
    let mut fields = BTreeMap::new();
    for pair in raw.trim().trim_start_matches('?').split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields.insert(form_decode(key)?, form_decode(value)?);
    }
    if fields.is_empty() {
        return Err(SignatureError::Malformed("init data is empty".into()));
    }
    Ok(fields)
}

fn form_decode(s: &str) -> Result<String, SignatureError> {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .map_err(|e| SignatureError::Malformed(e.to_string()))
}

fn extract_identity(fields: BTreeMap<String, String>) -> Result<VerifiedIdentity, SignatureError> {
    let auth_date = fields
        .get("auth_date")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(SignatureError::InvalidField("auth_date"))?;

    let (id, first_name, last_name, username) = match fields.get(USER_FIELD) {
        Some(user_json) => {
            let user: EmbeddedUser = serde_json::from_str(user_json)
                .map_err(|_| SignatureError::InvalidField("user"))?;
            (user.id, user.first_name, user.last_name, user.username)
        }
        None => {
            let id = fields
                .get("id")
                .and_then(|v| v.trim().parse::<i64>().ok())
                .ok_or(SignatureError::InvalidField("id"))?;
            (
                id,
                fields.get("first_name").cloned().unwrap_or_default(),
                fields.get("last_name").cloned(),
                fields.get("username").cloned(),
            )
        }
    };

    Ok(VerifiedIdentity {
        id,
        first_name,
        last_name,
        username,
        auth_date,
        raw_fields: fields.into_iter().collect(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TOKEN: &str = "123456:TEST-token";

    fn sign(fields: &BTreeMap<String, String>, secret: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(data_check_string(fields).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Login Widget payload for `user_id`, signed with `token`.
    pub(crate) fn signed_login_widget(token: &str, user_id: i64) -> SignedPayload {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), user_id.to_string());
        fields.insert("first_name".to_string(), "Alice".to_string());
        fields.insert("username".to_string(), "alice_w".to_string());
        fields.insert("auth_date".to_string(), "1700000000".to_string());
        let hash = sign(&fields, &Sha256::digest(token.as_bytes()));
        fields.insert("hash".to_string(), hash);
        SignedPayload::LoginWidget(fields)
    }

    fn signed_init_data(token: &str, user_id: i64) -> String {
        let user = format!(r#"{{"id":{},"first_name":"Bob","last_name":"Kane","username":"bob_k"}}"#, user_id);
        let mut fields = BTreeMap::new();
        fields.insert("auth_date".to_string(), "1700000100".to_string());
        fields.insert("query_id".to_string(), "AAH-q1".to_string());
        fields.insert("user".to_string(), user.clone());
        let verifier = IdentityVerifier::new(token);
        let hash = sign(&fields, &verifier.web_app_secret().unwrap());
        format!(
            "query_id=AAH-q1&user={}&auth_date=1700000100&hash={}",
            urlencoding::encode(&user),
            hash
        )
    }

    fn hash_of(payload: &SignedPayload) -> String {
        match payload {
            SignedPayload::LoginWidget(f) => f["hash"].clone(),
            SignedPayload::WebAppInitData(_) => unreachable!(),
        }
    }

    fn with_hash(payload: &SignedPayload, hash: String) -> SignedPayload {
        match payload {
            SignedPayload::LoginWidget(f) => {
                let mut f = f.clone();
                f.insert("hash".to_string(), hash);
                SignedPayload::LoginWidget(f)
            }
            SignedPayload::WebAppInitData(_) => unreachable!(),
        }
    }

    #[test]
    fn login_widget_signature_verifies_and_keeps_fields() {
        let payload = signed_login_widget(TOKEN, 4242);
        let identity = IdentityVerifier::new(TOKEN).verify(&payload).unwrap();

        assert_eq!(identity.id(), 4242);
        assert_eq!(identity.first_name(), "Alice");
        assert_eq!(identity.last_name(), None);
        assert_eq!(identity.username(), Some("alice_w"));
        assert_eq!(identity.auth_date(), 1_700_000_000);
        let keys: Vec<&str> = identity.raw_fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["auth_date", "first_name", "id", "username"]);
    }

    #[test]
    fn web_app_init_data_verifies_embedded_user() {
        let payload = SignedPayload::WebAppInitData(signed_init_data(TOKEN, 777));
        let identity = IdentityVerifier::new(TOKEN).verify(&payload).unwrap();

        assert_eq!(identity.id(), 777);
        assert_eq!(identity.first_name(), "Bob");
        assert_eq!(identity.last_name(), Some("Kane"));
        assert_eq!(identity.username(), Some("bob_k"));
        assert_eq!(identity.auth_date(), 1_700_000_100);
    }

    #[test]
    fn any_single_signature_character_change_is_rejected() {
        let payload = signed_login_widget(TOKEN, 4242);
        let verifier = IdentityVerifier::new(TOKEN);
        let hash = hash_of(&payload);

        for i in 0..hash.len() {
            let mut chars: Vec<char> = hash.chars().collect();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            let tampered = with_hash(&payload, chars.into_iter().collect());
            assert!(
                verifier.verify(&tampered).is_err(),
                "altered character at {} was accepted",
                i
            );
        }
    }

    #[test]
    fn wrong_token_or_edited_field_fails_closed() {
        let payload = signed_login_widget(TOKEN, 4242);
        assert_eq!(
            IdentityVerifier::new("999:other").verify(&payload),
            Err(SignatureError::Mismatch)
        );

        let SignedPayload::LoginWidget(mut fields) = payload else {
            unreachable!()
        };
        fields.insert("id".to_string(), "1".to_string());
        assert_eq!(
            IdentityVerifier::new(TOKEN).verify(&SignedPayload::LoginWidget(fields)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn web_app_payload_is_not_accepted_with_login_widget_secret() {
        let raw = signed_init_data(TOKEN, 777);
        let fields = parse_init_data(&raw).unwrap();
        let as_widget = SignedPayload::LoginWidget(fields);
        assert_eq!(
            IdentityVerifier::new(TOKEN).verify(&as_widget),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn missing_or_garbled_hash() {
        let SignedPayload::LoginWidget(mut fields) = signed_login_widget(TOKEN, 1) else {
            unreachable!()
        };
        let verifier = IdentityVerifier::new(TOKEN);

        fields.insert("hash".to_string(), "zz-not-hex".to_string());
        assert_eq!(
            verifier.verify(&SignedPayload::LoginWidget(fields.clone())),
            Err(SignatureError::MalformedHash)
        );

        fields.remove("hash");
        assert_eq!(
            verifier.verify(&SignedPayload::LoginWidget(fields)),
            Err(SignatureError::MissingHash)
        );

        assert!(verifier
            .verify(&SignedPayload::WebAppInitData(String::new()))
            .is_err());
    }

    #[test]
    fn max_auth_age_rejects_stale_payloads() {
        let payload = signed_login_widget(TOKEN, 4242);
        let verifier = IdentityVerifier::new(TOKEN).with_max_auth_age(Some(3600));

        assert!(verifier.verify_at(&payload, 1_700_000_000 + 60).is_ok());
        assert_eq!(
            verifier.verify_at(&payload, 1_700_000_000 + 7200),
            Err(SignatureError::Expired {
                auth_date: 1_700_000_000,
                max_age_secs: 3600
            })
        );
    }

    #[test]
    fn login_widget_json_is_rendered_like_the_widget_signs_it() {
        let value = serde_json::json!({
            "id": 4242,
            "first_name": "Alice",
            "photo_url": null,
            "auth_date": 1700000000,
            "hash": "ab"
        });
        let SignedPayload::LoginWidget(fields) = SignedPayload::from_login_widget(&value).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(fields["id"], "4242");
        assert_eq!(fields["auth_date"], "1700000000");
        assert!(!fields.contains_key("photo_url"));

        assert!(SignedPayload::from_login_widget(&serde_json::json!([1, 2])).is_err());
        assert!(SignedPayload::from_login_widget(&serde_json::json!({"id": {"x": 1}})).is_err());
    }
}
