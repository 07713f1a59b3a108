//! Submission Resolver: picks the chat a submission's assets go to.
//!
//! Strategies run in a fixed order and the first one that yields a chat wins:
//!
//! 1. signed identity payload that verifies
//! 2. user id supplied by the in-app browser (unverified)
//! 3. numeric hint with a registry binding
//! 4. numeric hint taken as a chat id
//! 5. handle hint looked up on the platform
//!
//! User ids from (1) and (2) are mapped through the registry when a binding exists; only
//! without one is the user id assumed to be the private chat id.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::chat_registry::ChatRegistry;
use crate::identity::IdentityVerifier;
use crate::submission::SubmissionRequest;
use crate::telegram::MessagingPlatform;

/// `@name`, `t.me/name` or bare `name`; Telegram usernames are 5-32 chars.
static HANDLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:@|(?:https?://)?t\.me/)?([A-Za-z][A-Za-z0-9_]{4,31})/?$")
        .expect("static handle pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    VerifiedIdentity,
    ClientSuppliedId,
    RegistryBinding,
    NumericHint,
    HandleLookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved { chat_id: i64, via: ResolutionSource },
    /// No strategy produced a chat. Not an error: delivery is skipped.
    Unresolved,
}

impl Resolution {
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Resolution::Resolved { chat_id, .. } => Some(*chat_id),
            Resolution::Unresolved => None,
        }
    }
}

pub struct SubmissionResolver {
    verifier: IdentityVerifier,
    registry: ChatRegistry,
    platform: Arc<dyn MessagingPlatform>,
    lookup_timeout: Duration,
}

impl SubmissionResolver {
    pub fn new(
        verifier: IdentityVerifier,
        registry: ChatRegistry,
        platform: Arc<dyn MessagingPlatform>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            registry,
            platform,
            lookup_timeout,
        }
    }

    pub async fn resolve(&self, request: &SubmissionRequest) -> Resolution {
        if let Some(payload) = &request.signed_identity_payload {
            match self.verifier.verify(payload) {
                Ok(identity) => {
                    tracing::debug!(
                        user_id = identity.id(),
                        first_name = identity.first_name(),
                        last_name = ?identity.last_name(),
                        username = ?identity.username(),
                        "signed identity verified"
                    );
                    return self.from_user_id(identity.id(), ResolutionSource::VerifiedIdentity);
                }
                Err(e) => tracing::debug!(error = %e, "signed identity rejected, trying next strategy"),
            }
        }

        if let Some(user_id) = request.client_supplied_user_id {
            return self.from_user_id(user_id, ResolutionSource::ClientSuppliedId);
        }

        let Some(hint) = request
            .raw_identity_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        else {
            return Resolution::Unresolved;
        };

        if let Some(id) = parse_numeric(hint) {
            if let Some(chat_id) = self.registry.lookup(id) {
                return Resolution::Resolved {
                    chat_id,
                    via: ResolutionSource::RegistryBinding,
                };
            }
            return Resolution::Resolved {
                chat_id: id,
                via: ResolutionSource::NumericHint,
            };
        }

        match as_handle(hint) {
            Some(handle) => self.lookup_handle(handle).await,
            None => {
                tracing::debug!("contact hint is neither numeric nor a handle");
                Resolution::Unresolved
            }
        }
    }

    fn from_user_id(&self, user_id: i64, via: ResolutionSource) -> Resolution {
        let chat_id = self.registry.lookup(user_id).unwrap_or(user_id);
        Resolution::Resolved { chat_id, via }
    }

    async fn lookup_handle(&self, handle: &str) -> Resolution {
        match tokio::time::timeout(self.lookup_timeout, self.platform.resolve_handle(handle)).await
        {
            Ok(Ok(chat_id)) => Resolution::Resolved {
                chat_id,
                via: ResolutionSource::HandleLookup,
            },
            Ok(Err(e)) => {
                tracing::info!(%handle, error = %e, "handle could not be resolved");
                Resolution::Unresolved
            }
            Err(_) => {
                tracing::warn!(%handle, timeout = ?self.lookup_timeout, "handle lookup timed out");
                Resolution::Unresolved
            }
        }
    }
}

/// Digits only, with an optional leading minus (group chats have negative ids).
fn parse_numeric(hint: &str) -> Option<i64> {
    let digits = hint.strip_prefix('-').unwrap_or(hint);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    hint.parse().ok()
}

fn as_handle(hint: &str) -> Option<&str> {
    HANDLE_RE
        .captures(hint)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
