//! RISKDIAG — Core library.
//! Identity resolution, chat bindings and scenario asset delivery for the IT-risk
//! diagnostics bot, plus the CRM and Bot API adapters they sit on.

pub mod chat_registry;
pub mod config;
pub mod crm;
pub mod delivery;
pub mod identity;
pub mod resolver;
pub mod scenario;
pub mod submission;
pub mod telegram;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use chat_registry::{ChatBinding, ChatRegistry};
pub use config::AppConfig;
pub use crm::{BitrixCrm, CrmError, Lead, LeadSink};
pub use delivery::{AssetDelivery, AssetFailure, DeliveryError, DeliveryOutcome};
pub use identity::{IdentityVerifier, SignatureError, SignedPayload, VerifiedIdentity};
pub use resolver::{Resolution, ResolutionSource, SubmissionResolver};
pub use scenario::{AssetKind, AssetLocation, CatalogError, ScenarioAssetCatalog};
pub use submission::{SubmissionRequest, SubmitForm, ValidationError};
pub use telegram::{MessagingPlatform, TelegramClient, TelegramError};
pub use webhook::{DispatchReport, DispatchStage, WebhookDispatcher};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
