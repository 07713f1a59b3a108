//! Asset Delivery: sends a scenario's bundle to one chat.
//!
//! Sends go out one at a time, in catalog order. A failed asset is recorded and the next
//! one is still attempted; `deliver` itself never fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::scenario::{AssetLocation, ScenarioAssetCatalog};
use crate::telegram::{AssetSource, MessagingPlatform, OutgoingAsset, TelegramError};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Send(#[from] TelegramError),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Serialize)]
pub struct AssetFailure {
    pub location: AssetLocation,
    #[serde(serialize_with = "display")]
    pub error: DeliveryError,
}

fn display<S: serde::Serializer>(err: &DeliveryError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// What happened to one delivery. Logged, never returned to the submitter.
#[derive(Debug, Serialize)]
pub struct DeliveryOutcome {
    pub chat_id: i64,
    pub scenario_id: String,
    pub assets_attempted: usize,
    pub assets_sent: usize,
    pub assets_failed: Vec<AssetFailure>,
}

impl DeliveryOutcome {
    pub fn is_complete(&self) -> bool {
        self.assets_failed.is_empty()
    }
}

pub struct AssetDelivery {
    catalog: Arc<ScenarioAssetCatalog>,
    platform: Arc<dyn MessagingPlatform>,
    send_timeout: Duration,
    caption: Option<String>,
}

impl AssetDelivery {
    pub fn new(
        catalog: Arc<ScenarioAssetCatalog>,
        platform: Arc<dyn MessagingPlatform>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            platform,
            send_timeout,
            caption: None,
        }
    }

    /// Caption attached to the first asset of every bundle.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn catalog(&self) -> &ScenarioAssetCatalog {
        &self.catalog
    }

    pub async fn deliver(&self, chat_id: i64, scenario_id: &str) -> DeliveryOutcome {
        let assets = self.catalog.assets_for(scenario_id);
        let mut outcome = DeliveryOutcome {
            chat_id,
            scenario_id: scenario_id.to_string(),
            assets_attempted: 0,
            assets_sent: 0,
            assets_failed: Vec::new(),
        };

        for (i, location) in assets.iter().enumerate() {
            outcome.assets_attempted += 1;
            let caption = if i == 0 { self.caption.clone() } else { None };

            match self.send_one(chat_id, location, caption).await {
                Ok(()) => {
                    outcome.assets_sent += 1;
                    tracing::debug!(chat_id, asset = %location, "asset sent");
                }
                Err(error) => {
                    tracing::warn!(chat_id, asset = %location, error = %error, "asset not delivered");
                    outcome.assets_failed.push(AssetFailure {
                        location: location.clone(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            chat_id,
            scenario = %outcome.scenario_id,
            attempted = outcome.assets_attempted,
            sent = outcome.assets_sent,
            failed = outcome.assets_failed.len(),
            "delivery finished"
        );
        outcome
    }

    async fn send_one(
        &self,
        chat_id: i64,
        location: &AssetLocation,
        caption: Option<String>,
    ) -> Result<(), DeliveryError> {
        let source = match location {
            AssetLocation::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| DeliveryError::Read {
                        path: path.clone(),
                        source,
                    })?;
                AssetSource::Upload {
                    file_name: location.file_name(),
                    bytes,
                }
            }
            AssetLocation::Url(url) => AssetSource::Url(url.clone()),
        };
        let asset = OutgoingAsset {
            kind: location.kind(),
            source,
            caption,
        };

        tokio::time::timeout(self.send_timeout, self.platform.send_asset(chat_id, asset))
            .await
            .map_err(|_| DeliveryError::Timeout(self.send_timeout))??;
        Ok(())
    }
}
