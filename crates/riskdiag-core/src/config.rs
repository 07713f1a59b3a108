//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file named by
//! `RISKDIAG_CONFIG` (default `config/riskdiag.toml`, skipped when absent), then plain
//! environment variables (`.env` is loaded by the gateway before this runs).
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | BOT_TOKEN | (required) | Bot API token; also the identity signing secret. |
//! | BITRIX_WEBHOOK_URL | (required) | `crm.lead.add` inbound webhook URL. |
//! | PUBLIC_BASE_URL | (required) | Public https origin; web app button and webhook target. |
//! | HOST / PORT | 0.0.0.0 / 8000 | Listen address. |
//! | WEBAPP_DIR | webapp | `index.html`, `style.css`, `script.js`. |
//! | PDF_PATH | webapp/checklist.pdf | `/download` file and the default asset. |
//! | ASSET_ROOT | webapp/assets | Base directory for scenario assets. |
//! | ASSET_CATALOG_PATH | unset | TOML catalog replacing the built-in scenarios. |
//! | CRM_TIMEOUT_SECS | 10 | CRM POST timeout. |
//! | TELEGRAM_TIMEOUT_SECS | 15 | Per-call Bot API timeout (sends, lookups, replies). |
//! | TELEGRAM_API_BASE | https://api.telegram.org | Bot API origin. |
//! | WEBHOOK_SECRET | unset | Secret token registered with the webhook and checked on updates. |
//! | AUTH_MAX_AGE_SECS | unset | Reject signed identities older than this. |
//! | DELIVERY_CAPTION | unset | Caption on the first delivered asset. |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telegram::DEFAULT_API_BASE;

#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub bitrix_webhook_url: String,
    #[serde(default)]
    pub public_base_url: String,
    pub host: String,
    pub port: u16,
    pub webapp_dir: String,
    pub pdf_path: String,
    pub asset_root: String,
    #[serde(default)]
    pub asset_catalog_path: Option<String>,
    pub crm_timeout_secs: u64,
    pub telegram_timeout_secs: u64,
    pub telegram_api_base: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub auth_max_age_secs: Option<u64>,
    #[serde(default)]
    pub delivery_caption: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("bitrix_webhook_url", &redact(&self.bitrix_webhook_url))
            .field("public_base_url", &self.public_base_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("webapp_dir", &self.webapp_dir)
            .field("pdf_path", &self.pdf_path)
            .field("asset_root", &self.asset_root)
            .field("asset_catalog_path", &self.asset_catalog_path)
            .field("crm_timeout_secs", &self.crm_timeout_secs)
            .field("telegram_timeout_secs", &self.telegram_timeout_secs)
            .field("telegram_api_base", &self.telegram_api_base)
            .field("webhook_secret", &self.webhook_secret.as_deref().map(redact))
            .field("auth_max_age_secs", &self.auth_max_age_secs)
            .field("delivery_caption", &self.delivery_caption)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl AppConfig {
    /// Load from file (if present) and the process environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("RISKDIAG_CONFIG")
            .unwrap_or_else(|_| "config/riskdiag.toml".to_string());
        Self::from_sources(Some(Path::new(&path)), config::Environment::default())
    }

    /// Defaults, then `file` when it exists, then `env`.
    pub fn from_sources(
        file: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000_i64)?
            .set_default("webapp_dir", "webapp")?
            .set_default("pdf_path", "webapp/checklist.pdf")?
            .set_default("asset_root", "webapp/assets")?
            .set_default("crm_timeout_secs", 10_i64)?
            .set_default("telegram_timeout_secs", 15_i64)?
            .set_default("telegram_api_base", DEFAULT_API_BASE)?;

        let builder = match file {
            Some(path) if path.exists() => builder.add_source(config::File::from(path)),
            _ => builder,
        };

        builder.add_source(env).build()?.try_deserialize()
    }

    /// Names of required settings that are empty.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            ("BOT_TOKEN", &self.bot_token),
            ("BITRIX_WEBHOOK_URL", &self.bitrix_webhook_url),
            ("PUBLIC_BASE_URL", &self.public_base_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn crm_timeout(&self) -> Duration {
        Duration::from_secs(self.crm_timeout_secs)
    }

    pub fn telegram_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram_timeout_secs)
    }

    /// Web app URL for the bot's keyboard button.
    pub fn web_app_url(&self) -> String {
        let base = self.public_base_url.trim_end_matches('/');
        format!("{}/", base)
    }

    /// Where the platform should POST updates.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.public_base_url.trim_end_matches('/'))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(map))
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let cfg = AppConfig::from_sources(None, env(&[])).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.pdf_path, "webapp/checklist.pdf");
        assert_eq!(cfg.crm_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.telegram_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.telegram_api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.webhook_secret, None);
        assert_eq!(
            cfg.missing_settings(),
            vec!["BOT_TOKEN", "BITRIX_WEBHOOK_URL", "PUBLIC_BASE_URL"]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riskdiag.toml");
        std::fs::write(
            &path,
            "port = 9000\nbot_token = \"from-file\"\nasset_root = \"/srv/assets\"\n",
        )
        .unwrap();

        let cfg = AppConfig::from_sources(
            Some(&path),
            env(&[
                ("BOT_TOKEN", "123:abc"),
                ("BITRIX_WEBHOOK_URL", "https://crm.example/rest/1/x/crm.lead.add.json"),
                ("PUBLIC_BASE_URL", "https://diag.example.com/"),
                ("CRM_TIMEOUT_SECS", "3"),
                ("AUTH_MAX_AGE_SECS", "86400"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.asset_root, "/srv/assets");
        assert_eq!(cfg.bot_token, "123:abc");
        assert_eq!(cfg.crm_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.auth_max_age_secs, Some(86400));
        assert!(cfg.missing_settings().is_empty());
        assert_eq!(cfg.webhook_url(), "https://diag.example.com/webhook");
        assert_eq!(cfg.web_app_url(), "https://diag.example.com/");
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = AppConfig::from_sources(
            None,
            env(&[("BOT_TOKEN", "123:very-secret"), ("WEBHOOK_SECRET", "hush")]),
        )
        .unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("hush"));
    }
}
