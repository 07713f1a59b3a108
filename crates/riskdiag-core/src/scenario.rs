//! Scenario Asset Catalog: scenario key -> title and ordered asset bundle.
//!
//! Immutable once built. Unknown keys fall back to the default bundle, so a lookup never
//! yields an empty list.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CRM title used when the scenario key is missing or unknown.
pub const DEFAULT_SCENARIO_TITLE: &str = "Не указан сценарий";

/// Built-in diagnostics scenarios: key, title, asset paths relative to the asset root.
const BUILTIN_SCENARIOS: &[(&str, &str, &[&str])] = &[
    ("1", "Проект в кризисе", &["scenario-1/checklist.pdf"]),
    (
        "2",
        "Подготовка запуска ИТ-проекта",
        &["scenario-2/checklist.pdf"],
    ),
    (
        "3",
        "Импортозамещение и стратегия",
        &["scenario-3/checklist.pdf"],
    ),
    (
        "4",
        "Проверка подрядчика и команды",
        &["scenario-4/checklist.pdf"],
    ),
    ("5", "Цифровая зрелость бизнеса", &["scenario-5/checklist.pdf"]),
    (
        "6",
        "Проверка бюджета проекта (CFO)",
        &["scenario-6/checklist.pdf"],
    ),
];

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read asset catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("asset catalog is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("default asset set is empty")]
    EmptyDefault,

    #[error("scenario `{0}` has no assets")]
    EmptyScenario(String),
}

/// How the platform should present an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Photo,
    Document,
}

/// Where an asset lives: a local file (uploaded) or a URL (sent by reference).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetLocation {
    File(PathBuf),
    Url(String),
}

impl AssetLocation {
    /// `http(s)://` entries become URLs; everything else is a path under `root`.
    pub fn parse(entry: &str, root: &Path) -> Self {
        let entry = entry.trim();
        if entry.starts_with("https://") || entry.starts_with("http://") {
            AssetLocation::Url(entry.to_string())
        } else {
            AssetLocation::File(root.join(entry))
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            AssetLocation::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "asset".to_string()),
            AssetLocation::Url(url) => url
                .split(|c: char| c == '?' || c == '#')
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|n| !n.is_empty())
                .unwrap_or("asset")
                .to_string(),
        }
    }

    /// Photos by extension; anything else goes out as a document.
    pub fn kind(&self) -> AssetKind {
        let name = self.file_name().to_ascii_lowercase();
        let is_photo = name
            .rsplit_once('.')
            .map(|(_, ext)| PHOTO_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if is_photo {
            AssetKind::Photo
        } else {
            AssetKind::Document
        }
    }
}

impl std::fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetLocation::File(path) => write!(f, "{}", path.display()),
            AssetLocation::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone)]
struct ScenarioEntry {
    title: String,
    assets: Vec<AssetLocation>,
}

/// On-disk override format:
///
/// ```toml
/// default = ["checklist.pdf"]
///
/// [scenarios.2]
/// title = "Подготовка запуска ИТ-проекта"
/// assets = ["scenario-2/checklist.pdf", "https://cdn.example.com/cover.png"]
/// ```
#[derive(Debug, Deserialize)]
struct CatalogFile {
    default: Vec<String>,
    #[serde(default)]
    default_title: Option<String>,
    #[serde(default)]
    scenarios: BTreeMap<String, CatalogFileEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogFileEntry {
    title: String,
    assets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScenarioAssetCatalog {
    scenarios: HashMap<String, ScenarioEntry>,
    default_assets: Vec<AssetLocation>,
    default_title: String,
}

impl ScenarioAssetCatalog {
    /// The six built-in diagnostics scenarios under `asset_root`, with `default_asset`
    /// (the general checklist) for everything else.
    pub fn builtin(asset_root: impl AsRef<Path>, default_asset: AssetLocation) -> Self {
        let root = asset_root.as_ref();
        let scenarios = BUILTIN_SCENARIOS
            .iter()
            .map(|(key, title, assets)| {
                let entry = ScenarioEntry {
                    title: (*title).to_string(),
                    assets: assets.iter().map(|a| AssetLocation::parse(a, root)).collect(),
                };
                ((*key).to_string(), entry)
            })
            .collect();
        Self {
            scenarios,
            default_assets: vec![default_asset],
            default_title: DEFAULT_SCENARIO_TITLE.to_string(),
        }
    }

    /// Parses a TOML catalog; relative asset paths resolve against `asset_root`.
    pub fn from_toml_str(s: &str, asset_root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let root = asset_root.as_ref();
        let file: CatalogFile = toml::from_str(s)?;

        if file.default.is_empty() {
            return Err(CatalogError::EmptyDefault);
        }
        let mut scenarios = HashMap::with_capacity(file.scenarios.len());
        for (key, entry) in file.scenarios {
            if entry.assets.is_empty() {
                return Err(CatalogError::EmptyScenario(key));
            }
            let assets = entry.assets.iter().map(|a| AssetLocation::parse(a, root)).collect();
            scenarios.insert(
                key.trim().to_string(),
                ScenarioEntry {
                    title: entry.title,
                    assets,
                },
            );
        }

        Ok(Self {
            scenarios,
            default_assets: file.default.iter().map(|a| AssetLocation::parse(a, root)).collect(),
            default_title: file
                .default_title
                .unwrap_or_else(|| DEFAULT_SCENARIO_TITLE.to_string()),
        })
    }

    /// Reads a TOML catalog from disk (startup only).
    pub fn load(path: impl AsRef<Path>, asset_root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, asset_root)
    }

    /// Ordered assets for `scenario_id`; the default set for unknown keys. Never empty.
    pub fn assets_for(&self, scenario_id: &str) -> &[AssetLocation] {
        self.scenarios
            .get(scenario_id.trim())
            .map(|e| e.assets.as_slice())
            .unwrap_or(self.default_assets.as_slice())
    }

    /// Human-readable scenario title for the CRM lead.
    pub fn title_for(&self, scenario_id: &str) -> &str {
        self.scenarios
            .get(scenario_id.trim())
            .map(|e| e.title.as_str())
            .unwrap_or(self.default_title.as_str())
    }

    pub fn contains(&self, scenario_id: &str) -> bool {
        self.scenarios.contains_key(scenario_id.trim())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
