//! Settings loading.
//! A single JSON file describes where the catalog lives, which languages to
//! produce, batch sizing, and how to reach the translation provider.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable consulted when `translator.api_key` is empty.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Language the exported catalog is written in.
    pub source_language: String,
    /// Configured storefront languages, in processing order. The source
    /// language may appear here; it is filtered out of the targets.
    pub languages: Vec<String>,
    pub catalog_path: PathBuf,
    pub staging_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    /// SQLite file holding checkpoints and the persistent translation cache.
    pub state_db: PathBuf,
    pub job_key: String,
    pub batch_size: usize,
    pub quick_skip_sample: usize,
    pub time_budget_secs: u64,
    pub log_capacity: usize,
    pub cache_capacity: usize,
    pub translator: TranslatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Minimum interval between requests (100ms = 10 req/s).
    pub min_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_language: "ru".into(),
            languages: Vec::new(),
            catalog_path: PathBuf::from("data/catalog.json"),
            staging_path: None,
            backup_dir: None,
            state_db: PathBuf::from("data/pipeline.sqlite3"),
            job_key: "catalog-translation".into(),
            batch_size: 10,
            quick_skip_sample: 5,
            time_budget_secs: 45,
            log_capacity: 50,
            cache_capacity: 4096,
            translator: TranslatorSettings::default(),
        }
    }
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            api_key: None,
            timeout_secs: 30,
            min_interval_ms: 100,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let settings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Settings>(&content)?
        } else {
            info!(path = %path.display(), "settings file not found, using defaults");
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.batch_size == 0 {
            return Err(SettingsError::Invalid("batch_size must be > 0".into()));
        }
        if self.log_capacity == 0 {
            return Err(SettingsError::Invalid("log_capacity must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(SettingsError::Invalid("cache_capacity must be > 0".into()));
        }
        if self.source_language.trim().is_empty() {
            return Err(SettingsError::Invalid("source_language is empty".into()));
        }
        Ok(())
    }

    /// Configured languages minus the source language, order kept, no repeats.
    pub fn target_languages(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.languages.len());
        for lang in &self.languages {
            let lang = lang.trim();
            if lang.is_empty() || lang == self.source_language {
                continue;
            }
            if !out.iter().any(|l| l == lang) {
                out.push(lang.to_string());
            }
        }
        out
    }

    pub fn staging_path(&self) -> PathBuf {
        self.staging_path
            .clone()
            .unwrap_or_else(|| self.catalog_path.with_extension("staging.json"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| {
            self.catalog_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("backups")
        })
    }

    /// API key from settings, falling back to the environment.
    pub fn api_key(&self) -> Option<String> {
        self.translator
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_drop_source_and_duplicates() {
        let settings = Settings {
            source_language: "ru".into(),
            languages: vec!["ru".into(), "en".into(), "de".into(), "en".into(), " ".into()],
            ..Settings::default()
        };
        assert_eq!(settings.target_languages(), vec!["en", "de"]);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"languages": ["en"], "batch_size": 3}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.batch_size, 3);
        assert_eq!(settings.quick_skip_sample, 5);
        assert_eq!(settings.translator.model, "deepseek-chat");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.time_budget_secs, 45);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let settings = Settings {
            batch_size: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn derived_paths_sit_next_to_catalog() {
        let settings = Settings {
            catalog_path: PathBuf::from("/srv/shop/catalog.json"),
            ..Settings::default()
        };
        assert_eq!(settings.staging_path(), PathBuf::from("/srv/shop/catalog.staging.json"));
        assert_eq!(settings.backup_dir(), PathBuf::from("/srv/shop/backups"));
    }
}
