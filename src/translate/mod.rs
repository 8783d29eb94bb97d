//! Translation backends and caching.
//! The pipeline only sees the `Translator` trait and `TranslationCache`;
//! the DeepSeek client is one backend among possible others.

pub mod cache;
pub mod deepseek;
pub mod normalize;
pub mod sqlite_cache;

use serde::{Deserialize, Serialize};

/// Translation request for a single catalog text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslateRequest {
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslateRequest {
    pub fn new(
        source_text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }
}

/// Where a translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    Cache,
    Api,
}

/// Translator trait (adapter for different backends).
#[allow(async_fn_in_trait)]
pub trait Translator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError>;

    /// False when credentials are missing; checked before the first batch.
    fn is_configured(&self) -> bool {
        true
    }
}

impl<T: Translator> Translator for &T {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
        (**self).translate(request).await
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("translator not configured: {0}")]
    NotConfigured(String),
}
