//! Two-tier translation cache adapter.
//! L1: in-memory LRU. L2: SQLite, written through a pending buffer that is
//! persisted on `flush()` (end of every batch and after the commit).
//! Key: blake3 hash of (src_lang | tgt_lang | text).

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::sqlite_cache::{PendingWrite, SqliteCache};
use super::{TranslateError, TranslateRequest, TranslationSource, Translator};

/// A translation plus which path produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTranslation {
    pub text: String,
    pub source: TranslationSource,
}

pub struct TranslationCache {
    l1: Mutex<LruCache<[u8; 32], String>>,
    l2: Option<SqliteCache>,
    pending: Mutex<Vec<PendingWrite>>,
}

impl TranslationCache {
    pub fn new(capacity: usize, l2: Option<SqliteCache>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            l1: Mutex::new(LruCache::new(capacity)),
            l2,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// In-memory only; nothing survives the process.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, None)
    }

    /// Compute the cache key from translation parameters.
    pub fn compute_key(src_lang: &str, tgt_lang: &str, text: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(src_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(tgt_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(text.trim().as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Look up a translation. Never touches the network.
    pub fn lookup(&self, request: &TranslateRequest) -> Option<String> {
        let key = Self::compute_key(&request.source_lang, &request.target_lang, &request.source_text);
        if let Some(hit) = self.l1.lock().get(&key) {
            return Some(hit.clone());
        }
        // Evicted from L1 but not flushed yet.
        if let Some(w) = self.pending.lock().iter().rev().find(|w| w.key == key) {
            return Some(w.translated_text.clone());
        }
        let hit = self.l2.as_ref()?.get(&key)?;
        self.l1.lock().put(key, hit.clone());
        Some(hit)
    }

    /// Record a translation in L1 and queue it for L2.
    pub fn store(&self, request: &TranslateRequest, translated_text: &str) {
        let key = Self::compute_key(&request.source_lang, &request.target_lang, &request.source_text);
        self.l1.lock().put(key, translated_text.to_string());
        if self.l2.is_some() {
            self.pending.lock().push(PendingWrite {
                key,
                translated_text: translated_text.to_string(),
                src_lang: request.source_lang.clone(),
                tgt_lang: request.target_lang.clone(),
            });
        }
    }

    /// Consult the cache, fall back to `translator` on a miss, write through.
    /// With `bypass` set the lookup is skipped and the translator always runs.
    pub async fn translate_with_cache<T: Translator>(
        &self,
        translator: &T,
        request: &TranslateRequest,
        bypass: bool,
    ) -> Result<CachedTranslation, TranslateError> {
        if !bypass {
            if let Some(text) = self.lookup(request) {
                return Ok(CachedTranslation {
                    text,
                    source: TranslationSource::Cache,
                });
            }
        }
        let text = translator.translate(request).await?;
        if text.trim().is_empty() {
            return Err(TranslateError::ApiError("empty translation".into()));
        }
        self.store(request, &text);
        Ok(CachedTranslation {
            text,
            source: TranslationSource::Api,
        })
    }

    /// Persist buffered writes to L2. On failure the buffer is kept.
    pub fn flush(&self) -> Result<usize, rusqlite::Error> {
        let Some(l2) = &self.l2 else {
            return Ok(0);
        };
        let batch = std::mem::take(&mut *self.pending.lock());
        match l2.insert_batch(&batch) {
            Ok(n) => {
                if n > 0 {
                    debug!(count = n, "translation cache flushed");
                }
                Ok(n)
            }
            Err(e) => {
                warn!(error = %e, count = batch.len(), "translation cache flush failed");
                let mut pending = self.pending.lock();
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                Err(e)
            }
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper {
        calls: AtomicUsize,
    }

    impl Translator for Upper {
        async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request.source_text.to_uppercase())
        }
    }

    struct Blank;

    impl Translator for Blank {
        async fn translate(&self, _request: &TranslateRequest) -> Result<String, TranslateError> {
            Ok("  ".into())
        }
    }

    fn req(text: &str) -> TranslateRequest {
        TranslateRequest::new(text, "ru", "en")
    }

    #[test]
    fn key_depends_on_languages_and_text() {
        let a = TranslationCache::compute_key("ru", "en", "стол");
        assert_eq!(a, TranslationCache::compute_key("ru", "en", " стол "));
        assert_ne!(a, TranslationCache::compute_key("ru", "de", "стол"));
        assert_ne!(a, TranslationCache::compute_key("ru", "en", "стул"));
    }

    #[tokio::test]
    async fn miss_calls_translator_then_hits() {
        let cache = TranslationCache::in_memory(16);
        let translator = Upper { calls: AtomicUsize::new(0) };

        let first = cache.translate_with_cache(&translator, &req("table"), false).await.unwrap();
        assert_eq!(first.source, TranslationSource::Api);
        let second = cache.translate_with_cache(&translator, &req("table"), false).await.unwrap();
        assert_eq!(second.source, TranslationSource::Cache);
        assert_eq!(second.text, "TABLE");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bypass_always_calls_translator() {
        let cache = TranslationCache::in_memory(16);
        cache.store(&req("table"), "old");
        let translator = Upper { calls: AtomicUsize::new(0) };

        let out = cache.translate_with_cache(&translator, &req("table"), true).await.unwrap();
        assert_eq!(out.text, "TABLE");
        assert_eq!(out.source, TranslationSource::Api);
        assert_eq!(cache.lookup(&req("table")).as_deref(), Some("TABLE"));
    }

    #[tokio::test]
    async fn blank_translation_is_rejected_and_not_cached() {
        let cache = TranslationCache::in_memory(16);
        let result = cache.translate_with_cache(&Blank, &req("table"), false).await;
        assert!(matches!(result, Err(TranslateError::ApiError(_))));
        assert!(cache.lookup(&req("table")).is_none());
    }

    #[test]
    fn flush_moves_pending_into_l2() {
        let cache = TranslationCache::new(1, Some(SqliteCache::open_in_memory().unwrap()));
        cache.store(&req("table"), "TABLE");
        cache.store(&req("chair"), "CHAIR");
        assert_eq!(cache.pending_writes(), 2);

        // L1 holds one entry; the evicted one is still served from the buffer.
        assert_eq!(cache.lookup(&req("table")).as_deref(), Some("TABLE"));

        assert_eq!(cache.flush().unwrap(), 2);
        assert_eq!(cache.pending_writes(), 0);
        assert_eq!(cache.lookup(&req("chair")).as_deref(), Some("CHAIR"));
        assert_eq!(cache.lookup(&req("table")).as_deref(), Some("TABLE"));
    }

    #[test]
    fn flush_without_l2_is_noop() {
        let cache = TranslationCache::in_memory(4);
        cache.store(&req("table"), "TABLE");
        assert_eq!(cache.pending_writes(), 0);
        assert_eq!(cache.flush().unwrap(), 0);
    }
}
