//! L2 persistent translation cache backed by SQLite.
//! Key: blake3 hash (same as L1). Entries never expire: a catalog
//! translation stays valid until the source text changes, which changes the key.
//! Writes arrive in batches from `TranslationCache::flush`.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

/// One buffered translation waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub key: [u8; 32],
    pub translated_text: String,
    pub src_lang: String,
    pub tgt_lang: String,
}

/// SQLite-backed translation cache (L2).
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) the SQLite cache database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;

        // WAL mode so checkpoint writes and cache reads don't block each other
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let cache = Self::init(conn)?;
        info!(path = %db_path.display(), "SQLite L2 cache opened");
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                cache_key BLOB PRIMARY KEY,
                translated_text TEXT NOT NULL,
                src_lang TEXT NOT NULL,
                tgt_lang TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a cached translation by blake3 key.
    pub fn get(&self, key: &[u8; 32]) -> Option<String> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT translated_text FROM translation_cache WHERE cache_key = ?1",
                params![key.as_slice()],
                |row| row.get::<_, String>(0),
            )
            .optional();

        match result {
            Ok(hit) => {
                if hit.is_some() {
                    debug!("L2 cache hit");
                }
                hit
            }
            Err(e) => {
                warn!(error = %e, "L2 cache lookup failed");
                None
            }
        }
    }

    /// Insert a batch of translations within one transaction.
    pub fn insert_batch(&self, writes: &[PendingWrite]) -> Result<usize, rusqlite::Error> {
        if writes.is_empty() {
            return Ok(0);
        }
        let start = std::time::Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO translation_cache
                 (cache_key, translated_text, src_lang, tgt_lang, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let now = chrono::Utc::now().timestamp();
            for w in writes {
                stmt.execute(params![
                    w.key.as_slice(),
                    w.translated_text,
                    w.src_lang,
                    w.tgt_lang,
                    now
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            count = writes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "L2 cache batch flushed"
        );
        Ok(writes.len())
    }

    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM translation_cache", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(key_byte: u8, text: &str) -> PendingWrite {
        PendingWrite {
            key: [key_byte; 32],
            translated_text: text.into(),
            src_lang: "ru".into(),
            tgt_lang: "en".into(),
        }
    }

    #[test]
    fn batch_insert_then_get() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert_eq!(cache.insert_batch(&[write(1, "Table"), write(2, "Chair")]).unwrap(), 2);
        assert_eq!(cache.get(&[1; 32]).as_deref(), Some("Table"));
        assert_eq!(cache.get(&[3; 32]), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn later_write_replaces_earlier() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.insert_batch(&[write(1, "Table")]).unwrap();
        cache.insert_batch(&[write(1, "Desk")]).unwrap();
        assert_eq!(cache.get(&[1; 32]).as_deref(), Some("Desk"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert_eq!(cache.insert_batch(&[]).unwrap(), 0);
        assert!(cache.is_empty());
    }
}
