//! Catalog files: the published catalog the storefront serves, the staged
//! working copy being translated, and timestamped backups.
//! All writes go through a temp file + fsync + rename so readers of the
//! published file see either the old or the new catalog, never a mix.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::Catalog;
use crate::error::Result;

/// Storage seam used by the batch processor and the commit protocol.
pub trait CatalogStorage {
    /// `Ok(None)` when there is no published catalog yet.
    fn load_published(&self) -> Result<Option<Catalog>>;
    fn write_published(&self, catalog: &Catalog) -> Result<()>;
    /// Copy the published catalog to a new backup file; returns its path.
    fn backup_published(&self) -> Result<PathBuf>;
    fn load_staged(&self) -> Result<Option<Catalog>>;
    fn write_staged(&self, catalog: &Catalog) -> Result<()>;
    fn discard_staged(&self) -> Result<()>;
}

/// Filesystem-backed catalog storage.
#[derive(Debug, Clone)]
pub struct FsCatalogStore {
    published: PathBuf,
    staged: PathBuf,
    backup_dir: PathBuf,
}

impl FsCatalogStore {
    pub fn new(published: PathBuf, staged: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            published,
            staged,
            backup_dir,
        }
    }

    pub fn published_path(&self) -> &Path {
        &self.published
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

impl CatalogStorage for FsCatalogStore {
    fn load_published(&self) -> Result<Option<Catalog>> {
        read_catalog(&self.published)
    }

    fn write_published(&self, catalog: &Catalog) -> Result<()> {
        write_atomic(&self.published, &serde_json::to_vec_pretty(catalog)?)?;
        info!(path = %self.published.display(), products = catalog.len(), "published catalog written");
        Ok(())
    }

    fn backup_published(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let mut target = self.backup_dir.join(format!("catalog-{stamp}.json"));
        let mut n = 1;
        // Never overwrite an earlier backup.
        while target.exists() {
            target = self.backup_dir.join(format!("catalog-{stamp}-{n}.json"));
            n += 1;
        }
        let bytes = fs::read(&self.published)?;
        write_atomic(&target, &bytes)?;
        info!(path = %target.display(), "catalog backup taken");
        Ok(target)
    }

    fn load_staged(&self) -> Result<Option<Catalog>> {
        read_catalog(&self.staged)
    }

    fn write_staged(&self, catalog: &Catalog) -> Result<()> {
        write_atomic(&self.staged, &serde_json::to_vec(catalog)?)?;
        debug!(path = %self.staged.display(), "staged catalog written");
        Ok(())
    }

    fn discard_staged(&self) -> Result<()> {
        match fs::remove_file(&self.staged) {
            Ok(()) => {
                debug!(path = %self.staged.display(), "staged catalog removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_catalog(path: &Path) -> Result<Option<Catalog>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write `bytes` to a sibling temp file, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsCatalogStore {
        FsCatalogStore::new(
            dir.path().join("catalog.json"),
            dir.path().join("catalog.staging.json"),
            dir.path().join("backups"),
        )
    }

    #[test]
    fn missing_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.load_published().unwrap().is_none());
        assert!(store.load_staged().unwrap().is_none());
        store.discard_staged().unwrap();
    }

    #[test]
    fn malformed_catalog_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        fs::write(store.published_path(), b"{\"not\": \"a catalog\"}").unwrap();
        assert!(store.load_published().is_err());
    }

    #[test]
    fn staged_write_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let catalog = Catalog::new(vec![Product::default(), Product::default()]);
        store.write_staged(&catalog).unwrap();
        assert_eq!(store.load_staged().unwrap().unwrap().len(), 2);
        store.discard_staged().unwrap();
        assert!(!store.staged_path().exists());
    }

    #[test]
    fn backups_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.write_published(&Catalog::new(vec![Product::default()])).unwrap();

        let first = store.backup_published().unwrap();
        let second = store.backup_published().unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.json");
        write_atomic(&target, b"[]").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"[]");
        assert!(!dir.path().join("nested").join("out.json.tmp").exists());
    }
}
