// Filesystem store implementation.
// One JSON file per language plus an append-only analytics log.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::cache::CacheEntry;
use crate::cache::paths::sanitize_name;
use crate::error::Result;

use super::{AnalyticsRecord, Store};

/// Store rooted at a directory: `repositories/<language>.json` rows and an
/// `analytics.jsonl` append log.
pub struct FsStore {
    repositories_dir: PathBuf,
    analytics_path: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            repositories_dir: root.join("repositories"),
            analytics_path: root.join("analytics.jsonl"),
        }
    }

    fn repository_path(&self, language: &str) -> PathBuf {
        self.repositories_dir
            .join(format!("{}.json", sanitize_name(language)))
    }
}

impl Store for FsStore {
    fn get_repository(&self, language: &str) -> Result<Option<CacheEntry>> {
        read_entry(&self.repository_path(language))
    }

    fn put_repository(&self, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_string_pretty(entry)?;
        write_atomic(&self.repository_path(&entry.language), json.as_bytes())
    }

    fn all_repositories(&self) -> Result<Vec<CacheEntry>> {
        if !self.repositories_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.repositories_dir)? {
            let path = dirent?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_entry(&path) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                // A corrupt row should not poison enumeration.
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable cache row"),
            }
        }
        Ok(entries)
    }

    fn delete_repository(&self, language: &str) -> Result<()> {
        let path = self.repository_path(language);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn append_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        if let Some(parent) = self.analytics_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.analytics_path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Read and parse one row, `None` when the file does not exist.
fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    let entry: CacheEntry = serde_json::from_str(&contents)?;
    Ok(Some(entry))
}

/// Write via temp file + rename so a row is never observed half-written.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
