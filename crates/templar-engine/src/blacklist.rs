//! Template blacklist
//!
//! An append-only file of pdb ids that must not be used as templates.
//! Templates get appended when a model run proves them unusable. Readers
//! tolerate a missing file; writers serialize through a lock file next to
//! the list.

use crate::caps::Blacklist;
use crate::error::Result;
use crate::lock::PathLock;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

pub struct BlacklistFile {
    file_path: PathBuf,
}

impl BlacklistFile {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    fn read_entries(&self) -> Result<Vec<String>> {
        if !self.file_path.is_file() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.file_path)?;
        Ok(contents
            .split_whitespace()
            .map(|s| s.to_lowercase())
            .collect())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.push_str(".lock");
        self.file_path.with_file_name(name)
    }
}

#[async_trait]
impl Blacklist for BlacklistFile {
    async fn is_blacklisted(&self, pdbid: &str) -> Result<bool> {
        let entries = self.read_entries()?;
        Ok(entries.contains(&pdbid.to_lowercase()))
    }

    async fn add(&self, pdbid: &str) -> Result<()> {
        let _lock = PathLock::acquire(self.lock_path()).await?;

        let entries = self.read_entries()?;
        let pdbid = pdbid.to_lowercase();
        if !entries.contains(&pdbid) {
            info!(pdbid = %pdbid, "blacklisting template");
            let mut contents = entries.join("\n");
            if !contents.is_empty() {
                contents.push('\n');
            }
            contents.push_str(&pdbid);
            contents.push('\n');
            std::fs::write(&self.file_path, contents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_blacklists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let list = BlacklistFile::new(dir.path().join("blacklist"));
        assert!(!list.is_blacklisted("1crn").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_and_lookup_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let list = BlacklistFile::new(dir.path().join("blacklist"));
        list.add("1XYZ").await.unwrap();
        assert!(list.is_blacklisted("1xyz").await.unwrap());
        assert!(list.is_blacklisted("1XYZ").await.unwrap());
        assert!(!list.is_blacklisted("2xyz").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist");
        let list = BlacklistFile::new(&path);
        list.add("1abc").await.unwrap();
        list.add("1abc").await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "1abc\n");
    }
}
