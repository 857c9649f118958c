use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Item bodies on disk, one file per item id under `root`.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, item_id: i64) -> PathBuf {
        self.root.join(item_id.to_string())
    }

    /// Writes or overwrites the body of `item_id`.
    pub async fn save(&self, item_id: i64, content: &str) -> Result<()> {
        tokio::fs::write(self.path_for(item_id), content).await?;
        Ok(())
    }

    /// `None` means nothing has been cached for this item yet.
    pub async fn load(&self, item_id: i64) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(item_id)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the body of `item_id`. Missing files are not an error.
    pub async fn remove(&self, item_id: i64) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(item_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
