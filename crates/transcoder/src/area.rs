use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::hls::INDEX_FILENAME;

/// A fresh directory the transcoder writes HLS output into, plus the index
/// file inside it. Removed when the session ends.
#[derive(Debug)]
pub struct OutputArea {
    dir: PathBuf,
    index: PathBuf,
    removed: bool,
}

impl OutputArea {
    /// Create `root/<dir_name>-<uuid>`. The directory must not exist yet.
    pub fn create(root: &Path, dir_name: &str) -> std::io::Result<Self> {
        let dir = root.join(format!("{dir_name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root)?;
        std::fs::create_dir(&dir)?;
        let index = dir.join(INDEX_FILENAME);
        debug!(dir = %dir.display(), "output area created");
        Ok(Self {
            dir,
            index,
            removed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index
    }

    pub fn index_name(&self) -> &str {
        INDEX_FILENAME
    }

    pub fn index_exists(&self) -> bool {
        self.index.is_file()
    }

    /// Number of directory entries; 0 if the directory is unreadable.
    pub async fn entry_count(&self) -> usize {
        count_entries(&self.dir).await
    }

    /// Delete the directory and everything in it.
    pub async fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "output area removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

pub async fn count_entries(dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(_)) = entries.next_entry().await {
        count += 1;
    }
    count
}

impl Drop for OutputArea {
    fn drop(&mut self) {
        if !self.removed {
            // Best-effort cleanup when remove() was never reached
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "failed to remove output area");
                }
            }
        }
    }
}
