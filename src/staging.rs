//! Single-use on-disk copies of fetched scripts.

use crate::error::StagingError;
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A directory whose entries each belong to exactly one run.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    /// Open (creating if needed) the staging directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        builder
            .create(&dir)
            .map_err(|source| StagingError::CreateDir { path: dir.clone(), source })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` under a fresh name. The file only appears at its final
    /// path once fully written.
    pub async fn stage(
        &self,
        content: &[u8],
        extension: Option<&str>,
    ) -> Result<StagedScript, StagingError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let file_name = match extension {
            Some(ext) => format!("script-{}.{}", id, ext),
            None => format!("script-{}", id),
        };
        let path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!(".{}.tmp", file_name));

        if let Err(source) = write_new(&tmp_path, content).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StagingError::Write { path: tmp_path, source });
        }
        if let Err(source) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StagingError::Write { path, source });
        }

        debug!(id = %id, bytes = content.len(), "Script staged");
        Ok(StagedScript { id, path, released: false })
    }
}

async fn write_new(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true).mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Handle to one staged file. Released through [`StagedScript::unstage`]; if
/// the handle is dropped first the file is removed synchronously.
#[derive(Debug)]
pub struct StagedScript {
    id: String,
    path: PathBuf,
    released: bool,
}

impl StagedScript {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staged file. An already-missing file is not an error.
    pub async fn unstage(mut self) -> Result<(), StagingError> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(id = %self.id, "Script unstaged");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StagingError::CleanupFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(id = %self.id, "Script unstaged on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(id = %self.id, error = %e, "Failed to remove staged script on drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn stage_writes_content_and_unstage_removes_it() {
        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path().join("staging")).unwrap();

        let staged = store.stage(b"echo hi\n", Some("sh")).await.unwrap();
        assert!(staged.path().starts_with(store.dir()));
        assert_eq!(staged.path().extension().unwrap(), "sh");
        assert_eq!(fs::read(staged.path()).unwrap(), b"echo hi\n");
        assert_eq!(entries(store.dir()).len(), 1);

        staged.unstage().await.unwrap();
        assert!(entries(store.dir()).is_empty());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path()).unwrap();

        let a = store.stage(b"a", None).await.unwrap();
        let b = store.stage(b"b", None).await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.id(), b.id());
        assert_eq!(fs::read(a.path()).unwrap(), b"a");
        assert_eq!(fs::read(b.path()).unwrap(), b"b");
    }

    #[tokio::test]
    async fn unstage_tolerates_missing_file() {
        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path()).unwrap();

        let staged = store.stage(b"x", None).await.unwrap();
        fs::remove_file(staged.path()).unwrap();
        assert!(staged.unstage().await.is_ok());
    }

    #[tokio::test]
    async fn drop_removes_file() {
        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path()).unwrap();

        let staged = store.stage(b"x", None).await.unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_a_write_error() {
        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path().join("gone")).unwrap();
        fs::remove_dir(store.dir()).unwrap();

        let err = store.stage(b"x", None).await.unwrap_err();
        assert!(matches!(err, StagingError::Write { .. }));
    }

    #[tokio::test]
    async fn staged_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let store = StagingStore::new(tmp.path()).unwrap();
        let staged = store.stage(b"x", None).await.unwrap();
        let mode = fs::metadata(staged.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
