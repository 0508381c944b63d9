use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AcmeError, Result};

/// Store group holding per-challenge proof artifacts.
pub const GROUP_CHALLENGES: &str = "challenges";

const KEY_FILE_MODE: u32 = 0o600;
const KEY_DIR_MODE: u32 = 0o700;

/// What a stored blob contains; keys get restrictive file permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Text,
    Key,
    Cert,
}

/// Filesystem-backed blob store with a `<root>/<group>/<key>/<name>` layout.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, group: &str, key: &str, name: &str) -> PathBuf {
        self.root.join(group).join(key).join(name)
    }

    fn io_err(path: &Path, source: std::io::Error) -> AcmeError {
        AcmeError::Store {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Loads a blob, returning `None` when the entry does not exist.
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be read.
    pub fn load(&self, group: &str, key: &str, name: &str, kind: BlobKind) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(group, key, name);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Loaded {kind:?} blob from {}", path.display());
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_err(&path, err)),
        }
    }

    /// Saves a blob, creating the entry directory and overwriting any
    /// previous value. Private keys are written `0o600` under a `0o700`
    /// entry directory.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be written.
    pub fn save(
        &self,
        group: &str,
        key: &str,
        name: &str,
        kind: BlobKind,
        value: &[u8],
    ) -> Result<()> {
        let path = self.entry_path(group, key, name);
        let dir = path
            .parent()
            .ok_or_else(|| AcmeError::general("Store entry path has no parent directory"))?;
        fs::create_dir_all(dir).map_err(|err| Self::io_err(dir, err))?;

        if kind == BlobKind::Key {
            fs::set_permissions(dir, fs::Permissions::from_mode(KEY_DIR_MODE))
                .map_err(|err| Self::io_err(dir, err))?;
        }

        fs::write(&path, value).map_err(|err| Self::io_err(&path, err))?;
        if kind == BlobKind::Key {
            fs::set_permissions(&path, fs::Permissions::from_mode(KEY_FILE_MODE))
                .map_err(|err| Self::io_err(&path, err))?;
        }

        debug!("Saved {kind:?} blob to {}", path.display());
        Ok(())
    }
}
