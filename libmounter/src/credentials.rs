//! Credential persistence for the translation tool.
//!
//! s3fs reads `accessKeyID:secretAccessKey` from a password file that must
//! not be readable by anyone but its owner.  The store either writes one file
//! per volume (handed to s3fs through `-o passwd_file=`) or the single
//! process-wide `$HOME/.passwd-s3fs`.
//!
//! The global file is overwritten by every stage.  Two concurrent stages with
//! different credentials race on it, so the per-volume scope is the default.

use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{CredentialScope, MounterConfig};
use crate::error::MounterError;
use crate::types::VolumeId;

/// File name of the global s3fs password file.
pub const GLOBAL_PASSWD_FILE: &str = ".passwd-s3fs";

const PASSWD_FILE_MODE: u32 = 0o600;

/// Persists connection secrets where the translation tool can read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStore {
    path: PathBuf,
    scope: CredentialScope,
}

impl CredentialStore {
    /// Store for `volume_id` according to the configured scope.
    pub fn for_volume(config: &MounterConfig, volume_id: &VolumeId) -> Result<Self, MounterError> {
        match config.credential_scope {
            CredentialScope::PerVolume => Ok(Self {
                path: config
                    .credentials_dir
                    .join(format!("{}{GLOBAL_PASSWD_FILE}", volume_id.file_stem())),
                scope: CredentialScope::PerVolume,
            }),
            CredentialScope::Global => Self::global(config.home_dir.as_deref()),
        }
    }

    /// The process-wide `<home>/.passwd-s3fs` store.
    ///
    /// `home` overrides the `HOME` environment variable.
    pub fn global(home: Option<&Path>) -> Result<Self, MounterError> {
        let home = match home {
            Some(h) => h.to_path_buf(),
            None => std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
                MounterError::credential_write(GLOBAL_PASSWD_FILE, "HOME is not set")
            })?,
        };
        Ok(Self {
            path: home.join(GLOBAL_PASSWD_FILE),
            scope: CredentialScope::Global,
        })
    }

    /// Path of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this store is private to one volume.
    pub fn is_per_volume(&self) -> bool {
        self.scope == CredentialScope::PerVolume
    }

    /// Replace the file content with `content`, creating it owner-only if
    /// absent.
    ///
    /// The parent directory must exist for the global scope; per-volume
    /// stores create their directory.
    pub async fn write(&self, content: &str) -> Result<(), MounterError> {
        let path = self.path.clone();
        let per_volume = self.is_per_volume();
        let content = content.to_owned();

        tokio::task::spawn_blocking(move || write_owner_only(&path, &content, per_volume))
            .await
            .map_err(|e| MounterError::credential_write(&self.path, e))??;

        debug!(path = %self.path.display(), "credentials written");
        Ok(())
    }

    /// Remove a per-volume credential file. The global file is left in place.
    pub async fn remove(&self) -> Result<(), MounterError> {
        if !self.is_per_volume() {
            return Ok(());
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "credentials removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MounterError::credential_write(&self.path, e)),
        }
    }
}

fn write_owner_only(path: &Path, content: &str, create_parent: bool) -> Result<(), MounterError> {
    if create_parent && let Some(parent) = path.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .map_err(|e| MounterError::credential_write(path, e))?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PASSWD_FILE_MODE)
        .open(path)
        .map_err(|e| MounterError::credential_write(path, e))?;

    // `mode` only applies on creation; tighten a pre-existing file too.
    file.set_permissions(std::fs::Permissions::from_mode(PASSWD_FILE_MODE))
        .map_err(|e| MounterError::credential_write(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| MounterError::credential_write(path, e))?;
    file.sync_all()
        .map_err(|e| MounterError::credential_write(path, e))
}
