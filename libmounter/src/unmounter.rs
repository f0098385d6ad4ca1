//! Mount point teardown.
//!
//! [`Unmounter::cleanup`] must succeed when the path is not mounted; it only
//! fails when an existing mount could not be removed.

use std::path::Path;

use async_trait::async_trait;
use nix::errno::Errno;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::MounterError;
use crate::mountinfo::MountTable;

/// Detects and tears down a mount at a path.
#[async_trait]
pub trait Unmounter: Send + Sync {
    /// Unmount `path` if it is a mount point; succeed without doing anything
    /// otherwise.
    async fn cleanup(&self, path: &Path) -> Result<(), MounterError>;
}

/// Unmounts with `umount(2)`, falling back to `fusermount3 -u` /
/// `fusermount -u` for FUSE mounts owned by an unprivileged user.
#[derive(Debug, Clone, Default)]
pub struct MountPointCleaner {
    mount_table: MountTable,
}

impl MountPointCleaner {
    /// Cleaner consulting `mount_table`.
    pub fn new(mount_table: MountTable) -> Self {
        Self { mount_table }
    }

    async fn fusermount_unmount(path: &Path) -> Result<(), String> {
        let mut last_error = String::from("no fusermount binary found");
        for cmd_name in ["fusermount3", "fusermount"] {
            match Command::new(cmd_name).arg("-u").arg(path).output().await {
                Ok(output) if output.status.success() => return Ok(()),
                Ok(output) => {
                    last_error = format!(
                        "{cmd_name} -u: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    debug!(path = %path.display(), error = %last_error, "fusermount failed");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => last_error = format!("{cmd_name} -u: {e}"),
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Unmounter for MountPointCleaner {
    async fn cleanup(&self, path: &Path) -> Result<(), MounterError> {
        if !self.mount_table.is_mountpoint(path).await {
            debug!(path = %path.display(), "not a mount point, nothing to clean up");
            return Ok(());
        }

        match nix::mount::umount(path) {
            Ok(()) => {}
            // Unmounted between the table check and the syscall.
            Err(Errno::EINVAL | Errno::ENOENT) => {
                debug!(path = %path.display(), "mount vanished before umount");
                return Ok(());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "umount failed, trying fusermount");
                Self::fusermount_unmount(path).await.map_err(|reason| {
                    MounterError::cleanup(path, format!("umount: {e}; {reason}"))
                })?;
            }
        }

        info!(path = %path.display(), "mount point cleaned up");
        Ok(())
    }
}
