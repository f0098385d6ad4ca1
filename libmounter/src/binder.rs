//! Bind-mount aliasing of a staged mount.

use std::path::Path;

use async_trait::async_trait;
use nix::mount::MsFlags;
use tracing::info;

use crate::error::MounterError;

/// Exposes an existing path at a second path.
#[async_trait]
pub trait BindAliaser: Send + Sync {
    /// Make `target` an alias of `source`.
    async fn bind(&self, source: &Path, target: &Path) -> Result<(), MounterError>;
}

/// Plain `MS_BIND` mount: no filesystem type, no data, no extra flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindMounter;

#[async_trait]
impl BindAliaser for BindMounter {
    async fn bind(&self, source: &Path, target: &Path) -> Result<(), MounterError> {
        nix::mount::mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| MounterError::BindMount {
            source_path: source.display().to_string(),
            target_path: target.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(source = %source.display(), target = %target.display(), "bind mount created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mountinfo::MountTable;
    use crate::unmounter::{MountPointCleaner, Unmounter};

    #[tokio::test]
    async fn missing_source_is_bind_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = BindMounter
            .bind(&tmp.path().join("missing"), tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MounterError::BindMount { .. }));
    }

    #[tokio::test]
    async fn alias_shows_source_content() {
        // Real bind mounts need CAP_SYS_ADMIN.
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        let target = tmp.path().join("target");
        std::fs::create_dir(&source).unwrap();
        std::fs::create_dir(&target).unwrap();
        std::fs::write(source.join("data.txt"), "hello from the bucket").unwrap();

        if BindMounter.bind(&source, &target).await.is_err() {
            // Root without mount privileges (e.g. an unprivileged container).
            return;
        }

        let through_target = std::fs::read_to_string(target.join("data.txt")).unwrap();
        let through_source = std::fs::read_to_string(source.join("data.txt")).unwrap();
        assert_eq!(through_target, through_source);

        let cleaner = MountPointCleaner::new(MountTable::default());
        cleaner.cleanup(&target).await.unwrap();
        assert!(!target.join("data.txt").exists());
    }
}
