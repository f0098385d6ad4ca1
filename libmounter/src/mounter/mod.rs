//! Pluggable volume mounters.
//!
//! A [`Mounter`] is built once per volume mount cycle and drives four
//! operations against the node:
//!
//! 1. **Stage** — mount the bucket location at a staging path with the
//!    backend's translation tool.
//! 2. **Mount** — bind-mount the staging path at a consumer path.
//! 3. **Unmount** — tear the consumer bind mount down.
//! 4. **Unstage** — tear the staging mount down and remove its directory.
//!
//! Each backend variant owns its option building and invocation arguments;
//! [`new_mounter`] picks one from a [`MounterKind`].

pub mod s3fs;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binder::{BindAliaser, BindMounter};
use crate::config::{MOUNTER_CONFIG, MounterConfig};
use crate::error::MounterError;
use crate::invoker::{FuseInvoker, MountInvoker};
use crate::mountinfo::MountTable;
use crate::template::OptionTemplate;
use crate::types::{BackendConfig, VolumeId, VolumeLocation};
use crate::unmounter::{MountPointCleaner, Unmounter};

pub use s3fs::S3fsMounter;

/// Stage / unstage / mount / unmount contract shared by every backend.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Backend variant implementing this mounter.
    fn kind(&self) -> MounterKind;

    /// Mount the volume's bucket location at `staging_path`.
    async fn stage(&self, staging_path: &Path) -> Result<(), MounterError>;

    /// Tear down the staging mount and remove its directory.
    ///
    /// Succeeds when nothing is mounted and the directory is already gone.
    async fn unstage(&self, staging_path: &Path) -> Result<(), MounterError>;

    /// Expose `source` (a staged mount) at `target`.
    async fn mount(&self, source: &Path, target: &Path) -> Result<(), MounterError>;

    /// Tear down the mount at `target`, if any.
    async fn unmount(&self, target: &Path) -> Result<(), MounterError>;
}

/// Available mounter backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MounterKind {
    /// s3fs-fuse.
    #[default]
    S3fs,
}

impl fmt::Display for MounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::S3fs => "s3fs",
        })
    }
}

impl FromStr for MounterKind {
    type Err = MounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3fs" => Ok(Self::S3fs),
            other => Err(MounterError::InvalidArgument(format!(
                "unsupported mounter {other:?}"
            ))),
        }
    }
}

/// Node-wide collaborators and configuration handed to every mounter.
#[derive(Clone)]
pub struct MounterContext {
    config: Arc<MounterConfig>,
    template: OptionTemplate,
    mount_table: MountTable,
    invoker: Arc<dyn MountInvoker>,
    unmounter: Arc<dyn Unmounter>,
    binder: Arc<dyn BindAliaser>,
}

impl MounterContext {
    /// Context backed by the real process invoker, `umount(2)` and
    /// `MS_BIND`.
    pub fn new(config: MounterConfig) -> Self {
        let mount_table = MountTable::default();
        Self {
            template: OptionTemplate::standard(&config),
            invoker: Arc::new(FuseInvoker::from_config(&config)),
            unmounter: Arc::new(MountPointCleaner::new(mount_table.clone())),
            binder: Arc::new(BindMounter),
            mount_table,
            config: Arc::new(config),
        }
    }

    /// Replace the mount invoker.
    pub fn with_invoker(mut self, invoker: Arc<dyn MountInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Replace the unmounter.
    pub fn with_unmounter(mut self, unmounter: Arc<dyn Unmounter>) -> Self {
        self.unmounter = unmounter;
        self
    }

    /// Replace the bind aliaser.
    pub fn with_binder(mut self, binder: Arc<dyn BindAliaser>) -> Self {
        self.binder = binder;
        self
    }

    /// Replace the option template.
    pub fn with_template(mut self, template: OptionTemplate) -> Self {
        self.template = template;
        self
    }

    /// Replace the mount table used for mount point checks.
    pub fn with_mount_table(mut self, mount_table: MountTable) -> Self {
        self.mount_table = mount_table;
        self
    }

    pub fn config(&self) -> &MounterConfig {
        &self.config
    }

    pub fn template(&self) -> &OptionTemplate {
        &self.template
    }

    pub fn mount_table(&self) -> &MountTable {
        &self.mount_table
    }

    pub fn invoker(&self) -> &dyn MountInvoker {
        self.invoker.as_ref()
    }

    pub fn unmounter(&self) -> &dyn Unmounter {
        self.unmounter.as_ref()
    }

    pub fn binder(&self) -> &dyn BindAliaser {
        self.binder.as_ref()
    }
}

impl Default for MounterContext {
    /// Context built from the environment-derived [`MOUNTER_CONFIG`].
    fn default() -> Self {
        Self::new(MOUNTER_CONFIG.clone())
    }
}

impl fmt::Debug for MounterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MounterContext")
            .field("config", &self.config)
            .field("template", &self.template)
            .field("mount_table", &self.mount_table)
            .finish_non_exhaustive()
    }
}

/// Build the mounter for one volume mount cycle.
pub fn new_mounter(
    kind: MounterKind,
    volume_id: VolumeId,
    location: VolumeLocation,
    backend: &BackendConfig,
    ctx: MounterContext,
) -> Result<Box<dyn Mounter>, MounterError> {
    match kind {
        MounterKind::S3fs => Ok(Box::new(S3fsMounter::new(volume_id, location, backend, ctx)?)),
    }
}

/// Unmount `staging_path` and remove its (now empty) directory.
///
/// A missing directory counts as already clean.  The directory is left alone
/// when the unmount fails.
pub async fn release_staging(
    unmounter: &dyn Unmounter,
    staging_path: &Path,
) -> Result<(), MounterError> {
    unmounter.cleanup(staging_path).await?;

    match tokio::fs::remove_dir(staging_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %staging_path.display(), "staging directory already gone");
            Ok(())
        }
        Err(e) => Err(MounterError::directory_removal(staging_path, e)),
    }
}
