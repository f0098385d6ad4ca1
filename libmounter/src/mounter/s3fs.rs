//! s3fs-fuse backend.
//!
//! Stages a volume by running
//!
//! ```text
//! s3fs <bucket>:/<prefix>/<fsPath> <staging> \
//!     -o use_path_request_style -o url=<endpoint> -o endpoint=<region> \
//!     -o allow_other -o mp_umask=000 [-o passwd_file=<file>] <extra options>
//! ```
//!
//! and exposes the staged mount to consumers through bind mounts.

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::credentials::CredentialStore;
use crate::error::MounterError;
use crate::mounter::{Mounter, MounterContext, MounterKind, release_staging};
use crate::types::{BackendConfig, VolumeId, VolumeLocation};

/// Mounter driving s3fs for one volume.
pub struct S3fsMounter {
    volume_id: VolumeId,
    location: VolumeLocation,
    endpoint: String,
    region: String,
    credential_blob: String,
    credentials: CredentialStore,
    ctx: MounterContext,
}

impl S3fsMounter {
    /// Bind `location` and the connection parameters for one mount cycle.
    pub fn new(
        volume_id: VolumeId,
        location: VolumeLocation,
        backend: &BackendConfig,
        ctx: MounterContext,
    ) -> Result<Self, MounterError> {
        let credentials = CredentialStore::for_volume(ctx.config(), &volume_id)?;
        Ok(Self {
            volume_id,
            location,
            endpoint: backend.endpoint.clone(),
            region: backend.region.clone(),
            credential_blob: backend.credential_blob(),
            credentials,
            ctx,
        })
    }

    /// `<bucket>:/<prefix>/<fsPath>` with separators normalized.
    pub fn source_spec(&self) -> String {
        format!(
            "{}:/{}",
            self.location.bucket_name,
            object_path(&[self.location.prefix.as_str(), self.location.fs_path.as_str()])
        )
    }

    /// Full s3fs argument list for staging at `staging_path`.
    pub fn stage_args(&self, staging_path: &Path) -> Result<Vec<String>, MounterError> {
        let mut args = vec![
            self.source_spec(),
            staging_path.to_string_lossy().into_owned(),
        ];
        let mut push_opt = |opt: String| {
            args.push("-o".to_owned());
            args.push(opt);
        };
        push_opt("use_path_request_style".to_owned());
        push_opt(format!("url={}", self.endpoint));
        push_opt(format!("endpoint={}", self.region));
        push_opt("allow_other".to_owned());
        push_opt("mp_umask=000".to_owned());
        if self.credentials.is_per_volume() {
            push_opt(format!("passwd_file={}", self.credentials.path().display()));
        }

        args.extend(self.ctx.template().expand(&self.location)?);
        Ok(args)
    }
}

#[async_trait]
impl Mounter for S3fsMounter {
    fn kind(&self) -> MounterKind {
        MounterKind::S3fs
    }

    #[instrument(
        skip(self),
        fields(volume_id = %self.volume_id, bucket = %self.location.bucket_name)
    )]
    async fn stage(&self, staging_path: &Path) -> Result<(), MounterError> {
        self.credentials.write(&self.credential_blob).await?;

        let args = self.stage_args(staging_path)?;
        let command = &self.ctx.config().s3fs_command;
        self.ctx.invoker().mount(command, &args, staging_path).await?;

        info!(path = %staging_path.display(), "volume staged");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    async fn unstage(&self, staging_path: &Path) -> Result<(), MounterError> {
        release_staging(self.ctx.unmounter(), staging_path).await?;
        self.credentials.remove().await?;

        info!(path = %staging_path.display(), "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    async fn mount(&self, source: &Path, target: &Path) -> Result<(), MounterError> {
        // Bind mount: an alias of the real mount point.
        self.ctx.binder().bind(source, target).await
    }

    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    async fn unmount(&self, target: &Path) -> Result<(), MounterError> {
        self.ctx.unmounter().cleanup(target).await
    }
}

/// Join object path segments, dropping empty and `.` segments, resolving
/// `..` without escaping the bucket root, and never leaving a leading,
/// trailing, or doubled separator.
fn object_path(parts: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in parts.iter().flat_map(|p| p.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
