//! Node service: the CSI node operations backed by pluggable mounters.
//!
//! The Node service runs on each worker node and handles the local
//! filesystem operations required to make a bucket available to Pods:
//!
//! 1. **Stage** — mount the bucket location at a staging path with the
//!    volume's mounter.
//! 2. **Publish** — bind-mount the staging path at the Pod's volume path.
//! 3. **Unpublish** — remove the bind mount.
//! 4. **Unstage** — unmount the staging mount and remove its directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, instrument};

use crate::error::MounterError;
use crate::lifecycle::VolumeLifecycle;
use crate::mounter::{MounterContext, MounterKind, new_mounter, release_staging};
use crate::types::*;

/// Node service — local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at its staging path.
    ///
    /// This is idempotent — calling it again for an already-staged volume
    /// should succeed without error.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), MounterError>;

    /// Unstage a volume: unmount its staging path and remove the directory.
    ///
    /// This is idempotent — calling it on an already-unstaged volume should
    /// succeed without error.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), MounterError>;

    /// Publish a volume: bind-mount the staging path at the target path.
    ///
    /// This is idempotent — calling it again for the same `target_path` should
    /// succeed without error.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), MounterError>;

    /// Unpublish a volume: unmount the bind mount at the target path.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), MounterError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, MounterError>;
}

/// Node service for object-store volumes.
///
/// # Thread safety
///
/// Lifecycles live in a [`DashMap`]; each lifecycle serializes operations on
/// its own volume, so different volumes proceed concurrently.
pub struct S3Node {
    node_id: String,
    max_volumes: u64,
    ctx: MounterContext,
    volumes: DashMap<VolumeId, Arc<VolumeLifecycle>>,
}

impl S3Node {
    /// Create a node service.
    ///
    /// * `node_id` — unique identifier for this node
    /// * `ctx` — configuration and collaborators shared by every mounter
    pub fn new(node_id: String, ctx: MounterContext) -> Self {
        Self {
            node_id,
            max_volumes: 256,
            ctx,
            volumes: DashMap::new(),
        }
    }

    /// Lifecycle of a volume staged through this service.
    pub fn lifecycle(&self, volume_id: &VolumeId) -> Option<Arc<VolumeLifecycle>> {
        self.volumes.get(volume_id).map(|r| Arc::clone(r.value()))
    }

    fn build_lifecycle(
        &self,
        req: &NodeStageVolumeRequest,
    ) -> Result<VolumeLifecycle, MounterError> {
        let location = VolumeLocation::from_volume_context(&req.volume_id, &req.volume_context)?;
        let backend = BackendConfig::from_secrets(&req.secrets)?;
        let kind = match req.volume_context.get(CTX_MOUNTER) {
            Some(name) => name.parse()?,
            None => MounterKind::default(),
        };
        debug!(volume_id = %req.volume_id, %kind, ?location, "building mounter");

        let mounter = new_mounter(
            kind,
            req.volume_id.clone(),
            location,
            &backend,
            self.ctx.clone(),
        )?;
        Ok(VolumeLifecycle::new(req.volume_id.clone(), mounter))
    }
}

async fn prepare_dir(path: &Path) -> Result<(), MounterError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| MounterError::PrepareDirectory {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn required(value: &str, what: &str) -> Result<(), MounterError> {
    if value.is_empty() {
        return Err(MounterError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

#[async_trait]
impl CsiNode for S3Node {
    #[instrument(skip(self), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), MounterError> {
        required(&req.volume_id.0, "volume id")?;
        required(&req.staging_target_path, "staging target path")?;
        let staging = Path::new(&req.staging_target_path);

        prepare_dir(staging).await?;

        // Register before staging so concurrent retries share one lifecycle
        // and its lock; the shard guard is dropped before any await.
        let (lifecycle, fresh) = match self.volumes.entry(req.volume_id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let built = Arc::new(self.build_lifecycle(&req)?);
                (Arc::clone(entry.insert(built).value()), true)
            }
        };

        let staged = if fresh && self.ctx.mount_table().is_mountpoint(staging).await {
            debug!(path = %req.staging_target_path, "staging path already mounted, adopting it");
            lifecycle.adopt_staged(staging).await
        } else {
            lifecycle.stage(staging).await
        };

        if let Err(e) = staged {
            if lifecycle.state().await == MountState::Unstaged {
                self.volumes.remove_if(&req.volume_id, |_, v| Arc::ptr_eq(v, &lifecycle));
            }
            return Err(e);
        }

        info!(path = %req.staging_target_path, "volume staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), MounterError> {
        required(staging_target_path, "staging target path")?;
        let staging = Path::new(staging_target_path);

        match self.lifecycle(volume_id) {
            Some(lifecycle) => {
                lifecycle.unstage(staging).await?;
                self.volumes.remove(volume_id);
            }
            // Staged by a previous plugin process: nothing to sequence
            // against, just tear the mount down.
            None => release_staging(self.ctx.unmounter(), staging).await?,
        }

        info!(%volume_id, path = staging_target_path, "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), MounterError> {
        required(&req.target_path, "target path")?;
        let lifecycle = self
            .lifecycle(&req.volume_id)
            .ok_or_else(|| MounterError::VolumeNotStaged(req.volume_id.to_string()))?;
        let source = Path::new(&req.staging_target_path);
        let target = Path::new(&req.target_path);

        // A second bind would stack on top of an existing one; record the
        // existing mount instead so unstage still waits for it.
        if self.ctx.mount_table().is_mountpoint(target).await {
            debug!(target_path = %req.target_path, "target already mounted, adopting it");
            return lifecycle.adopt_target(source, target).await;
        }

        prepare_dir(target).await?;
        lifecycle.mount(source, target).await?;

        info!(target_path = %req.target_path, "volume published (bind-mount)");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), MounterError> {
        required(target_path, "target path")?;
        let target = Path::new(target_path);

        match self.lifecycle(volume_id) {
            Some(lifecycle) => lifecycle.unmount(target).await?,
            None => self.ctx.unmounter().cleanup(target).await?,
        }

        info!(%volume_id, %target_path, "volume unpublished");
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, MounterError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: self.max_volumes,
            accessible_topology: Some(Topology {
                segments: HashMap::from([("node".to_owned(), self.node_id.clone())]),
            }),
        })
    }
}
