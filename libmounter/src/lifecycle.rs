//! Per-volume mount lifecycle.
//!
//! [`VolumeLifecycle`] wraps a [`Mounter`] and enforces the ordering the raw
//! mounter leaves implicit:
//!
//! ```text
//!            stage                 mount
//! Unstaged ─────────► Staged ─────────────► Mounted (1..n targets)
//!     ▲                 │  ▲                   │
//!     └──── unstage ────┘  └── unmount (last) ─┘
//! ```
//!
//! Out-of-order calls fail with [`MounterError::InvalidTransition`] instead of
//! surfacing as OS errors.  Operations on one volume are serialized; a
//! failed operation leaves the state unchanged.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::MounterError;
use crate::mounter::Mounter;
use crate::types::{MountState, VolumeId};

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Unstaged,
    Staged {
        staging_path: PathBuf,
        targets: BTreeSet<PathBuf>,
    },
}

impl Phase {
    fn state(&self) -> MountState {
        match self {
            Self::Unstaged => MountState::Unstaged,
            Self::Staged { targets, .. } if targets.is_empty() => MountState::Staged,
            Self::Staged { .. } => MountState::Mounted,
        }
    }
}

/// Lifecycle state machine for one volume on this node.
pub struct VolumeLifecycle {
    volume_id: VolumeId,
    mounter: Box<dyn Mounter>,
    phase: Mutex<Phase>,
}

impl VolumeLifecycle {
    /// Start in [`MountState::Unstaged`].
    pub fn new(volume_id: VolumeId, mounter: Box<dyn Mounter>) -> Self {
        Self {
            volume_id,
            mounter,
            phase: Mutex::new(Phase::Unstaged),
        }
    }

    pub fn volume_id(&self) -> &VolumeId {
        &self.volume_id
    }

    /// Current state.
    pub async fn state(&self) -> MountState {
        self.phase.lock().await.state()
    }

    /// Staging path, once staged.
    pub async fn staging_path(&self) -> Option<PathBuf> {
        match &*self.phase.lock().await {
            Phase::Unstaged => None,
            Phase::Staged { staging_path, .. } => Some(staging_path.clone()),
        }
    }

    /// Consumer paths currently bound to the staging mount.
    pub async fn targets(&self) -> Vec<PathBuf> {
        match &*self.phase.lock().await {
            Phase::Unstaged => Vec::new(),
            Phase::Staged { targets, .. } => targets.iter().cloned().collect(),
        }
    }

    /// Record an existing staging mount (e.g. left over from a previous
    /// plugin process) without invoking the mounter.
    pub async fn adopt_staged(&self, staging_path: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Unstaged => {}
            Phase::Staged { staging_path: current, .. } if current == staging_path => return Ok(()),
            other => return Err(self.rejected(other, "adopt staging mount")),
        }

        *phase = Phase::Staged {
            staging_path: staging_path.to_path_buf(),
            targets: BTreeSet::new(),
        };
        Ok(())
    }

    /// Record an existing bind mount of the staging path at `target` without
    /// invoking the mounter.
    pub async fn adopt_target(&self, source: &Path, target: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        let state = phase.state();
        match &mut *phase {
            Phase::Staged {
                staging_path,
                targets,
            } if staging_path.as_path() == source => {
                targets.insert(target.to_path_buf());
                Ok(())
            }
            _ => Err(self.rejected_state(state, &format!("adopt mount at {}", target.display()))),
        }
    }

    /// Unstaged → Staged.  Staging again at the same path is a no-op.
    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    pub async fn stage(&self, staging_path: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Unstaged => {}
            Phase::Staged { staging_path: current, .. } if current == staging_path => {
                debug!(path = %staging_path.display(), "already staged");
                return Ok(());
            }
            other => {
                return Err(self.rejected(other, &format!("stage at {}", staging_path.display())));
            }
        }

        self.mounter.stage(staging_path).await?;
        *phase = Phase::Staged {
            staging_path: staging_path.to_path_buf(),
            targets: BTreeSet::new(),
        };
        Ok(())
    }

    /// Staged/Mounted → Mounted: bind `source` (the staging path) at `target`.
    /// Binding the same target again is a no-op.
    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    pub async fn mount(&self, source: &Path, target: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        let state = phase.state();
        let Phase::Staged {
            staging_path,
            targets,
        } = &mut *phase
        else {
            return Err(self.rejected_state(state, "mount"));
        };

        if staging_path.as_path() != source {
            return Err(self.rejected_state(
                state,
                &format!("mount from {} (staged at {})", source.display(), staging_path.display()),
            ));
        }
        if targets.contains(target) {
            debug!(target = %target.display(), "already mounted");
            return Ok(());
        }

        self.mounter.mount(source, target).await?;
        targets.insert(target.to_path_buf());
        Ok(())
    }

    /// Mounted → Mounted/Staged.  Unknown targets are cleaned up anyway so
    /// unmount stays idempotent.
    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    pub async fn unmount(&self, target: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        let Phase::Staged { targets, .. } = &mut *phase else {
            return Err(self.rejected_state(MountState::Unstaged, "unmount"));
        };

        self.mounter.unmount(target).await?;
        targets.remove(target);
        Ok(())
    }

    /// Staged → Unstaged.  Rejected while consumer targets remain; from
    /// Unstaged it still delegates, which is safe when nothing is mounted.
    #[instrument(skip(self), fields(volume_id = %self.volume_id))]
    pub async fn unstage(&self, staging_path: &Path) -> Result<(), MounterError> {
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Staged {
                staging_path: current,
                targets,
            } if current == staging_path && targets.is_empty() => {}
            Phase::Unstaged => {}
            other => {
                return Err(self.rejected(other, &format!("unstage {}", staging_path.display())));
            }
        }

        self.mounter.unstage(staging_path).await?;
        *phase = Phase::Unstaged;
        Ok(())
    }

    fn rejected(&self, phase: &Phase, operation: &str) -> MounterError {
        self.rejected_state(phase.state(), operation)
    }

    fn rejected_state(&self, state: MountState, operation: &str) -> MounterError {
        MounterError::InvalidTransition {
            volume_id: self.volume_id.to_string(),
            state: state.to_string(),
            operation: operation.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounter::testing::*;
    use crate::mounter::{MounterKind, new_mounter};
    use crate::types::{BackendConfig, VolumeLocation};

    fn lifecycle(harness: &Harness) -> VolumeLifecycle {
        let backend = BackendConfig {
            endpoint: "http://minio:9000".into(),
            access_key_id: "AK".into(),
            secret_access_key: "SK".into(),
            ..Default::default()
        };
        let location = VolumeLocation {
            bucket_name: "bucket".into(),
            ..Default::default()
        };
        let id = VolumeId::from("bucket");
        let mounter =
            new_mounter(MounterKind::S3fs, id.clone(), location, &backend, harness.ctx.clone())
                .unwrap();
        VolumeLifecycle::new(id, mounter)
    }

    #[tokio::test]
    async fn full_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");
        let (pod_a, pod_b) = (tmp.path().join("pod-a"), tmp.path().join("pod-b"));

        assert_eq!(lc.state().await, MountState::Unstaged);
        lc.stage(&staging).await.unwrap();
        assert_eq!(lc.state().await, MountState::Staged);
        assert_eq!(lc.staging_path().await, Some(staging.clone()));

        lc.mount(&staging, &pod_a).await.unwrap();
        lc.mount(&staging, &pod_b).await.unwrap();
        assert_eq!(lc.state().await, MountState::Mounted);
        assert_eq!(lc.targets().await, [pod_a.clone(), pod_b.clone()]);

        lc.unmount(&pod_a).await.unwrap();
        assert_eq!(lc.state().await, MountState::Mounted);
        lc.unmount(&pod_b).await.unwrap();
        assert_eq!(lc.state().await, MountState::Staged);

        lc.unstage(&staging).await.unwrap();
        assert_eq!(lc.state().await, MountState::Unstaged);

        assert_eq!(harness.invoker.calls().len(), 1);
        assert_eq!(harness.binder.binds().len(), 2);
        assert_eq!(harness.unmounter.cleaned(), [pod_a, pod_b, staging]);
    }

    #[tokio::test]
    async fn repeated_calls_are_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");
        let pod = tmp.path().join("pod");

        lc.stage(&staging).await.unwrap();
        lc.stage(&staging).await.unwrap();
        lc.mount(&staging, &pod).await.unwrap();
        lc.mount(&staging, &pod).await.unwrap();

        assert_eq!(harness.invoker.calls().len(), 1);
        assert_eq!(harness.binder.binds().len(), 1);
    }

    #[tokio::test]
    async fn rejects_out_of_order_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");
        let pod = tmp.path().join("pod");

        let err = lc.mount(&staging, &pod).await.unwrap_err();
        assert!(matches!(
            err,
            MounterError::InvalidTransition { ref state, .. } if state == "unstaged"
        ));
        assert!(matches!(
            lc.unmount(&pod).await,
            Err(MounterError::InvalidTransition { .. })
        ));

        lc.stage(&staging).await.unwrap();
        assert!(matches!(
            lc.stage(&tmp.path().join("elsewhere")).await,
            Err(MounterError::InvalidTransition { .. })
        ));
        assert!(matches!(
            lc.mount(&tmp.path().join("elsewhere"), &pod).await,
            Err(MounterError::InvalidTransition { .. })
        ));

        lc.mount(&staging, &pod).await.unwrap();
        let err = lc.unstage(&staging).await.unwrap_err();
        assert!(matches!(
            err,
            MounterError::InvalidTransition { ref state, .. } if state == "mounted"
        ));
        assert_eq!(lc.state().await, MountState::Mounted);

        assert_eq!(harness.binder.binds().len(), 1);
        assert!(harness.unmounter.cleaned().is_empty());
    }

    #[tokio::test]
    async fn unstage_from_unstaged_delegates() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");

        lc.unstage(&staging).await.unwrap();
        assert_eq!(harness.unmounter.cleaned(), [staging]);
        assert_eq!(lc.state().await, MountState::Unstaged);
    }

    #[tokio::test]
    async fn unmount_unknown_target_still_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");
        let stray = tmp.path().join("stray");

        lc.stage(&staging).await.unwrap();
        lc.unmount(&stray).await.unwrap();
        assert_eq!(harness.unmounter.cleaned(), [stray]);
        assert_eq!(lc.state().await, MountState::Staged);
    }

    #[tokio::test]
    async fn failed_stage_keeps_state() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path())
            .with_invoker(RecordingInvoker::failing(MounterError::invocation("s3fs", "boom")));
        let lc = lifecycle(&harness);

        assert!(lc.stage(&tmp.path().join("stage")).await.is_err());
        assert_eq!(lc.state().await, MountState::Unstaged);
    }

    #[tokio::test]
    async fn failed_unstage_keeps_state() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        let harness = Harness::new(tmp.path()).with_unmounter(RecordingUnmounter {
            fail_with: Some(MounterError::cleanup(&staging, "busy")),
            ..Default::default()
        });
        let lc = lifecycle(&harness);

        lc.stage(&staging).await.unwrap();
        assert!(matches!(
            lc.unstage(&staging).await,
            Err(MounterError::Cleanup { .. })
        ));
        assert_eq!(lc.state().await, MountState::Staged);
    }

    #[tokio::test]
    async fn adopt_existing_staging_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");

        lc.adopt_staged(&staging).await.unwrap();
        assert_eq!(lc.state().await, MountState::Staged);
        assert!(harness.invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn adopt_existing_target_blocks_unstage() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = Harness::new(tmp.path());
        let lc = lifecycle(&harness);
        let staging = tmp.path().join("stage");
        let pod = tmp.path().join("pod");

        assert!(matches!(
            lc.adopt_target(&staging, &pod).await,
            Err(MounterError::InvalidTransition { .. })
        ));

        lc.adopt_staged(&staging).await.unwrap();
        assert!(matches!(
            lc.adopt_target(&tmp.path().join("elsewhere"), &pod).await,
            Err(MounterError::InvalidTransition { .. })
        ));
        lc.adopt_target(&staging, &pod).await.unwrap();
        assert_eq!(lc.state().await, MountState::Mounted);
        assert!(harness.binder.binds().is_empty());

        assert!(matches!(
            lc.unstage(&staging).await,
            Err(MounterError::InvalidTransition { .. })
        ));
        lc.unmount(&pod).await.unwrap();
        lc.unstage(&staging).await.unwrap();
        assert_eq!(harness.unmounter.cleaned(), [pod, staging]);
    }
}
