//! Launching the FUSE translation tool.
//!
//! [`MountInvoker`] is the seam between a mounter and the process that
//! actually presents a bucket as a filesystem.  [`FuseInvoker`] runs the
//! tool, waits for it to exit, and then waits for the mount to show up in
//! the mount table: s3fs daemonizes, so a zero exit status alone does not
//! prove the mount exists yet.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::MounterConfig;
use crate::error::MounterError;
use crate::mountinfo::MountTable;

/// Launches a FUSE-capable translation process.
#[async_trait]
pub trait MountInvoker: Send + Sync {
    /// Run `command` with `args` so that a filesystem ends up mounted at
    /// `target`.  Resolves once the mount is established or has failed.
    async fn mount(
        &self,
        command: &str,
        args: &[String],
        target: &Path,
    ) -> Result<(), MounterError>;
}

/// Runs the tool as a child process and polls the mount table afterwards.
#[derive(Debug, Clone)]
pub struct FuseInvoker {
    mount_table: MountTable,
    timeout: Duration,
    poll_interval: Duration,
}

impl FuseInvoker {
    /// Invoker reading `mount_table` while waiting up to `timeout`.
    pub fn new(mount_table: MountTable, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            mount_table,
            timeout,
            poll_interval,
        }
    }

    /// Invoker using the kernel mount table and the configured timeouts.
    pub fn from_config(config: &MounterConfig) -> Self {
        Self::new(
            MountTable::default(),
            config.mount_timeout(),
            config.mount_poll_interval(),
        )
    }

    async fn wait_for_mount(&self, command: &str, target: &Path) -> Result<(), MounterError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.mount_table.is_mountpoint(target).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MounterError::invocation(
                    command,
                    format!(
                        "mount at {} did not appear within {:?}",
                        target.display(),
                        self.timeout
                    ),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Default for FuseInvoker {
    fn default() -> Self {
        Self::from_config(&MounterConfig::default())
    }
}

#[async_trait]
impl MountInvoker for FuseInvoker {
    async fn mount(
        &self,
        command: &str,
        args: &[String],
        target: &Path,
    ) -> Result<(), MounterError> {
        debug!(command, ?args, target = %target.display(), "invoking fuse mount");

        let output = Command::new(command)
            .args(args)
            .output()
            .await
            .map_err(|e| MounterError::invocation(command, e))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(MounterError::invocation(
                command,
                format!(
                    "exited with {}: args {:?}: {}",
                    output.status,
                    args,
                    combined.trim()
                ),
            ));
        }

        self.wait_for_mount(command, target).await?;
        info!(command, target = %target.display(), "fuse mount established");
        Ok(())
    }
}
