//! Mounter configuration.
//!
//! Controls where credentials are written, how option placeholders are
//! resolved, and how long to wait for a FUSE mount to appear.
//!
//! Environment variables (read by [`MounterConfig::from_env`]):
//! - `CSI_S3_S3FS_COMMAND`: translation tool binary. Defaults to `s3fs`.
//! - `CSI_S3_CREDENTIAL_SCOPE`: `per-volume` (default) or `global`.
//! - `CSI_S3_CREDENTIALS_DIR`: directory for per-volume credential files.
//! - `CSI_S3_CACHE_ROOT`: root of the per-bucket cache directories.
//! - `CSI_S3_PLACEHOLDER_POLICY`: `lenient` (default) or `strict`.
//! - `CSI_S3_MOUNT_TIMEOUT_MS`: how long to wait for a mount to appear.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_S3FS_COMMAND: &str = "s3fs";
const DEFAULT_CREDENTIALS_DIR: &str = "/var/lib/csi-s3/credentials";
const DEFAULT_CACHE_ROOT: &str = "/var/cache/csi-s3";
const DEFAULT_MOUNT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MOUNT_POLL_INTERVAL_MS: u64 = 100;

/// Globally initialized mounter configuration, read from environment
/// variables at first access.
pub static MOUNTER_CONFIG: LazyLock<MounterConfig> = LazyLock::new(MounterConfig::from_env);

/// Where connection secrets are written.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialScope {
    /// One file per volume under `credentials_dir`, handed to the tool via
    /// `passwd_file`.
    #[default]
    PerVolume,
    /// The single `$HOME/.passwd-s3fs` file shared by every volume.
    ///
    /// Concurrent stages with different credentials race on this file.
    Global,
}

impl FromStr for CredentialScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-volume" => Ok(Self::PerVolume),
            "global" => Ok(Self::Global),
            other => Err(format!("unknown credential scope {other:?}")),
        }
    }
}

/// What to do with an option placeholder that has no resolver.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderPolicy {
    /// Keep the placeholder text verbatim and log a warning.
    #[default]
    Lenient,
    /// Fail the expansion.
    Strict,
}

impl FromStr for PlaceholderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown placeholder policy {other:?}")),
        }
    }
}

/// Configuration shared by every mounter built on this node.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct MounterConfig {
    /// s3fs binary name or path.
    pub s3fs_command: String,
    /// Credential file scoping.
    pub credential_scope: CredentialScope,
    /// Directory holding per-volume credential files.
    pub credentials_dir: PathBuf,
    /// Overrides `$HOME` when locating the global credential file.
    pub home_dir: Option<PathBuf>,
    /// Root of the per-bucket cache directories (`${cacheDir}`).
    pub cache_root: PathBuf,
    /// Handling of unknown option placeholders.
    pub placeholder_policy: PlaceholderPolicy,
    /// How long to wait for a staged mount to appear, in milliseconds.
    pub mount_timeout_ms: u64,
    /// Mount table polling interval while waiting, in milliseconds.
    pub mount_poll_interval_ms: u64,
}

impl Default for MounterConfig {
    fn default() -> Self {
        Self {
            s3fs_command: DEFAULT_S3FS_COMMAND.to_owned(),
            credential_scope: CredentialScope::default(),
            credentials_dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
            home_dir: None,
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            placeholder_policy: PlaceholderPolicy::default(),
            mount_timeout_ms: DEFAULT_MOUNT_TIMEOUT_MS,
            mount_poll_interval_ms: DEFAULT_MOUNT_POLL_INTERVAL_MS,
        }
    }
}

impl MounterConfig {
    /// Defaults with `CSI_S3_*` environment overrides applied.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(cmd) = std::env::var("CSI_S3_S3FS_COMMAND") {
            config.s3fs_command = cmd;
        }
        if let Some(scope) = parse_env("CSI_S3_CREDENTIAL_SCOPE") {
            config.credential_scope = scope;
        }
        if let Ok(dir) = std::env::var("CSI_S3_CREDENTIALS_DIR") {
            config.credentials_dir = PathBuf::from(dir);
        }
        if let Ok(root) = std::env::var("CSI_S3_CACHE_ROOT") {
            config.cache_root = PathBuf::from(root);
        }
        if let Some(policy) = parse_env("CSI_S3_PLACEHOLDER_POLICY") {
            config.placeholder_policy = policy;
        }
        if let Some(ms) = parse_env("CSI_S3_MOUNT_TIMEOUT_MS") {
            config.mount_timeout_ms = ms;
        }
        config
    }

    /// Load a YAML configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mounter config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse mounter config {}", path.display()))
    }

    /// Mount appearance timeout.
    pub fn mount_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_timeout_ms)
    }

    /// Mount table polling interval.
    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms.max(1))
    }

    /// Per-bucket cache directory substituted for `${cacheDir}`.
    pub fn cache_dir(&self, bucket_name: &str) -> PathBuf {
        self.cache_root.join(bucket_name)
    }
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = MounterConfig::default();
        assert_eq!(cfg.s3fs_command, "s3fs");
        assert_eq!(cfg.credential_scope, CredentialScope::PerVolume);
        assert_eq!(cfg.placeholder_policy, PlaceholderPolicy::Lenient);
        assert_eq!(cfg.mount_timeout(), Duration::from_secs(10));
        assert_eq!(
            cfg.cache_dir("bucket"),
            PathBuf::from("/var/cache/csi-s3/bucket")
        );
    }

    #[test]
    fn load_partial_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mounter.yaml");
        std::fs::write(
            &path,
            concat!(
                "credentialScope: global\n",
                "homeDir: /root\n",
                "placeholderPolicy: strict\n",
                "mountTimeoutMs: 500\n",
            ),
        )
        .unwrap();

        let cfg = MounterConfig::load(&path).unwrap();
        assert_eq!(cfg.credential_scope, CredentialScope::Global);
        assert_eq!(cfg.home_dir, Some(PathBuf::from("/root")));
        assert_eq!(cfg.placeholder_policy, PlaceholderPolicy::Strict);
        assert_eq!(cfg.mount_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.s3fs_command, "s3fs");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = MounterConfig::load(Path::new("/nonexistent/mounter.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read mounter config"));
    }

    #[test]
    fn parse_enums() {
        assert_eq!("global".parse::<CredentialScope>(), Ok(CredentialScope::Global));
        assert_eq!("strict".parse::<PlaceholderPolicy>(), Ok(PlaceholderPolicy::Strict));
        assert!("shared".parse::<CredentialScope>().is_err());
    }
}
