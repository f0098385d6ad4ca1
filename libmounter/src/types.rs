//! Core mounter types: volume locations, backend connection parameters,
//! lifecycle states, and node requests.
//!
//! Everything a mounter needs is passed in per call; nothing here is
//! persisted beyond the lifetime of one mount cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::MounterError;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume, conventionally `bucket[/prefix]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// The bucket segment of the identifier (everything before the first `/`).
    pub fn bucket(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// The prefix segment of the identifier (everything after the first `/`).
    pub fn prefix(&self) -> &str {
        self.0.split_once('/').map(|(_, p)| p).unwrap_or_default()
    }

    /// A form of the identifier usable as a single file name.
    ///
    /// Bytes outside `[A-Za-z0-9.-]` (including `_`) become `_XX` hex
    /// escapes, so distinct identifiers never share a stem.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' => {
                    stem.push(char::from(byte))
                }
                _ => stem.push_str(&format!("_{byte:02X}")),
            }
        }
        stem
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Volume location
// ---------------------------------------------------------------------------

/// Volume context key overriding the bucket name.
pub const CTX_BUCKET: &str = "bucket";
/// Volume context key overriding the prefix inside the bucket.
pub const CTX_PREFIX: &str = "prefix";
/// Volume context key for the path below the prefix.
pub const CTX_FS_PATH: &str = "fsPath";
/// Volume context key carrying the template-bearing extra options.
pub const CTX_OPTIONS: &str = "options";
/// Volume context key selecting the mounter backend.
pub const CTX_MOUNTER: &str = "mounter";

/// Where inside the object store a volume's data lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeLocation {
    /// Bucket holding the volume.
    pub bucket_name: String,
    /// Prefix inside the bucket.
    #[serde(default)]
    pub prefix: String,
    /// Path below the prefix.
    #[serde(default)]
    pub fs_path: String,
    /// Free-form, whitespace-separated options; may contain `${name}`
    /// placeholders.
    #[serde(default)]
    pub extra_options: String,
}

impl VolumeLocation {
    /// Resolve the location of `volume_id` from its volume context.
    ///
    /// Context keys win over the segments encoded in the identifier.
    pub fn from_volume_context(
        volume_id: &VolumeId,
        context: &HashMap<String, String>,
    ) -> Result<Self, MounterError> {
        let get = |key: &str, fallback: &str| {
            context
                .get(key)
                .cloned()
                .unwrap_or_else(|| fallback.to_owned())
        };

        let bucket_name = get(CTX_BUCKET, volume_id.bucket());
        if bucket_name.is_empty() {
            return Err(MounterError::InvalidArgument(format!(
                "volume {volume_id} has no bucket name"
            )));
        }

        Ok(Self {
            bucket_name,
            prefix: get(CTX_PREFIX, volume_id.prefix()),
            fs_path: get(CTX_FS_PATH, ""),
            extra_options: get(CTX_OPTIONS, ""),
        })
    }
}

// ---------------------------------------------------------------------------
// Backend connection parameters
// ---------------------------------------------------------------------------

/// Secret key holding the object-store endpoint URL.
pub const SECRET_ENDPOINT: &str = "endpoint";
/// Secret key holding the region.
pub const SECRET_REGION: &str = "region";
/// Secret key holding the access key id.
pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
/// Secret key holding the secret access key.
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";

/// Connection parameters for one backend instance.
///
/// `Debug` redacts the secret access key.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Object-store endpoint URL.
    pub endpoint: String,
    /// Region paired with the endpoint.
    #[serde(default)]
    pub region: String,
    /// Access key id.
    #[serde(rename = "accessKeyID")]
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl BackendConfig {
    /// Build the connection parameters from a CSI secrets map.
    pub fn from_secrets(secrets: &HashMap<String, String>) -> Result<Self, MounterError> {
        let required = |key: &str| {
            secrets
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| MounterError::InvalidArgument(format!("missing secret {key}")))
        };

        Ok(Self {
            endpoint: required(SECRET_ENDPOINT)?,
            region: secrets.get(SECRET_REGION).cloned().unwrap_or_default(),
            access_key_id: required(SECRET_ACCESS_KEY_ID)?,
            secret_access_key: required(SECRET_SECRET_ACCESS_KEY)?,
        })
    }

    /// The credential blob understood by the translation tool:
    /// `accessKeyID:secretAccessKey`.
    pub fn credential_blob(&self) -> String {
        format!("{}:{}", self.access_key_id, self.secret_access_key)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of a volume on this node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MountState {
    /// Nothing is mounted for the volume.
    Unstaged,
    /// The translation tool has mounted the volume at its staging path.
    Staged,
    /// The staging path is bind-mounted at one or more consumer paths.
    Mounted,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unstaged => "unstaged",
            Self::Staged => "staged",
            Self::Mounted => "mounted",
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage (globally mount) a volume on a node.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Staging mount point, e.g. `/var/lib/kubelet/plugins/.../globalmount`.
    pub staging_target_path: String,
    /// Opaque context carried from volume creation.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Connection secrets; never logged.
    #[serde(default, skip_serializing)]
    pub secrets: HashMap<String, String>,
}

impl fmt::Debug for NodeStageVolumeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStageVolumeRequest")
            .field("volume_id", &self.volume_id)
            .field("staging_target_path", &self.staging_target_path)
            .field("volume_context", &self.volume_context)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Request to publish (bind-mount) a staged volume at a consumer path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// The staging mount point (source of the bind mount).
    pub staging_target_path: String,
    /// Consumer-visible path.
    pub target_path: String,
}

// ---------------------------------------------------------------------------
// Node info
// ---------------------------------------------------------------------------

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Information about the node on which the node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host.
    pub max_volumes: u64,
    /// Optional topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> HashMap<String, String> {
        HashMap::from([
            (SECRET_ENDPOINT.into(), "https://s3.example.com".into()),
            (SECRET_REGION.into(), "eu-west-1".into()),
            (SECRET_ACCESS_KEY_ID.into(), "AKID".into()),
            (SECRET_SECRET_ACCESS_KEY.into(), "s3cr3t".into()),
        ])
    }

    #[test]
    fn volume_id_segments() {
        let id = VolumeId::from("bucket/team/data");
        assert_eq!(id.bucket(), "bucket");
        assert_eq!(id.prefix(), "team/data");
        assert_eq!(id.file_stem(), "bucket_2Fteam_2Fdata");

        let bare = VolumeId::from("bucket");
        assert_eq!(bare.bucket(), "bucket");
        assert_eq!(bare.prefix(), "");
        assert_eq!(bare.file_stem(), "bucket");
    }

    #[test]
    fn file_stems_do_not_collide() {
        let ids = ["b/x_y", "b/x/y", "b_x_y", "b_2Fx", "b/ü"];
        let stems: std::collections::HashSet<_> = ids
            .iter()
            .map(|id| VolumeId::from(*id).file_stem())
            .collect();
        assert_eq!(stems.len(), ids.len());
        assert_eq!(VolumeId::from("b/x_y").file_stem(), "b_2Fx_5Fy");
        assert_eq!(VolumeId::from("b/x/y").file_stem(), "b_2Fx_2Fy");
    }

    #[test]
    fn location_from_context_prefers_context_keys() {
        let id = VolumeId::from("bucket/pvc-1");
        let ctx = HashMap::from([
            (CTX_FS_PATH.into(), "fs".into()),
            (CTX_OPTIONS.into(), "-o use_cache=${cacheDir}".into()),
        ]);
        let loc = VolumeLocation::from_volume_context(&id, &ctx).unwrap();
        assert_eq!(loc.bucket_name, "bucket");
        assert_eq!(loc.prefix, "pvc-1");
        assert_eq!(loc.fs_path, "fs");
        assert_eq!(loc.extra_options, "-o use_cache=${cacheDir}");

        let ctx = HashMap::from([(CTX_BUCKET.into(), "other".into())]);
        let loc = VolumeLocation::from_volume_context(&id, &ctx).unwrap();
        assert_eq!(loc.bucket_name, "other");
    }

    #[test]
    fn location_requires_bucket() {
        let id = VolumeId::from("");
        let result = VolumeLocation::from_volume_context(&id, &HashMap::new());
        assert!(matches!(result, Err(MounterError::InvalidArgument(_))));
    }

    #[test]
    fn backend_config_from_secrets() {
        let cfg = BackendConfig::from_secrets(&secrets()).unwrap();
        assert_eq!(cfg.endpoint, "https://s3.example.com");
        assert_eq!(cfg.region, "eu-west-1");
        assert_eq!(cfg.credential_blob(), "AKID:s3cr3t");

        let mut missing = secrets();
        missing.remove(SECRET_SECRET_ACCESS_KEY);
        assert!(matches!(
            BackendConfig::from_secrets(&missing),
            Err(MounterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn debug_never_prints_secrets() {
        let cfg = BackendConfig::from_secrets(&secrets()).unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("s3cr3t"));
        assert!(printed.contains("<redacted>"));

        let req = NodeStageVolumeRequest {
            volume_id: "bucket".into(),
            staging_target_path: "/stage".into(),
            volume_context: HashMap::new(),
            secrets: secrets(),
        };
        assert!(!format!("{req:?}").contains("s3cr3t"));
    }

    #[test]
    fn mount_state_display() {
        assert_eq!(MountState::Staged.to_string(), "staged");
    }
}
