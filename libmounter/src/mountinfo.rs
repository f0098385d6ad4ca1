//! Mount point detection.
//!
//! Reads the kernel mount table (`/proc/self/mounts` by default) and answers
//! whether a path is currently a mount point.

use std::path::{Component, Path, PathBuf};

/// Default kernel mount table.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// A readable mount table in `/proc/mounts` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTable {
    path: PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new(PROC_MOUNTS)
    }
}

impl MountTable {
    /// Mount table read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Return `true` if `path` is listed as a mount point.
    ///
    /// An unreadable table counts as "not mounted".
    pub async fn is_mountpoint(&self, path: &Path) -> bool {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return false,
        };
        let wanted = normalize(path);
        mount_points(&contents).any(|mp| normalize(&mp) == wanted)
    }
}

/// Mount points listed in a `/proc/mounts` style table.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace in paths escaped as octal (`\040` for space).
pub fn mount_points(contents: &str) -> impl Iterator<Item = PathBuf> + '_ {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|mp| PathBuf::from(unescape_octal(mp)))
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'\\' && i + 3 < bytes.len())
            .then(|| &bytes[i + 1..=i + 3])
            .filter(|digits| digits.iter().all(|b| (b'0'..=b'7').contains(b)))
            .and_then(|digits| {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                u8::try_from(value).ok()
            });
        if let Some(value) = escaped {
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Drop `.` components and trailing separators so equal paths compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
