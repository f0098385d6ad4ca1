//! # libmounter — object-store volume mounters for the CSI node plugin
//!
//! `libmounter` makes a bucket location (bucket + prefix + path) appear as a
//! POSIX directory on a node and reverses the operation cleanly.  A FUSE
//! translation tool (s3fs) mounts the bucket once at a staging path; consumer
//! paths are bind-mount aliases of that staging mount.  It follows the RK8s
//! conventions (Tokio async runtime, `tracing` for observability, `thiserror`
//! for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Volume locations, backend parameters, lifecycle states, node requests. |
//! | [`error`] | [`MounterError`] enum covering all failure modes. |
//! | [`config`] | [`MounterConfig`]: credential scope, cache root, timeouts. |
//! | [`credentials`] | [`CredentialStore`] — owner-only password files. |
//! | [`template`] | [`OptionTemplate`] — `${name}` expansion of extra options. |
//! | [`mountinfo`] | [`MountTable`] — mount point detection. |
//! | [`invoker`] | [`MountInvoker`] — launching the FUSE tool. |
//! | [`unmounter`] | [`Unmounter`] — mount point teardown. |
//! | [`binder`] | [`BindAliaser`] — bind-mount aliases. |
//! | [`mounter`] | [`Mounter`] trait and backends (s3fs). |
//! | [`lifecycle`] | [`VolumeLifecycle`] — Unstaged / Staged / Mounted state machine. |
//! | [`node`] | [`CsiNode`] trait and the [`S3Node`] service. |

pub mod binder;
pub mod config;
pub mod credentials;
pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod mounter;
pub mod mountinfo;
pub mod node;
pub mod template;
pub mod types;
pub mod unmounter;

// Re-export the most commonly used items at crate root for convenience.
pub use binder::{BindAliaser, BindMounter};
pub use config::{CredentialScope, MOUNTER_CONFIG, MounterConfig, PlaceholderPolicy};
pub use credentials::CredentialStore;
pub use error::MounterError;
pub use invoker::{FuseInvoker, MountInvoker};
pub use lifecycle::VolumeLifecycle;
pub use mounter::{Mounter, MounterContext, MounterKind, S3fsMounter, new_mounter};
pub use mountinfo::MountTable;
pub use node::{CsiNode, S3Node};
pub use template::OptionTemplate;
pub use types::*;
pub use unmounter::{MountPointCleaner, Unmounter};
