//! Placeholder expansion for user-supplied mount options.
//!
//! Extra options are a whitespace-separated string that may embed `${name}`
//! placeholders, e.g. `-o use_cache=${cacheDir}`.  Placeholders are
//! substituted first, then the result is split into tokens.
//!
//! [`OptionTemplate`] owns the table of known placeholders and the policy for
//! unknown ones; [`expand`] is the bare substitution step.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use tracing::warn;

use crate::config::{MounterConfig, PlaceholderPolicy};
use crate::error::MounterError;
use crate::types::VolumeLocation;

/// Placeholder resolving to the per-bucket cache directory.
pub const CACHE_DIR_PLACEHOLDER: &str = "cacheDir";

/// Resolves one placeholder for a volume.
pub type Resolver = Arc<dyn Fn(&VolumeLocation) -> String + Send + Sync>;

/// Substitute every `${name}` in `raw` with `resolver(name)` and split the
/// result on whitespace.
///
/// A `$` not followed by a terminated `${...}` is kept literally.
pub fn expand<F>(raw: &str, mut resolver: F) -> Vec<String>
where
    F: FnMut(&str) -> String,
{
    match try_expand(raw, |name| Ok::<_, Infallible>(resolver(name))) {
        Ok(tokens) => tokens,
        Err(never) => match never {},
    }
}

/// Fallible form of [`expand`]: the first resolver error aborts expansion.
pub fn try_expand<F, E>(raw: &str, mut resolver: F) -> Result<Vec<String>, E>
where
    F: FnMut(&str) -> Result<String, E>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&resolver(&after[..end])?);
                rest = &after[end + 1..];
            }
            _ => {
                // Empty or unterminated placeholder: keep the `${` literally.
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Ok(out.split_whitespace().map(str::to_owned).collect())
}

/// Table of known placeholders plus the policy for unknown ones.
#[derive(Clone)]
pub struct OptionTemplate {
    resolvers: BTreeMap<String, Resolver>,
    policy: PlaceholderPolicy,
}

impl OptionTemplate {
    /// An empty table.
    pub fn new(policy: PlaceholderPolicy) -> Self {
        Self {
            resolvers: BTreeMap::new(),
            policy,
        }
    }

    /// The table used by the built-in mounters: `cacheDir` →
    /// `<cache_root>/<bucket>`.
    pub fn standard(config: &MounterConfig) -> Self {
        let config = config.clone();
        Self::new(config.placeholder_policy).with_placeholder(CACHE_DIR_PLACEHOLDER, move |loc| {
            config.cache_dir(&loc.bucket_name).to_string_lossy().into_owned()
        })
    }

    /// Register (or replace) the resolver for `name`.
    pub fn with_placeholder<F>(mut self, name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&VolumeLocation) -> String + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Arc::new(resolver));
        self
    }

    /// Names with a registered resolver.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }

    /// Expand `location.extra_options` into option tokens.
    pub fn expand(&self, location: &VolumeLocation) -> Result<Vec<String>, MounterError> {
        try_expand(&location.extra_options, |name| {
            if let Some(resolve) = self.resolvers.get(name) {
                return Ok(resolve(location));
            }
            match self.policy {
                PlaceholderPolicy::Lenient => {
                    warn!(
                        placeholder = name,
                        bucket = %location.bucket_name,
                        "unknown extra option placeholder, passing it through",
                    );
                    Ok(format!("${{{name}}}"))
                }
                PlaceholderPolicy::Strict => Err(MounterError::UnknownPlaceholder {
                    name: name.to_owned(),
                }),
            }
        })
    }
}

impl std::fmt::Debug for OptionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionTemplate")
            .field("placeholders", &self.resolvers.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}
