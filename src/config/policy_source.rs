//! Policy sources, re-read by the scheduler on every cycle.
//!
//! A policy file is either JSON (`.json` extension) or a small `KEY=VALUE`
//! document:
//!
//! ```text
//! # grow while more than 2 CPUs are idle, shrink below half a CPU
//! mode=dynamic
//! grow_threshold=2.0
//! shrink_threshold=0.5
//! ```
//!
//! Missing or malformed keys are reported, never defaulted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::core::Policy;

/// Reasons a policy could not be produced.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The document is not well-formed.
    #[error("malformed policy: {0}")]
    Parse(String),
    /// A required key is absent.
    #[error("missing key `{0}`")]
    MissingKey(&'static str),
    /// A key holds a value of the wrong shape.
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue {
        /// Offending key.
        key: &'static str,
        /// Raw value found.
        value: String,
    },
    /// The mode is neither `static` nor `dynamic`.
    #[error("unknown mode `{0}` (expected `static` or `dynamic`)")]
    UnknownMode(String),
    /// No policy is currently available from the source.
    #[error("no policy available")]
    Unavailable,
}

/// Where the scheduler reads its policy from.
pub trait PolicySource: Send {
    /// Produce the current policy. Called once per cycle; implementations
    /// must not cache across calls so operators can retune a live pool.
    ///
    /// # Errors
    ///
    /// Returns a `PolicyError` when no valid policy can be produced.
    fn load(&self) -> Result<Policy, PolicyError>;
}

/// Policy read from a file on every call.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    /// Read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    fn read_key_values(&self) -> Result<HashMap<String, String>, PolicyError> {
        let iter = dotenvy::from_path_iter(&self.path).map_err(|e| self.map_dotenv(e))?;
        let mut entries = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| self.map_dotenv(e))?;
            entries.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        Ok(entries)
    }

    fn map_dotenv(&self, err: dotenvy::Error) -> PolicyError {
        match err {
            dotenvy::Error::Io(source) => PolicyError::Read {
                path: self.path.clone(),
                source,
            },
            other => PolicyError::Parse(other.to_string()),
        }
    }
}

impl PolicySource for FilePolicySource {
    fn load(&self) -> Result<Policy, PolicyError> {
        let policy = if self.is_json() {
            let raw = std::fs::read_to_string(&self.path).map_err(|source| PolicyError::Read {
                path: self.path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|e| PolicyError::Parse(e.to_string()))?
        } else {
            policy_from_key_values(&self.read_key_values()?)?
        };
        validate_policy(policy)
    }
}

/// Policy held in memory and changed programmatically. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SharedPolicySource {
    current: Arc<Mutex<Option<Policy>>>,
}

impl SharedPolicySource {
    /// Start with `policy`.
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self {
            current: Arc::new(Mutex::new(Some(policy))),
        }
    }

    /// Replace the policy.
    pub fn set(&self, policy: Policy) {
        *self.current.lock() = Some(policy);
    }

    /// Make the source unavailable until the next `set`.
    pub fn clear(&self) {
        *self.current.lock() = None;
    }
}

impl PolicySource for SharedPolicySource {
    fn load(&self) -> Result<Policy, PolicyError> {
        let policy = (*self.current.lock()).ok_or(PolicyError::Unavailable)?;
        validate_policy(policy)
    }
}

/// Build a policy from lower-cased `KEY=VALUE` entries.
///
/// # Errors
///
/// Returns a `PolicyError` for a missing mode, unknown mode, or a missing or
/// unparsable value for the selected mode.
pub fn policy_from_key_values(entries: &HashMap<String, String>) -> Result<Policy, PolicyError> {
    let mode = entries.get("mode").ok_or(PolicyError::MissingKey("mode"))?;
    match mode.to_ascii_lowercase().as_str() {
        "static" => Ok(Policy::Static {
            target: parse_key(entries, "target")?,
        }),
        "dynamic" => Ok(Policy::Dynamic {
            grow_threshold: parse_key(entries, "grow_threshold")?,
            shrink_threshold: parse_key(entries, "shrink_threshold")?,
        }),
        other => Err(PolicyError::UnknownMode(other.to_string())),
    }
}

fn parse_key<T: std::str::FromStr>(
    entries: &HashMap<String, String>,
    key: &'static str,
) -> Result<T, PolicyError> {
    let raw = entries.get(key).ok_or(PolicyError::MissingKey(key))?;
    raw.parse().map_err(|_| PolicyError::InvalidValue {
        key,
        value: raw.clone(),
    })
}

fn validate_policy(policy: Policy) -> Result<Policy, PolicyError> {
    if let Policy::Dynamic {
        grow_threshold,
        shrink_threshold,
    } = policy
    {
        for (key, value) in [
            ("grow_threshold", grow_threshold),
            ("shrink_threshold", shrink_threshold),
        ] {
            if !value.is_finite() {
                return Err(PolicyError::InvalidValue {
                    key,
                    value: value.to_string(),
                });
            }
        }
        if shrink_threshold > grow_threshold {
            warn!(
                grow_threshold,
                shrink_threshold, "shrink threshold above grow threshold; pool may thrash"
            );
        }
    }
    Ok(policy)
}
