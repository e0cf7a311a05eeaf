//! The contract between the memoizer and whatever actually evaluates flags.

use std::{
    borrow::Borrow,
    collections::{BTreeSet, HashMap},
    fmt,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::BackendError;

/// Opaque evaluation result. `true` reads as enabled; `false` is a real answer.
pub type FlagValue = serde_json::Value;

/// Identity of a feature flag.
///
/// # Examples
///
/// ```
/// use flagscope::flags::FlagId;
///
/// let id = FlagId::from("search");
/// assert_eq!(id.as_str(), "search");
/// assert_eq!(id.to_string(), "search");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagId(String);

impl FlagId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlagId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FlagId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&FlagId> for FlagId {
    fn from(id: &FlagId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for FlagId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A shared flag evaluation backend.
///
/// One backend instance serves every concurrent request, so implementations
/// must be safe to call from many tasks at once. Backends hold no memoization
/// state; caching is done per request by [`Flags`](super::Flags).
#[async_trait]
pub trait FlagBackend: Send + Sync {
    /// Evaluates one flag.
    async fn evaluate(&self, flag: &FlagId) -> Result<FlagValue, BackendError>;

    /// Every flag the backend knows about.
    async fn known_flags(&self) -> Result<BTreeSet<FlagId>, BackendError>;

    /// Evaluates several flags at once.
    ///
    /// The default issues one [`evaluate`](Self::evaluate) per flag and fails
    /// on the first error. Backends with a batch fetch should override it.
    async fn evaluate_many(
        &self,
        flags: &[FlagId],
    ) -> Result<HashMap<FlagId, FlagValue>, BackendError> {
        let mut values = HashMap::with_capacity(flags.len());
        for flag in flags {
            let value = self.evaluate(flag).await?;
            values.insert(flag.clone(), value);
        }
        Ok(values)
    }
}
