//! In-process flag backend.
//!
//! Keeps flag values in memory and counts every query it answers, which makes
//! it the backend of choice for tests, demos, and local development.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use super::{BackendError, FlagBackend, FlagId, FlagValue};

/// A concurrency-safe, in-memory [`FlagBackend`].
///
/// Unknown flags evaluate to `false`. With [`with_batching`](Self::with_batching)
/// enabled, [`evaluate_many`](FlagBackend::evaluate_many) is answered as a
/// single batch call, counted by [`batch_calls`](Self::batch_calls).
///
/// # Examples
///
/// ```
/// use flagscope::flags::MemoryBackend;
///
/// let backend = MemoryBackend::from_json(r#"{"search": true, "beta": false}"#).unwrap();
/// assert_eq!(backend.len(), 2);
/// assert_eq!(backend.total_queries(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    flags: RwLock<BTreeMap<FlagId, FlagValue>>,
    queries: RwLock<HashMap<FlagId, usize>>,
    batches: AtomicUsize,
    batching: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a backend from a JSON object of `flag name → value`.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `json` is not an object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let flags: BTreeMap<FlagId, FlagValue> = serde_json::from_str(json)?;
        Ok(Self {
            flags: RwLock::new(flags),
            ..Self::default()
        })
    }

    /// Answer [`FlagBackend::evaluate_many`] as one batch call.
    #[must_use]
    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn set(&self, flag: impl Into<FlagId>, value: impl Into<FlagValue>) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flag.into(), value.into());
    }

    pub fn remove(&self, flag: &str) -> Option<FlagValue> {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(flag)
    }

    pub fn len(&self) -> usize {
        self.flags.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `flag` has been queried, individually or in a batch.
    pub fn queries(&self, flag: &str) -> usize {
        self.queries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flag)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_queries(&self) -> usize {
        self.queries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Number of batched [`evaluate_many`](FlagBackend::evaluate_many) calls.
    pub fn batch_calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn lookup(&self, flag: &FlagId) -> FlagValue {
        *self
            .queries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(flag.clone())
            .or_default() += 1;

        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flag)
            .cloned()
            .unwrap_or(FlagValue::Bool(false))
    }
}

#[async_trait]
impl FlagBackend for MemoryBackend {
    async fn evaluate(&self, flag: &FlagId) -> Result<FlagValue, BackendError> {
        Ok(self.lookup(flag))
    }

    async fn known_flags(&self) -> Result<BTreeSet<FlagId>, BackendError> {
        Ok(self
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn evaluate_many(
        &self,
        flags: &[FlagId],
    ) -> Result<HashMap<FlagId, FlagValue>, BackendError> {
        if self.batching {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(flags
            .iter()
            .map(|flag| (flag.clone(), self.lookup(flag)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_flags_evaluate_to_false() {
        let backend = MemoryBackend::new();
        let value = backend.evaluate(&FlagId::from("missing")).await.unwrap();
        assert_eq!(value, json!(false));
        assert_eq!(backend.queries("missing"), 1);
    }

    #[tokio::test]
    async fn known_flags_lists_every_key() {
        let backend = MemoryBackend::from_json(r#"{"b": true, "a": 0.5}"#).unwrap();
        let known: Vec<_> = backend.known_flags().await.unwrap().into_iter().collect();
        assert_eq!(known, vec![FlagId::from("a"), FlagId::from("b")]);
    }

    #[tokio::test]
    async fn batching_counts_one_call() {
        let backend = MemoryBackend::from_json(r#"{"a": true, "b": false}"#)
            .unwrap()
            .with_batching(true);
        let values = backend
            .evaluate_many(&[FlagId::from("a"), FlagId::from("b")])
            .await
            .unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values[&FlagId::from("a")], json!(true));
        assert_eq!(backend.batch_calls(), 1);
        assert_eq!(backend.total_queries(), 2);
    }

    #[test]
    fn set_and_remove() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());
        backend.set("a", true);
        backend.set("a", json!({"percentage": 25}));
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.remove("a"), Some(json!({"percentage": 25})));
        assert!(backend.is_empty());
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(MemoryBackend::from_json("[1, 2]").is_err());
    }
}
