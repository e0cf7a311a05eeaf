use std::collections::BTreeSet;

use tracing::{debug, error};

use super::{FlagError, FlagId, Flags};

impl Flags {
    /// Warms the cache with every flag the backend knows about.
    ///
    /// Returns how many flags were newly cached.
    ///
    /// # Errors
    ///
    /// - [`FlagError::NotMemoizing`] — memoization is off; nothing is queried.
    /// - [`FlagError::Enumeration`] — the backend could not list its flags.
    /// - [`FlagError::Evaluation`] — the batch evaluation failed.
    pub async fn preload_all(&self) -> Result<usize, FlagError> {
        if !self.is_memoizing() {
            return Err(FlagError::NotMemoizing);
        }

        let known = self.backend().known_flags().await.map_err(|e| {
            error!(error = %e, "flag enumeration failed during preload");
            FlagError::Enumeration(e)
        })?;

        self.preload(known).await
    }

    /// Warms the cache with `names`.
    ///
    /// Duplicates are ignored, as are flags already cached in this scope. The
    /// rest go to the backend in one [`evaluate_many`] call. If that call fails
    /// nothing from it is cached.
    ///
    /// [`evaluate_many`]: super::FlagBackend::evaluate_many
    ///
    /// # Errors
    ///
    /// - [`FlagError::NotMemoizing`] — memoization is off; nothing is queried.
    /// - [`FlagError::Evaluation`] — the backend failed.
    pub async fn preload<I>(&self, names: I) -> Result<usize, FlagError>
    where
        I: IntoIterator,
        I::Item: Into<FlagId>,
    {
        if !self.is_memoizing() {
            return Err(FlagError::NotMemoizing);
        }

        let missing: Vec<FlagId> = names
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|flag| self.cached(flag).is_none())
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        debug!(count = missing.len(), "preloading flags");
        let values = self.backend().evaluate_many(&missing).await.map_err(|e| {
            error!(error = %e, "flag preload failed");
            FlagError::Evaluation(e)
        })?;

        Ok(values
            .into_iter()
            .map(|(flag, value)| self.store(flag, value))
            .filter(|stored| *stored)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeSet, HashMap},
        sync::Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::flags::{BackendError, FlagBackend, FlagValue, MemoryBackend};

    fn memoizing(backend: Arc<MemoryBackend>) -> Flags {
        let flags = Flags::new(backend);
        flags.set_memoizing(true);
        flags
    }

    #[tokio::test]
    async fn preload_all_warms_every_flag() {
        let backend = Arc::new(MemoryBackend::from_json(r#"{"x": true, "y": false, "z": 1}"#).unwrap());
        let flags = memoizing(backend.clone());

        assert_eq!(flags.preload_all().await.unwrap(), 3);
        for name in ["x", "y", "z"] {
            flags.evaluate(&FlagId::from(name)).await.unwrap();
            assert_eq!(backend.queries(name), 1);
        }
    }

    #[tokio::test]
    async fn preload_dedupes_and_skips_cached() {
        let backend = Arc::new(MemoryBackend::from_json(r#"{"x": true, "y": true}"#).unwrap());
        let flags = memoizing(backend.clone());

        flags.evaluate(&FlagId::from("x")).await.unwrap();
        assert_eq!(flags.preload(["x", "y", "y"]).await.unwrap(), 1);
        assert_eq!(backend.queries("x"), 1);
        assert_eq!(backend.queries("y"), 1);

        assert_eq!(flags.preload(["x", "y"]).await.unwrap(), 0);
        assert_eq!(backend.total_queries(), 2);
    }

    #[tokio::test]
    async fn batch_backends_get_a_single_call() {
        let backend = Arc::new(
            MemoryBackend::from_json(r#"{"a": true, "b": true, "c": true}"#)
                .unwrap()
                .with_batching(true),
        );
        let flags = memoizing(backend.clone());

        flags.preload_all().await.unwrap();
        assert_eq!(backend.batch_calls(), 1);
    }

    #[tokio::test]
    async fn preload_while_off_is_rejected() {
        let backend = Arc::new(MemoryBackend::from_json(r#"{"x": true}"#).unwrap());
        let flags = Flags::new(backend.clone());

        assert!(matches!(flags.preload(["x"]).await, Err(FlagError::NotMemoizing)));
        assert!(matches!(flags.preload_all().await, Err(FlagError::NotMemoizing)));
        assert_eq!(backend.total_queries(), 0);
    }

    /// Answers one flag at a time and relies on the default `evaluate_many`.
    #[derive(Default)]
    struct SingleLookup {
        queries: std::sync::Mutex<Vec<FlagId>>,
    }

    #[async_trait]
    impl FlagBackend for SingleLookup {
        async fn evaluate(&self, flag: &FlagId) -> Result<FlagValue, BackendError> {
            self.queries.lock().unwrap().push(flag.clone());
            Ok(FlagValue::Bool(flag.as_str() != "off"))
        }

        async fn known_flags(&self) -> Result<BTreeSet<FlagId>, BackendError> {
            Ok(["on", "off", "other"].into_iter().map(FlagId::from).collect())
        }
    }

    #[tokio::test]
    async fn default_preload_evaluates_each_flag_once() {
        let backend = Arc::new(SingleLookup::default());
        let flags = Flags::new(backend.clone());
        flags.set_memoizing(true);

        assert_eq!(flags.preload_all().await.unwrap(), 3);
        assert!(flags.is_enabled(&FlagId::from("on")).await.unwrap());
        assert!(!flags.is_enabled(&FlagId::from("off")).await.unwrap());

        let queried = backend.queries.lock().unwrap().clone();
        assert_eq!(queried, ["off", "on", "other"].map(FlagId::from));
    }

    struct Broken {
        enumerate: bool,
    }

    #[async_trait]
    impl FlagBackend for Broken {
        async fn evaluate(&self, _flag: &FlagId) -> Result<FlagValue, BackendError> {
            Err(BackendError::unavailable("store offline"))
        }

        async fn known_flags(&self) -> Result<BTreeSet<FlagId>, BackendError> {
            if self.enumerate {
                Ok(["a", "b"].into_iter().map(FlagId::from).collect())
            } else {
                Err(BackendError::unavailable("listing offline"))
            }
        }

        async fn evaluate_many(
            &self,
            _flags: &[FlagId],
        ) -> Result<HashMap<FlagId, FlagValue>, BackendError> {
            Err(BackendError::unavailable("batch offline"))
        }
    }

    #[tokio::test]
    async fn enumeration_failure_propagates() {
        let flags = Flags::new(Arc::new(Broken { enumerate: false }));
        flags.set_memoizing(true);
        assert!(matches!(flags.preload_all().await, Err(FlagError::Enumeration(_))));
    }

    #[tokio::test]
    async fn evaluation_failure_aborts_without_caching() {
        let flags = Flags::new(Arc::new(Broken { enumerate: true }));
        flags.set_memoizing(true);
        assert!(matches!(flags.preload_all().await, Err(FlagError::Evaluation(_))));
        assert!(flags.cached(&FlagId::from("a")).is_none());
    }
}
