//! The per-request memoizing flag handle.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::OnceCell;
use tracing::trace;

use super::{BackendError, FlagBackend, FlagError, FlagId, FlagValue};
use crate::memoizer::ScopePhase;

// One slot per flag; concurrent evaluations of the same flag share the
// backend query that initializes it. A failed query leaves the slot empty.
type Slot = Arc<OnceCell<FlagValue>>;

#[derive(Default)]
struct ScopeState {
    memoizing: bool,
    phase: ScopePhase,
    cache: HashMap<FlagId, Slot>,
}

impl ScopeState {
    fn toggle(&mut self, memoize: bool) {
        self.cache.clear();
        self.memoizing = memoize;
    }
}

struct Inner {
    backend: Arc<dyn FlagBackend>,
    state: Mutex<ScopeState>,
}

/// A request-scoped view of a shared [`FlagBackend`].
///
/// Each request gets its own `Flags` (see
/// [`FlagsMiddleware`](super::FlagsMiddleware)); clones share the same
/// memoization state and cache, so a handle can be moved into the task that
/// streams a response body. Nothing here is visible to other requests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use flagscope::flags::{Flags, FlagId, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = Arc::new(MemoryBackend::new());
/// backend.set("search", true);
///
/// let flags = Flags::new(backend.clone());
/// flags.set_memoizing(true);
///
/// let search = FlagId::from("search");
/// assert!(flags.is_enabled(&search).await.unwrap());
/// assert!(flags.is_enabled(&search).await.unwrap());
/// assert_eq!(backend.queries("search"), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct Flags {
    inner: Arc<Inner>,
}

impl Flags {
    /// Creates a handle with memoization off and an empty cache.
    pub fn new(backend: Arc<dyn FlagBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn FlagBackend> {
        &self.inner.backend
    }

    // The lock is never held across an await, so a poisoned state is still
    // consistent.
    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_memoizing(&self) -> bool {
        self.state().memoizing
    }

    /// Turns caching on or off. Either way the cache starts over empty.
    pub fn set_memoizing(&self, memoize: bool) {
        self.state().toggle(memoize);
        trace!(memoize, "flag memoization toggled");
    }

    /// Where this handle's scope guard currently stands.
    pub fn scope_phase(&self) -> ScopePhase {
        self.state().phase
    }

    /// Returns the cached value for `flag` without querying the backend.
    pub fn cached(&self, flag: &FlagId) -> Option<FlagValue> {
        self.state()
            .cache
            .get(flag)
            .and_then(|slot| slot.get().cloned())
    }

    /// Evaluates `flag`, serving it from the cache while memoizing.
    ///
    /// # Errors
    ///
    /// The backend's error, unchanged. Failures are never cached.
    pub async fn evaluate(&self, flag: &FlagId) -> Result<FlagValue, BackendError> {
        let Some(slot) = self.slot(flag) else {
            return self.inner.backend.evaluate(flag).await;
        };

        slot.get_or_try_init(|| {
            trace!(%flag, "flag cache miss");
            self.inner.backend.evaluate(flag)
        })
        .await
        .cloned()
    }

    /// Evaluates `flag` and reads the result as a boolean.
    ///
    /// Anything other than JSON `true` is treated as disabled.
    pub async fn is_enabled(&self, flag: &FlagId) -> Result<bool, BackendError> {
        Ok(self.evaluate(flag).await?.as_bool().unwrap_or(false))
    }

    // `None` while not memoizing.
    fn slot(&self, flag: &FlagId) -> Option<Slot> {
        let mut state = self.state();
        if !state.memoizing {
            return None;
        }
        Some(Arc::clone(state.cache.entry(flag.clone()).or_default()))
    }

    /// Stores a preloaded value. Returns `false` if memoization is off or the
    /// flag was already cached.
    pub(crate) fn store(&self, flag: FlagId, value: FlagValue) -> bool {
        let mut state = self.state();
        if !state.memoizing {
            return false;
        }
        state.cache.entry(flag).or_default().set(value).is_ok()
    }

    /// Idle/Done → Active. Returns the memoization state to restore later.
    pub(crate) fn enter_scope(&self) -> Result<bool, FlagError> {
        let mut state = self.state();
        if state.phase.is_open() {
            return Err(FlagError::ScopeReentry);
        }
        let prior = state.memoizing;
        state.phase = ScopePhase::Active;
        state.toggle(true);
        Ok(prior)
    }

    pub(crate) fn mark_finalizing(&self) {
        self.state().phase = ScopePhase::Finalizing;
    }

    /// → Done, restoring `prior` and discarding the scope's cache.
    pub(crate) fn exit_scope(&self, prior: bool) {
        let mut state = self.state();
        state.phase = ScopePhase::Done;
        state.toggle(prior);
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Flags")
            .field("memoizing", &state.memoizing)
            .field("phase", &state.phase)
            .field("cached", &state.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::MemoryBackend;
    use serde_json::json;

    fn setup() -> (Arc<MemoryBackend>, Flags) {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("x", true);
        backend.set("off", false);
        let flags = Flags::new(backend.clone());
        (backend, flags)
    }

    #[tokio::test]
    async fn passes_through_when_not_memoizing() {
        let (backend, flags) = setup();
        let x = FlagId::from("x");

        assert!(!flags.is_memoizing());
        flags.evaluate(&x).await.unwrap();
        flags.evaluate(&x).await.unwrap();
        assert_eq!(backend.queries("x"), 2);
        assert!(flags.cached(&x).is_none());
    }

    #[tokio::test]
    async fn caches_while_memoizing() {
        let (backend, flags) = setup();
        let x = FlagId::from("x");
        flags.set_memoizing(true);

        assert_eq!(flags.evaluate(&x).await.unwrap(), json!(true));
        assert_eq!(flags.evaluate(&x).await.unwrap(), json!(true));
        assert_eq!(backend.queries("x"), 1);
        assert_eq!(flags.cached(&x), Some(json!(true)));
    }

    #[tokio::test]
    async fn false_is_cached_like_any_answer() {
        let (backend, flags) = setup();
        let off = FlagId::from("off");
        flags.set_memoizing(true);

        assert!(!flags.is_enabled(&off).await.unwrap());
        assert!(!flags.is_enabled(&off).await.unwrap());
        assert_eq!(backend.queries("off"), 1);
    }

    #[tokio::test]
    async fn toggling_discards_the_cache() {
        let (backend, flags) = setup();
        let x = FlagId::from("x");

        flags.set_memoizing(true);
        flags.evaluate(&x).await.unwrap();
        flags.set_memoizing(true);
        assert!(flags.cached(&x).is_none());

        flags.evaluate(&x).await.unwrap();
        flags.set_memoizing(false);
        assert!(flags.cached(&x).is_none());
        assert_eq!(backend.queries("x"), 2);
    }

    #[tokio::test]
    async fn clones_share_one_scope() {
        let (backend, flags) = setup();
        let x = FlagId::from("x");
        let other = flags.clone();

        flags.set_memoizing(true);
        assert!(other.is_memoizing());
        other.evaluate(&x).await.unwrap();
        flags.evaluate(&x).await.unwrap();
        assert_eq!(backend.queries("x"), 1);
    }

    #[tokio::test]
    async fn separate_handles_never_share_a_cache() {
        let (backend, first) = setup();
        let second = Flags::new(backend.clone());
        let x = FlagId::from("x");

        first.set_memoizing(true);
        second.set_memoizing(true);
        first.evaluate(&x).await.unwrap();
        assert!(second.cached(&x).is_none());
        second.evaluate(&x).await.unwrap();
        assert_eq!(backend.queries("x"), 2);
    }

    #[test]
    fn scope_phases_follow_enter_and_exit() {
        let (_backend, flags) = setup();
        assert_eq!(flags.scope_phase(), ScopePhase::Idle);

        let prior = flags.enter_scope().unwrap();
        assert!(!prior);
        assert!(flags.is_memoizing());
        assert_eq!(flags.scope_phase(), ScopePhase::Active);
        assert!(matches!(flags.enter_scope(), Err(FlagError::ScopeReentry)));

        flags.mark_finalizing();
        assert!(matches!(flags.enter_scope(), Err(FlagError::ScopeReentry)));

        flags.exit_scope(prior);
        assert_eq!(flags.scope_phase(), ScopePhase::Done);
        assert!(!flags.is_memoizing());
        assert!(flags.enter_scope().is_ok());
    }

    #[test]
    fn store_respects_memoization_and_existing_entries() {
        let (_backend, flags) = setup();
        let x = FlagId::from("x");

        assert!(!flags.store(x.clone(), json!(true)));
        flags.set_memoizing(true);
        assert!(flags.store(x.clone(), json!(true)));
        assert!(!flags.store(x.clone(), json!(false)));
        assert_eq!(flags.cached(&x), Some(json!(true)));
    }
}
