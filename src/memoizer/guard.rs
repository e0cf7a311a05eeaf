//! Scope guard that restores a request's prior memoization state exactly once.

use tracing::debug;

use crate::{
    Response,
    flags::{FlagError, Flags},
};

/// Lifecycle of a request's memoization scope.
///
/// `Idle → Active → Finalizing → Done`. A handle that reached `Done` may host
/// a new scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePhase {
    /// No scope has been entered on this handle.
    #[default]
    Idle,
    /// Memoization is forced on; the handler is running.
    Active,
    /// The handler returned; waiting for the response body to close.
    Finalizing,
    /// The prior state has been restored and the scope's cache discarded.
    Done,
}

impl ScopePhase {
    /// `true` while a guard owns the handle.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Finalizing)
    }
}

/// Forces memoization on for one request and restores the prior state when
/// dropped.
///
/// Restoration lives in [`Drop`], so it runs on every exit path: normal
/// completion, an early `?` return, a panic unwinding through the handler,
/// or the request future being cancelled. [`attach`](Self::attach) moves the
/// guard into the response body so restoration waits until the body has been
/// delivered or abandoned instead of firing when the handler returns.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use flagscope::{Response, StatusCode};
/// use flagscope::flags::{Flags, MemoryBackend};
/// use flagscope::memoizer::{ScopeGuard, ScopePhase};
///
/// let flags = Flags::new(Arc::new(MemoryBackend::new()));
/// let guard = ScopeGuard::enter(&flags).unwrap();
/// assert!(flags.is_memoizing());
///
/// let mut response = Response::new(StatusCode::Ok).body("streamed later");
/// guard.attach(&mut response);
/// assert_eq!(flags.scope_phase(), ScopePhase::Finalizing);
///
/// drop(response);
/// assert_eq!(flags.scope_phase(), ScopePhase::Done);
/// assert!(!flags.is_memoizing());
/// ```
#[derive(Debug)]
pub struct ScopeGuard {
    flags: Flags,
    prior: bool,
}

impl ScopeGuard {
    /// Captures the current memoization state and turns memoization on.
    ///
    /// The cache starts empty.
    ///
    /// # Errors
    ///
    /// [`FlagError::ScopeReentry`] if another guard is already open on `flags`.
    pub fn enter(flags: &Flags) -> Result<Self, FlagError> {
        let prior = flags.enter_scope()?;
        debug!(prior, "flag memoization scope entered");
        Ok(Self {
            flags: flags.clone(),
            prior,
        })
    }

    /// The memoization state that will be restored.
    pub fn prior(&self) -> bool {
        self.prior
    }

    /// Defers restoration until `response`'s body closes.
    pub fn attach(self, response: &mut Response) {
        self.flags.mark_finalizing();
        response.on_body_close(move || drop(self));
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.flags.exit_scope(self.prior);
        debug!(prior = self.prior, "flag memoization scope restored");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        StatusCode,
        flags::{FlagId, MemoryBackend},
        http::Body,
    };

    fn flags() -> Flags {
        Flags::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn restores_prior_on_drop() {
        for prior in [false, true] {
            let flags = flags();
            flags.set_memoizing(prior);

            let guard = ScopeGuard::enter(&flags).unwrap();
            assert_eq!(guard.prior(), prior);
            assert!(flags.is_memoizing());
            assert_eq!(flags.scope_phase(), ScopePhase::Active);

            drop(guard);
            assert_eq!(flags.is_memoizing(), prior);
            assert_eq!(flags.scope_phase(), ScopePhase::Done);
        }
    }

    #[test]
    fn nested_guard_is_rejected() {
        let flags = flags();
        let _outer = ScopeGuard::enter(&flags).unwrap();
        assert!(matches!(
            ScopeGuard::enter(&flags),
            Err(FlagError::ScopeReentry)
        ));
        assert!(flags.is_memoizing());
    }

    #[test]
    fn handle_can_host_a_second_scope_after_done() {
        let flags = flags();
        drop(ScopeGuard::enter(&flags).unwrap());
        let again = ScopeGuard::enter(&flags).unwrap();
        assert!(!again.prior());
    }

    #[tokio::test]
    async fn attached_guard_waits_for_last_chunk() {
        let flags = flags();
        let (tx, body) = Body::channel(1);
        let mut response = Response::new(StatusCode::Ok).with_body(body);

        ScopeGuard::enter(&flags).unwrap().attach(&mut response);
        assert_eq!(flags.scope_phase(), ScopePhase::Finalizing);

        let mut body = response.into_body();
        tx.send("chunk").await.unwrap();
        assert!(body.next_chunk().await.is_some());
        assert!(flags.is_memoizing());

        drop(tx);
        assert!(body.next_chunk().await.is_none());
        assert!(!flags.is_memoizing());
        assert_eq!(flags.scope_phase(), ScopePhase::Done);
    }

    #[tokio::test]
    async fn restoration_discards_the_scope_cache() {
        let flags = flags();
        let x = FlagId::from("x");
        flags.set_memoizing(true);

        let guard = ScopeGuard::enter(&flags).unwrap();
        flags.evaluate(&x).await.unwrap();
        assert!(flags.cached(&x).is_some());
        drop(guard);

        assert!(flags.is_memoizing());
        assert!(flags.cached(&x).is_none());
    }
}
