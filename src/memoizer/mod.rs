//! Request-scoped flag memoization.
//!
//! [`Memoizer`] wraps the downstream handler so that, for the duration of one
//! request, repeated evaluations of a flag through the request's
//! [`Flags`] handle hit the backend at most once:
//!
//! 1. The [`SkipPredicate`] may bypass everything for requests that must see
//!    live data.
//! 2. A [`ScopeGuard`] records the handle's memoization state and turns
//!    memoization on.
//! 3. Configured flags are preloaded.
//! 4. The handler runs.
//! 5. The guard is attached to the response body; the prior state comes back
//!    once the body is delivered or dropped. If the handler fails, panics or
//!    is cancelled before producing a response, restoration is immediate.
//!
//! The handle must already be in the request context, see
//! [`FlagsMiddleware`](crate::flags::FlagsMiddleware).
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flagscope::{Response, StatusCode, Server};
//! use flagscope::flags::{Flags, FlagsMiddleware, MemoryBackend};
//! use flagscope::memoizer::{Memoizer, MemoizerOptions};
//! use flagscope::middleware::Pipeline;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryBackend::from_json(r#"{"search": true}"#)?);
//! let options = MemoizerOptions::new()
//!     .preload(["search"])
//!     .skip_when(|req| req.headers().get("bypass") == Some("1"));
//!
//! let pipeline = Pipeline::new()
//!     .layer(FlagsMiddleware::new(backend))
//!     .layer(Memoizer::new(options))
//!     .endpoint(|ctx| async move {
//!         let flags = ctx.extensions().get::<Flags>().cloned();
//!         let on = match flags {
//!             Some(flags) => flags.is_enabled(&"search".into()).await.unwrap_or(false),
//!             None => false,
//!         };
//!         Response::new(StatusCode::Ok).body(on.to_string())
//!     });
//!
//! Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
//! # Ok(())
//! # }
//! ```

mod guard;
mod options;

pub use guard::{ScopeGuard, ScopePhase};
pub use options::{MemoizerOptions, SkipPredicate};

use std::{future::Future, sync::Arc};

use tracing::{debug, error, warn};

use crate::{
    Response, StatusCode,
    context::Context,
    flags::{FlagError, Flags},
    middleware::{Middleware, Next, ResponseFuture},
};

/// Middleware that memoizes flag evaluations for the lifetime of a request.
#[derive(Debug, Clone, Default)]
pub struct Memoizer {
    options: Arc<MemoizerOptions>,
}

impl Memoizer {
    pub fn new(options: MemoizerOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &MemoizerOptions {
        &self.options
    }

    /// Runs `handler` inside a memoization scope.
    ///
    /// Errors from `handler` are returned unchanged after the prior state has
    /// been restored. A nested memoizer on an already guarded request logs a
    /// warning and runs `handler` under the outer scope.
    ///
    /// # Errors
    ///
    /// - [`FlagError::MissingFlags`] — no [`Flags`] handle in `ctx`.
    /// - [`FlagError::Enumeration`] / [`FlagError::Evaluation`] — preloading
    ///   failed; `handler` is not run.
    /// - whatever `handler` returns.
    pub async fn call<H, Fut, E>(&self, ctx: Context, handler: H) -> Result<Response, E>
    where
        H: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<Response, E>>,
        E: From<FlagError>,
    {
        if self.options.should_skip(ctx.request()) {
            debug!(path = %ctx.request().path(), "flag memoization skipped");
            return handler(ctx).await;
        }

        let flags = ctx
            .extensions()
            .get::<Flags>()
            .cloned()
            .ok_or(FlagError::MissingFlags)?;

        let guard = match ScopeGuard::enter(&flags) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "nested flag memoizer; outer scope stays in charge");
                return handler(ctx).await;
            }
        };

        self.warm(&flags).await?;

        let mut response = handler(ctx).await?;
        guard.attach(&mut response);
        Ok(response)
    }

    async fn warm(&self, flags: &Flags) -> Result<(), FlagError> {
        if self.options.preloads_all() {
            flags.preload_all().await?;
        }
        let names = self.options.preload_names();
        if !names.is_empty() {
            flags.preload(names).await?;
        }
        Ok(())
    }
}

impl Middleware for Memoizer {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        let memoizer = self.clone();
        Box::pin(async move {
            let result = memoizer
                .call(ctx, |ctx| async move { Ok::<_, FlagError>(next.run(ctx).await) })
                .await;

            result.unwrap_or_else(|e| {
                error!(error = %e, "flag memoizer failed before the handler ran");
                let status = match e {
                    FlagError::MissingFlags => StatusCode::InternalServerError,
                    _ => StatusCode::ServiceUnavailable,
                };
                Response::new(status).body(status.canonical_reason())
            })
        })
    }
}
