use std::sync::Arc;

use crate::{
    context::Context,
    middleware::{Middleware, Next, ResponseFuture},
};

use super::{FlagBackend, Flags};

/// Installs a fresh [`Flags`] handle on every request.
///
/// Each request gets its own memoization state and cache over the shared
/// backend. Must run before [`Memoizer`](crate::memoizer::Memoizer). A handle
/// already present in the context (e.g. from an outer layer) is left alone.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flagscope::flags::{FlagsMiddleware, MemoryBackend};
///
/// let setup = FlagsMiddleware::new(Arc::new(MemoryBackend::new()));
/// ```
pub struct FlagsMiddleware {
    backend: Arc<dyn FlagBackend>,
    memoize: bool,
}

impl FlagsMiddleware {
    pub fn new(backend: Arc<dyn FlagBackend>) -> Self {
        Self {
            backend,
            memoize: false,
        }
    }

    /// Whether new handles start with memoization already on.
    #[must_use]
    pub fn memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }
}

impl Middleware for FlagsMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        if !ctx.extensions().contains::<Flags>() {
            let flags = Flags::new(Arc::clone(&self.backend));
            if self.memoize {
                flags.set_memoizing(true);
            }
            ctx.extensions_mut().insert(flags);
        }
        Box::pin(next.run(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Request, Response, StatusCode, middleware::Pipeline};

    fn report(ctx: &Context) -> Response {
        match ctx.extensions().get::<Flags>() {
            Some(flags) => Response::new(StatusCode::Ok).body(flags.is_memoizing().to_string()),
            None => Response::new(StatusCode::InternalServerError),
        }
    }

    #[tokio::test]
    async fn installs_a_handle() {
        let pipeline = Pipeline::new()
            .layer(FlagsMiddleware::new(Arc::new(crate::flags::MemoryBackend::new())))
            .endpoint(|ctx| async move { report(&ctx) });

        let response = pipeline.call(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.into_body().collect().await, "false");
    }

    #[tokio::test]
    async fn can_start_memoizing() {
        let pipeline = Pipeline::new()
            .layer(FlagsMiddleware::new(Arc::new(crate::flags::MemoryBackend::new())).memoize(true))
            .endpoint(|ctx| async move { report(&ctx) });

        let response = pipeline.call(Request::new(Method::Get, "/")).await;
        assert_eq!(response.into_body().collect().await, "true");
    }
}
