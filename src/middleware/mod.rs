//! Middleware pipeline — composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling
//! handlers to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`Pipeline`] — ordered middleware stack plus a terminal endpoint.
//! - [`LoggerMiddleware`] — logs each request once its body is delivered.
//!
//! Middleware that needs to act when the response is *finished* rather than
//! when the handler returns registers a hook with
//! [`Response::on_body_close`](crate::Response::on_body_close).

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{Request, Response, StatusCode, context::Context};

/// Boxed, `Send` future resolving to a [`Response`].
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// Construct one with [`from_middleware`] or by wrapping a closure directly:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flagscope::{context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// The terminal handler at the end of a [`Pipeline`].
pub type Endpoint = Arc<dyn Fn(Context) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Option<Endpoint>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl Next {
    /// Invokes the next middleware, or the endpoint once the stack is exhausted.
    ///
    /// Without an endpoint an exhausted chain answers `500 Internal Server Error`.
    pub async fn run(mut self, ctx: Context) -> Response {
        if let Some(handler) = self.middlewares.get(self.index).cloned() {
            self.index += 1;
            return handler(ctx, self).await;
        }

        match self.endpoint {
            Some(endpoint) => endpoint(ctx).await,
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass
/// through, short-circuit, or decorate the downstream response.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; middleware is shared across
///   Tokio tasks.
/// - Implementations **should not** hold `&mut` references to shared state
///   across an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// An ordered middleware stack terminated by an endpoint.
///
/// Middleware runs in the order it was added; the first layer added is the
/// outermost.
///
/// # Examples
///
/// ```rust,no_run
/// use flagscope::{Response, StatusCode, middleware::{LoggerMiddleware, Pipeline}};
///
/// let pipeline = Pipeline::new()
///     .layer(LoggerMiddleware)
///     .endpoint(|_ctx| async { Response::new(StatusCode::Ok).body("hi") });
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Option<Endpoint>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware layer inside the ones already added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Sets the terminal handler.
    #[must_use]
    pub fn endpoint<H, F>(mut self, handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.endpoint = Some(Arc::new(move |ctx| -> ResponseFuture {
            Box::pin(handler(ctx))
        }));
        self
    }

    /// Number of middleware layers, excluding the endpoint.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through the stack.
    ///
    /// The returned future owns everything it needs, so it can be spawned.
    pub fn call(&self, request: Request) -> ResponseFuture {
        let next = Next {
            middlewares: self.middlewares.clone().into(),
            endpoint: self.endpoint.clone(),
            index: 0,
        };
        Box::pin(next.run(Context::new(request)))
    }
}

/// Logs each request's method, path, status, and duration.
///
/// The log line is emitted when the response body has been fully delivered
/// (or abandoned), so the duration covers streamed bodies too:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let mut response = next.run(ctx).await;

            let status = response.status().as_u16();
            debug!(%method, %path, status, elapsed = ?start.elapsed(), "handler returned");

            response.on_body_close(move || {
                info!("{} {} - {} ({:?})", method, path, status, start.elapsed());
            });
            response
        })
    }
}
