//! # flagscope
//!
//! Request-scoped feature flag memoization for an async HTTP/1.1 server.
//!
//! A flag backend is shared by every request, but within one request each
//! flag should be evaluated once. [`memoizer::Memoizer`] turns memoization on
//! for the request's own [`flags::Flags`] handle, optionally preloads flags,
//! runs the handler, and restores the previous state when the response body
//! has been delivered, which may be long after the handler returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flagscope::{Response, Server, StatusCode};
//! use flagscope::flags::{Flags, FlagsMiddleware, MemoryBackend};
//! use flagscope::memoizer::{Memoizer, MemoizerOptions};
//! use flagscope::middleware::{LoggerMiddleware, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::from_json(r#"{"search": true}"#)?);
//!
//!     let pipeline = Pipeline::new()
//!         .layer(LoggerMiddleware)
//!         .layer(FlagsMiddleware::new(backend))
//!         .layer(Memoizer::new(MemoizerOptions::new().preload_all(true)))
//!         .endpoint(|ctx| async move {
//!             let Some(flags) = ctx.extensions().get::<Flags>() else {
//!                 return Response::new(StatusCode::InternalServerError);
//!             };
//!             let search = flags.is_enabled(&"search".into()).await.unwrap_or(false);
//!             Response::new(StatusCode::Ok).body(format!("search: {search}"))
//!         });
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod flags;
pub mod http;
pub mod memoizer;
pub mod middleware;
pub mod server;

pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
