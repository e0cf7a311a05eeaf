//! Feature flag evaluation: the backend contract and the per-request
//! memoizing handle.
//!
//! - [`FlagBackend`] — the shared, concurrency-safe evaluation backend.
//! - [`Flags`] — a request-scoped handle over a backend that can memoize
//!   results for the lifetime of one request.
//! - [`FlagsMiddleware`] — installs a fresh [`Flags`] on every request.
//! - [`MemoryBackend`] — in-process backend with query counters.

mod backend;
mod error;
mod evaluator;
mod memory;
mod preload;
mod setup;

pub use backend::{FlagBackend, FlagId, FlagValue};
pub use error::{BackendError, FlagError};
pub use evaluator::Flags;
pub use memory::MemoryBackend;
pub use setup::FlagsMiddleware;
