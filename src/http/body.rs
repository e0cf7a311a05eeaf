//! Response bodies: fixed buffers or lazily streamed chunks.
//!
//! A [`Body`] is consumed chunk by chunk by the transport. Middleware can
//! register close hooks with [`Body::on_close`]; every hook runs exactly once,
//! either right after the last chunk has been handed out or when the body is
//! dropped before that point (peer disconnect, write error, cancelled task).

use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Returned by [`BodySender::send`] once the receiving [`Body`] is gone.
#[derive(Debug, Error)]
#[error("response body receiver dropped")]
pub struct BodyClosed;

/// Producer half of a streamed [`Body`], created with [`Body::channel`].
///
/// Dropping every sender ends the stream.
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<Bytes>,
}

impl BodySender {
    /// Queues a chunk for delivery, waiting for buffer capacity if needed.
    ///
    /// # Errors
    ///
    /// Returns [`BodyClosed`] if the body has already been dropped by the
    /// transport (e.g. the client disconnected).
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), BodyClosed> {
        self.tx.send(chunk.into()).await.map_err(|_| BodyClosed)
    }
}

enum Kind {
    // `None` once the single chunk has been yielded.
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Bytes>),
}

/// An HTTP response body with exactly-once close hooks.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
/// use flagscope::http::Body;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let closed = Arc::new(AtomicBool::new(false));
/// let mut body = Body::full("hello");
/// let flag = Arc::clone(&closed);
/// body.on_close(move || flag.store(true, Ordering::SeqCst));
///
/// assert_eq!(body.next_chunk().await.as_deref(), Some(&b"hello"[..]));
/// assert!(!closed.load(Ordering::SeqCst));
/// assert!(body.next_chunk().await.is_none());
/// assert!(closed.load(Ordering::SeqCst));
/// # }
/// ```
pub struct Body {
    kind: Kind,
    hooks: Vec<CloseHook>,
}

impl Body {
    /// An empty, fixed-length body.
    pub fn empty() -> Self {
        Self::full(Bytes::new())
    }

    /// A fixed-length body delivered as a single chunk.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Full(Some(bytes.into())),
            hooks: Vec::new(),
        }
    }

    /// A streamed body fed through a bounded channel of `buffer` chunks.
    ///
    /// The transport writes streamed bodies with chunked transfer encoding.
    pub fn channel(buffer: usize) -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let body = Self {
            kind: Kind::Channel(rx),
            hooks: Vec::new(),
        };
        (BodySender { tx }, body)
    }

    /// Returns `true` for channel-backed bodies whose length is not known up front.
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, Kind::Channel(_))
    }

    /// Remaining length of a fixed body, `None` for streamed bodies.
    pub fn content_length(&self) -> Option<usize> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes.as_ref().map_or(0, Bytes::len)),
            Kind::Channel(_) => None,
        }
    }

    /// Registers a hook to run once the body is fully delivered or abandoned.
    ///
    /// Hooks run in registration order. A hook registered after the body has
    /// already closed is never run by the body itself; it is dropped with it.
    pub fn on_close<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Yields the next non-empty chunk, or `None` once the body is exhausted.
    ///
    /// Close hooks fire on the first `None`.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        let chunk = match &mut self.kind {
            Kind::Full(bytes) => bytes.take().filter(|b| !b.is_empty()),
            Kind::Channel(rx) => loop {
                match rx.recv().await {
                    Some(chunk) if chunk.is_empty() => continue,
                    other => break other,
                }
            },
        };

        if chunk.is_none() {
            self.close();
        }
        chunk
    }

    /// Drains the whole body into one buffer.
    pub async fn collect(mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.content_length().unwrap_or(0));
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }

    fn close(&mut self) {
        for hook in self.hooks.drain(..) {
            hook();
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("streaming", &self.is_streaming())
            .field("content_length", &self.content_length())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::full(s)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::full(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::full(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn counter(body: &mut Body) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        body.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn full_body_closes_after_last_chunk() {
        let mut body = Body::full("abc");
        let closed = counter(&mut body);

        assert_eq!(body.content_length(), Some(3));
        assert_eq!(body.next_chunk().await.unwrap(), Bytes::from("abc"));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert!(body.next_chunk().await.is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // Further polling and the final drop do not re-run hooks.
        assert!(body.next_chunk().await.is_none());
        drop(body);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_body_yields_nothing() {
        let mut body = Body::empty();
        let closed = counter(&mut body);
        assert!(body.next_chunk().await.is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_body_closes_when_senders_drop() {
        let (tx, mut body) = Body::channel(4);
        let closed = counter(&mut body);
        assert!(body.is_streaming());
        assert_eq!(body.content_length(), None);

        tokio::spawn(async move {
            tx.send("one").await.unwrap();
            tx.send("").await.unwrap();
            tx.send("two").await.unwrap();
        });

        assert_eq!(body.next_chunk().await.unwrap(), Bytes::from("one"));
        assert_eq!(body.next_chunk().await.unwrap(), Bytes::from("two"));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert!(body.next_chunk().await.is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_body_runs_hooks_once() {
        let (_tx, mut body) = Body::channel(1);
        let closed = counter(&mut body);
        drop(body);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_after_drop_fails() {
        let (tx, body) = Body::channel(1);
        drop(body);
        assert!(tx.send("late").await.is_err());
    }

    #[tokio::test]
    async fn collect_concatenates_chunks() {
        let (tx, body) = Body::channel(2);
        tokio::spawn(async move {
            for part in ["a", "b", "c"] {
                tx.send(part).await.unwrap();
            }
        });
        assert_eq!(body.collect().await, Bytes::from("abc"));
    }
}
