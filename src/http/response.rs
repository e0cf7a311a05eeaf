//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and writing
//! them to any [`AsyncWrite`] sink. Fixed bodies are sent with
//! `Content-Length`; streamed bodies use chunked transfer encoding.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Body, Headers, StatusCode};

/// An HTTP/1.1 response, ready to be written to a connection.
///
/// # Examples
///
/// ```
/// use flagscope::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let mut out = Vec::new();
/// response.write_to(&mut out).await?;
/// let text = String::from_utf8(out).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for middleware decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a fixed body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::full(body.into());
        self
    }

    /// Replaces the body, e.g. with a streamed [`Body::channel`].
    ///
    /// Close hooks registered on the previous body fire when it is dropped here.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Registers a hook that runs once the body is fully delivered or abandoned.
    ///
    /// See [`Body::on_close`].
    pub fn on_body_close<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.body.on_close(hook);
    }

    /// Consumes the response and returns its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Writes the status line, headers and body to `writer`.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if a fixed body is non-empty
    ///   and no `Content-Type` header was set.
    /// - `Content-Length: <n>` for fixed bodies, `Transfer-Encoding: chunked`
    ///   for streamed ones.
    /// - `Connection: keep-alive` or `Connection: close`.
    ///
    /// The body's close hooks run once its last chunk has been written, or when
    /// the body is dropped because a write failed.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from `writer`.
    pub async fn write_to<W>(mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.head()).await?;

        let chunked = self.body.is_streaming();
        while let Some(chunk) = self.body.next_chunk().await {
            if chunked {
                let mut frame = BytesMut::with_capacity(chunk.len() + 12);
                frame.put(format!("{:X}\r\n", chunk.len()).as_bytes());
                frame.put(chunk);
                frame.put(&b"\r\n"[..]);
                writer.write_all(&frame).await?;
            } else {
                writer.write_all(&chunk).await?;
            }
        }
        if chunked {
            writer.write_all(b"0\r\n\r\n").await?;
        }

        writer.flush().await
    }

    // Status line and header block, terminated by the blank line.
    fn head(&mut self) -> BytesMut {
        let content_length = self.body.content_length();

        if content_length.is_some_and(|n| n > 0) && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        match content_length {
            Some(n) => buf.put(format!("Content-Length: {n}\r\n").as_bytes()),
            None => buf.put(&b"Transfer-Encoding: chunked\r\n"[..]),
        }

        buf.put(&b"\r\n"[..]);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
