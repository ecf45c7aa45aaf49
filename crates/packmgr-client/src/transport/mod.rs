//! HTTP transport backends.
//!
//! A [`Transport`] performs one [`ServiceRequest`] and hands back the raw
//! status, reason phrase, headers and a streaming body. It applies HTTP Basic
//! auth preemptively, honors the per-request timeout and never follows
//! redirects, but makes no protocol decisions: 401 detection, charset handling
//! and parsing all live in the client core so the backends can't drift apart.
//!
//! Backends:
//! - [`ReqwestTransport`]: async `reqwest` on the tokio runtime
//! - [`BlockingTransport`]: `reqwest::blocking` on the blocking pool
//! - [`UreqTransport`]: `ureq` on the blocking pool

#[cfg(feature = "blocking-http")]
mod blocking;
#[cfg(feature = "ureq-http")]
mod multipart;
#[cfg(feature = "async-http")]
mod reqwest_async;
#[cfg(feature = "ureq-http")]
mod ureq_agent;

#[cfg(feature = "blocking-http")]
pub use blocking::BlockingTransport;
#[cfg(feature = "async-http")]
pub use reqwest_async::ReqwestTransport;
#[cfg(feature = "ureq-http")]
pub use ureq_agent::UreqTransport;

use crate::config::{ClientConfig, Credentials};
use crate::request::ServiceRequest;
use crate::{PackmgrError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Response body, yielded chunk by chunk as it arrives.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Raw outcome of one HTTP exchange.
pub struct RawResponse {
    pub status: StatusCode,
    /// Reason phrase sent by the server, when the engine exposes a non-canonical one.
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    /// A response with a fully-buffered body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self::streaming(status, headers, stream::once(async move { Ok(body) }).boxed())
    }

    pub fn streaming(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            reason: None,
            headers,
            body,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty());
        self
    }

    /// Status text reported with failures: the server's phrase, else the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("Unknown Status")
    }

    /// Fail with [`PackmgrError::Unauthorized`] on a 401 challenge.
    pub fn authorized(self) -> Result<Self> {
        if self.status == StatusCode::UNAUTHORIZED {
            Err(PackmgrError::Unauthorized)
        } else {
            Ok(self)
        }
    }

    /// Drain the body into one buffer.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Capability implemented by every HTTP backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Perform one exchange with credentials attached to the first request.
    ///
    /// Resolves once the status line and headers are in; the body streams
    /// afterwards. Non-2xx and 3xx statuses are returned as responses, not
    /// errors. Only failures to complete the exchange (connect, DNS, timeout)
    /// are errors.
    async fn execute(&self, request: &ServiceRequest, credentials: &Credentials) -> Result<RawResponse>;
}

/// Timeouts a backend was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Option<Duration>,
}

impl Timeouts {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            request: config.request_timeout(),
        }
    }

    /// The deadline in force for `request`: its own override, else the
    /// configured request timeout, else the connect timeout.
    pub fn effective(&self, request: &ServiceRequest) -> Duration {
        request.timeout.or(self.request).unwrap_or(self.connect)
    }
}

/// Replace the placeholder duration of a timeout error.
fn with_timeout(err: PackmgrError, timeout: Duration) -> PackmgrError {
    match err {
        PackmgrError::Timeout(_) => PackmgrError::Timeout(timeout),
        other => other,
    }
}

/// Reason phrase hyper recorded for a non-canonical status line.
#[cfg(any(feature = "async-http", feature = "blocking-http"))]
fn reason_phrase(extensions: &http::Extensions) -> Option<String> {
    extensions
        .get::<hyper::ext::ReasonPhrase>()
        .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
}

#[cfg(any(feature = "blocking-http", feature = "ureq-http"))]
pub(crate) use blocking_pool::run_blocking;

#[cfg(any(feature = "blocking-http", feature = "ureq-http"))]
mod blocking_pool {
    use super::{with_timeout, BodyStream, RawResponse};
    use crate::{PackmgrError, Result};
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use http::{HeaderMap, StatusCode};
    use std::io::{ErrorKind, Read};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    const CHUNK_SIZE: usize = 8 * 1024;
    const CHANNEL_DEPTH: usize = 16;

    /// Status line and headers of a blocking exchange plus its body reader.
    pub(crate) struct BlockingHead {
        pub status: StatusCode,
        pub reason: Option<String>,
        pub headers: HeaderMap,
        pub body: Box<dyn Read + Send>,
    }

    fn is_timeout(err: &std::io::Error) -> bool {
        if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
            return true;
        }
        // reqwest::blocking wraps its own errors in io::Error when read through `Read`.
        #[cfg(feature = "blocking-http")]
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<reqwest::Error>()) {
            return inner.is_timeout();
        }
        false
    }

    fn read_error(err: std::io::Error, timeout: Duration) -> PackmgrError {
        if is_timeout(&err) {
            PackmgrError::Timeout(timeout)
        } else {
            with_timeout(PackmgrError::from(err), timeout)
        }
    }

    /// Run a blocking exchange on tokio's blocking pool.
    ///
    /// Resolves with the head as soon as it is available; the same blocking
    /// task then keeps reading the body and forwards it chunk by chunk.
    pub(crate) async fn run_blocking<F>(exchange: F, timeout: Duration) -> Result<RawResponse>
    where
        F: FnOnce() -> Result<BlockingHead> + Send + 'static,
    {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel::<Result<Bytes>>(CHANNEL_DEPTH);

        let task = tokio::task::spawn_blocking(move || {
            let mut reader = match exchange() {
                Ok(head) => {
                    let BlockingHead {
                        status,
                        reason,
                        headers,
                        body,
                    } = head;
                    if head_tx.send(Ok((status, reason, headers))).is_err() {
                        return;
                    }
                    body
                }
                Err(e) => {
                    let _ = head_tx.send(Err(e));
                    return;
                }
            };

            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        // The receiver is gone once the caller stops reading.
                        if body_tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = body_tx.blocking_send(Err(read_error(e, timeout)));
                        break;
                    }
                }
            }
        });

        let (status, reason, headers) = match head_rx.await {
            Ok(head) => head?,
            Err(_) => {
                let message = match task.await {
                    Err(e) => format!("Blocking transport task failed: {}", e),
                    Ok(()) => "Blocking transport task ended without a response".to_string(),
                };
                return Err(PackmgrError::Network {
                    message,
                    cause: None,
                });
            }
        };

        let body: BodyStream = stream::unfold(body_rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        Ok(RawResponse::streaming(status, headers, body).with_reason(reason))
    }
}

#[cfg(any(feature = "blocking-http", feature = "ureq-http"))]
pub(crate) use blocking_pool::BlockingHead;
