use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, instrument, warn};

use parley_core::{Fragment, StreamRequest, TransportError};

use crate::frame::FrameDecoder;
use crate::rendezvous::{rendezvous, RendezvousReceiver, RendezvousSender};

/// Response header carrying the tag the backend actually routed the request to.
pub const TAG_HEADER: &str = "Tag";

const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub base_url: String,
    pub path: String,
    pub method: Method,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ml-api:8000".into(),
            path: "/message_stream".into(),
            method: Method::POST,
        }
    }
}

/// An opened stream plus the routing tag from its response headers.
pub struct OpenedStream {
    pub fragments: FragmentStream,
    /// Empty when the backend sent no tag header.
    pub tag: String,
}

/// Ordered, lazily produced fragments of one outbound call.
///
/// Backed by a producer task; dropping the stream cancels it and closes the
/// upstream connection.
pub struct FragmentStream {
    rx: RendezvousReceiver<Fragment>,
    _cancel: DropGuard,
}

impl FragmentStream {
    pub async fn next(&mut self) -> Option<Fragment> {
        self.rx.recv().await
    }

    /// Decode a raw byte stream on a spawned task.
    pub fn from_byte_stream<S, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = rendezvous();
        let token = CancellationToken::new();
        tokio::spawn(decode_task(bytes, tx, token.clone()));
        Self {
            rx,
            _cancel: token.drop_guard(),
        }
    }

    /// Re-emit this stream's fragments until `deadline`, then close.
    ///
    /// On expiry the inner stream is dropped, which cancels its producer.
    pub fn with_deadline(self, deadline: Instant) -> Self {
        let (tx, rx) = rendezvous();
        let token = CancellationToken::new();
        tokio::spawn(deadline_task(self, tx, deadline, token.clone()));
        Self {
            rx,
            _cancel: token.drop_guard(),
        }
    }

    /// Drain the remaining fragments.
    pub async fn collect(mut self) -> Vec<Fragment> {
        let mut out = Vec::new();
        while let Some(f) = self.next().await {
            out.push(f);
        }
        out
    }
}

async fn decode_task<S, E>(bytes: S, mut tx: RendezvousSender<Fragment>, cancel: CancellationToken)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let mut bytes = Box::pin(bytes);
    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("consumer dropped, closing upstream");
                return;
            }
            chunk = bytes.next() => chunk,
        };
        let (fragments, ended) = match chunk {
            Some(Ok(buf)) => (decoder.push(&buf), false),
            Some(Err(e)) => {
                warn!(error = %e, "upstream read failed");
                (Vec::new(), true)
            }
            None => (decoder.finish(), true),
        };
        for fragment in fragments.into_iter().filter(Fragment::is_relayable) {
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(fragment) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        if ended || decoder.is_finished() {
            return;
        }
    }
}

async fn deadline_task(
    mut inner: FragmentStream,
    mut tx: RendezvousSender<Fragment>,
    deadline: Instant,
    cancel: CancellationToken,
) {
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut expiry => {
                warn!("stream deadline reached while waiting for upstream");
                break;
            }
            next = inner.next() => next,
        };
        let Some(fragment) = next else { break };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut expiry => {
                warn!("stream deadline reached while waiting for consumer");
                break;
            }
            sent = tx.send(fragment) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(inner);
}

/// Outbound seam used by the orchestrator.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<OpenedStream, TransportError>;

    /// Like [`open`](Self::open), but the fragment sequence closes once
    /// `timeout` has elapsed since the response headers arrived.
    async fn open_with_timeout(
        &self,
        request: &StreamRequest,
        timeout: Duration,
    ) -> Result<OpenedStream, TransportError> {
        let opened = self.open(request).await?;
        Ok(OpenedStream {
            fragments: opened.fragments.with_deadline(Instant::now() + timeout),
            tag: opened.tag,
        })
    }
}

/// Liveness check against a backend's `/ping` endpoint.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> Result<(), TransportError>;
}

/// HTTP client for the model backend's streaming endpoint.
#[derive(Clone)]
pub struct TransportClient {
    client: Client,
    config: TransportConfig,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| TransportError::InvalidConfig(format!("{}: {e}", config.base_url)))?;
        // No overall timeout: streams stay open as long as the backend writes.
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ModelTransport for TransportClient {
    #[instrument(skip(self, request), fields(chat_id = %request.chat_id, tag = %request.tag))]
    async fn open(&self, request: &StreamRequest) -> Result<OpenedStream, TransportError> {
        let body = serde_json::to_vec(request).map_err(|e| TransportError::Serialize(e.to_string()))?;

        let resp = self
            .client
            .request(self.config.method.clone(), self.url(&self.config.path))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = if status == StatusCode::UNPROCESSABLE_ENTITY {
                let body = resp.text().await.unwrap_or_default();
                error!(status = status.as_u16(), body = %body, "backend rejected request");
                body
            } else {
                warn!(status = status.as_u16(), "backend returned non-success status");
                String::new()
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tag = resp
            .headers()
            .get(TAG_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!(response_tag = %tag, "stream opened");

        Ok(OpenedStream {
            fragments: FragmentStream::from_byte_stream(resp.bytes_stream()),
            tag,
        })
    }
}

async fn ping_url(client: &Client, url: &str) -> Result<(), TransportError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if resp.status() != StatusCode::OK {
        return Err(TransportError::Status {
            status: resp.status().as_u16(),
            body: String::new(),
        });
    }
    Ok(())
}

#[async_trait]
impl HealthCheck for TransportClient {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), TransportError> {
        ping_url(&self.client, &self.url("/ping")).await
    }
}

/// Ping-only client for a backend that is never streamed from.
#[derive(Clone)]
pub struct PingClient {
    client: Client,
    url: String,
}

impl PingClient {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        reqwest::Url::parse(base_url).map_err(|e| TransportError::InvalidConfig(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/ping", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl HealthCheck for PingClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn ping(&self) -> Result<(), TransportError> {
        ping_url(&self.client, &self.url).await
    }
}
