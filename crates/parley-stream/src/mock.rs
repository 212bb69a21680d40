use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use parley_core::{Fragment, StreamRequest, TransportError};

use crate::transport::{FragmentStream, HealthCheck, ModelTransport, OpenedStream};

/// Pre-programmed responses for deterministic testing without a backend.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Encode the fragments as `data:` lines and stream them.
    Fragments {
        fragments: Vec<Fragment>,
        tag: String,
        /// Keep the connection open after the last fragment.
        hang: bool,
    },
    /// Stream these raw chunks through the frame decoder.
    Raw { chunks: Vec<Bytes>, tag: String },
    /// Fail the `open` call itself.
    Error(TransportError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn fragments(fragments: Vec<Fragment>, tag: impl Into<String>) -> Self {
        Self::Fragments {
            fragments,
            tag: tag.into(),
            hang: false,
        }
    }

    /// Deltas for each string, then an empty terminal fragment.
    pub fn text(deltas: &[&str], tag: impl Into<String>) -> Self {
        let mut fragments: Vec<Fragment> = deltas.iter().map(|d| Fragment::delta(*d)).collect();
        fragments.push(Fragment::terminal(""));
        Self::fragments(fragments, tag)
    }

    /// Stream the fragments and then stall without ever closing.
    pub fn hanging(fragments: Vec<Fragment>, tag: impl Into<String>) -> Self {
        Self::Fragments {
            fragments,
            tag: tag.into(),
            hang: true,
        }
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock transport that returns pre-programmed responses in order and records
/// every request it was asked to open.
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<StreamRequest>>,
    reachable: AtomicBool,
    call_count: AtomicUsize,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A transport whose backend reports as down.
    pub fn unreachable() -> Self {
        let mock = Self::new(Vec::new());
        mock.set_reachable(false);
        mock
    }

    /// Flip what later pings report.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }
}

fn encode(fragment: &Fragment) -> Bytes {
    let json = serde_json::to_string(fragment).unwrap_or_default();
    Bytes::from(format!("data: {json}\n\n"))
}

#[async_trait]
impl ModelTransport for MockTransport {
    async fn open(&self, request: &StreamRequest) -> Result<OpenedStream, TransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let Some(mut current) = next else {
            return Err(TransportError::InvalidConfig(format!(
                "MockTransport: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Fragments {
                    fragments,
                    tag,
                    hang,
                } => {
                    let chunks: Vec<Result<Bytes, std::io::Error>> =
                        fragments.iter().map(|f| Ok(encode(f))).collect();
                    let body = futures::stream::iter(chunks);
                    let fragments = if hang {
                        FragmentStream::from_byte_stream(body.chain(futures::stream::pending()))
                    } else {
                        FragmentStream::from_byte_stream(body)
                    };
                    return Ok(OpenedStream { fragments, tag });
                }
                MockResponse::Raw { chunks, tag } => {
                    let body = futures::stream::iter(
                        chunks.into_iter().map(Ok::<_, std::io::Error>),
                    );
                    return Ok(OpenedStream {
                        fragments: FragmentStream::from_byte_stream(body),
                        tag,
                    });
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl HealthCheck for MockTransport {
    async fn ping(&self) -> Result<(), TransportError> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(TransportError::Network("mock backend unreachable".into()))
        }
    }
}
