//! Drives one streaming generation at a time against the inference server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::stream::decoder::{FrameDecoder, ProtocolEvent};
use crate::stream::error::GenerateError;
use crate::types::GenerateRequest;

/// Owns the HTTP client and enforces at most one in-flight generation.
///
/// Two concurrent requests can never interleave bytes into one decoder: the
/// in-flight flag is claimed before the request is sent and released only
/// when the returned [`TokenStream`] is dropped.
pub struct StreamController {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl StreamController {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = super::build_http_client(connect_timeout)
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Start a generation and return the lazy token sequence.
    ///
    /// The overall request deadline starts here and covers both connection
    /// establishment and the whole stream.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, GenerateError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(GenerateError::busy());
        }
        let guard = InFlightGuard(self.in_flight.clone());

        let deadline = Instant::now() + self.request_timeout;
        let url = format!("{}/generate", self.base_url);
        info!(model = %request.model, url = %url, "Starting generation");

        let send = self.client.post(&url).json(request).send();
        let response = match timeout_at(deadline, send).await {
            Err(_) => return Err(GenerateError::timeout("deadline exceeded before response")),
            Ok(Err(e)) => return Err(GenerateError::from_transport(&e)),
            Ok(Ok(r)) => r,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GenerateError::protocol(format!(
                "server returned HTTP {}",
                status
            )));
        }

        Ok(TokenStream {
            response: Some(response),
            decoder: FrameDecoder::new(),
            pending: std::collections::VecDeque::new(),
            deadline,
            cancel,
            yielded_any: false,
            finished: false,
            _guard: guard,
        })
    }
}

/// Clears the controller's in-flight flag when the stream goes away,
/// whatever the exit path.
#[derive(Debug)]
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Lazily-produced sequence of text deltas for one generation.
///
/// Pull-based: each `next_token` call suspends on at most one body chunk,
/// so cancellation and the overall deadline are observed at every
/// chunk-await point. Fragments already yielded are never retracted.
#[derive(Debug)]
pub struct TokenStream {
    response: Option<reqwest::Response>,
    decoder: FrameDecoder,
    pending: std::collections::VecDeque<ProtocolEvent>,
    deadline: Instant,
    cancel: CancellationToken,
    yielded_any: bool,
    finished: bool,
    _guard: InFlightGuard,
}

impl TokenStream {
    /// Next text delta, in decoder order. `None` ends the sequence; after a
    /// terminal `Err` the sequence is also over.
    pub async fn next_token(&mut self) -> Option<Result<String, GenerateError>> {
        loop {
            while let Some(event) = self.pending.pop_front() {
                match event {
                    ProtocolEvent::TextFragment(text) => {
                        self.yielded_any = true;
                        return Some(Ok(text));
                    }
                    ProtocolEvent::StreamDone => {
                        self.close();
                        if self.yielded_any {
                            return None;
                        }
                        return Some(Err(GenerateError::empty_response()));
                    }
                    ProtocolEvent::StreamError(message) => {
                        self.close();
                        return Some(Err(GenerateError::protocol(format!(
                            "server reported: {}",
                            message
                        ))));
                    }
                }
            }

            if self.finished {
                return None;
            }
            let Some(response) = self.response.as_mut() else {
                return None;
            };

            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Generation cancelled by caller");
                    self.close();
                    return None;
                }
                res = timeout_at(self.deadline, response.chunk()) => match res {
                    Err(_) => {
                        self.close();
                        return Some(Err(GenerateError::timeout("generation deadline exceeded")));
                    }
                    Ok(Err(e)) => {
                        self.close();
                        return Some(Err(GenerateError::from_transport(&e)));
                    }
                    Ok(Ok(c)) => c,
                },
            };

            match chunk {
                Some(bytes) => {
                    self.pending.extend(self.decoder.push_chunk(&bytes));
                }
                None => {
                    // Source closed. Valid only after a terminal event,
                    // which would already be queued in `pending`.
                    self.close();
                    if self.decoder.is_finished() {
                        continue;
                    }
                    return Some(Err(GenerateError::protocol(
                        "stream ended without completion marker",
                    )));
                }
            }
        }
    }

    /// Stop consuming and release the connection immediately.
    fn close(&mut self) {
        self.finished = true;
        self.response = None;
    }
}
