//! Perplexity backend implementation.
//!
//! Talks to the OpenAI-compatible `chat/completions` endpoint with
//! `stream: true` and decodes the server-sent events into fragments.

use super::{CompletionProvider, FragmentStream};
use crate::error::{ConfigError, ProviderError};
use crate::protocol::{ChatMessage, CompletionRequestEnvelope, ResponseFragment};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before the single retry after a rate-limit response.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Perplexity client for the Sonar models.
pub struct PerplexityClient {
    base_url: String,
    api_key: String,
    client: Client,
    rate_limit_backoff: Duration,
}

impl PerplexityClient {
    /// Create a new client. No request is made until `stream` is called.
    pub fn new(base_url: &str, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(concat!("smart-term/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
        })
    }

    /// Override the rate-limit backoff.
    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Send the request, retrying exactly once on HTTP 429.
    ///
    /// `timeout_seconds` bounds the wait for the response headers. The body
    /// has its own idle limit in `decode_events`.
    async fn send(
        &self,
        request: &PerplexityRequest<'_>,
        timeout_seconds: u64,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint();
        let mut rate_limited_once = false;

        loop {
            let pending = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("accept", "text/event-stream")
                .json(request)
                .send();
            let response = tokio::time::timeout(Duration::from_secs(timeout_seconds), pending)
                .await
                .map_err(|_| ProviderError::Timeout {
                    seconds: timeout_seconds,
                })?
                .map_err(|e| map_transport_error(e, timeout_seconds))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if rate_limited_once {
                    return Err(ProviderError::RateLimited);
                }
                rate_limited_once = true;
                warn!(
                    "Rate limited by Perplexity, retrying in {:?}",
                    self.rate_limit_backoff
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthRejected {
                    status: status.as_u16(),
                },
                _ => ProviderError::Network {
                    status: Some(status.as_u16()),
                    message: error_message(&body, status),
                },
            });
        }
    }
}

#[async_trait]
impl CompletionProvider for PerplexityClient {
    fn name(&self) -> &'static str {
        "perplexity"
    }

    async fn stream(
        &self,
        envelope: CompletionRequestEnvelope,
    ) -> Result<FragmentStream, ProviderError> {
        let request = PerplexityRequest {
            model: &envelope.model,
            messages: &envelope.messages,
            stream: true,
        };

        info!(
            "Sending query to perplexity with model {} (timeout {}s)",
            envelope.model, envelope.timeout_seconds
        );
        let response = self.send(&request, envelope.timeout_seconds).await?;
        debug!("Response stream opened ({})", response.status());

        Ok(Box::pin(decode_events(
            response.bytes_stream(),
            envelope.timeout_seconds,
        )))
    }
}

fn map_transport_error(error: reqwest::Error, timeout_seconds: u64) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            seconds: timeout_seconds,
        }
    } else {
        ProviderError::Network {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &value["error"];
        if let Some(message) = error["message"].as_str().or_else(|| error.as_str()) {
            return message.to_string();
        }
        if let Some(detail) = value["detail"].as_str() {
            return detail.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        body.chars().take(300).collect()
    }
}

#[derive(Debug, Serialize)]
struct PerplexityRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PerplexityChunk {
    #[serde(default)]
    choices: Vec<PerplexityChoice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<PerplexitySearchResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PerplexityChoice {
    #[serde(default)]
    delta: Option<PerplexityDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerplexityDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerplexitySearchResult {
    url: String,
}

/// What one server-sent event means for the answer.
enum Event {
    Fragment(ResponseFragment),
    Done,
    Skip,
    Failed(ProviderError),
}

fn parse_event(data: &str) -> Event {
    if data.is_empty() {
        return Event::Skip;
    }
    if data == "[DONE]" {
        return Event::Done;
    }

    let chunk: PerplexityChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Event::Failed(ProviderError::MalformedResponse(format!(
                "invalid stream event: {}",
                e
            )))
        }
    };

    if let Some(error) = chunk.error {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Event::Failed(ProviderError::Network {
            status: None,
            message,
        });
    }

    let sources = if chunk.citations.is_empty() {
        chunk.search_results.into_iter().map(|r| r.url).collect()
    } else {
        chunk.citations
    };

    let choice = chunk.choices.into_iter().next();
    let is_final = choice
        .as_ref()
        .and_then(|c| c.finish_reason.as_deref())
        .is_some();
    let text_delta = choice
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .unwrap_or_default();

    Event::Fragment(ResponseFragment {
        text_delta,
        is_final,
        sources,
    })
}

/// Incremental server-sent-event reader.
struct EventDecoder<S> {
    bytes: S,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
    timeout_seconds: u64,
}

impl<S> EventDecoder<S> {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
    }

    /// Take the `data` of the next complete event out of the buffer.
    fn next_event(&mut self) -> Option<String> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
        let text = String::from_utf8_lossy(&raw[..end]);
        let data = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect::<Vec<_>>()
            .join("\n");
        Some(data)
    }
}

/// Turn the raw response body into fragments.
///
/// The stream ends right after the final fragment. If the body ends first,
/// the last item is a `MalformedResponse` error. A body that stays silent for
/// `timeout_seconds` ends with `Timeout`, however long it has been streaming.
fn decode_events<S, B>(
    bytes: S,
    timeout_seconds: u64,
) -> impl Stream<Item = Result<ResponseFragment, ProviderError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let decoder = EventDecoder {
        bytes,
        buffer: Vec::new(),
        eof: false,
        done: false,
        timeout_seconds,
    };

    stream::unfold(decoder, |mut decoder| async move {
        if decoder.done {
            return None;
        }
        loop {
            if let Some(data) = decoder.next_event() {
                match parse_event(data.trim()) {
                    Event::Skip => continue,
                    Event::Fragment(fragment) => {
                        decoder.done = fragment.is_final;
                        return Some((Ok(fragment), decoder));
                    }
                    Event::Done => {
                        decoder.done = true;
                        let fragment = ResponseFragment {
                            is_final: true,
                            ..ResponseFragment::default()
                        };
                        return Some((Ok(fragment), decoder));
                    }
                    Event::Failed(error) => {
                        decoder.done = true;
                        return Some((Err(error), decoder));
                    }
                }
            }

            if decoder.eof {
                decoder.done = true;
                return Some((
                    Err(ProviderError::MalformedResponse(
                        "connection closed before the answer was complete".to_string(),
                    )),
                    decoder,
                ));
            }

            let idle = Duration::from_secs(decoder.timeout_seconds);
            let next = match tokio::time::timeout(idle, decoder.bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("No data from Perplexity for {:?}", idle);
                    decoder.done = true;
                    let error = ProviderError::Timeout {
                        seconds: decoder.timeout_seconds,
                    };
                    return Some((Err(error), decoder));
                }
            };
            match next {
                Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
                Some(Err(e)) => {
                    decoder.done = true;
                    let error = map_transport_error(e, decoder.timeout_seconds);
                    return Some((Err(error), decoder));
                }
                None => {
                    decoder.eof = true;
                    // A last event may arrive without its trailing blank line.
                    if decoder.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        decoder.buffer.extend_from_slice(b"\n\n");
                    }
                }
            }
        }
    })
    .fuse()
}
