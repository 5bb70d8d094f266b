//! Streaming client for the Ollama chat endpoint.

use crate::config::RelayConfig;
use crate::core::memory::Turn;
use crate::core::traits::{ChatBackend, FragmentStream};
use crate::error::RelayError;
use crate::infrastructure::entities::{ChatChunk, ChatRequest};
use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use std::fmt::Display;
use std::sync::Arc;

pub struct OllamaClient {
    http: reqwest::Client,
    config: Arc<RelayConfig>,
}

impl OllamaClient {
    pub fn new(config: Arc<RelayConfig>) -> OllamaClient {
        OllamaClient {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, RelayError> {
        let request = ChatRequest::streaming(&self.config.model, messages);

        let response = self
            .http
            .post(&self.config.upstream_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "upstream returned {status}: {}",
                body.trim()
            )));
        }

        Ok(fragments(response.bytes_stream()).boxed())
    }
}

/// Splits a newline-delimited JSON body into reply fragments.
///
/// Lines are cut on raw bytes, so a line spanning several body chunks is reassembled before it is
/// decoded. Undecodable lines and lines without text are skipped. A body read error is yielded
/// once and ends the stream.
pub fn fragments<S, B, E>(
    body: S,
) -> impl Stream<Item = Result<String, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        if let Some(fragment) = parse_line(&line) {
                            yield Ok(fragment);
                        }
                    }
                }
                Err(e) => {
                    yield Err(RelayError::Transport(format!("upstream read failed: {e}")));
                    return;
                }
            }
        }

        if let Some(fragment) = parse_line(&buffer) {
            yield Ok(fragment);
        }
    }
}

/// Extracts the non-empty `message.content` of one response line.
fn parse_line(line: &[u8]) -> Option<String> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    let chunk: ChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping upstream line: {e}");
            return None;
        }
    };

    if let Some(error) = chunk.error {
        warn!("upstream reported: {error}");
    }
    if chunk.done {
        debug!("upstream marked reply done");
    }

    chunk
        .message
        .and_then(|m| m.content)
        .filter(|content| !content.is_empty())
}
