//! Wire entities of the Ollama chat API

use crate::core::memory::Turn;
use serde::{Deserialize, Serialize};

pub const TEMPERATURE: f64 = 0.5;
pub const TOP_K: u32 = 1;
pub const TOP_P: f64 = 0.9;

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub stream: bool,
    pub options: ChatOptions,
}

impl<'a> ChatRequest<'a> {
    /// Streaming request for `messages` with the fixed sampling options.
    pub fn streaming(model: &'a str, messages: &'a [Turn]) -> Self {
        Self {
            model,
            messages: messages.iter().map(ChatMessage::from).collect(),
            stream: true,
            options: ChatOptions::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> From<&'a Turn> for ChatMessage<'a> {
    fn from(turn: &'a Turn) -> Self {
        Self {
            role: turn.role().as_str(),
            content: turn.content(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatOptions {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: TEMPERATURE,
            top_k: TOP_K,
            top_p: TOP_P,
        }
    }
}

/// One line of a streamed chat response. Only `message.content` is relayed.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkMessage {
    pub content: Option<String>,
}
