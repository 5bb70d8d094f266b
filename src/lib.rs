//! Streaming chat relay between WebSocket clients and an Ollama backend - Library exports for
//! testing
//!
//! (c) tokio-ollama-relay authors 2025

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod infrastructure;
pub mod tunnel;
