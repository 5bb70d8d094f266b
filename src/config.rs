//! Process-wide relay configuration, read once at startup.

use log::warn;
use std::env;
use std::str::FromStr;

pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:11434/api/chat";
pub const DEFAULT_MODEL: &str = "gemma3:1b";
pub const DEFAULT_WINDOW_SIZE: usize = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant who speaks in gangster slang.";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Chat endpoint of the inference backend.
    pub upstream_url: String,
    pub model: String,
    /// Number of recent turns sent upstream besides the system turn.
    pub window_size: usize,
    pub system_prompt: String,
}

impl RelayConfig {
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            model: DEFAULT_MODEL.to_owned(),
            window_size: DEFAULT_WINDOW_SIZE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
        }
    }

    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let window_size = match env::var("CONTEXT_WINDOW") {
            Ok(s) => usize::from_str(&s).unwrap_or_else(|_| {
                warn!("CONTEXT_WINDOW={s:?} is not a number, using {DEFAULT_WINDOW_SIZE}");
                DEFAULT_WINDOW_SIZE
            }),
            Err(_) => DEFAULT_WINDOW_SIZE,
        };

        Self {
            upstream_url: env::var("OLLAMA_API_URL").unwrap_or(DEFAULT_UPSTREAM_URL.to_owned()),
            model: env::var("OLLAMA_MODEL").unwrap_or(DEFAULT_MODEL.to_owned()),
            window_size,
            system_prompt: env::var("SYSTEM_PROMPT").unwrap_or(DEFAULT_SYSTEM_PROMPT.to_owned()),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = RelayConfig::new("http://127.0.0.1:9/api/chat");
        assert_eq!(config.upstream_url, "http://127.0.0.1:9/api/chat");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_builder_overrides() {
        let config = RelayConfig::new(DEFAULT_UPSTREAM_URL)
            .with_window_size(50)
            .with_model("llama3.2");
        assert_eq!(config.window_size, 50);
        assert_eq!(config.model, "llama3.2");
    }
}
