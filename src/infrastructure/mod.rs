pub mod entities;
pub mod ollama;
