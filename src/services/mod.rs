//! Services that would call an external AI provider. Each one degrades to
//! deterministic canned output when no generator is configured.

pub mod chatbot;
pub mod climate;
pub mod gemini;
pub mod news_curation;

pub use gemini::{GeminiClient, GenerateOptions, TextGenerator};
