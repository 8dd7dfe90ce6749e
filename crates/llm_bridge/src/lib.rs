//! LLM Bridge for chat-completion vision models
//!
//! Forwards a normalized image and a text query to every configured vision
//! model over an OpenAI-compatible chat-completion API and gathers the
//! answers. One model failing never hides another model's answer.

pub mod config;
pub mod dispatch;
pub mod groq;
pub mod service;

pub use config::{ConfigError, ServiceConfig};
pub use dispatch::{
    AggregatedResult, ChatBackend, DispatchError, Dispatcher, ModelAnswer, ModelError, ModelSpec,
    VisionPrompt,
};
pub use groq::{ApiKey, GroqClient, GroqConfig};
pub use service::{ServiceError, VisionService};
