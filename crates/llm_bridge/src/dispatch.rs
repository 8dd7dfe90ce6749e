//! Dual-model dispatch
//!
//! Sends one image and query to every configured model and collects each
//! model's outcome independently. A failing model only ever fills its own
//! slot in the [`AggregatedResult`].

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use core_pipeline::EncodedImage;
use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

/// Result key and upstream name of the smaller Llama vision model
pub const LLAMA_11B: (&str, &str) = ("llama11b", "llama-3.2-11b-vision-preview");

/// Result key and upstream name of the larger Llama vision model
pub const LLAMA_90B: (&str, &str) = ("llama90b", "llama-3.2-90b-vision-preview");

/// Answers longer than this are cut short in logs
const LOG_PREVIEW_CHARS: usize = 100;

/// A model the dispatcher queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Key under which the answer is reported (e.g. `llama11b`)
    pub id: String,
    /// Model name sent upstream (e.g. `llama-3.2-11b-vision-preview`)
    pub model: String,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
        }
    }

    /// The two Llama 3.2 vision models queried by default
    pub fn defaults() -> Vec<Self> {
        [LLAMA_11B, LLAMA_90B]
            .into_iter()
            .map(|(id, model)| Self::new(id, model))
            .collect()
    }
}

/// Text query plus the image as a base64 data URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionPrompt {
    pub query: String,
    pub image_url: String,
}

impl VisionPrompt {
    pub fn new(image: &EncodedImage, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            image_url: data_url(image),
        }
    }
}

/// Encode an image as a `data:` URL carrying its own MIME type
pub fn data_url(image: &EncodedImage) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type(),
        general_purpose::STANDARD.encode(image.as_bytes())
    )
}

/// Failure of a single model call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Failed to connect to {model} API. Please check your network or API key.")]
    Transport { model: String, detail: String },

    #[error("Error from {model} API: {status}")]
    Status { model: String, status: u16 },

    #[error("Malformed response from {model} API: {reason}")]
    Parse { model: String, reason: String },
}

impl ModelError {
    /// Id of the model this error belongs to
    pub fn model(&self) -> &str {
        match self {
            Self::Transport { model, .. } | Self::Status { model, .. } | Self::Parse { model, .. } => model,
        }
    }
}

/// A chat-completion endpoint able to answer a vision prompt
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Ask `model` about the prompt's image, returning the answer text
    async fn complete(&self, model: &ModelSpec, prompt: &VisionPrompt) -> Result<String, ModelError>;
}

/// Outcome of one model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAnswer {
    Text(String),
    Error(ModelError),
}

impl ModelAnswer {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ModelError> {
        match self {
            Self::Text(_) => None,
            Self::Error(err) => Some(err),
        }
    }
}

impl From<Result<String, ModelError>> for ModelAnswer {
    fn from(outcome: Result<String, ModelError>) -> Self {
        match outcome {
            Ok(text) => Self::Text(text),
            Err(err) => Self::Error(err),
        }
    }
}

// Callers see a plain string either way
impl Serialize for ModelAnswer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Error(err) => serializer.collect_str(err),
        }
    }
}

/// Answers of every configured model, keyed by model id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AggregatedResult {
    answers: BTreeMap<String, ModelAnswer>,
}

impl AggregatedResult {
    pub fn insert(&mut self, model_id: impl Into<String>, answer: ModelAnswer) {
        self.answers.insert(model_id.into(), answer);
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelAnswer> {
        self.answers.get(model_id)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelAnswer)> {
        self.answers.iter().map(|(id, answer)| (id.as_str(), answer))
    }

    /// True when there is at least one slot and every slot is an error
    pub fn all_failed(&self) -> bool {
        !self.answers.is_empty() && self.answers.values().all(ModelAnswer::is_error)
    }
}

/// Dispatch-level failures, as opposed to per-model ones
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No models configured")]
    NoModels,

    #[error("All models failed to process the image.")]
    AllModelsFailed(AggregatedResult),
}

/// Queries every configured model once per call
pub struct Dispatcher<B> {
    backend: B,
    models: Vec<ModelSpec>,
}

impl<B: ChatBackend> Dispatcher<B> {
    pub fn new(backend: B, models: Vec<ModelSpec>) -> Self {
        Self { backend, models }
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Ask every model about `image`, concurrently, one attempt each
    pub async fn dispatch(
        &self,
        image: &EncodedImage,
        query: &str,
    ) -> Result<AggregatedResult, DispatchError> {
        if self.models.is_empty() {
            return Err(DispatchError::NoModels);
        }

        let prompt = VisionPrompt::new(image, query);
        let prompt = &prompt;

        let calls = self.models.iter().map(|model| async move {
            let outcome = self.backend.complete(model, prompt).await;
            (model.id.clone(), outcome)
        });

        let mut result = AggregatedResult::default();
        for (model_id, outcome) in join_all(calls).await {
            match &outcome {
                Ok(text) => info!(
                    "Processed response from {} API: {}...",
                    model_id,
                    preview(text)
                ),
                Err(err) => warn!("{}", err),
            }
            result.insert(model_id, ModelAnswer::from(outcome));
        }

        if result.all_failed() {
            error!("All {} models failed to process the image", result.len());
            return Err(DispatchError::AllModelsFailed(result));
        }

        Ok(result)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}
