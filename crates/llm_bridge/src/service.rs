//! Query service: normalize, then dispatch
//!
//! The one entry point both the HTTP server and the CLI call.

use crate::config::ServiceConfig;
use crate::dispatch::{AggregatedResult, ChatBackend, DispatchError, Dispatcher, ModelSpec};
use crate::groq::GroqClient;
use core_pipeline::{normalize, InputError, NormalizeError, PixelCeiling, QueryRequest};
use thiserror::Error;
use tracing::error;

/// Failures surfaced to the caller of [`VisionService::answer`]
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller sent something unusable (empty file, bad image, ...)
    #[error("{0}")]
    Invalid(String),

    /// No model produced an answer
    #[error("All models failed to process the image.")]
    AllModelsFailed(AggregatedResult),

    /// Fault inside this process; details are logged, never returned
    #[error("An unexpected error occurred")]
    Internal,
}

impl From<InputError> for ServiceError {
    fn from(err: InputError) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl From<NormalizeError> for ServiceError {
    fn from(err: NormalizeError) -> Self {
        if err.is_validation() {
            Self::Invalid(format!("Validation error resizing image: {}", err))
        } else {
            error!("Image normalization failed: {}", err);
            Self::Internal
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::AllModelsFailed(result) => Self::AllModelsFailed(result),
            DispatchError::NoModels => {
                error!("Dispatch attempted with no models configured");
                Self::Internal
            }
        }
    }
}

/// Normalizes uploads and asks every configured model about them
pub struct VisionService<B> {
    dispatcher: Dispatcher<B>,
    pixel_ceiling: PixelCeiling,
}

impl VisionService<GroqClient> {
    /// Build a service talking to the configured chat-completion endpoint
    pub fn from_config(config: ServiceConfig) -> Result<Self, reqwest::Error> {
        let client = GroqClient::new(config.groq)?;
        Ok(Self::new(client, config.models, config.pixel_ceiling))
    }
}

impl<B: ChatBackend> VisionService<B> {
    pub fn new(backend: B, models: Vec<ModelSpec>, pixel_ceiling: PixelCeiling) -> Self {
        Self {
            dispatcher: Dispatcher::new(backend, models),
            pixel_ceiling,
        }
    }

    pub fn pixel_ceiling(&self) -> PixelCeiling {
        self.pixel_ceiling
    }

    pub fn models(&self) -> &[ModelSpec] {
        self.dispatcher.models()
    }

    /// Answer one query
    ///
    /// Decoding and resampling run on the blocking pool so large uploads do
    /// not stall the async workers.
    pub async fn answer(&self, request: QueryRequest) -> Result<AggregatedResult, ServiceError> {
        let (image, query) = request.into_parts();
        let ceiling = self.pixel_ceiling;

        let image = tokio::task::spawn_blocking(move || normalize(image, ceiling))
            .await
            .map_err(|err| {
                error!("Normalization task failed: {}", err);
                ServiceError::Internal
            })??;

        Ok(self.dispatcher.dispatch(&image, &query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::stub::StubBackend;
    use crate::dispatch::{ModelError, LLAMA_11B, LLAMA_90B};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn service(backend: StubBackend, ceiling: u64) -> VisionService<StubBackend> {
        VisionService::new(
            backend,
            ModelSpec::defaults(),
            PixelCeiling::new(ceiling).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_answer_small_image_passes_through() {
        let service = service(StubBackend::default(), 10_000);
        let request = QueryRequest::new(png(20, 20), "what is this?").unwrap();

        let result = service.answer(request).await.unwrap();
        assert_eq!(result.len(), 2);

        let prompts = service.dispatcher_backend().prompts.lock().unwrap();
        assert!(prompts[0].image_url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_answer_large_image_is_downscaled_first() {
        let service = service(StubBackend::default(), 1_000);
        let request = QueryRequest::new(png(200, 100), "what is this?").unwrap();

        service.answer(request).await.unwrap();

        let prompts = service.dispatcher_backend().prompts.lock().unwrap();
        assert!(prompts[0].image_url.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_answer_undecodable_image_is_invalid() {
        let service = service(StubBackend::default(), 10_000);
        let request = QueryRequest::new(b"GIF? no".to_vec(), "what is this?").unwrap();

        let err = service.answer(request).await.unwrap_err();
        match err {
            ServiceError::Invalid(message) => {
                assert!(message.starts_with("Validation error resizing image"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(service.dispatcher_backend().prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_unreachable_ceiling_is_invalid() {
        let service = service(StubBackend::default(), 10);
        let request = QueryRequest::new(png(1000, 1), "what is this?").unwrap();

        let err = service.answer(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_answer_all_models_failed() {
        let backend = StubBackend::default()
            .reply(
                LLAMA_11B.1,
                Err(ModelError::Status {
                    model: "llama11b".to_string(),
                    status: 500,
                }),
            )
            .reply(
                LLAMA_90B.1,
                Err(ModelError::Status {
                    model: "llama90b".to_string(),
                    status: 500,
                }),
            );
        let service = service(backend, 10_000);
        let request = QueryRequest::new(png(10, 10), "what is this?").unwrap();

        let err = service.answer(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::AllModelsFailed(ref r) if r.len() == 2));
        assert_eq!(err.to_string(), "All models failed to process the image.");
    }

    #[tokio::test]
    async fn test_answer_without_models_is_internal() {
        let service = VisionService::new(
            StubBackend::default(),
            Vec::new(),
            PixelCeiling::new(10_000).unwrap(),
        );
        let request = QueryRequest::new(png(10, 10), "what is this?").unwrap();

        let err = service.answer(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Internal));
    }

    #[test]
    fn test_input_error_becomes_invalid() {
        let err = ServiceError::from(InputError::EmptyImage);
        assert_eq!(err.to_string(), "Empty file");
    }

    impl VisionService<StubBackend> {
        fn dispatcher_backend(&self) -> &StubBackend {
            self.dispatcher.backend()
        }
    }
}
