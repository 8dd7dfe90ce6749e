//! HTTP routes

use crate::config::ServerConfig;
use crate::error::ApiError;
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        DefaultBodyLimit, State,
    },
    http::HeaderValue,
    response::Json,
    routing::{get, post},
    Router,
};
use core_pipeline::QueryRequest;
use llm_bridge::{AggregatedResult, ChatBackend, VisionService};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const IMAGE_FIELD: &str = "image";
const QUERY_FIELD: &str = "query";

/// Build the application router around a shared service
pub fn create_app<B>(service: Arc<VisionService<B>>, config: &ServerConfig) -> Router
where
    B: ChatBackend + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/upload_and_query", post(upload_and_query::<B>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(origins: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.iter().cloned()))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

async fn health_check() -> &'static str {
    "OK"
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn upload_and_query<B>(
    State(service): State<Arc<VisionService<B>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AggregatedResult>, ApiError>
where
    B: ChatBackend + 'static,
{
    let mut multipart =
        multipart.map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {}", err)))?;

    let mut image = None;
    let mut query = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {}", err)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read image: {}", err)))?;
                image = Some(bytes.to_vec());
            }
            QUERY_FIELD => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read query: {}", err)))?;
                query = Some(text);
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("Missing image field".to_string()))?;
    let query = query.ok_or_else(|| ApiError::BadRequest("Missing query field".to_string()))?;
    info!("Received {} byte image", image.len());

    let request = QueryRequest::new(image, query)?;
    let result = service.answer(request).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use image::{DynamicImage, ImageFormat, RgbImage};
    use llm_bridge::{ApiKey, GroqClient, ServiceConfig};
    use serde_json::{json, Value};
    use std::io::Cursor;
    use tower::util::ServiceExt; // for `oneshot`
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOUNDARY: &str = "dualvision-test-boundary";

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn completion(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    fn app_for(upstream_url: &str) -> Router {
        let mut config = ServiceConfig::new(ApiKey::new("test-api-key"));
        config.groq.api_url = format!("{}/openai/v1/chat/completions", upstream_url);
        config.groq.timeout_secs = 5;
        let service: VisionService<GroqClient> = VisionService::from_config(config).unwrap();
        create_app(Arc::new(service), &ServerConfig::default())
    }

    fn multipart_request(image: Option<&[u8]>, query: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(image) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(image);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(query) = query {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"query\"\r\n\r\n{query}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload_and_query")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app_for("http://127.0.0.1:9");
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_file_is_bad_request() {
        let app = app_for("http://127.0.0.1:9");
        let response = app
            .oneshot(multipart_request(Some(&b""[..]), Some("what is this?")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "Empty file" }));
    }

    #[tokio::test]
    async fn test_missing_query_is_bad_request() {
        let app = app_for("http://127.0.0.1:9");
        let image = png(4, 4);
        let response = app.oneshot(multipart_request(Some(image.as_slice()), None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Missing query field");
    }

    #[tokio::test]
    async fn test_invalid_image_is_bad_request() {
        let app = app_for("http://127.0.0.1:9");
        let response = app
            .oneshot(multipart_request(Some(&b"not an image"[..]), Some("what is this?")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Validation error resizing image"));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let app = app_for("http://127.0.0.1:9");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload_and_query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_partial_success_returns_both_slots() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "llama-3.2-11b-vision-preview" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("A black square.")))
            .mount(&upstream)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "llama-3.2-90b-vision-preview" })))
            .respond_with(ResponseTemplate::new(500))
            .mount(&upstream)
            .await;

        let app = app_for(&upstream.uri());
        let image = png(8, 8);
        let response = app
            .oneshot(multipart_request(Some(image.as_slice()), Some("what is this?")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "llama11b": "A black square.",
                "llama90b": "Error from llama90b API: 500"
            })
        );
    }

    #[tokio::test]
    async fn test_all_models_failing_is_service_unavailable() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&upstream)
            .await;

        let app = app_for(&upstream.uri());
        let image = png(8, 8);
        let response = app
            .oneshot(multipart_request(Some(image.as_slice()), Some("what is this?")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"], "All models failed to process the image.");
        assert_eq!(body["models"]["llama11b"], "Error from llama11b API: 502");
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let app = app_for("http://127.0.0.1:9");
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/upload_and_query")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }
}
