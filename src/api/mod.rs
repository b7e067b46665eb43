// HTTP surface: upload page, removal endpoints, health and metrics

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::core::errors::RemovalError;
use crate::core::types::{ErrorResponse, ProcessedImage, RemovalOptions, RemovalResponse, DOWNLOAD_FILENAME};
use crate::services::BackgroundRemover;
use crate::utils::Metrics;

const INDEX_HTML: &str = include_str!("index.html");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub remover: BackgroundRemover,
    pub metrics: Metrics,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Build the router with every endpoint and the upload size limit applied
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/remove", post(remove_json))
        .route("/remove/png", post(remove_png))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health");
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.remover.backend(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Json<crate::utils::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Accepts `true/false`, `1/0`, `yes/no` and the `on` an HTML checkbox sends
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Pull the uploaded image and the request options out of the form.
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": one PNG/JPEG file (required)
/// - Field "alpha_matte" (optional): `true`/`false`, defaults to true
async fn read_upload(mut multipart: Multipart) -> Result<(Vec<u8>, RemovalOptions), ApiError> {
    let mut image = None;
    let mut options = RemovalOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), format!("Multipart error: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(e.status(), format!("Read error: {}", e.body_text())))?;
                image = Some(data.to_vec());
            }
            "alpha_matte" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| api_error(e.status(), format!("Read error: {}", e.body_text())))?;
                options.alpha_matte = parse_flag(&value).ok_or_else(|| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("alpha_matte must be true or false, got '{}'", value),
                    )
                })?;
            }
            _ => {}
        }
    }

    match image {
        Some(bytes) if !bytes.is_empty() => Ok((bytes, options)),
        _ => Err(api_error(StatusCode::BAD_REQUEST, "No image provided")),
    }
}

/// Shared body of both removal endpoints
async fn run_removal(state: &AppState, multipart: Multipart) -> Result<(ProcessedImage, f64), ApiError> {
    let start_time = Instant::now();

    let (bytes, options) = read_upload(multipart).await.inspect_err(|_| {
        state.metrics.record_failure();
    })?;
    let bytes_in = bytes.len();
    info!("Received {} byte upload (alpha_matte={})", bytes_in, options.alpha_matte);

    let processed = state
        .remover
        .process_bytes(bytes, options)
        .await
        .map_err(|e| {
            state.metrics.record_failure();
            removal_error(e)
        })?;

    let elapsed = start_time.elapsed();
    state
        .metrics
        .record_removal(options.alpha_matte, bytes_in, processed.png_bytes.len(), elapsed);

    info!(
        "Removed background from {}x{} image in {:.2}s",
        processed.width,
        processed.height,
        elapsed.as_secs_f64()
    );
    Ok((processed, elapsed.as_secs_f64() * 1000.0))
}

fn removal_error(e: RemovalError) -> ApiError {
    if e.is_client_error() {
        warn!("Rejected upload: {}", e);
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    } else {
        error!("Background removal failed: {:?}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// Remove the background and answer with JSON carrying a PNG data URI
async fn remove_json(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RemovalResponse>, ApiError> {
    state.metrics.record_endpoint_request("/remove");
    let (processed, elapsed_ms) = run_removal(&state, multipart).await?;
    Ok(Json(RemovalResponse::new(&processed, elapsed_ms)))
}

/// Remove the background and answer with the PNG itself as a download
async fn remove_png(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.record_endpoint_request("/remove/png");
    let (processed, _) = run_removal(&state, multipart).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", DOWNLOAD_FILENAME),
            ),
        ],
        processed.png_bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::background_remover::tests::{remover, subject_on_white_jpeg};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "cutout-test-boundary";

    fn app() -> (Router, Metrics) {
        app_with_limit(1024 * 1024)
    }

    fn app_with_limit(max_upload_bytes: usize) -> (Router, Metrics) {
        let metrics = Metrics::new();
        let state = AppState {
            remover: remover().with_metrics(metrics.clone()),
            metrics: metrics.clone(),
        };
        (router(state, max_upload_bytes), metrics)
    }

    fn multipart_body(image: Option<&[u8]>, alpha_matte: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(flag) = alpha_matte {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"alpha_matte\"\r\n\r\n{flag}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("on"), Some(true));
        assert_eq!(parse_flag(" FALSE "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[tokio::test]
    async fn test_index_page_has_upload_form() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Remove Background"));
        assert!(html.contains(DOWNLOAD_FILENAME));
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["backend"], "test");
    }

    #[tokio::test]
    async fn test_remove_returns_data_url() {
        let (app, metrics) = app();
        let jpeg = subject_on_white_jpeg();
        let response = app
            .oneshot(upload("/remove", multipart_body(Some(&jpeg), None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: RemovalResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.filename, "processed_image.png");
        assert_eq!((json.width, json.height), (100, 100));
        assert!(json.alpha_matte);
        assert!(json.data_url.starts_with("data:image/png;base64,"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.removals_success, 1);
        assert_eq!(snapshot.inferences, 1);
    }

    #[tokio::test]
    async fn test_remove_honours_alpha_matte_flag() {
        let (app, _) = app();
        let jpeg = subject_on_white_jpeg();
        let response = app
            .oneshot(upload("/remove", multipart_body(Some(&jpeg), Some("false"))))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: RemovalResponse = serde_json::from_slice(&body).unwrap();
        assert!(!json.alpha_matte);
    }

    #[tokio::test]
    async fn test_remove_png_is_a_download() {
        let (app, _) = app();
        let jpeg = subject_on_white_jpeg();
        let response = app
            .oneshot(upload("/remove/png", multipart_body(Some(&jpeg), None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"processed_image.png\""
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let png = image::load_from_memory(&body).unwrap().to_rgba8();
        assert_eq!(png.dimensions(), (100, 100));
        assert!(png.pixels().all(|p| p[3] == 0 || p[3] == 255));
    }

    #[tokio::test]
    async fn test_corrupted_upload_is_bad_request() {
        let (app, metrics) = app();
        let response = app
            .oneshot(upload("/remove", multipart_body(Some(b"not an image"), None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(json.error.contains("Could not decode image"));
        assert_eq!(metrics.snapshot().removals_failed, 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let (app, metrics) = app_with_limit(256);
        let jpeg = subject_on_white_jpeg();
        assert!(jpeg.len() > 256);

        let response = app
            .oneshot(upload("/remove", multipart_body(Some(&jpeg), None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!json.error.is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.removals_failed, 1);
        assert_eq!(snapshot.inferences, 0);
    }

    #[tokio::test]
    async fn test_missing_image_and_bad_flag() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(upload("/remove", multipart_body(None, None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let jpeg = subject_on_white_jpeg();
        let response = app
            .oneshot(upload("/remove", multipart_body(Some(&jpeg), Some("sometimes"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
