//! HTTP API
//!
//! Routes:
//! - `GET /` - service banner
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text format
//! - `POST /api/measure` - multipart upload, returns measurements and sizes
//!
//! Status mapping for `/api/measure`: bad upload 400, oversize body 413,
//! unmeasurable image 422, anything else 500. Every request is handled in
//! isolation; a failure never affects other connections.

use crate::domain::types::{Measurements, SizeRecommendation};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, Outcome};
use crate::io::prometheus;
use crate::io::raster::decode_rgb;
use crate::io::upload::{self, UploadError};
use crate::services::measurement::{Derivation, MeasureError, MeasurementConverter};
use crate::services::sizing::recommend;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const BANNER: &str = "Body Measurement API is running";
pub const SUCCESS_MESSAGE: &str = "Body measurements calculated successfully";

const ROUTES: [&str; 4] = ["/", "/health", "/metrics", "/api/measure"];

/// Shared, read-only state for all connections
pub struct AppState {
    service_name: String,
    max_upload_bytes: usize,
    converter: MeasurementConverter,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        service_name: impl Into<String>,
        max_upload_bytes: usize,
        converter: MeasurementConverter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { service_name: service_name.into(), max_upload_bytes, converter, metrics }
    }

    pub fn from_config(config: &Config, converter: MeasurementConverter, metrics: Arc<Metrics>) -> Self {
        Self::new(config.service_name(), config.max_upload_bytes(), converter, metrics)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[derive(Debug, Serialize)]
pub struct MeasureResponse {
    pub success: bool,
    pub measurements: Measurements,
    pub uniform_recommendations: SizeRecommendation,
    pub message: &'static str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

#[derive(Serialize)]
struct BannerBody<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct HealthBody<'a> {
    status: &'a str,
    service: &'a str,
}

/// Everything that can end a measure request early
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("File exceeds the {0} byte upload limit")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error(transparent)]
    Measure(#[from] MeasureError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Upload(_) | ApiError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Measure(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Measure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Measure(e) if e.is_validation() => format!("Failed to process pose: {e}"),
            ApiError::Measure(e) => format!("Failed to process image: {e}"),
            other => other.to_string(),
        }
    }

    fn outcome(&self) -> Outcome {
        match self {
            ApiError::Upload(_) | ApiError::BodyRead(_) | ApiError::PayloadTooLarge(_) => {
                Outcome::Rejected
            }
            ApiError::Measure(e) if e.is_validation() => Outcome::Unprocessable,
            ApiError::Measure(_) => Outcome::Failed,
        }
    }
}

fn with_cors(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "*")
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => with_cors(Response::builder())
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(json)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_error");
            with_cors(Response::builder())
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from_static(br#"{"detail":"Internal Server Error"}"#)))
                .expect("static response should not fail")
        }
    }
}

fn error_response(status: StatusCode, detail: &str) -> Response<Full<Bytes>> {
    json_response(status, &ErrorBody { detail })
}

fn header_str<B>(req: &Request<B>, name: hyper::header::HeaderName) -> Option<&str> {
    req.headers().get(name).and_then(|v: &HeaderValue| v.to_str().ok())
}

/// Handle HTTP requests
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    state.metrics.record_http_request();

    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => json_response(StatusCode::OK, &BannerBody { message: BANNER }),
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &HealthBody { status: "healthy", service: &state.service_name },
        ),
        (&Method::GET, "/metrics") => {
            let body = prometheus::format_prometheus_metrics(&state.metrics, &state.service_name);
            with_cors(Response::builder())
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, prometheus::CONTENT_TYPE)
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::POST, "/api/measure") => handle_measure(req, &state).await,
        // CORS preflight
        (&Method::OPTIONS, _) => with_cors(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        (_, path) if ROUTES.contains(&path) => {
            error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

async fn handle_measure<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request_id = Uuid::now_v7();

    match measure(req, state, request_id).await {
        Ok(body) => {
            state.metrics.record_outcome(Outcome::Success);
            json_response(StatusCode::OK, &body)
        }
        Err(err) => {
            state.metrics.record_outcome(err.outcome());
            let status = err.status();
            let detail = err.detail();
            if status.is_server_error() {
                error!(request_id = %request_id, status = %status.as_u16(), error = %detail, "measure_failed");
            } else {
                warn!(request_id = %request_id, status = %status.as_u16(), error = %detail, "measure_rejected");
            }
            error_response(status, &detail)
        }
    }
}

async fn measure<B>(
    req: Request<B>,
    state: &AppState,
    request_id: Uuid,
) -> Result<MeasureResponse, ApiError>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boundary = upload::boundary(header_str(&req, CONTENT_TYPE))?;

    let limit = state.max_upload_bytes;
    let declared_len = header_str(&req, CONTENT_LENGTH).and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge(limit));
    }

    let body = Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge(limit)
            } else {
                ApiError::BodyRead(e.to_string())
            }
        })?
        .to_bytes();

    let upload = upload::extract_file(body, boundary).await?;
    upload.ensure_image()?;

    let filename = upload.filename.clone().unwrap_or_default();
    info!(
        request_id = %request_id,
        filename = %filename,
        content_type = %upload.content_type.as_deref().unwrap_or_default(),
        bytes = %upload.data.len(),
        "upload_accepted"
    );

    let started = Instant::now();
    let result = decode_and_measure(&state.converter, upload.data).await;
    state.metrics.record_measure_latency(started.elapsed().as_millis() as u64);
    let derivation = result?;
    derivation.log();

    let recommendation = recommend(&derivation.measurements);
    info!(
        request_id = %request_id,
        filename = %filename,
        recommended_size = %recommendation.recommended_size,
        fit_confidence = %recommendation.fit_confidence.as_str(),
        "image_processed"
    );

    Ok(MeasureResponse {
        success: true,
        measurements: derivation.measurements,
        uniform_recommendations: recommendation,
        message: SUCCESS_MESSAGE,
    })
}

/// Decode off the async workers, then run the converter
async fn decode_and_measure(
    converter: &MeasurementConverter,
    data: Bytes,
) -> Result<Derivation, MeasureError> {
    let image = tokio::task::spawn_blocking(move || decode_rgb(&data))
        .await
        .map_err(|e| MeasureError::Worker(e.to_string()))?
        .map_err(|e| MeasureError::Decode(e.to_string()))?;

    converter.measure(&image).await
}

/// Bind `addr` and serve until shutdown
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, service = %state.service_name, "http_server_started");
    serve(listener, state, shutdown).await
}

/// Accept loop on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BodyLandmark, Landmark, LandmarkSet};
    use crate::io::estimator::{EstimatorError, EstimatorOptions, PoseEstimator};
    use crate::io::upload::tests::{multipart_body, multipart_content_type};
    use crate::services::calibration::Calibration;
    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeEstimator {
        landmarks: Option<LandmarkSet>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PoseEstimator for FakeEstimator {
        async fn estimate(
            &self,
            _image: &RgbImage,
            _options: &EstimatorOptions,
        ) -> Result<Option<LandmarkSet>, EstimatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.landmarks.clone())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn standing_pose() -> LandmarkSet {
        let mut points = vec![Landmark::new(0.5, 0.5, 0.5); BodyLandmark::COUNT];
        points[BodyLandmark::Nose.index()] = Landmark::new(0.5, 0.1, 0.95);
        points[BodyLandmark::LeftShoulder.index()] = Landmark::new(0.7, 0.25, 0.9);
        points[BodyLandmark::RightShoulder.index()] = Landmark::new(0.3, 0.25, 0.9);
        points[BodyLandmark::LeftHip.index()] = Landmark::new(0.65, 0.55, 0.9);
        points[BodyLandmark::RightHip.index()] = Landmark::new(0.35, 0.55, 0.9);
        points[BodyLandmark::LeftAnkle.index()] = Landmark::new(0.6, 0.95, 0.9);
        points[BodyLandmark::RightAnkle.index()] = Landmark::new(0.4, 0.95, 0.9);
        LandmarkSet::new(points)
    }

    fn test_state(landmarks: Option<LandmarkSet>, max_upload_bytes: usize) -> (Arc<AppState>, Arc<FakeEstimator>) {
        let estimator = Arc::new(FakeEstimator { landmarks, calls: AtomicUsize::new(0) });
        let converter = MeasurementConverter::new(
            estimator.clone(),
            EstimatorOptions::default(),
            Calibration::default(),
            Duration::from_secs(1),
        );
        let state = AppState::new("body-measurement-api", max_upload_bytes, converter, Arc::new(Metrics::new()));
        (Arc::new(state), estimator)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::builder().method(Method::GET).uri(path).body(Full::new(Bytes::new())).unwrap()
    }

    fn measure_request(body: Bytes) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/measure")
            .header(CONTENT_TYPE, multipart_content_type())
            .body(Full::new(body))
            .unwrap()
    }

    async fn send(state: &Arc<AppState>, req: Request<Full<Bytes>>) -> (StatusCode, serde_json::Value) {
        let response = handle_request(req, state.clone()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_root_banner() {
        let (state, _) = test_state(None, 1024);
        let (status, json) = send(&state, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], BANNER);
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state(None, 1024);
        let (status, json) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"status": "healthy", "service": "body-measurement-api"}));
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let (state, _) = test_state(None, 1024);

        let (status, json) = send(&state, get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "Not Found");

        let (status, _) = send(&state, get("/api/measure")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let (state, _) = test_state(None, 1024);
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/measure")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_measure_success() {
        let (state, estimator) = test_state(Some(standing_pose()), 1024 * 1024);
        let png = png_bytes(200, 300);
        let body = multipart_body(&[("file", Some("person.png"), Some("image/png"), &png)]);

        let (status, json) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], SUCCESS_MESSAGE);
        // 80px shoulders -> scale 0.5625, 255px tall -> 143.4 cm
        assert_eq!(json["measurements"]["height"], 143.4);
        assert_eq!(json["measurements"]["shoulderWidth"], 45.0);
        assert_eq!(json["measurements"]["confidence"], 0.95);
        assert_eq!(json["measurements"]["landmarks_detected"], 33);
        assert_eq!(json["uniform_recommendations"]["recommended_size"], "XS");
        assert_eq!(json["uniform_recommendations"]["pants_size"], "XS");
        assert_eq!(json["uniform_recommendations"]["fit_confidence"], "high");
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 1);

        let snapshot = state.metrics().snapshot();
        assert_eq!(snapshot.measure_success_total, 1);
    }

    #[tokio::test]
    async fn test_text_upload_rejected_without_estimator_call() {
        let (state, estimator) = test_state(Some(standing_pose()), 1024);
        let body = multipart_body(&[("file", Some("notes.txt"), Some("text/plain"), b"hello")]);

        let (status, json) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "File must be an image");
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.metrics().snapshot().measure_rejected_total, 1);
    }

    #[tokio::test]
    async fn test_missing_file_rejected() {
        let (state, estimator) = test_state(Some(standing_pose()), 1024);
        let body = multipart_body(&[("comment", None, None, b"no photo")]);

        let (status, json) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "No file uploaded");
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_multipart_rejected() {
        let (state, _) = test_state(Some(standing_pose()), 1024);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/measure")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();

        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_pose_is_unprocessable() {
        let (state, estimator) = test_state(None, 1024 * 1024);
        let png = png_bytes(32, 32);
        let body = multipart_body(&[("file", Some("wall.png"), Some("image/png"), &png)]);

        let (status, json) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let detail = json["detail"].as_str().unwrap();
        assert!(detail.contains("No pose landmarks detected"), "detail: {detail}");
        assert!(json.get("measurements").is_none());
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.metrics().snapshot().measure_unprocessable_total, 1);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_server_error() {
        let (state, estimator) = test_state(Some(standing_pose()), 1024);
        let body = multipart_body(&[("file", Some("broken.jpg"), Some("image/jpeg"), b"not a jpeg")]);

        let (status, json) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["detail"].as_str().unwrap().starts_with("Failed to process image:"));
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.metrics().snapshot().measure_failed_total, 1);
    }

    #[tokio::test]
    async fn test_oversize_body_rejected() {
        let (state, estimator) = test_state(Some(standing_pose()), 64);
        let big = vec![0u8; 4096];
        let body = multipart_body(&[("file", Some("big.png"), Some("image/png"), &big)]);

        let (status, _) = send(&state, measure_request(body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _) = test_state(None, 1024);
        let _ = send(&state, get("/health")).await;

        let response = handle_request(get("/metrics"), state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()[CONTENT_TYPE], prometheus::CONTENT_TYPE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("bodymeasure_http_requests_total{service=\"body-measurement-api\"} 2"));
    }
}
