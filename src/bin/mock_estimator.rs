//! Mock pose estimator
//!
//! Stands in for the pose sidecar during local testing.
//!
//! Protocol:
//! - `POST /pose?width=W&height=H&...` with raw RGB8 pixels as the body
//! - Response: `{"pose_landmarks": [{x, y, z, visibility}, ...]}` or
//!   `{"pose_landmarks": null}` when no person is found
//!
//! Behavior:
//! 1. Listens on configurable port (default 8502)
//! 2. Rejects bodies whose length is not W*H*3 with 400
//! 3. Returns the same standing figure for every valid frame
//!
//! Usage:
//!   cargo run --bin mock-estimator -- --port 8502 --nose-visibility 0.9

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use url::form_urlencoded;

/// Number of keypoints in the pose topology
const LANDMARK_COUNT: usize = 33;

#[derive(Parser, Debug)]
#[command(name = "mock-estimator")]
#[command(about = "Mock pose estimator for local testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8502")]
    port: u16,

    /// Report no person in every frame
    #[arg(long)]
    no_pose: bool,

    /// Visibility reported for the nose keypoint
    #[arg(long, default_value = "0.9")]
    nose_visibility: f64,
}

/// Standing figure facing the camera, normalized coordinates
fn standing_figure(nose_visibility: f64) -> serde_json::Value {
    let mut points = vec![(0.5, 0.5); LANDMARK_COUNT];
    points[0] = (0.5, 0.12); // nose
    points[11] = (0.62, 0.25); // left shoulder
    points[12] = (0.38, 0.25); // right shoulder
    points[23] = (0.58, 0.55); // left hip
    points[24] = (0.42, 0.55); // right hip
    points[27] = (0.56, 0.94); // left ankle
    points[28] = (0.44, 0.94); // right ankle

    let landmarks: Vec<_> = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let visibility = if i == 0 { nose_visibility } else { 0.9 };
            json!({ "x": x, "y": y, "z": 0.0, "visibility": visibility })
        })
        .collect();

    json!({ "pose_landmarks": landmarks })
}

fn query_params(query: Option<&str>) -> HashMap<String, String> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes()).into_owned().collect()
}

/// RGB8 byte length for `width` x `height`, `None` on overflow
fn pixel_len(width: usize, height: usize) -> Option<usize> {
    width.checked_mul(height)?.checked_mul(3)
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

async fn handle(req: Request<Incoming>, args: Arc<Args>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/pose" {
        return Ok(json_response(StatusCode::NOT_FOUND, &json!({ "error": "not found" })));
    }

    let params = query_params(req.uri().query());
    let dimension = |key: &str| params.get(key).and_then(|v| v.parse::<usize>().ok());
    let (Some(width), Some(height)) = (dimension("width"), dimension("height")) else {
        return Ok(json_response(StatusCode::BAD_REQUEST, &json!({ "error": "width and height required" })));
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "body_read_failed");
            return Ok(json_response(StatusCode::BAD_REQUEST, &json!({ "error": "unreadable body" })));
        }
    };

    let Some(expected) = pixel_len(width, height) else {
        return Ok(json_response(StatusCode::BAD_REQUEST, &json!({ "error": "image dimensions too large" })));
    };
    if body.len() != expected {
        warn!(expected = %expected, actual = %body.len(), "pixel_length_mismatch");
        return Ok(json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": format!("expected {expected} bytes, got {}", body.len()) }),
        ));
    }

    info!(
        width = %width,
        height = %height,
        model_complexity = %params.get("model_complexity").map_or("-", String::as_str),
        "frame_received"
    );

    let response = if args.no_pose {
        json!({ "pose_landmarks": null })
    } else {
        standing_figure(args.nose_visibility)
    };
    Ok(json_response(StatusCode::OK, &response))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Arc::new(Args::parse());
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, no_pose = %args.no_pose, "mock_estimator_started");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let args = args.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, args.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "connection_error");
            }
        });
    }
}
