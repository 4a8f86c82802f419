//! Integration tests for the HTTP API routes

use async_trait::async_trait;
use brt_arrivals::domain::{BoundingBox, LineRegistry, RawDetection};
use brt_arrivals::infra::{AppContext, Config};
use brt_arrivals::io::api::handle_request;
use brt_arrivals::services::{
    DisabledRecognizer, EnhancedRegion, Frame, ObjectDetector, Recognizer, TextSpan,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

struct OneBus;

#[async_trait]
impl ObjectDetector for OneBus {
    async fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        Ok(vec![RawDetection {
            label: "bus".to_string(),
            confidence: 0.9,
            bounding_box: BoundingBox::new(5.0, 5.0, 60.0, 60.0),
        }])
    }
}

struct Reads(&'static str);

#[async_trait]
impl Recognizer for Reads {
    async fn recognize(&self, _region: &EnhancedRegion) -> anyhow::Result<Vec<TextSpan>> {
        Ok(vec![TextSpan { text: self.0.to_string(), confidence: 0.9 }])
    }
}

fn context(recognizer: Arc<dyn Recognizer>) -> Arc<AppContext> {
    Arc::new(AppContext::new(
        Config::default(),
        Arc::new(LineRegistry::builtin()),
        Arc::new(OneBus),
        recognizer,
        None,
    ))
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(64, 64)).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

async fn call(
    ctx: &Arc<AppContext>,
    method: Method,
    uri: &str,
    body: impl Into<Bytes>,
) -> (StatusCode, Bytes) {
    let req = Request::builder().method(method).uri(uri).body(Full::new(body.into())).unwrap();
    let response = handle_request(req, ctx.clone()).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn call_json(ctx: &Arc<AppContext>, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let (status, bytes) = call(ctx, method, uri, body.to_string()).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_reports_recognition_state() {
    let ctx = context(Arc::new(Reads("437")));
    let (status, body) = call_json(&ctx, Method::GET, "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["recognition"], "active");
    assert_eq!(body["lines"], 4);

    let ctx = context(Arc::new(DisabledRecognizer));
    let (_, body) = call_json(&ctx, Method::GET, "/health", "").await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["recognition"], "inactive");
}

#[tokio::test]
async fn test_upload_records_camera_arrival() {
    let ctx = context(Arc::new(Reads("BRT 2450")));
    let (status, bytes) =
        call(&ctx, Method::POST, "/upload?origin=Derby&destination=Boa+Vista", png_bytes()).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "detected");
    assert_eq!(body["line_code"], "2450");
    assert_eq!(body["arrival"]["origin_stop"], "Derby");
    assert_eq!(body["arrival"]["destination_stop"], "Boa Vista");
    assert_eq!(body["arrival"]["source"], "camera");
    assert_eq!(body["arrival"]["queue_position"], 1);

    let (_, body) = call_json(&ctx, Method::GET, "/predictions/Boa%20Vista", "").await;
    assert_eq!(body["stop"], "Boa Vista");
    assert_eq!(body["total"], 1);
    assert_eq!(body["predictions"][0]["line_code"], "2450");
}

#[tokio::test]
async fn test_upload_without_match_is_not_found() {
    let ctx = context(Arc::new(Reads("999")));
    let (status, bytes) = call(&ctx, Method::POST, "/upload", png_bytes()).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_found");
    assert!(ctx.queue.is_empty());
}

#[tokio::test]
async fn test_upload_rejects_undecodable_image() {
    let ctx = context(Arc::new(Reads("437")));
    let (status, body) = call_json(&ctx, Method::POST, "/upload", "not an image").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "image_decode_failed");

    let (status, body) = call_json(&ctx, Method::POST, "/upload", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_image");
}

#[tokio::test]
async fn test_manual_detection_defaults_stops() {
    let ctx = context(Arc::new(DisabledRecognizer));
    let (status, body) =
        call_json(&ctx, Method::POST, "/detections/manual", r#"{"line":"437"}"#).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["line_code"], "437");
    assert_eq!(body["origin_stop"], "A");
    assert_eq!(body["destination_stop"], "B");
    assert_eq!(body["source"], "manual");

    let (_, body) = call_json(&ctx, Method::GET, "/predictions/B", "").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["predictions"][0]["status"], "en_route");
}

#[tokio::test]
async fn test_manual_detection_validation() {
    let ctx = context(Arc::new(DisabledRecognizer));

    let (status, body) =
        call_json(&ctx, Method::POST, "/detections/manual", r#"{"line":"999"}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_line");
    assert_eq!(body["valid_lines"], serde_json::json!(["437", "2441", "2450", "2444"]));

    let (status, body) =
        call_json(&ctx, Method::POST, "/detections/manual", r#"{"origin_stop":"A"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_line");

    let (status, body) = call_json(&ctx, Method::POST, "/detections/manual", "{line").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_json");

    assert!(ctx.queue.is_empty());
}

#[tokio::test]
async fn test_predictions_total_is_uncapped() {
    let ctx = context(Arc::new(DisabledRecognizer));
    for _ in 0..12 {
        call_json(&ctx, Method::POST, "/detections/manual", r#"{"line":"2444"}"#).await;
    }

    let (status, body) = call_json(&ctx, Method::GET, "/predictions/B", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 12);
    assert_eq!(body["predictions"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_confirm_arrival_route() {
    let ctx = context(Arc::new(DisabledRecognizer));
    let (_, body) =
        call_json(&ctx, Method::POST, "/detections/manual", r#"{"line":"2441"}"#).await;
    let id = body["id"].as_str().unwrap().to_string();
    let uri = format!("/arrivals/{}/confirm", id);

    let (status, body) = call_json(&ctx, Method::POST, &uri, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "arrived");

    let (status, body) = call_json(&ctx, Method::POST, &uri, "").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (status, _) = call_json(&ctx, Method::POST, "/arrivals/nope/confirm", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lines_stats_and_metrics() {
    let ctx = context(Arc::new(DisabledRecognizer));
    call_json(&ctx, Method::POST, "/detections/manual", r#"{"line":"437"}"#).await;

    let (status, body) = call_json(&ctx, Method::GET, "/lines", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);
    assert_eq!(body["lines"][0]["code"], "437");

    let (_, body) = call_json(&ctx, Method::GET, "/stats", "").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["en_route"], 1);
    assert_eq!(body["top_lines"][0]["line_code"], "437");
    assert_eq!(body["registered_lines"], 4);

    let (status, bytes) = call(&ctx, Method::GET, "/metrics", "").await;
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("brt_arrivals_recorded_total{site=\"brt\"} 1"));
    assert!(text.contains("brt_arrivals_en_route{site=\"brt\"} 1"));
}

#[tokio::test]
async fn test_unknown_route() {
    let ctx = context(Arc::new(DisabledRecognizer));
    let (status, _) = call_json(&ctx, Method::GET, "/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call_json(&ctx, Method::DELETE, "/predictions/B", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
