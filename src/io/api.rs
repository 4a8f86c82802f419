//! HTTP API
//!
//! Hosts the detection pipeline and the arrival queue:
//! - `POST /upload?origin=A&destination=B` - raw image body, runs the pipeline
//! - `POST /detections/manual` - register an arrival by line code
//! - `POST /arrivals/{id}/confirm` - mark an arrival as arrived
//! - `GET /predictions/{stop}` - ranked predictions for a stop
//! - `GET /lines`, `GET /stats`, `GET /health`, `GET /metrics`

use crate::domain::arrival::{ArrivalId, ArrivalSource};
use crate::domain::errors::{QueueError, VisionError};
use crate::infra::context::AppContext;
use crate::io::prometheus::format_prometheus_metrics;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DEFAULT_ORIGIN: &str = "A";
const DEFAULT_DESTINATION: &str = "B";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Deserialize)]
struct ManualDetection {
    #[serde(default)]
    line: Option<String>,
    #[serde(default)]
    origin_stop: Option<String>,
    #[serde(default)]
    destination_stop: Option<String>,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(bytes)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("Internal Server Error")))
                .expect("static response should not fail")
        }
    }
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": error, "message": message }))
}

fn queue_error_response(ctx: &AppContext, e: &QueueError) -> Response<Full<Bytes>> {
    match e {
        QueueError::UnknownLine(code) => json_response(
            StatusCode::NOT_FOUND,
            &json!({
                "error": "unknown_line",
                "message": e.to_string(),
                "line": code,
                "valid_lines": ctx.registry.codes(),
            }),
        ),
        QueueError::UnknownArrival(_) => {
            error_response(StatusCode::NOT_FOUND, "unknown_arrival", &e.to_string())
        }
        QueueError::InvalidTransition { .. } => {
            error_response(StatusCode::CONFLICT, "invalid_transition", &e.to_string())
        }
    }
}

/// Decode one query parameter; `+` counts as a space
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (decode_component(k)? == key).then(|| decode_component(v)).flatten()
    })
}

fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " ")).ok().map(|s| s.into_owned())
}

/// Non-empty parameter or the default stop
fn stop_param(query: Option<&str>, key: &str, default: &str) -> String {
    query_param(query, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            &format!("body exceeds {} bytes", limit),
        )),
        Err(e) => {
            warn!(error = %e, "request_body_failed");
            Err(error_response(StatusCode::BAD_REQUEST, "invalid_body", &e.to_string()))
        }
    }
}

async fn handle_upload<B>(req: Request<B>, ctx: &AppContext) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let query = req.uri().query().map(str::to_string);
    let origin = stop_param(query.as_deref(), "origin", DEFAULT_ORIGIN);
    let destination = stop_param(query.as_deref(), "destination", DEFAULT_DESTINATION);

    let bytes = match read_body(req.into_body(), ctx.config.max_upload_bytes()).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    if bytes.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing_image", "request body is empty");
    }

    let identified = match ctx.pipeline.identify(bytes).await {
        Ok(Some(identified)) => identified,
        Ok(None) => {
            return json_response(
                StatusCode::OK,
                &json!({ "status": "not_found", "message": "no line detected" }),
            )
        }
        Err(e @ VisionError::ImageDecode(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "image_decode_failed", &e.to_string())
        }
        Err(e) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "pipeline_failed", &e.to_string())
        }
    };

    match ctx.queue.record_with_source(
        &identified.line_code,
        &origin,
        &destination,
        Utc::now(),
        ArrivalSource::Camera,
    ) {
        Ok(recorded) => json_response(
            StatusCode::CREATED,
            &json!({
                "status": "detected",
                "line_code": identified.line_code,
                "line_name": identified.line_name,
                "arrival": recorded,
            }),
        ),
        Err(e) => queue_error_response(ctx, &e),
    }
}

async fn handle_manual<B>(req: Request<B>, ctx: &AppContext) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let bytes = match read_body(req.into_body(), ctx.config.max_upload_bytes()).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let manual: ManualDetection = match serde_json::from_slice(&bytes) {
        Ok(manual) => manual,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_json", &e.to_string()),
    };

    let Some(line) = manual.line.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_line", "field 'line' is required");
    };
    let origin = manual
        .origin_stop
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let destination = manual
        .destination_stop
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());

    match ctx.queue.record(&line, &origin, &destination, Utc::now()) {
        Ok(recorded) => json_response(StatusCode::CREATED, &recorded),
        Err(e) => queue_error_response(ctx, &e),
    }
}

fn handle_confirm(raw_id: &str, ctx: &AppContext) -> Response<Full<Bytes>> {
    let Some(id) = decode_component(raw_id) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_id", "malformed arrival id");
    };

    match ctx.queue.confirm_arrival(&ArrivalId(id), Utc::now()) {
        Ok(event) => json_response(StatusCode::OK, &event),
        Err(e) => queue_error_response(ctx, &e),
    }
}

fn handle_predictions(raw_stop: &str, ctx: &AppContext) -> Response<Full<Bytes>> {
    let Some(stop) = decode_component(raw_stop).filter(|s| !s.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_stop", "malformed stop id");
    };

    let now = Utc::now();
    let page = ctx.queue.predictions(&stop, now);
    json_response(
        StatusCode::OK,
        &json!({
            "stop": stop,
            "total": page.total,
            "predictions": page.predictions,
            "updated_at": now.to_rfc3339(),
        }),
    )
}

fn handle_health(ctx: &AppContext) -> Response<Full<Bytes>> {
    let (status, recognition) = if ctx.pipeline.recognition_available() {
        ("ok", "active")
    } else {
        ("degraded", "inactive")
    };
    json_response(
        StatusCode::OK,
        &json!({
            "status": status,
            "recognition": recognition,
            "lines": ctx.registry.len(),
            "arrivals": ctx.queue.len(),
            "version": env!("CARGO_PKG_VERSION"),
            "git_hash": env!("GIT_HASH"),
        }),
    )
}

fn handle_index() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &json!({
            "service": "brt-arrivals",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": [
                "POST /upload?origin=&destination=",
                "POST /detections/manual",
                "POST /arrivals/{id}/confirm",
                "GET /predictions/{stop}",
                "GET /lines",
                "GET /stats",
                "GET /health",
                "GET /metrics",
            ],
        }),
    )
}

/// Handle HTTP requests
pub async fn handle_request<B>(
    req: Request<B>,
    ctx: Arc<AppContext>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "api_request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => handle_index(),
        (&Method::GET, "/health") => handle_health(&ctx),
        (&Method::GET, "/metrics") => {
            let summary = ctx.metrics.snapshot(ctx.queue.en_route_count());
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(format_prometheus_metrics(
                    &summary,
                    ctx.config.site_id(),
                ))))
                .expect("static response should not fail")
        }
        (&Method::GET, "/lines") => {
            let lines: Vec<_> = ctx.registry.iter().collect();
            json_response(StatusCode::OK, &json!({ "total": lines.len(), "lines": lines }))
        }
        (&Method::GET, "/stats") => json_response(StatusCode::OK, &ctx.queue.stats()),
        (&Method::POST, "/upload") => handle_upload(req, &ctx).await,
        (&Method::POST, "/detections/manual") => handle_manual(req, &ctx).await,
        (&Method::GET, p) if p.starts_with("/predictions/") => {
            handle_predictions(&p["/predictions/".len()..], &ctx)
        }
        (&Method::POST, p) if p.starts_with("/arrivals/") && p.ends_with("/confirm") => {
            let id = p.strip_prefix("/arrivals/").and_then(|rest| rest.strip_suffix("/confirm"));
            match id {
                Some(id) if !id.is_empty() && !id.contains('/') => handle_confirm(id, &ctx),
                _ => error_response(StatusCode::NOT_FOUND, "not_found", "no such route"),
            }
        }
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail"),
        _ => error_response(StatusCode::NOT_FOUND, "not_found", "no such route"),
    };

    debug!(method = %method, path = %path, status = %response.status().as_u16(), "api_response");
    Ok(response)
}

/// Start the HTTP API server
pub async fn start_api_server(
    ctx: Arc<AppContext>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let bind_address = ctx.config.bind_address();
    let port = ctx.config.server_port();
    let listener = TcpListener::bind((bind_address, port)).await?;

    info!(bind = %bind_address, port = %port, site = %ctx.config.site_id(), "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_decoding() {
        let query = Some("origin=Terminal+Integrado&destination=Derby%20Sul&empty=");
        assert_eq!(query_param(query, "origin").as_deref(), Some("Terminal Integrado"));
        assert_eq!(query_param(query, "destination").as_deref(), Some("Derby Sul"));
        assert_eq!(query_param(query, "empty").as_deref(), Some(""));
        assert_eq!(query_param(query, "missing"), None);
        assert_eq!(query_param(None, "origin"), None);
    }

    #[test]
    fn test_stop_param_defaults() {
        assert_eq!(stop_param(Some("origin="), "origin", DEFAULT_ORIGIN), "A");
        assert_eq!(stop_param(None, "destination", DEFAULT_DESTINATION), "B");
        assert_eq!(stop_param(Some("destination=C"), "destination", DEFAULT_DESTINATION), "C");
    }
}
