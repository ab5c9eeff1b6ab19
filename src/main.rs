use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

mod cache;
mod config;
mod extract;
mod fetch;
mod gemini;
mod models;
mod pipeline;
mod render;
mod site;

use cache::{CacheStore, FileCache, MemoryCache};
use config::Config;
use fetch::{Downloader, HttpPageFetcher};
use gemini::GeminiClient;
use models::{AssessRequest, ProcessRequest};
use pipeline::Pipeline;

const MAX_IMAGES: usize = 5;
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

type AppState = Arc<Pipeline>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let cache: Arc<dyn CacheStore> = match &config.cache.dir {
        Some(dir) => {
            tracing::info!("using file cache at {}", dir.display());
            Arc::new(FileCache::open(dir.clone(), config.cache.ttl).await?)
        }
        None => Arc::new(MemoryCache::new(config.cache.ttl)),
    };

    let pipeline = Pipeline::new(
        Arc::new(HttpPageFetcher::new(&config.fetch)?),
        Downloader::new(&config.fetch)?,
        GeminiClient::new(config.gemini.clone())?,
        cache,
    );

    let app = router(Arc::new(pipeline));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/process_product", post(process_product))
        .route("/assess_product", post(assess_product))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn process_product(State(pipeline): State<AppState>, Json(req): Json<ProcessRequest>) -> Response {
    let job = match parse_request(req) {
        Ok(job) => job,
        Err(detail) => return error_response(StatusCode::BAD_REQUEST, detail),
    };

    match job {
        Job::Url(url) => match pipeline.process_url(&url).await {
            Ok(record) => (StatusCode::OK, Json(record)).into_response(),
            Err(e) => {
                tracing::error!("processing {} failed: {}", url, e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("An error occurred: {}", e),
                )
            }
        },
        Job::Images(images) => {
            let record = pipeline.process_images(images).await;
            (StatusCode::OK, Json(record)).into_response()
        }
    }
}

async fn assess_product(State(pipeline): State<AppState>, Json(req): Json<AssessRequest>) -> Response {
    let assessment = pipeline.assess(&req.product, &req.preferences).await;
    (StatusCode::OK, Json(assessment)).into_response()
}

fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({"detail": detail}))).into_response()
}

// ── Request validation ───────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Job {
    Url(String),
    Images(Vec<Vec<u8>>),
}

fn parse_request(req: ProcessRequest) -> Result<Job, String> {
    if let Some(url) = req.url.filter(|u| !u.trim().is_empty()) {
        return Ok(Job::Url(url.trim().to_string()));
    }

    match req.images {
        Some(images) if !images.is_empty() => {
            if images.len() > MAX_IMAGES {
                return Err(format!("Maximum of {} images allowed", MAX_IMAGES));
            }
            images
                .iter()
                .enumerate()
                .map(|(idx, encoded)| {
                    decode_image(encoded).ok_or_else(|| format!("Image {} is not valid base64", idx))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Job::Images)
        }
        _ => Err("Either URL or images must be provided".to_string()),
    }
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL.
fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    BASE64.decode(payload.trim()).ok()
}
