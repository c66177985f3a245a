use crate::config::AppConfig;
use crate::services::pipeline::{Pipeline, decode_document};
use crate::services::renderer::write_output;
use anyhow::Context;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
};
use http::Method;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    output_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            output_dir: Arc::new(output_dir.into()),
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    let message = message.into();
    tracing::warn!(%status, %message, "upload rejected");
    (status, Json(json!({ "success": false, "error": message })))
}

pub fn router(state: AppState) -> Router {
    let downloads = ServeDir::new(state.output_dir.as_path());
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .nest_service("/download", downloads)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Removes regular files in `dir` last modified at least `max_age` ago.
/// Returns how many were removed.
pub fn prune_outputs(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age >= max_age {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn spawn_pruner(dir: PathBuf, max_age: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let dir = dir.clone();
            match tokio::task::spawn_blocking(move || prune_outputs(&dir, max_age)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => tracing::info!(removed, "expired outputs removed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to prune outputs"),
                Err(e) => tracing::warn!(error = %e, "prune task failed"),
            }
        }
    });
}

/// Binds `addr` and serves uploads until the process is stopped. Rendered
/// files live in `output_dir`; with a `retention` they are deleted once
/// older than it, otherwise they are kept until removed by hand.
pub async fn serve(
    config: AppConfig,
    addr: &str,
    output_dir: PathBuf,
    retention: Option<Duration>,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("cannot create output directory {}", output_dir.display()))?;

    if let Some(max_age) = retention {
        tracing::info!(retention_secs = max_age.as_secs(), "pruning old outputs");
        spawn_pruner(output_dir.clone(), max_age);
    }

    let pipeline = Pipeline::from_config(config)?;
    let app = router(AppState::new(pipeline, output_dir));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Chapter Splitter</title>
    <meta charset="utf-8">
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .info-box { background-color: #f0f8ff; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }
    </style>
</head>
<body>
    <h1>Chapter Splitter</h1>

    <div class="info-box">
        <p>Finds the chapters of a plain-text novel and re-cuts them into parts of even length with uniform titles.</p>
        <p>Input must be UTF-8. Chinese and English headings are recognized.</p>
    </div>

    <h2>Endpoints</h2>
    <div class="endpoint">GET / - This page</div>
    <div class="endpoint">GET /health - Health check</div>
    <div class="endpoint">POST /upload - Multipart form: text_file, optional target_chars</div>
    <div class="endpoint">GET /download/&lt;file&gt; - Fetch a processed result</div>
</body>
</html>
"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut text = None;
    let mut file_name = None;
    let mut target_chars = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text_file" => {
                file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                let decoded = decode_document(&data, "text_file")
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                text = Some(decoded);
            }
            "target_chars" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                let value = raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|&value| value > 0)
                    .ok_or_else(|| {
                        reject(StatusCode::BAD_REQUEST, format!("invalid target_chars: {raw}"))
                    })?;
                target_chars = Some(value);
            }
            _ => {}
        }
    }

    let text = text.ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing text_file field"))?;

    let config = state.pipeline.config();
    let mut splitter = config.splitter.clone();
    if let Some(target) = target_chars {
        splitter.target_chars = target;
    }
    let result = state.pipeline.process_text_with(&text, &splitter).await;

    let book_title = file_name
        .as_deref()
        .and_then(|name| Path::new(name).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    let language = result.language.clone();
    let strategy = result.strategy;
    let input_chapter_count = result.input_chapter_count;
    let chapter_count = result.chapters.len();

    let output_name = format!("{}.{}", Uuid::new_v4(), config.output.format.extension());
    let output_path = state.output_dir.join(&output_name);
    let pipeline = Arc::clone(&state.pipeline);
    let written = tokio::task::spawn_blocking(move || {
        let bytes = pipeline.render(&result, &book_title)?;
        write_output(&output_path, &bytes)
    })
    .await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to produce output");
            return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
        Err(e) => {
            tracing::error!(error = %e, "render task failed");
            return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "render task failed"));
        }
    }
    tracing::info!(file = %output_name, chapters = chapter_count, "upload processed");

    Ok(Json(json!({
        "success": true,
        "language": language,
        "strategy": strategy,
        "input_chapter_count": input_chapter_count,
        "chapter_count": chapter_count,
        "download_url": format!("/download/{output_name}")
    })))
}
