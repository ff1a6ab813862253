use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_common::{display_value, reading::apply_derived_temperatures, render_dashboard};

use crate::{
    settings::{CollectorSettings, StoreKind},
    store::ReadingStore,
};

const TIME_FORMAT: &str = "%I:%M:%S %p";

#[derive(Clone)]
pub struct AppState {
    pub store: ReadingStore,
    pub timezone: Option<Tz>,
    pub refresh_ms: u64,
}

#[derive(Debug, Serialize)]
struct Envelope {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = CollectorSettings::from_env();
    let store = match settings.store {
        StoreKind::Memory => ReadingStore::in_memory(),
        StoreKind::File => ReadingStore::file_backed(settings.latest_path()).await,
    };

    let app = router(AppState {
        store,
        timezone: settings.timezone,
        refresh_ms: settings.refresh_ms,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind collector at {addr}"))?;

    info!("collector listening on http://{addr} (store: {:?})", settings.store);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("collector stopped");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_dashboard))
        .route("/api", get(handle_api))
        .route("/data", post(handle_ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_dashboard(State(state): State<AppState>) -> Html<String> {
    let document = state.store.snapshot().await;
    Html(render_dashboard(&document, state.refresh_ms))
}

async fn handle_api(State(state): State<AppState>) -> Json<Value> {
    Json(Value::Object(state.store.snapshot().await))
}

async fn handle_ingest(State(state): State<AppState>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return error_response(StatusCode::BAD_REQUEST, "No JSON provided");
    }

    let mut document = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(document)) if document.is_empty() => {
            return error_response(StatusCode::BAD_REQUEST, "No JSON provided");
        }
        Ok(Value::Object(document)) => document,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Expected a JSON object"),
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {err}"));
        }
    };

    apply_derived_temperatures(&mut document);
    let time = local_time(state.timezone);
    document.insert("time".to_string(), Value::from(time.clone()));

    let temp_f = display_value(document.get("temp_f"));
    let hum = display_value(document.get("hum"));

    if let Err(err) = state.store.replace(document).await {
        warn!("failed to persist ingested reading: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to store reading",
        );
    }

    info!("[{time}] update from device: {temp_f}°F | {hum}% hum");
    (
        StatusCode::OK,
        Json(Envelope {
            status: "success",
            message: None,
        }),
    )
        .into_response()
}

fn local_time(timezone: Option<Tz>) -> String {
    match timezone {
        Some(tz) => Utc::now().with_timezone(&tz).format(TIME_FORMAT).to_string(),
        None => Local::now().format(TIME_FORMAT).to_string(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(Envelope {
            status: "error",
            message: Some(message.to_string()),
        }),
    )
        .into_response()
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            warn!("failed to listen for ctrl-c, running until killed: {err}");
            std::future::pending::<()>().await;
        }
    }
}
