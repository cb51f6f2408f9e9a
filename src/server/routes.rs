use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::error;

use crate::api::{DeviceStatus, StatusUpload, UsageUpload};

use super::{
    reconcile::{BatchOutcome, Reconciler},
    store::{StatusUpdate, UsageStore},
};

pub struct AppState {
    pub store: UsageStore,
    pub reconciler: Reconciler,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/usage", post(post_usage).get(get_usage))
        .route("/api/v1/devices", get(get_devices))
        .route(
            "/api/v1/devices/{device_name}/status",
            get(get_status).post(post_status),
        )
        .with_state(state)
}

async fn post_usage(
    State(state): State<Arc<AppState>>,
    Json(upload): Json<UsageUpload>,
) -> impl IntoResponse {
    if upload.device_name.is_empty() || upload.api_key.is_empty() || upload.usages.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    match state
        .reconciler
        .process(&state.store, upload, Utc::now())
        .await
    {
        BatchOutcome::Unauthorized => StatusCode::UNAUTHORIZED,
        BatchOutcome::Accepted { .. } => {
            if let Err(e) = state.store.persist().await {
                error!("Couldn't persist snapshot after upload: {e:?}");
            }
            StatusCode::OK
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageQuery {
    device_name: Option<String>,
    /// Calendar day, `YYYY-MM-DD`.
    date: Option<String>,
}

async fn get_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsageQuery>,
) -> impl IntoResponse {
    let day = match &query.date {
        Some(raw) => match raw.parse::<NaiveDate>() {
            Ok(day) => Some(day),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => None,
    };

    let rows = state.store.query_usage(query.device_name.as_deref(), day).await;
    Json(rows).into_response()
}

async fn get_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list_devices().await)
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(device_name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_device(&device_name).await {
        Some(device) => {
            let now = Utc::now();
            Json(DeviceStatus {
                current_app: device.current_app.clone(),
                last_seen: device.last_seen,
                online: device.online(now),
            })
            .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn post_status(
    State(state): State<Arc<AppState>>,
    Path(device_name): Path<String>,
    Json(status): Json<StatusUpload>,
) -> impl IntoResponse {
    match state
        .store
        .update_status(&device_name, &status.api_key, status.current_app, Utc::now())
        .await
    {
        StatusUpdate::UnknownDevice => StatusCode::NOT_FOUND,
        StatusUpdate::BadKey => StatusCode::UNAUTHORIZED,
        StatusUpdate::Updated => {
            if let Err(e) = state.store.persist().await {
                error!("Couldn't persist snapshot after status update: {e:?}");
            }
            StatusCode::NO_CONTENT
        }
    }
}
