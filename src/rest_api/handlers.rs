//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use kube::api::Api;
use tracing::{error, instrument};

use crate::controller::{gate, ControllerState};
use crate::crd::MaintenanceWindow;
use crate::Error;

use super::dto::{
    ErrorResponse, GateQuery, GateResponse, HealthResponse, WindowListResponse, WindowSummary,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List MaintenanceWindows visible to the supervisor
#[instrument(skip(state))]
pub async fn list_windows(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<WindowListResponse>, ApiError> {
    let api: Api<MaintenanceWindow> = match &state.watch_namespace {
        Some(ns) => Api::namespaced(state.client.clone(), ns),
        None => Api::all(state.client.clone()),
    };

    match api.list(&Default::default()).await {
        Ok(windows) => {
            let now = Utc::now();
            let items: Vec<WindowSummary> = windows
                .items
                .iter()
                .map(|mw| WindowSummary::from_window(mw, &now))
                .collect();

            let total = items.len();
            Ok(Json(WindowListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list maintenance windows: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Whether a disruptive operation in `namespace` may run
#[instrument(skip(state, query), fields(namespace = %namespace))]
pub async fn gate_namespace(
    State(state): State<Arc<ControllerState>>,
    Path(namespace): Path<String>,
    Query(query): Query<GateQuery>,
) -> Result<Json<GateResponse>, ApiError> {
    let at = query.at.unwrap_or_else(|| Utc::now().fixed_offset());
    let api: Api<MaintenanceWindow> = Api::namespaced(state.client.clone(), &namespace);

    let windows = match api.list(&Default::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            error!("Failed to list maintenance windows in {}: {:?}", namespace, e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ));
        }
    };

    match gate(&windows, query.window.as_deref(), &at) {
        Ok(decision) => Ok(Json(GateResponse::new(&namespace, &at, decision))),
        Err(e @ Error::ValidationError(_)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("invalid_windows", &e.to_string())),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("gate_failed", &e.to_string())),
        )),
    }
}
