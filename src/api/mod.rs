//! HTTP surface: JSON over axum. Every request names its tenant in the
//! `x-tenant-id` header and carries the shared bearer token.

pub mod appointments;
pub mod catalog;
pub mod dto;
pub mod error;
pub mod extract;
pub mod session;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};

use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::tenant::TenantManager;

pub use error::ApiError;
pub use session::Session;

#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub api_token: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/appointments",
            post(appointments::create).get(appointments::list),
        )
        .route(
            "/appointments/{id}",
            get(appointments::get_one)
                .put(appointments::update)
                .delete(appointments::delete),
        )
        .route("/appointments/{id}/status", patch(appointments::change_status))
        .route("/appointments/{id}/transaction", post(appointments::link_transaction))
        .route("/availability", get(appointments::availability))
        .route("/events", get(appointments::events))
        .route("/locations", get(catalog::list_locations))
        .route(
            "/locations/{id}",
            get(catalog::get_location).put(catalog::put_location),
        )
        .route("/services", get(catalog::list_services))
        .route(
            "/services/{id}",
            get(catalog::get_service)
                .put(catalog::put_service)
                .delete(catalog::delete_service),
        )
        .route("/staff", get(catalog::list_staff))
        .route(
            "/staff/{id}",
            get(catalog::get_staff)
                .put(catalog::put_staff)
                .delete(catalog::delete_staff),
        )
        .route("/staff/{id}/conflicts", get(appointments::conflicts))
        .route("/clients", get(catalog::list_clients))
        .route(
            "/clients/{id}",
            get(catalog::get_client)
                .put(catalog::put_client)
                .delete(catalog::delete_client),
        )
        .route("/settings", get(catalog::get_settings).put(catalog::put_settings))
        .route("/health", get(health))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
