//! Application setup: state container and router.

use std::sync::Arc;

use axum::extract::Extension;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{authenticate, JwtService};
use super::routes;
use crate::kernel::plugins::InventoryPlugin;
use crate::kernel::BrokerDeps;
use crate::parsing::TemplateStore;
use crate::Settings;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub deps: BrokerDeps,
    pub inventory: Arc<dyn InventoryPlugin>,
    pub jwt: Arc<JwtService>,
    pub templates: Arc<TemplateStore>,
    /// Families the dispatcher will accept on the raw execute endpoint.
    pub driver_families: Vec<String>,
}

impl AppState {
    pub fn settings(&self) -> &Settings {
        &self.deps.settings
    }
}

async fn auth_middleware(
    state: AppState,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match authenticate(state.settings(), &state.jwt, request.headers()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

/// Build the router: `/api` carries the authenticated surface, `/metrics`
/// and `/health` stay open for scrapers and probes.
pub fn build_app(state: AppState) -> Router {
    let auth_state = state.clone();

    let api = Router::new()
        .route("/raw/execute/:driver_family", post(routes::raw::execute))
        .route("/device/:name/execute", post(routes::device::execute))
        .route(
            "/device/:name/execute_batch",
            post(routes::device::execute_batch),
        )
        .route("/job/:id", get(routes::job::get_job))
        .route("/inventory/export", get(routes::inventory::export))
        .route("/inventory/:name", get(routes::inventory::get_device))
        .route(
            "/cache",
            get(routes::cache::list_keys).delete(routes::cache::clear_all),
        )
        .route("/cache/stats", get(routes::cache::stats))
        .route("/cache/:device", delete(routes::cache::invalidate_device))
        .route("/credentials", get(routes::credentials::list))
        .route("/monitoring/workers", get(routes::monitoring::workers))
        .route(
            "/monitoring/failed_commands",
            get(routes::monitoring::failed_commands),
        )
        .route(
            "/monitoring/stats/summary",
            get(routes::monitoring::stats_summary),
        )
        .route(
            "/monitoring/device_stats/:name",
            get(routes::monitoring::device_stats),
        )
        .layer(middleware::from_fn(move |request, next| {
            let state = auth_state.clone();
            auth_middleware(state, request, next)
        }));

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(routes::metrics::scrape))
        .route("/health", get(routes::health::health))
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
