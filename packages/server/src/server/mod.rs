//! HTTP dispatcher: submission API, job polling, cache and inventory
//! management, and the observability surface.

pub mod app;
pub mod auth;
pub mod models;
pub mod routes;

pub use app::{build_app, AppState};
