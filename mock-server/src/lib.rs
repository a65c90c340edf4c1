//! In-memory stand-in for the Valtro backend.
//!
//! Serves the `/api/v1` organization and project routes with `{ message, data }`
//! envelopes. Used by the core integration tests and for local development.

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;

mod error;
mod routes;
mod state;

pub use error::BackendError;
pub use routes::{ORGANIZATION_HEADER, USER_ID_HEADER};
pub use state::{Db, MockBackend, Organization, Project};

pub fn app() -> Router {
    app_with_state(MockBackend::new())
}

pub fn app_with_state(backend: MockBackend) -> Router {
    let api = Router::new()
        .route(
            "/organizations",
            get(routes::list_organizations).post(routes::create_organization),
        )
        .route("/organizations/check", get(routes::check_onboarding))
        .route("/organizations/with-projects", get(routes::organization_with_projects))
        .route(
            "/organizations/{id}",
            get(routes::get_organization)
                .put(routes::update_organization)
                .patch(routes::patch_organization)
                .delete(routes::delete_organization),
        )
        .route("/onboarding", post(routes::complete_onboarding))
        .route("/projects", post(routes::create_project))
        .route("/projects/organization/{organization_id}", get(routes::list_projects))
        .route(
            "/projects/{id}",
            put(routes::update_project).delete(routes::delete_project),
        )
        .route("/projects/{id}/regenerate-api-key", post(routes::regenerate_api_key))
        .layer(middleware::from_fn_with_state(backend.clone(), routes::inject_faults));

    Router::new().nest("/api/v1", api).with_state(backend)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, MockBackend::new()).await
}

pub async fn run_with_state(listener: TcpListener, backend: MockBackend) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(backend)).await
}
