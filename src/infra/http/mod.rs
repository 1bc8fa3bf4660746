mod middleware;
mod teachers;

use std::sync::Arc;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{
    archive::ArchiveLinks, certificates::CertificateService, directory::TeacherDirectory,
    maintenance::MaintenanceGate,
};

pub use middleware::RequestContext;

/// Header carrying the maintenance bypass secret.
pub const MAINTENANCE_SECRET_HEADER: &str = "x-maintenance-secret";

#[derive(Clone)]
pub struct HttpState {
    pub certificates: Arc<CertificateService>,
    pub directory: Arc<dyn TeacherDirectory>,
    pub maintenance: Arc<MaintenanceGate>,
    pub archive: Arc<ArchiveLinks>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/teacher/login", post(teachers::login))
        .route("/teacher/find-account", post(teachers::find_account))
        .route(
            "/teacher/certificate/preview",
            get(teachers::preview_certificate),
        )
        .route(
            "/teacher/certificate/download",
            get(teachers::download_certificate),
        )
        .route(
            "/teacher/certificate/archive-link",
            get(teachers::archive_link),
        )
        .route("/healthz", get(teachers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
