mod associations;
mod service_info;

pub use associations::{
    get_associations, get_chromosome_associations, get_study_associations,
    get_trait_associations, get_variant_associations,
};
pub use service_info::service_info;

use crate::config::Backend;
use crate::search::AssociationSearch;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<AssociationSearch>,
    pub backend: Backend,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/associations", get(get_associations))
        .route("/associations/:variant_id", get(get_variant_associations))
        .route(
            "/chromosomes/:chromosome/associations",
            get(get_chromosome_associations),
        )
        .route("/studies/:study/associations", get(get_study_associations))
        .route("/traits/:trait_id/associations", get(get_trait_associations))
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
