use super::AppState;
use crate::config::Backend;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub backend: &'static str,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let config = state.search.config();
    Json(ServiceInfo {
        id: "org.example.sumstatsr".to_string(),
        name: "sumstatsr".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Summary statistics association search".to_string(),
        backend: match state.backend {
            Backend::Blocks => "blocks",
            Backend::Tables => "tables",
            Backend::Collections => "collections",
        },
        default_page_size: config.default_size,
        max_page_size: config.max_size,
    })
}
