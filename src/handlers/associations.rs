use super::AppState;
use crate::search::SearchParams;
use crate::types::{Chromosome, SearchResult};
use crate::{Error, Result};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};

type Params = std::result::Result<Query<SearchParams>, QueryRejection>;

pub async fn get_associations(
    State(state): State<AppState>,
    query: Params,
) -> Result<Json<SearchResult>> {
    run_search(&state, params(query)?).await
}

pub async fn get_chromosome_associations(
    State(state): State<AppState>,
    Path(chromosome): Path<String>,
    query: Params,
) -> Result<Json<SearchResult>> {
    let mut params = params(query)?;
    params.chromosome = Some(chromosome.parse::<Chromosome>()?);
    run_search(&state, params).await
}

pub async fn get_variant_associations(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    query: Params,
) -> Result<Json<SearchResult>> {
    let mut params = params(query)?;
    params.snp = Some(variant_id);
    run_search(&state, params).await
}

pub async fn get_study_associations(
    State(state): State<AppState>,
    Path(study): Path<String>,
    query: Params,
) -> Result<Json<SearchResult>> {
    let mut params = params(query)?;
    params.study = Some(study);
    run_search(&state, params).await
}

pub async fn get_trait_associations(
    State(state): State<AppState>,
    Path(trait_id): Path<String>,
    query: Params,
) -> Result<Json<SearchResult>> {
    let mut params = params(query)?;
    params.trait_id = Some(trait_id);
    run_search(&state, params).await
}

fn params(query: Params) -> Result<SearchParams> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

/// Searches block on file I/O, so each one runs on the blocking pool.
async fn run_search(state: &AppState, params: SearchParams) -> Result<Json<SearchResult>> {
    let search = state.search.clone();
    let result = tokio::task::spawn_blocking(move || search.search(&params))
        .await
        .map_err(|e| Error::Internal(format!("search task failed: {}", e)))??;
    Ok(Json(result))
}
