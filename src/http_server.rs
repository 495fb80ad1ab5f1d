// HTTP REST API Server Implementation
// Provides JSON API for the knowledge-graph orchestration backend: upload
// intake, index job control, search, and derived-metrics endpoints (§4.7).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::MultipartError;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::artifact_store::ParquetArtifactStore;
use crate::config::Config;
use crate::contracts::ArtifactStore;
use crate::error::AppError;
use crate::metrics_cache::MetricsCache;
use crate::search_gateway::SearchGateway;
use crate::supervisor::Supervisor;
use crate::topology::TopologyProjector;
use crate::types::{Community, RankedRelationship, Statistics, UploadedFile};
use crate::upload_intake::UploadIntake;
use crate::validation::entity as validate_entity;

/// Upload bodies are capped well above the 10 MiB per-file limit (§4.4 rule
/// 3) to leave room for multipart framing overhead.
const MAX_UPLOAD_BODY_SIZE: usize = 16 * 1024 * 1024;

static SERVER_START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ParquetArtifactStore>,
    pub cache: Arc<MetricsCache>,
    pub supervisor: Arc<Supervisor>,
    pub intake: Arc<UploadIntake>,
    pub search: Arc<SearchGateway>,
    pub topology: Arc<TopologyProjector>,
    pub config: Arc<Config>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: String,
    file: UploadedFile,
    path: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct IndexingStatusResponse {
    is_indexing: bool,
    progress: u8,
    message: String,
}

impl From<crate::types::IndexJob> for IndexingStatusResponse {
    fn from(job: crate::types::IndexJob) -> Self {
        Self {
            is_indexing: job.is_running(),
            progress: job.progress,
            message: job.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    community_level: Option<u32>,
    response_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CommunitiesResponse {
    communities: Vec<Community>,
    total: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct EntityTypesResponse {
    types: Vec<crate::types::EntityTypeCount>,
    total_entities: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct TopRelationshipsResponse {
    relationships: Vec<RankedRelationship>,
    total: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    data_dir: String,
    cors_origin: String,
    port: u16,
    indexer_timeout_secs: u64,
    search_timeout_secs: u64,
}

pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .cors_origin
                .parse::<axum::http::HeaderValue>()
                .unwrap_or_else(|_| axum::http::HeaderValue::from_static("http://localhost:5173")),
        )
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/", get(status))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files", get(list_files))
        .route("/api/files/:id", delete(delete_file))
        .route("/api/indexing/start", post(start_indexing))
        .route("/api/indexing/status", get(indexing_status))
        .route("/api/search/global", post(global_search))
        .route("/api/search/local", post(local_search))
        .route("/api/search/suggestions", get(search_suggestions))
        .route("/api/communities", get(list_communities))
        .route("/api/statistics", get(statistics))
        .route("/api/entity-types", get(entity_types))
        .route("/api/relationships/top", get(top_relationships))
        .route("/api/graph/topology", get(graph_topology))
        .route("/api/graph/entity/:id", get(entity_analysis))
        .route("/api/config", get(get_config))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_SIZE))
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let port = state.config.port;
    let app = create_server(state);
    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;

    info!("knowledge-graph orchestration backend starting on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status() -> Json<StatusResponse> {
    let _uptime = SERVER_START_TIME.elapsed();
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut filename: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            content = Some(field.bytes().await.map(|b| b.to_vec()).map_err(multipart_error)?);
        }
    }

    let filename = filename.ok_or_else(|| AppError::validation("multipart field \"file\" is required"))?;
    let content = content.ok_or_else(|| AppError::validation("multipart field \"file\" is required"))?;
    let content_length = content.len() as u64;

    let file = state.intake.upload(&filename, &content, content_length).await?;
    let path = format!("{}/{}", state.config.input_dir().display(), file.name);

    Ok(Json(UploadResponse {
        message: "file uploaded".to_string(),
        file,
        path,
    }))
}

async fn next_field(
    multipart: &mut Multipart,
) -> Result<Option<axum::extract::multipart::Field<'_>>, AppError> {
    multipart.next_field().await.map_err(multipart_error)
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::validation(format!("malformed multipart body: {e}"))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<UploadedFile>>, AppError> {
    Ok(Json(state.intake.list().await?))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.intake.delete(&id).await?;
    Ok(Json(MessageResponse {
        message: format!("deleted {id}"),
    }))
}

async fn start_indexing(
    State(state): State<AppState>,
) -> Result<Json<IndexingStatusResponse>, AppError> {
    let result = state.supervisor.start();
    if !result.accepted {
        return Err(AppError::conflict(
            result.reason.unwrap_or_else(|| "already running".to_string()),
        ));
    }
    Ok(Json(state.supervisor.status().into()))
}

async fn indexing_status(
    State(state): State<AppState>,
) -> Json<IndexingStatusResponse> {
    Json(state.supervisor.status().into())
}

async fn global_search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if let Some(level) = body.community_level {
        validate_entity::validate_community_level(level)?;
    }
    let outcome = state
        .search
        .global_search(
            &body.query,
            body.community_level,
            body.response_type.as_deref(),
        )
        .await?;
    Ok(Json(SearchResponse {
        response: outcome.response,
    }))
}

async fn local_search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if let Some(level) = body.community_level {
        validate_entity::validate_community_level(level)?;
    }
    let outcome = state
        .search
        .local_search(
            &body.query,
            body.community_level,
            body.response_type.as_deref(),
        )
        .await?;
    Ok(Json(SearchResponse {
        response: outcome.response,
    }))
}

async fn search_suggestions(State(state): State<AppState>) -> Json<SuggestionsResponse> {
    Json(SuggestionsResponse {
        suggestions: state.search.suggestions(),
    })
}

async fn list_communities(
    State(state): State<AppState>,
) -> Result<Json<CommunitiesResponse>, AppError> {
    let communities = state.store.load_communities(None).await?;
    let total = communities.len();
    Ok(Json(CommunitiesResponse {
        communities,
        total,
        message: "ok".to_string(),
    }))
}

async fn statistics(State(state): State<AppState>) -> Result<Json<Statistics>, AppError> {
    Ok(Json(state.cache.statistics().await?))
}

async fn entity_types(
    State(state): State<AppState>,
) -> Result<Json<EntityTypesResponse>, AppError> {
    let types = state.cache.entity_type_histogram().await?;
    let total_entities = state.store.load_entities(None).await?.len();
    Ok(Json(EntityTypesResponse {
        types,
        total_entities,
        message: "ok".to_string(),
    }))
}

async fn top_relationships(
    State(state): State<AppState>,
) -> Result<Json<TopRelationshipsResponse>, AppError> {
    const DEFAULT_K: usize = 10;
    let relationships = state.cache.top_relationships(DEFAULT_K).await?;
    let total = relationships.len();
    Ok(Json(TopRelationshipsResponse {
        relationships,
        total,
        message: "ok".to_string(),
    }))
}

async fn graph_topology(
    State(state): State<AppState>,
) -> Result<Json<crate::types::TopologyView>, AppError> {
    Ok(Json(state.topology.project().await?))
}

async fn entity_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::types::EntityAnalysis>, AppError> {
    validate_entity::validate_entity_id(&id)?;
    Ok(Json(state.cache.entity_analysis(&id).await?))
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        data_dir: state.config.data_dir.display().to_string(),
        cors_origin: state.config.cors_origin.clone(),
        port: state.config.port,
        indexer_timeout_secs: state.config.index_timeout.as_secs(),
        search_timeout_secs: state.config.search_timeout.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_gateway::SubprocessSearchBackend;
    use std::time::Duration;

    fn test_state(dir: &std::path::Path) -> AppState {
        let data_dir = dir.to_path_buf();
        std::fs::create_dir_all(data_dir.join("input")).unwrap();
        std::fs::create_dir_all(data_dir.join("output")).unwrap();

        let config = Arc::new(Config {
            data_dir: data_dir.clone(),
            settings_path: data_dir.join("settings.yaml"),
            port: 0,
            cors_origin: "http://localhost:5173".to_string(),
            indexer_bin: "true".to_string(),
            index_timeout: Duration::from_secs(1),
            search_timeout: Duration::from_secs(1),
        });

        let store = Arc::new(ParquetArtifactStore::new(config.output_dir()));
        let cache = Arc::new(MetricsCache::new(store.clone()));
        let supervisor = Arc::new(Supervisor::new(
            config.data_dir.clone(),
            config.output_dir(),
            config.indexer_bin.clone(),
            store.clone(),
            cache.clone(),
            config.index_timeout,
        ));
        let intake = Arc::new(UploadIntake::new(config.input_dir(), supervisor.clone()));
        let backend = Arc::new(SubprocessSearchBackend::new(
            config.indexer_bin.clone(),
            config.data_dir.clone(),
        ));
        let search = Arc::new(SearchGateway::new(
            backend,
            store.clone(),
            config.search_timeout,
        ));
        let topology = Arc::new(TopologyProjector::new(store.clone()));

        AppState {
            store,
            cache,
            supervisor,
            intake,
            search,
            topology,
            config,
        }
    }

    #[tokio::test]
    async fn status_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let Json(body) = status().await;
        let _ = state;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn indexing_status_defaults_idle() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let Json(body) = indexing_status(State(state)).await;
        assert!(!body.is_indexing);
        assert_eq!(body.progress, 0);
    }

    #[tokio::test]
    async fn statistics_on_empty_store_has_zero_density() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let result = statistics(State(state)).await;
        // No artifacts on disk yet: current_generation() is none, so the
        // cache still computes over an empty snapshot rather than erroring.
        assert!(result.is_ok());
    }
}
