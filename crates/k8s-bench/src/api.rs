//! HTTP surface for the orchestration operations.

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cleanup::{delete_site_resources, CleanupReport};
use crate::cluster::ClusterConnector;
use crate::error::{Error, Result};
use crate::ingress::{create_ingress, read_ingress, repoint_ingress};
use crate::jobs::{create_upgrade_job, get_status};
use crate::manifest::require_params;
use crate::settings::{BenchSettings, SettingsProvider};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Source of the bench settings, read on every request.
    pub settings: Arc<dyn SettingsProvider>,
    /// Resolves a cluster handle per operation.
    pub cluster: Arc<dyn ClusterConnector>,
}

impl AppState {
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsProvider>, cluster: Arc<dyn ClusterConnector>) -> Self {
        Self { settings, cluster }
    }

    /// Read the settings off the async runtime; file providers block on IO.
    async fn load_settings(&self) -> Result<BenchSettings> {
        let provider = Arc::clone(&self.settings);
        let settings = tokio::task::spawn_blocking(move || provider.load())
            .await
            .map_err(|err| Error::Configuration(format!("Settings loader failed: {err}")))??;
        debug!(namespace = ?settings.namespace, "Loaded bench settings");
        Ok(settings)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Build the router exposing every orchestration operation.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/upgrade-site", post(upgrade_site_handler))
        .route(
            "/api/ingress",
            post(create_ingress_handler).get(read_ingress_handler),
        )
        .route("/api/ingress/repoint", post(repoint_ingress_handler))
        .route("/api/site-resources/delete", post(delete_site_handler))
        .route("/api/job-status", get(job_status_handler))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Request parameters taken from a JSON body, a form body or the query string.
///
/// Unreadable input yields empty parameters so handlers answer with the usual
/// 400 report naming every required parameter.
struct Params<T>(T);

impl<S, T> FromRequest<S> for Params<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let uri = req.uri().clone();
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        let parsed = if req.method() == Method::GET {
            Query::<T>::try_from_uri(&uri)
                .map(|Query(params)| params)
                .map_err(|rejection| rejection.body_text())
        } else if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(params)| params)
                .map_err(|rejection| rejection.body_text())
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(params)| params)
                .map_err(|rejection| rejection.body_text())
        };

        let params = parsed.or_else(|reason| {
            debug!(%reason, "Request body unreadable, falling back to query parameters");
            Query::<T>::try_from_uri(&uri).map(|Query(params)| params)
        });
        Ok(Self(params.unwrap_or_default()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpgradeSiteRequest {
    site_name: Option<String>,
    base_pvc_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SiteRequest {
    site_name: Option<String>,
}

impl SiteRequest {
    fn site_name(&self) -> Result<&str> {
        let site = self.site_name.as_deref().unwrap_or_default();
        require_params([("site_name", site)])?;
        Ok(site)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobStatusQuery {
    job_name: Option<String>,
}

async fn upgrade_site_handler(
    State(state): State<AppState>,
    Params(request): Params<UpgradeSiteRequest>,
) -> Result<Json<Value>> {
    let settings = state.load_settings().await?;
    let created = create_upgrade_job(
        state.cluster.as_ref(),
        &settings,
        request.site_name.as_deref().unwrap_or_default(),
        request.base_pvc_name.as_deref().unwrap_or_default(),
    )
    .await?;
    Ok(Json(created))
}

async fn create_ingress_handler(
    State(state): State<AppState>,
    Params(request): Params<SiteRequest>,
) -> Result<Json<Value>> {
    let site = request.site_name()?;
    let settings = state.load_settings().await?;
    Ok(Json(create_ingress(state.cluster.as_ref(), &settings, site).await?))
}

async fn read_ingress_handler(
    State(state): State<AppState>,
    Params(query): Params<SiteRequest>,
) -> Result<Json<Value>> {
    let site = query.site_name()?;
    let settings = state.load_settings().await?;
    Ok(Json(read_ingress(state.cluster.as_ref(), &settings, site).await?))
}

async fn repoint_ingress_handler(
    State(state): State<AppState>,
    Params(request): Params<SiteRequest>,
) -> Result<Json<Value>> {
    let site = request.site_name()?;
    let settings = state.load_settings().await?;
    Ok(Json(repoint_ingress(state.cluster.as_ref(), &settings, site).await?))
}

async fn delete_site_handler(
    State(state): State<AppState>,
    Params(request): Params<SiteRequest>,
) -> Result<Json<CleanupReport>> {
    let site = request.site_name()?;
    let settings = state.load_settings().await?;
    let report = delete_site_resources(state.cluster.as_ref(), &settings, site).await?;
    Ok(Json(report))
}

async fn job_status_handler(
    State(state): State<AppState>,
    Params(query): Params<JobStatusQuery>,
) -> Result<Json<Value>> {
    let job_name = query.job_name.as_deref().unwrap_or_default();
    require_params([("job_name", job_name)])?;
    let settings = state.load_settings().await?;
    Ok(Json(get_status(state.cluster.as_ref(), &settings, job_name).await?))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "k8s-bench",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
