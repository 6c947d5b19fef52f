// src/server.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use serde_json::json;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::budget::BudgetComparison;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::metrics::{
    BreakdownPeriod, BreakdownRow, CategoryEngagement, DistributionKey, DistributionRow,
    ShortfallRow, TeamSummary, TeamWeekTrend, TimeOffRow, TopPerformer, WeekScope, WeeklySummary,
};
use crate::model::FactRow;
use crate::pipeline::PipelineResult;
use crate::report::RunReport;
use crate::store::ArtifactStore;
use crate::temporal::WeekIndex;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("No processed data available; run the pipeline first")]
    NoArtifact,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid bind address '{0}'")]
    BadAddress(String),
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::NoArtifact => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::MissingInput { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Error occurred: {:?}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ArtifactStore>,
}

impl AppState {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    fn result(&self) -> Result<PipelineResult, ServerError> {
        self.store
            .load()?
            .map(|artifact| artifact.result)
            .ok_or(ServerError::NoArtifact)
    }
}

// --- Query parameters ---

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    pub scope: Option<String>,
}

impl ScopeQuery {
    fn week_scope(&self) -> Result<WeekScope, ServerError> {
        match self.scope.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(WeekScope::AllWeeks),
            Some("latest") => Ok(WeekScope::Latest),
            Some(label) => label
                .parse::<WeekIndex>()
                .map(WeekScope::Week)
                .map_err(ServerError::BadRequest),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DistributionQuery {
    pub by: Option<DistributionKey>,
    pub week: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeekQuery {
    pub week: Option<String>,
}

impl WeekQuery {
    fn week(&self) -> Result<Option<WeekIndex>, ServerError> {
        self.week
            .as_deref()
            .map(str::parse::<WeekIndex>)
            .transpose()
            .map_err(ServerError::BadRequest)
    }
}

#[derive(Debug, Deserialize)]
pub struct BreakdownQuery {
    pub employee: String,
    pub period: Option<BreakdownPeriod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    let summary_routes = Router::new()
        .route("/weekly", get(handle_weekly))
        .route("/teams", get(handle_teams))
        .route("/trend", get(handle_trend))
        .route("/engagement", get(handle_engagement))
        .route("/distribution", get(handle_distribution))
        .route("/top", get(handle_top_performers))
        .route("/time-off", get(handle_time_off))
        .route("/employee", get(handle_employee_breakdown));
    let api_routes = Router::new()
        .route("/facts", get(handle_facts))
        .route("/report", get(handle_report))
        .route("/budget", get(handle_budget))
        .route("/checks/shortfall", get(handle_shortfall))
        .nest("/summary", summary_routes);

    Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the report API over the artifact directory of `config`.
/// TLS is used when both a certificate and a key path are configured.
pub async fn serve(config: &AppConfig) -> Result<(), ServerError> {
    let app = router(AppState::new(ArtifactStore::new(config.artifact_dir.clone())));
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|_| ServerError::BadAddress(config.bind_addr.clone()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| ServerError::TlsConfig(format!("Failed to load TLS cert/key: {}", e)))?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

// --- Handlers ---

async fn handle_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    let Some(artifact) = state.store.load()? else {
        return Ok(Json(json!({ "artifact_present": false })));
    };
    let warnings: BTreeMap<&str, usize> = artifact
        .result
        .report
        .counts()
        .into_iter()
        .map(|(kind, count)| (kind.label(), count))
        .collect();
    Ok(Json(json!({
        "artifact_present": true,
        "generated_at": artifact.metadata.generated_at,
        "sources": artifact.metadata.sources,
        "fact_rows": artifact.metadata.fact_rows,
        "latest_week": artifact.result.latest_week(),
        "warnings": warnings,
    })))
}

async fn handle_facts(State(state): State<AppState>) -> Result<Json<Vec<FactRow>>, ServerError> {
    Ok(Json(state.result()?.facts))
}

async fn handle_report(State(state): State<AppState>) -> Result<Json<RunReport>, ServerError> {
    Ok(Json(state.result()?.report))
}

async fn handle_weekly(State(state): State<AppState>) -> Result<Json<Vec<WeeklySummary>>, ServerError> {
    Ok(Json(state.result()?.weekly_summaries()))
}

async fn handle_teams(State(state): State<AppState>) -> Result<Json<Vec<TeamSummary>>, ServerError> {
    Ok(Json(state.result()?.team_report()?))
}

async fn handle_trend(State(state): State<AppState>) -> Result<Json<Vec<TeamWeekTrend>>, ServerError> {
    Ok(Json(state.result()?.team_weekly_trend()?))
}

async fn handle_engagement(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<CategoryEngagement>>, ServerError> {
    let scope = query.week_scope()?;
    Ok(Json(state.result()?.category_engagement(scope)?))
}

async fn handle_distribution(
    State(state): State<AppState>,
    Query(query): Query<DistributionQuery>,
) -> Result<Json<Vec<DistributionRow>>, ServerError> {
    let week = WeekQuery { week: query.week }.week()?;
    let key = query.by.unwrap_or(DistributionKey::Position);
    Ok(Json(state.result()?.workload_distribution(week, key)?))
}

async fn handle_top_performers(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<TopPerformer>>, ServerError> {
    Ok(Json(state.result()?.top_performers(query.limit)?))
}

async fn handle_time_off(
    State(state): State<AppState>,
    Query(query): Query<WeekQuery>,
) -> Result<Json<Vec<TimeOffRow>>, ServerError> {
    let week = query.week()?;
    Ok(Json(state.result()?.time_off_breakdown(week)?))
}

async fn handle_employee_breakdown(
    State(state): State<AppState>,
    Query(query): Query<BreakdownQuery>,
) -> Result<Json<Vec<BreakdownRow>>, ServerError> {
    let period = query.period.unwrap_or(BreakdownPeriod::Overall);
    Ok(Json(state.result()?.employee_breakdown(&query.employee, period)))
}

async fn handle_budget(State(state): State<AppState>) -> Result<Json<Vec<BudgetComparison>>, ServerError> {
    Ok(Json(state.result()?.budget_comparison()?))
}

async fn handle_shortfall(State(state): State<AppState>) -> Result<Json<Vec<ShortfallRow>>, ServerError> {
    Ok(Json(state.result()?.capacity_shortfall()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::loader::{SourceFile, SourceFormat};
    use crate::pipeline::{run, CleaningOptions, PipelineInputs};
    use axum::{body::Body, http::Request};
    use std::path::PathBuf;
    use tower::ServiceExt;

    const TIMESHEET: &str = "Acme Engineering\nTime Activities by Employee Detail\nJanuary 2025\n\n\
,Activity date,Client full name,Product/Service full name,Duration\n\
*Jane,,,,\n\
,01/15/2025,1037-882 Acme Corp,Rates:Senior Engineer I,8:30\n\
,01/16/2025,Acme Corp,Time off:Vacation,8:00\n";

    const ROSTER: &str = "Employee Name,Team Name,Position,USD/Hr\nJane,Sagar & Team,Senior Engineer,100\n";

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("workload_server_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn app_with_artifact(name: &str, with_roster: bool) -> (Router, PathBuf) {
        let dir = temp_dir(name);
        let inputs = PipelineInputs {
            timesheet: SourceFile::from_bytes("timesheet.csv", SourceFormat::Csv, TIMESHEET.as_bytes().to_vec()),
            roster: with_roster
                .then(|| SourceFile::from_bytes("roster.csv", SourceFormat::Csv, ROSTER.as_bytes().to_vec())),
            budget: None,
        };
        let result = run(&inputs, &PipelineConfig::default(), CleaningOptions::default()).unwrap();
        let store = ArtifactStore::new(&dir);
        store.save(&result).unwrap();
        (router(AppState::new(store)), dir)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_without_artifact_reports_absent() {
        let dir = temp_dir("status_absent");
        let app = router(AppState::new(ArtifactStore::new(&dir)));
        let (status, body) = get_json(app, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["artifact_present"], false);
    }

    #[tokio::test]
    async fn facts_without_artifact_is_not_found() {
        let dir = temp_dir("facts_absent");
        let app = router(AppState::new(ArtifactStore::new(&dir)));
        let (status, body) = get_json(app, "/api/facts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("No processed data"));
    }

    #[tokio::test]
    async fn weekly_summary_is_served_from_artifact() {
        let (app, dir) = app_with_artifact("weekly", true);
        let (status, body) = get_json(app, "/api/summary/weekly").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1, "one employee-week expected: {}", body);
        assert_eq!(rows[0]["employee_name"], "Jane");
        assert_eq!(rows[0]["week"], "Week 3");
        assert_eq!(rows[0]["billable_hours"], 8.5);
        assert_eq!(rows[0]["available_hours"], 32.0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn team_summary_carries_target_flags() {
        let (app, dir) = app_with_artifact("teams", true);
        let (status, body) = get_json(app, "/api/summary/teams").await;
        assert_eq!(status, StatusCode::OK);
        let sagar = &body.as_array().unwrap()[0];
        assert_eq!(sagar["team_name"], "Sagar & Team");
        assert_eq!(sagar["meets_utilization_target"], false, "8.5 of 32 hours is below 75%");
        assert!(sagar["target_achieved_pct"].as_f64().unwrap() > 0.0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn time_off_and_employee_breakdown_are_served() {
        let (app, dir) = app_with_artifact("time_off", true);
        let (status, body) = get_json(app.clone(), "/api/summary/time-off").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["position"], "Senior Engineer");
        assert_eq!(body[0]["hours"], 8.0);

        let (status, body) = get_json(app, "/api/summary/employee?employee=Jane&period=monthly").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["period"], "January 2025");
        assert_eq!(body[0]["category"], "Projects");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn budget_without_register_is_unprocessable() {
        let (app, dir) = app_with_artifact("budget_missing", true);
        let (status, body) = get_json(app, "/api/budget").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("budget register"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn team_summary_without_roster_is_unprocessable() {
        let (app, dir) = app_with_artifact("teams_missing", false);
        let (status, _) = get_json(app, "/api/summary/teams").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn invalid_scope_is_bad_request() {
        let (app, dir) = app_with_artifact("bad_scope", true);
        let (status, _) = get_json(app, "/api/summary/engagement?scope=fortnight").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let _ = std::fs::remove_dir_all(dir);
    }
}
