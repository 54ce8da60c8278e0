//! Axum surface for lead ingestion: health, batch import, admin trigger.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bidfront_core::{
    classify_posting_type, classify_trade, parse_flexible_date, LeadCandidate, PostingType, TradeCategory,
};
use bidfront_sync::{Reconciler, SyncPipeline};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "bidfront-web";

pub const SCRAPER_SECRET_HEADER: &str = "x-scraper-secret";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub reconciler: Reconciler,
    pub scraper_secret: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, scraper_secret: Option<String>) -> Self {
        Self {
            reconciler: pipeline.reconciler().clone(),
            pipeline,
            scraper_secret,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/projects/import", post(import_handler))
        .route("/api/admin/scrape", post(admin_scrape_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web listener bound");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler failed");
            }
        })
        .await?;
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

/// Lead as submitted to the import endpoint. Posting type and trade are
/// classified from the title when omitted; dates go through the flexible
/// parser and fall back to null.
#[derive(Debug, Deserialize)]
struct ImportedLead {
    title: String,
    #[serde(rename = "type", default)]
    posting_type: Option<PostingType>,
    #[serde(default)]
    trade_category: Option<TradeCategory>,
    location: String,
    #[serde(default)]
    filing_date: Option<String>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    estimated_value: Option<f64>,
    #[serde(default)]
    contact_name: Option<String>,
    #[serde(default)]
    contact_email: Option<String>,
    #[serde(default)]
    contact_phone: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl From<ImportedLead> for LeadCandidate {
    fn from(lead: ImportedLead) -> Self {
        Self {
            posting_type: lead
                .posting_type
                .unwrap_or_else(|| classify_posting_type(&lead.title)),
            trade_category: lead
                .trade_category
                .unwrap_or_else(|| classify_trade(&lead.title)),
            filing_date: lead.filing_date.as_deref().and_then(parse_flexible_date),
            deadline: lead.deadline.as_deref().and_then(parse_flexible_date),
            title: lead.title,
            location: lead.location,
            estimated_value: lead.estimated_value,
            contact_name: lead.contact_name,
            contact_email: lead.contact_email,
            contact_phone: lead.contact_phone,
            source_url: lead.source_url,
            description: lead.description,
        }
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

fn parse_import_body(body: &[u8]) -> Result<Vec<LeadCandidate>, Response> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| bad_request("Body must be a non-empty array of projects"))?;
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(bad_request("Body must be a non-empty array of projects")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<ImportedLead>(item)
                .map(LeadCandidate::from)
                .map_err(|err| bad_request(format!("Invalid project at index {index}: {err}")))
        })
        .collect()
}

async fn import_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let candidates = match parse_import_body(&body) {
        Ok(candidates) => candidates,
        Err(response) => return response,
    };

    match state.reconciler.reconcile(&candidates).await {
        Ok(counts) => {
            info!(inserted = counts.inserted, updated = counts.updated, "import reconciled");
            Json(json!({
                "success": true,
                "inserted": counts.inserted,
                "updated": counts.updated,
            }))
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "import failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Import failed", "detail": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn admin_scrape_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.scraper_secret {
        let supplied = headers
            .get(SCRAPER_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if supplied != Some(secret.as_str()) {
            warn!("admin scrape rejected: secret mismatch");
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
        }
    }

    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        let report = pipeline.run_full_cycle().await;
        info!(summary = %report.summary_line(), "admin-triggered cycle finished");
    });

    (StatusCode::ACCEPTED, Json(json!({ "message": "Scrape started" }))).into_response()
}
