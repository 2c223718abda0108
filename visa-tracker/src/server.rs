//! HTTP surface: dashboard, subscription admin, and JSON views of the
//! latest snapshot.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use visa_common::{AvailabilityTier, VisaCategory, VisaSlotRecord, VisaSubtype};

use crate::app::AppState;
use crate::module::backup::backup_files;
use crate::error::{Result, TrackerError};
use crate::module::slots::{GroupSummary, ScrapeSnapshot};
use crate::module::subscription::store::normalize_email;
use crate::module::subscription::{SubscriptionRequest, SubscriptionUpdate};

const DEFAULT_EARLIEST_LIMIT: usize = 10;
const RECENT_ADMIN_EMAILS: usize = 10;
const RECENT_USER_EMAILS: usize = 5;

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::Validation(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::EmailNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            TrackerError::Fetch(_) | TrackerError::Notification { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A record with its derived fields spelled out
#[derive(Debug, Serialize)]
struct RecordJson<'a> {
    #[serde(flatten)]
    record: &'a VisaSlotRecord,
    category: VisaCategory,
    category_name: &'static str,
    subtype: VisaSubtype,
    tier: AvailabilityTier,
}

impl<'a> From<&'a VisaSlotRecord> for RecordJson<'a> {
    fn from(record: &'a VisaSlotRecord) -> Self {
        let category = record.category();
        Self {
            record,
            category,
            category_name: category.display_name(),
            subtype: record.subtype(),
            tier: record.tier(),
        }
    }
}

fn records_json<'a>(records: impl IntoIterator<Item = &'a VisaSlotRecord>) -> Vec<RecordJson<'a>> {
    records.into_iter().map(RecordJson::from).collect()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/admin/subscriptions", get(admin_list).post(admin_upsert))
        .route(
            "/admin/subscriptions/{email}",
            get(admin_get).put(admin_update).delete(admin_delete),
        )
        .route("/admin/backup", post(admin_backup))
        .route("/admin/export/{email}", get(admin_export))
        .route("/my-subscription/{email}", get(my_subscription))
        .route("/api/visa-data", get(visa_data))
        .route("/api/categories", get(categories))
        .route("/api/locations", get(locations))
        .route("/api/earliest", get(earliest))
        .route("/api/export.csv", get(export_csv))
        .route("/api/refresh", get(refresh).post(refresh))
        .route("/health", get(health))
        .route("/email-config", get(email_config))
        .route("/test-email", post(test_email))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn latest(state: &AppState) -> Option<Arc<ScrapeSnapshot>> {
    state.snapshot.read().await.clone()
}

async fn dashboard(State(state): State<AppState>) -> Result<Html<String>> {
    let snapshot = latest(&state).await;
    let stats = state.stats.get().await;
    let html = state.renderer.render_dashboard(
        snapshot.as_deref(),
        state.subscriptions.count().await,
        stats.last_check,
    )?;
    Ok(Html(html))
}

async fn admin_list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let subscriptions = state.subscriptions.list().await;
    let history_path = state.history.path();

    Json(json!({
        "subscriptions": subscriptions,
        "total_subscriptions": subscriptions.len(),
        "email_log_entries": state.history.len().await,
        "sent_alerts": state.history.sent_alerts().await,
        "recent_emails": state.history.recent(RECENT_ADMIN_EMAILS).await,
        "statistics": state.stats.get().await,
        "data_files": {
            "subscriptions_file": state.subscriptions.path(),
            "backup_file": state.subscriptions.backup_path(),
            "email_log_file": history_path,
            "stats_file": state.stats.path(),
            "files_exist": {
                "subscriptions": state.subscriptions.path().exists(),
                "backup": state.subscriptions.backup_path().exists(),
                "email_log": history_path.exists(),
                "stats": state.stats.path().exists(),
            }
        }
    }))
}

async fn admin_upsert(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse> {
    let upserted = state.subscriptions.create_or_replace(request).await?;
    let created = upserted.created;
    state
        .stats
        .update(|s| {
            if created {
                s.subscriptions_created += 1;
            } else {
                s.subscriptions_updated += 1;
            }
        })
        .await;

    // Best effort; the subscription stands even if the welcome mail fails
    let confirmation_sent = if created && state.notifier.is_configured() {
        match state.notifier.send_confirmation(&upserted.subscription).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Confirmation email not sent: {}", e);
                false
            }
        }
    } else {
        false
    };

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(json!({
            "subscription": upserted.subscription,
            "created": created,
            "confirmation_sent": confirmation_sent,
        })),
    ))
}

async fn admin_get(State(state): State<AppState>, Path(email): Path<String>) -> Result<impl IntoResponse> {
    let subscription = state
        .subscriptions
        .get(&email)
        .await
        .ok_or_else(|| TrackerError::NotFound(normalize_email(&email)))?;
    Ok(Json(subscription))
}

async fn admin_update(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(update): Json<SubscriptionUpdate>,
) -> Result<impl IntoResponse> {
    let subscription = state.subscriptions.update(&email, update).await?;
    state.stats.update(|s| s.subscriptions_updated += 1).await;
    Ok(Json(subscription))
}

async fn admin_delete(State(state): State<AppState>, Path(email): Path<String>) -> Result<impl IntoResponse> {
    let removed = state.subscriptions.delete(&email).await?;
    state.stats.update(|s| s.subscriptions_deleted += 1).await;
    Ok(Json(json!({ "deleted": removed.email })))
}

async fn admin_backup(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let sources = [
        ("subscriptions", state.subscriptions.path()),
        ("email_log", state.history.path()),
        ("sent_alerts", state.history.sent_path()),
        ("stats", state.stats.path()),
    ];
    let report = backup_files(&sources, Utc::now()).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Backup created with timestamp {}", report.timestamp),
        "backup_files": report.files,
    })))
}

async fn admin_export(State(state): State<AppState>, Path(email): Path<String>) -> Result<impl IntoResponse> {
    let email = normalize_email(&email);
    let subscription = state
        .subscriptions
        .get(&email)
        .await
        .ok_or_else(|| TrackerError::NotFound(email.clone()))?;
    let history = state.history.for_email(&email, usize::MAX).await;

    Ok(Json(json!({
        "email": email,
        "subscription": subscription,
        "email_history": history.recent_emails,
        "total_emails_sent": history.successful_emails,
        "total_emails_failed": history.failed_emails,
        "export_timestamp": Utc::now(),
    })))
}

async fn my_subscription(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&email);
    let subscription = state
        .subscriptions
        .get(&email)
        .await
        .ok_or_else(|| TrackerError::NotFound(email.clone()))?;
    let history = state.history.for_email(&email, RECENT_USER_EMAILS).await;

    Ok(Json(json!({
        "subscription": subscription,
        "email_history": history,
    })))
}

async fn visa_data(State(state): State<AppState>) -> Json<serde_json::Value> {
    let Some(snapshot) = latest(&state).await else {
        return Json(json!({ "fetched_at": null, "total_records": 0, "records": [] }));
    };
    Json(json!({
        "fetched_at": snapshot.fetched_at,
        "source_url": snapshot.source_url,
        "total_records": snapshot.records.len(),
        "total_slots": snapshot.total_slots(),
        "total_appointments": snapshot.total_appointments(),
        "tiers": snapshot.tier_counts(),
        "records": records_json(&snapshot.records),
    }))
}

async fn categories(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = latest(&state).await;
    let groups: Vec<serde_json::Value> = snapshot
        .as_deref()
        .map(|snapshot| {
            snapshot
                .by_category()
                .into_iter()
                .map(|(category, records)| {
                    json!({
                        "category": category,
                        "name": category.display_name(),
                        "summary": GroupSummary::from_records(&records),
                        "records": records_json(records),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Json(json!({
        "fetched_at": snapshot.as_ref().map(|s| s.fetched_at),
        "categories": groups,
    }))
}

async fn locations(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = latest(&state).await;
    let groups: Vec<serde_json::Value> = snapshot
        .as_deref()
        .map(|snapshot| {
            snapshot
                .by_location()
                .into_iter()
                .map(|(location, records)| {
                    json!({
                        "location": location,
                        "summary": GroupSummary::from_records(&records),
                        "records": records_json(records),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Json(json!({
        "fetched_at": snapshot.as_ref().map(|s| s.fetched_at),
        "locations": groups,
    }))
}

#[derive(Debug, Deserialize)]
struct EarliestQuery {
    limit: Option<usize>,
}

async fn earliest(State(state): State<AppState>, Query(query): Query<EarliestQuery>) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_EARLIEST_LIMIT);
    let snapshot = latest(&state).await;
    let records = snapshot
        .as_deref()
        .map(|s| records_json(s.earliest(limit)))
        .unwrap_or_default();
    Json(json!({ "limit": limit, "records": records }))
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    location: &'a str,
    visa_type: &'a str,
    visa_label: &'a str,
    category: &'static str,
    subtype: &'static str,
    tier: &'static str,
    earliest_date: Option<String>,
    slot_count: u32,
    appointment_count: u32,
    source_updated_at: Option<String>,
    scraped_at: String,
}

fn snapshot_csv(snapshot: Option<&ScrapeSnapshot>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let records = snapshot.map(|s| s.records.as_slice()).unwrap_or_default();
    if records.is_empty() {
        writer
            .write_record([
                "location",
                "visa_type",
                "visa_label",
                "category",
                "subtype",
                "tier",
                "earliest_date",
                "slot_count",
                "appointment_count",
                "source_updated_at",
                "scraped_at",
            ])
            .map_err(std::io::Error::from)?;
    }
    for record in records {
        writer
            .serialize(CsvRow {
                location: &record.location,
                visa_type: &record.visa_type,
                visa_label: &record.visa_label,
                category: record.category().as_str(),
                subtype: record.subtype().as_str(),
                tier: record.tier().as_str(),
                earliest_date: record.earliest_date.map(|d| d.to_string()),
                slot_count: record.slot_count,
                appointment_count: record.appointment_count,
                source_updated_at: record.source_updated_at.map(|t| t.to_string()),
                scraped_at: record.scraped_at.to_rfc3339(),
            })
            .map_err(std::io::Error::from)?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

async fn export_csv(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let snapshot = latest(&state).await;
    let body = snapshot_csv(snapshot.as_deref())?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"visa-slots.csv\""),
        ],
        body,
    ))
}

async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.pipeline.run_pass().await;
    let status = if report.is_ok() { StatusCode::OK } else { StatusCode::BAD_GATEWAY };
    (status, Json(report))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    subscriptions_count: usize,
    records_count: usize,
    last_check: Option<DateTime<Utc>>,
    snapshot_fetched_at: Option<DateTime<Utc>>,
    email_configured: bool,
    uptime_seconds: i64,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = latest(&state).await;
    Json(HealthResponse {
        status: "healthy",
        subscriptions_count: state.subscriptions.count().await,
        records_count: snapshot.as_ref().map_or(0, |s| s.records.len()),
        last_check: state.stats.get().await.last_check,
        snapshot_fetched_at: snapshot.as_ref().map(|s| s.fetched_at),
        email_configured: state.notifier.is_configured(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn email_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let email = &state.email;
    Json(json!({
        "smtp_server": email.smtp_server,
        "smtp_port": email.smtp_port,
        "username": email.username,
        "from_name": email.from_name,
        "password_set": !email.password.is_empty(),
        "configured": state.notifier.is_configured(),
    }))
}

#[derive(Debug, Deserialize)]
struct TestEmailRequest {
    email: String,
}

async fn test_email(
    State(state): State<AppState>,
    Json(request): Json<TestEmailRequest>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&request.email);
    if !email.contains('@') {
        return Err(TrackerError::Validation(format!("'{}' is not a valid email address", email)));
    }

    let snapshot = latest(&state).await;
    let sample = snapshot.as_deref().and_then(|s| s.earliest(1).into_iter().next());
    state.notifier.send_test(&email, sample).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Test alert sent to {}", email),
    })))
}
