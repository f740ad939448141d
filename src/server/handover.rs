use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::prelude::*;
use chrono::serde::{ts_seconds, ts_seconds_option};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Sender;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::{
        auth::Actor,
        handover::{
            Courier, FinalizeOutcome, HandoverReport, HandoverScan, HandoverStatus,
            ManagerOverride, MongoHandoverSession, ScanOutcome,
        },
        mongo::DbClient,
        HandoverRepo,
    },
    error_result::Result,
    lock::{handover_lock_name, NamedLock, AUTO_FINALIZE_LOCK},
    services::notify_service::NotifyService,
};

use super::{
    auth::{UserInfo, SETTINGS},
    release_lock, with_lock,
    ws::{send_control_messages, ControlMessage},
    AppPrivateRoute, AppState, History, PagedResponse,
};

const CRON_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

pub fn get_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_handovers).post(open_handover))
        .route("/auto_finalize", post(auto_finalize_handler))
        .route("/:id", get(get_handover))
        .route("/:id/scan", post(scan_awb))
        .route("/:id/scan/:awb_number", delete(unscan_awb))
        .route("/:id/report", get(get_handover_report))
        .route("/:id/finalize", post(finalize_handover))
        .route("/:id/reopen", post(reopen_handover))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandoverMessage {
    pub warehouse: String,
    pub courier: Courier,
    /// today in the business time zone when missing
    pub business_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScanMessage {
    pub awb_number: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeMessage {
    pub note: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HandoverQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub warehouse: Option<String>,
    pub status: Option<HandoverStatus>,
    pub page: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub awb_number: String,
    pub order_id: Uuid,
    pub cod_amount: i64,
    #[serde(with = "ts_seconds")]
    pub scanned_at: DateTime<Utc>,
    pub scanned_by: Uuid,
    pub scanned_by_username: String,
    pub expected: bool,
}

impl From<HandoverScan> for Scan {
    fn from(s: HandoverScan) -> Self {
        Self {
            awb_number: s.awb_number,
            order_id: s.order_id.into(),
            cod_amount: s.cod_amount,
            scanned_at: s.scanned_at.to_chrono(),
            scanned_by: s.scanned_by.into(),
            scanned_by_username: s.scanned_by_username,
            expected: s.expected,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    pub by: Uuid,
    pub by_username: String,
    #[serde(with = "ts_seconds")]
    pub at: DateTime<Utc>,
    pub missing: Vec<String>,
    pub note: Option<String>,
}

impl From<ManagerOverride> for Override {
    fn from(o: ManagerOverride) -> Self {
        Self {
            by: o.by.into(),
            by_username: o.by_username,
            at: o.at.to_chrono(),
            missing: o.missing,
            note: o.note,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Handover {
    pub id: Uuid,
    pub business_date: NaiveDate,
    pub warehouse: String,
    pub courier: Courier,
    pub status: HandoverStatus,
    pub scans: Vec<Scan>,
    pub missing_at_finalization: Vec<String>,
    pub finalized_by: Option<Uuid>,
    pub finalized_by_username: Option<String>,
    #[serde(with = "ts_seconds_option")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub auto_finalized: bool,
    pub manager_override: Option<Override>,
    pub history: Vec<History>,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub update_at: DateTime<Utc>,
}

impl From<MongoHandoverSession> for Handover {
    fn from(m: MongoHandoverSession) -> Self {
        Self {
            id: m.id.into(),
            business_date: m.business_date,
            warehouse: m.warehouse,
            courier: m.courier,
            status: m.status,
            scans: m.scans.into_iter().map(|s| s.into()).collect(),
            missing_at_finalization: m.missing_at_finalization,
            finalized_by: m.finalized_by.map(|i| i.into()),
            finalized_by_username: m.finalized_by_username,
            finalized_at: m.finalized_at.map(|d| d.to_chrono()),
            auto_finalized: m.auto_finalized,
            manager_override: m.manager_override.map(|o| o.into()),
            history: m.history.into_iter().map(|h| h.into()).collect(),
            created_at: m.created_at.to_chrono(),
            update_at: m.update_at.to_chrono(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub session_id: Uuid,
    pub business_date: NaiveDate,
    pub warehouse: String,
    pub courier: Courier,
    pub status: HandoverStatus,
    pub expected_count: usize,
    pub scanned_count: usize,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub scanned_cod_total: i64,
}

impl From<HandoverReport> for Report {
    fn from(r: HandoverReport) -> Self {
        Self {
            session_id: r.session_id.into(),
            business_date: r.business_date,
            warehouse: r.warehouse,
            courier: r.courier,
            status: r.status,
            expected_count: r.expected_count,
            scanned_count: r.scanned_count,
            missing: r.missing,
            unexpected: r.unexpected,
            scanned_cod_total: r.scanned_cod_total,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub duplicate: bool,
    pub scan: Scan,
    pub session: Handover,
}

impl From<ScanOutcome> for ScanResponse {
    fn from(o: ScanOutcome) -> Self {
        Self {
            duplicate: o.duplicate,
            scan: o.scan.into(),
            session: o.session.into(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub session: Handover,
    pub report: Report,
    pub orders_shipped: usize,
}

impl From<FinalizeOutcome> for FinalizeResponse {
    fn from(o: FinalizeOutcome) -> Self {
        Self {
            session: o.session.into(),
            report: o.report.into(),
            orders_shipped: o.orders_shipped,
        }
    }
}

/// what one auto finalization run did
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoFinalizeSummary {
    pub finalized: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[inline]
fn business_today() -> NaiveDate {
    Utc::now().with_timezone(&SETTINGS.business_tz()).date_naive()
}

#[instrument(name = "open handover", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    warehouse = %message.warehouse,
))]
pub async fn open_handover(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<OpenHandoverMessage>,
) -> Result<impl IntoResponse> {
    let actor = user_info.actor(AppPrivateRoute::Handovers);
    let business_date = message.business_date.unwrap_or_else(business_today);
    let warehouse = message.warehouse.trim().to_uppercase();
    let (created, session) = db
        .open_handover(business_date, &warehouse, message.courier, &actor)
        .await?;
    let status = if created {
        send_control_messages(&sender, &[ControlMessage::RefreshHandover(session.id.into())]);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(Handover::from(session))))
}

pub async fn query_handovers(
    Query(query): Query<HandoverQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<Handover>>> {
    let page = query.page;
    let (has_next, sessions) = db.query_handovers(query).await?;
    Ok(PagedResponse::new(page, has_next, sessions).into())
}

pub async fn get_handover(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Handover>> {
    Ok(Json(db.get_handover(id.into()).await?.into()))
}

/// 201 for a new scan, 200 when the awb was already scanned in this session
#[instrument(name = "scan awb", skip(user_info, db, lock, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    awb_number = %message.awb_number,
))]
pub async fn scan_awb(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(lock): State<Arc<dyn NamedLock>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<ScanMessage>,
) -> Result<impl IntoResponse> {
    let actor = user_info.actor(AppPrivateRoute::Handovers);
    let outcome = with_lock(&lock, &handover_lock_name(id), &actor.username, || {
        db.scan_awb(id.into(), &message.awb_number, &actor, SETTINGS.business_tz())
    })
    .await?;
    if outcome.duplicate {
        return Ok((StatusCode::OK, Json(ScanResponse::from(outcome))));
    }
    send_control_messages(&sender, &[ControlMessage::RefreshHandover(id)]);
    Ok((StatusCode::CREATED, Json(ScanResponse::from(outcome))))
}

#[instrument(name = "unscan awb", skip(user_info, db, lock, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn unscan_awb(
    user_info: UserInfo,
    Path((id, awb_number)): Path<(Uuid, String)>,
    State(db): State<Arc<DbClient>>,
    State(lock): State<Arc<dyn NamedLock>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Handover>> {
    let actor = user_info.actor(AppPrivateRoute::Handovers);
    let session = with_lock(&lock, &handover_lock_name(id), &actor.username, || {
        db.unscan_awb(id.into(), &awb_number, &actor)
    })
    .await?;
    send_control_messages(&sender, &[ControlMessage::RefreshHandover(id)]);
    Ok(Json(session.into()))
}

pub async fn get_handover_report(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Report>> {
    let report = db.handover_report(id.into(), SETTINGS.business_tz()).await?;
    Ok(Json(report.into()))
}

#[instrument(name = "finalize handover", skip(user_info, state, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn finalize_handover(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    message: Option<Json<FinalizeMessage>>,
) -> Result<Json<FinalizeResponse>> {
    let actor = user_info.actor(AppPrivateRoute::Handovers);
    let note = message.and_then(|Json(m)| m.note);
    // scans and unscans wait on the same lock, so the scan list is stable while effects apply
    let outcome = with_lock(&state.lock, &handover_lock_name(id), &actor.username, || {
        state
            .db_client
            .finalize_handover(id.into(), &actor, note, false, SETTINGS.business_tz())
    })
    .await?;
    after_finalize(&state.sender, &state.notify, &outcome);
    Ok(Json(outcome.into()))
}

#[instrument(name = "reopen handover", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn reopen_handover(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Handover>> {
    let actor = user_info.actor(AppPrivateRoute::Handovers);
    let session = db.reopen_handover(id.into(), &actor, business_today()).await?;
    send_control_messages(&sender, &[ControlMessage::RefreshHandover(id)]);
    Ok(Json(session.into()))
}

#[instrument(name = "auto finalize on demand", skip(user_info, state), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn auto_finalize_handler(
    user_info: UserInfo,
    State(state): State<AppState>,
) -> Result<Json<AutoFinalizeSummary>> {
    match run_auto_finalize(&state, business_today()).await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(crate::error_result::Error::LockHeld(String::from(
            AUTO_FINALIZE_LOCK,
        ))),
    }
}

/// finalize every open session up to `today` as the system actor.
/// `None` when another run holds the cron lock.
#[instrument(name = "auto finalize handovers", skip(state))]
pub async fn run_auto_finalize(
    state: &AppState,
    today: NaiveDate,
) -> Result<Option<AutoFinalizeSummary>> {
    let actor = Actor::system();
    let Some(cron_guard) = state
        .lock
        .try_acquire(AUTO_FINALIZE_LOCK, CRON_LOCK_TTL, &actor.username)
        .await?
    else {
        info!("auto finalize is already running");
        return Ok(None);
    };
    let res = auto_finalize_sessions(state, &actor, today).await;
    release_lock(&state.lock, cron_guard).await;
    let summary = res?;
    info!(
        "auto finalize done, {} finalized, {} skipped, {} failed",
        summary.finalized.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(Some(summary))
}

async fn auto_finalize_sessions(
    state: &AppState,
    actor: &Actor,
    today: NaiveDate,
) -> Result<AutoFinalizeSummary> {
    let tz = SETTINGS.business_tz();
    let sessions = state.db_client.find_open_handovers_until(today).await?;
    let mut summary = AutoFinalizeSummary::default();
    for session in sessions {
        let id: Uuid = session.id.into();
        let Some(guard) = state
            .lock
            .try_acquire(&handover_lock_name(id), CRON_LOCK_TTL, &actor.username)
            .await?
        else {
            warn!("handover {id} is being finalized by someone else");
            summary.skipped.push(id);
            continue;
        };
        let res = state
            .db_client
            .finalize_handover(session.id, actor, None, true, tz)
            .await;
        release_lock(&state.lock, guard).await;
        match res {
            Ok(outcome) => {
                after_finalize(&state.sender, &state.notify, &outcome);
                summary.finalized.push(id);
            }
            Err(e) => {
                error!("auto finalize of handover {id} failed: {e}");
                summary.failed.push(id);
            }
        }
    }
    Ok(summary)
}

fn after_finalize(
    sender: &Arc<Sender<ControlMessage>>,
    notify: &NotifyService,
    outcome: &FinalizeOutcome,
) {
    send_control_messages(
        sender,
        &[
            ControlMessage::RefreshHandover(outcome.session.id.into()),
            ControlMessage::RefreshAwbList,
            ControlMessage::RefreshOrderList,
            ControlMessage::RefreshInventory,
        ],
    );
    if let Some(title) = missing_title(&outcome.report, outcome.session.auto_finalized) {
        notify.call_notify(title, outcome.report.missing.join("\n"));
    }
}

fn missing_title(report: &HandoverReport, auto: bool) -> Option<String> {
    if report.missing.is_empty() {
        return None;
    }
    let how = if auto { "auto finalized" } else { "finalized" };
    Some(format!(
        "handover {} {} {} {} with {} missing awb",
        report.business_date,
        report.warehouse,
        report.courier,
        how,
        report.missing.len()
    ))
}
