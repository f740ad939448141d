use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::prelude::*;
use chrono::serde::ts_seconds;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Sender;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::{
        auth::Actor,
        mongo::DbClient,
        settlement::{MongoSettlement, SettlementLine, SettlementRunOutcome, SettlementStatus},
        SettlementRepo,
    },
    error_result::{Error, Result},
    lock::SETTLEMENT_LOCK,
};

use super::{
    auth::{UserInfo, SETTINGS},
    release_lock,
    ws::{send_control_messages, ControlMessage},
    AppState, Invoice, PagedResponse,
};

const SETTLEMENT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

pub fn get_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_settlements))
        .route("/run", post(run_settlement_handler))
        .route("/:id", get(get_settlement))
        .route("/:id/issue", post(issue_settlement))
        .route("/:id/paid", post(mark_settlement_paid))
        .route("/:id/cancel", post(cancel_settlement))
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRunMessage {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementInvoiceMessage {
    #[serde(default)]
    pub series: String,
    pub number: String,
    #[serde(with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementQuery {
    pub status: Option<SettlementStatus>,
    pub company_id: Option<Uuid>,
    pub page: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementLineOutput {
    pub order_id: Uuid,
    pub order_no: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_cost: i64,
    pub amount: i64,
}

impl From<SettlementLine> for SettlementLineOutput {
    fn from(l: SettlementLine) -> Self {
        Self {
            order_id: l.order_id.into(),
            order_no: l.order_no,
            sku: l.sku,
            quantity: l.quantity,
            unit_cost: l.unit_cost,
            amount: l.amount,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: Uuid,
    pub settlement_no: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub issuer_company_id: Uuid,
    pub recipient_company_id: Uuid,
    pub lines: Vec<SettlementLineOutput>,
    pub order_ids: Vec<Uuid>,
    pub subtotal: i64,
    pub markup_percent: u32,
    pub markup_amount: i64,
    pub total: i64,
    pub status: SettlementStatus,
    pub invoice: Option<Invoice>,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub update_at: DateTime<Utc>,
}

impl From<MongoSettlement> for Settlement {
    fn from(m: MongoSettlement) -> Self {
        Self {
            id: m.id.into(),
            settlement_no: m.settlement_no,
            period_from: m.period_from,
            period_to: m.period_to,
            issuer_company_id: m.issuer_company_id.into(),
            recipient_company_id: m.recipient_company_id.into(),
            lines: m.lines.into_iter().map(|l| l.into()).collect(),
            order_ids: m.order_ids.into_iter().map(|i| i.into()).collect(),
            subtotal: m.subtotal,
            markup_percent: m.markup_percent,
            markup_amount: m.markup_amount,
            total: m.total,
            status: m.status,
            invoice: m.invoice.map(|i| i.into()),
            created_at: m.created_at.to_chrono(),
            update_at: m.update_at.to_chrono(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRunResponse {
    pub created: Vec<Uuid>,
    pub orders_settled: usize,
    pub skipped_same_company: usize,
}

impl From<SettlementRunOutcome> for SettlementRunResponse {
    fn from(o: SettlementRunOutcome) -> Self {
        Self {
            created: o.created.into_iter().map(|i| i.into()).collect(),
            orders_settled: o.orders_settled,
            skipped_same_company: o.skipped_same_company,
        }
    }
}

#[instrument(name = "run settlement on demand", skip(user_info, state, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    from = %message.from,
    to = %message.to,
))]
pub async fn run_settlement_handler(
    user_info: UserInfo,
    State(state): State<AppState>,
    Json(message): Json<SettlementRunMessage>,
) -> Result<Json<SettlementRunResponse>> {
    match run_settlement_job(&state, message.from, message.to).await? {
        Some(outcome) => Ok(Json(outcome.into())),
        None => Err(Error::LockHeld(String::from(SETTLEMENT_LOCK))),
    }
}

/// one settlement run under the cron lock, `None` when another run holds it
#[instrument(name = "settlement job", skip(state))]
pub async fn run_settlement_job(
    state: &AppState,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Option<SettlementRunOutcome>> {
    let owner = Actor::system().username;
    let Some(guard) = state
        .lock
        .try_acquire(SETTLEMENT_LOCK, SETTLEMENT_LOCK_TTL, &owner)
        .await?
    else {
        info!("settlement run is already in progress");
        return Ok(None);
    };
    let res = state
        .db_client
        .run_settlement(from, to, SETTINGS.business_tz())
        .await;
    release_lock(&state.lock, guard).await;
    let outcome = res?;
    if !outcome.created.is_empty() {
        send_control_messages(
            &state.sender,
            &[
                ControlMessage::RefreshSettlementList,
                ControlMessage::RefreshOrderList,
            ],
        );
        state.notify.call_notify(
            format!("intercompany settlement {from}..{to}"),
            format!(
                "{} settlements created for {} orders",
                outcome.created.len(),
                outcome.orders_settled
            ),
        );
    }
    Ok(Some(outcome))
}

pub async fn query_settlements(
    Query(query): Query<SettlementQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<Settlement>>> {
    let page = query.page;
    let (has_next, settlements) = db.query_settlements(query).await?;
    Ok(PagedResponse::new(page, has_next, settlements).into())
}

pub async fn get_settlement(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Settlement>> {
    Ok(Json(db.get_settlement(id.into()).await?.into()))
}

#[instrument(name = "issue settlement", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn issue_settlement(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<SettlementInvoiceMessage>,
) -> Result<Json<Settlement>> {
    let settlement = db.issue_settlement(id.into(), message).await?;
    send_control_messages(&sender, &[ControlMessage::RefreshSettlementList]);
    Ok(Json(settlement.into()))
}

#[instrument(name = "mark settlement paid", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn mark_settlement_paid(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Settlement>> {
    let settlement = db.mark_settlement_paid(id.into()).await?;
    send_control_messages(&sender, &[ControlMessage::RefreshSettlementList]);
    Ok(Json(settlement.into()))
}

#[instrument(name = "cancel settlement", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn cancel_settlement(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Settlement>> {
    let settlement = db.cancel_settlement(id.into()).await?;
    send_control_messages(
        &sender,
        &[
            ControlMessage::RefreshSettlementList,
            ControlMessage::RefreshOrderList,
        ],
    );
    Ok(Json(settlement.into()))
}
