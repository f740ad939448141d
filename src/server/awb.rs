use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::prelude::*;
use chrono::serde::{ts_seconds, ts_seconds_option};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Sender;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        awb::{AwbStatus, MongoAwb, TrackingEvent, TrackingStatus},
        handover::Courier,
        mongo::DbClient,
        AwbRepo,
    },
    error_result::Result,
};

use super::{
    auth::UserInfo,
    ws::{send_control_messages, ControlMessage},
    AppState, PagedResponse,
};

pub fn get_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_awbs).post(register_awb))
        .route("/:awb_number", get(get_awb))
        .route("/:awb_number/tracking", post(record_tracking))
        .route("/:awb_number/cancel", post(cancel_awb))
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewAwbMessage {
    pub awb_number: String,
    pub courier: Courier,
    pub order_id: Uuid,
    #[serde(default = "one_parcel")]
    pub parcels: u32,
    #[serde(default)]
    pub weight_grams: u32,
}

fn one_parcel() -> u32 {
    1
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEventMessage {
    pub status: TrackingStatus,
    #[serde(with = "ts_seconds")]
    pub at: DateTime<Utc>,
    pub location: Option<String>,
    pub note: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AwbQuery {
    pub status: Option<AwbStatus>,
    pub warehouse: Option<String>,
    #[serde(with = "ts_seconds")]
    pub from: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub to: DateTime<Utc>,
    pub page: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub status: TrackingStatus,
    #[serde(with = "ts_seconds")]
    pub at: DateTime<Utc>,
    pub location: Option<String>,
    pub note: Option<String>,
    #[serde(with = "ts_seconds")]
    pub recorded_at: DateTime<Utc>,
    pub applied: bool,
}

impl From<TrackingEvent> for Tracking {
    fn from(e: TrackingEvent) -> Self {
        Self {
            status: e.status,
            at: e.at.to_chrono(),
            location: e.location,
            note: e.note,
            recorded_at: e.recorded_at.to_chrono(),
            applied: e.applied,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Awb {
    pub id: Uuid,
    pub awb_number: String,
    pub courier: Courier,
    pub order_id: Uuid,
    pub warehouse: String,
    pub cod_amount: i64,
    pub parcels: u32,
    pub weight_grams: u32,
    pub status: AwbStatus,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds_option")]
    pub handed_over_at: Option<DateTime<Utc>>,
    pub handover_session_id: Option<Uuid>,
    pub events: Vec<Tracking>,
}

impl From<MongoAwb> for Awb {
    fn from(m: MongoAwb) -> Self {
        Self {
            id: m.id.into(),
            awb_number: m.awb_number,
            courier: m.courier,
            order_id: m.order_id.into(),
            warehouse: m.warehouse,
            cod_amount: m.cod_amount,
            parcels: m.parcels,
            weight_grams: m.weight_grams,
            status: m.status,
            created_at: m.created_at.to_chrono(),
            handed_over_at: m.handed_over_at.map(|d| d.to_chrono()),
            handover_session_id: m.handover_session_id.map(|i| i.into()),
            events: m.events.into_iter().map(|e| e.into()).collect(),
        }
    }
}

#[instrument(name = "register awb", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    awb_number = %message.awb_number,
))]
pub async fn register_awb(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<NewAwbMessage>,
) -> Result<impl IntoResponse> {
    let awb = db.register_awb(message).await?;
    send_control_messages(
        &sender,
        &[ControlMessage::RefreshAwbList, ControlMessage::RefreshOrderList],
    );
    Ok((StatusCode::CREATED, Json(Awb::from(awb))))
}

pub async fn query_awbs(
    Query(query): Query<AwbQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<Awb>>> {
    let page = query.page;
    let (has_next, awbs) = db.query_awbs(query).await?;
    Ok(PagedResponse::new(page, has_next, awbs).into())
}

pub async fn get_awb(
    Path(awb_number): Path<String>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Awb>> {
    Ok(Json(db.get_awb(&awb_number).await?.into()))
}

#[instrument(name = "record awb tracking", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    status = ?message.status,
))]
pub async fn record_tracking(
    user_info: UserInfo,
    Path(awb_number): Path<String>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<TrackingEventMessage>,
) -> Result<Json<Awb>> {
    let awb = db.record_tracking(&awb_number, message).await?;
    send_control_messages(
        &sender,
        &[ControlMessage::RefreshAwbList, ControlMessage::RefreshOrderList],
    );
    Ok(Json(awb.into()))
}

#[instrument(name = "cancel awb", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn cancel_awb(
    user_info: UserInfo,
    Path(awb_number): Path<String>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Awb>> {
    let awb = db.cancel_awb(&awb_number).await?;
    send_control_messages(
        &sender,
        &[ControlMessage::RefreshAwbList, ControlMessage::RefreshOrderList],
    );
    Ok(Json(awb.into()))
}
