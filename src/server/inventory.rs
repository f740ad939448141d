use std::sync::Arc;

use crate::{
    db::{
        inventory::{MongoInventoryItem, Quantity},
        invenope::{MongoInventoryOperation, MongoOperationType},
        mongo::DbClient,
        InventoryRepo,
    },
    error_result::Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::prelude::*;
use chrono::serde::ts_seconds;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Sender;
use tracing::instrument;
use uuid::Uuid;

use super::{
    auth::UserInfo,
    ws::{send_control_message, ControlMessage},
    AppPrivateRoute, AppState, PagedResponse,
};

pub fn get_inventory_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_inventory))
        .route("/operations/:sku", get(get_inventory_item_operations))
        .route("/quantity/:sku", get(get_inventory_quantity_by_sku))
        .route("/adjustments", post(adjust_inventory))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InventoryQuery {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub show_zero_quantity: bool,
    // "wh1,wh2" is split on the db side
    pub warehouse: Option<String>,
    pub page: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub sku: String,
    pub name: String,
    pub quantity: Vec<Quantity>,
    pub unit_cost: i64,
    #[serde(with = "ts_seconds")]
    pub update_at: DateTime<Utc>,
}

impl From<MongoInventoryItem> for InventoryItem {
    fn from(m: MongoInventoryItem) -> Self {
        Self {
            sku: m.sku,
            name: m.name,
            quantity: m.quantity,
            unit_cost: m.unit_cost,
            update_at: m.update_at.to_chrono(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InventoryOperation {
    pub id: Uuid,
    pub sku: String,
    #[serde(with = "ts_seconds")]
    pub time: DateTime<Utc>,
    pub related_id: Uuid,
    pub operation_type: MongoOperationType,
    pub count: i32,
    pub warehouse: String,
    pub unit_cost: i64,
    pub note: Option<String>,
}

impl From<MongoInventoryOperation> for InventoryOperation {
    fn from(m: MongoInventoryOperation) -> Self {
        Self {
            id: m.id.into(),
            sku: m.sku,
            time: m.time.to_chrono(),
            related_id: m.related_id.into(),
            operation_type: m.operation_type,
            count: m.count,
            warehouse: m.warehouse,
            unit_cost: m.unit_cost,
            note: m.note,
        }
    }
}

pub async fn query_inventory(
    Query(query): Query<InventoryQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<InventoryItem>>> {
    let page = query.page;
    let (has_next, items) = db.query_inventory(query).await?;
    Ok(PagedResponse::new(page, has_next, items).into())
}

pub async fn get_inventory_item_operations(
    Path(sku): Path<String>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<InventoryOperation>>> {
    let res = db.get_inventory_item_operations(&sku).await?;
    Ok(res.into_iter().map(|o| o.into()).collect::<Vec<_>>().into())
}

pub async fn get_inventory_quantity_by_sku(
    Path(sku): Path<String>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Quantity>>> {
    let res = db.find_inventory_by_sku(&sku).await?;
    match res {
        Some(i) => Ok(i.quantity.into()),
        None => Ok(vec![].into()),
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentMessage {
    pub sku: String,
    pub warehouse: String,
    pub delta: i32,
    pub reason: String,
}

#[instrument(name = "adjust inventory", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    sku = %message.sku,
))]
pub async fn adjust_inventory(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<AdjustmentMessage>,
) -> Result<impl IntoResponse> {
    let actor = user_info.actor(AppPrivateRoute::Inventory);
    let operation = db
        .adjust_inventory(
            message.sku.trim(),
            &message.warehouse.trim().to_uppercase(),
            message.delta,
            &message.reason,
            &actor,
        )
        .await?;
    send_control_message(&sender, ControlMessage::RefreshInventory);
    Ok((
        StatusCode::CREATED,
        Json(InventoryOperation::from(operation)),
    ))
}
