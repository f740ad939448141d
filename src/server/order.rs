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
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::{
        company::InvoicingProvider,
        mongo::DbClient,
        order::{Channel, MongoChannelOrder, OrderLine, OrderStatus},
        OrderRepo,
    },
    error_result::Result,
};

use super::{
    auth::UserInfo,
    ws::{send_control_messages, ControlMessage},
    AppState, Invoice, PagedResponse,
};

pub fn get_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_orders).post(ingest_order))
        .route("/:id", get(get_order))
        .route("/:id/invoice", post(invoice_order))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineMessage {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// normalized order pushed by a channel connector
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewChannelOrderMessage {
    pub channel: Channel,
    pub external_id: String,
    pub order_no: Option<String>,
    pub company_id: Uuid,
    pub warehouse: String,
    #[serde(default)]
    pub customer_name: String,
    pub lines: Vec<OrderLineMessage>,
    #[serde(default)]
    pub cod_amount: i64,
    #[serde(with = "ts_seconds")]
    pub placed_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMessage {
    pub provider: Option<InvoicingProvider>,
    #[serde(default)]
    pub series: String,
    pub number: String,
    #[serde(with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub channel: Option<Channel>,
    pub status: Option<OrderStatus>,
    pub keyword: Option<String>,
    #[serde(with = "ts_seconds")]
    pub from: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub to: DateTime<Utc>,
    pub page: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineOutput {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub unit_cost_at_shipment: Option<i64>,
}

impl From<OrderLine> for OrderLineOutput {
    fn from(l: OrderLine) -> Self {
        Self {
            sku: l.sku,
            name: l.name,
            quantity: l.quantity,
            unit_price: l.unit_price,
            unit_cost_at_shipment: l.unit_cost_at_shipment,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub channel: Channel,
    pub external_id: String,
    pub order_no: String,
    pub company_id: Uuid,
    pub warehouse: String,
    pub customer_name: String,
    pub lines: Vec<OrderLineOutput>,
    pub total: i64,
    pub cod_amount: i64,
    pub status: OrderStatus,
    pub invoice: Option<Invoice>,
    pub awb_number: Option<String>,
    #[serde(with = "ts_seconds_option")]
    pub shipped_at: Option<DateTime<Utc>>,
    pub settlement_id: Option<Uuid>,
    #[serde(with = "ts_seconds")]
    pub placed_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub update_at: DateTime<Utc>,
}

impl From<MongoChannelOrder> for Order {
    fn from(m: MongoChannelOrder) -> Self {
        Self {
            id: m.id.into(),
            channel: m.channel,
            external_id: m.external_id,
            order_no: m.order_no,
            company_id: m.company_id.into(),
            warehouse: m.warehouse,
            customer_name: m.customer_name,
            lines: m.lines.into_iter().map(|l| l.into()).collect(),
            total: m.total,
            cod_amount: m.cod_amount,
            status: m.status,
            invoice: m.invoice.map(|i| i.into()),
            awb_number: m.awb_number,
            shipped_at: m.shipped_at.map(|d| d.to_chrono()),
            settlement_id: m.settlement_id.map(|i| i.into()),
            placed_at: m.placed_at.to_chrono(),
            created_at: m.created_at.to_chrono(),
            update_at: m.update_at.to_chrono(),
        }
    }
}

/// 201 for a new order, 200 with the stored one when the channel repeats itself
#[instrument(name = "ingest channel order", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn ingest_order(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<NewChannelOrderMessage>,
) -> Result<impl IntoResponse> {
    let (created, order) = db.ingest_order(message).await?;
    if !created {
        info!("order {} was already ingested", order.order_no);
        return Ok((StatusCode::OK, Json(Order::from(order))));
    }
    send_control_messages(&sender, &[ControlMessage::RefreshOrderList]);
    Ok((StatusCode::CREATED, Json(Order::from(order))))
}

pub async fn query_orders(
    Query(query): Query<OrderQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<Order>>> {
    let page = query.page;
    let (has_next, orders) = db.query_orders(query).await?;
    Ok(PagedResponse::new(page, has_next, orders).into())
}

pub async fn get_order(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Order>> {
    Ok(Json(db.get_order(id.into()).await?.into()))
}

#[instrument(name = "invoice order", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn invoice_order(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<InvoiceMessage>,
) -> Result<Json<Order>> {
    let order = db.invoice_order(id.into(), message).await?;
    send_control_messages(&sender, &[ControlMessage::RefreshOrderList]);
    Ok(Json(order.into()))
}

#[instrument(name = "cancel order", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn cancel_order(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Order>> {
    let order = db.cancel_order(id.into()).await?;
    send_control_messages(
        &sender,
        &[ControlMessage::RefreshOrderList, ControlMessage::RefreshAwbList],
    );
    Ok(Json(order.into()))
}
