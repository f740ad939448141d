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
        mongo::DbClient,
        receipt::{
            DifferenceKind, LineCount, ManagerApproval, MongoGoodsReceipt, ReceiptAction,
            ReceiptDifference, ReceiptLine, ReceiptStatus,
        },
        ReceiptRepo,
    },
    error_result::Result,
    lock::{receipt_lock_name, NamedLock},
    services::notify_service::NotifyService,
};

use super::{
    auth::UserInfo,
    with_lock,
    ws::{send_control_messages, ControlMessage},
    AppPrivateRoute, AppState, History, PagedResponse,
};

pub fn get_router() -> Router<AppState> {
    Router::new()
        .route("/", get(query_receipts).post(create_receipt))
        .route("/:id", get(get_receipt).put(update_receipt_draft))
        .route("/:id/start", post(start_reception))
        .route("/:id/counts", post(record_counts))
        .route("/:id/verify", post(verify_receipt))
        .route("/:id/approve_differences", post(approve_differences))
        .route("/:id/approve", post(approve_receipt))
        .route("/:id/reject", post(reject_receipt))
        .route("/:id/recount", post(recount_receipt))
        .route("/:id/reopen", post(reopen_receipt))
        .route("/:id/cancel", post(cancel_receipt))
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineMessage {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    pub expected_qty: u32,
    pub unit_cost: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMessage {
    pub company_id: Uuid,
    pub warehouse: String,
    pub supplier_name: String,
    #[serde(default)]
    pub supplier_invoice_no: String,
    #[serde(default, with = "ts_seconds_option")]
    pub supplier_invoice_date: Option<DateTime<Utc>>,
    pub lines: Vec<ReceiptLineMessage>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptQuery {
    pub status: Option<ReceiptStatus>,
    pub keyword: Option<String>,
    pub warehouse: Option<String>,
    #[serde(with = "ts_seconds")]
    pub from: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub to: DateTime<Utc>,
    pub page: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NoteMessage {
    pub note: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RejectMessage {
    pub reason: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineOutput {
    pub sku: String,
    pub name: String,
    pub expected_qty: u32,
    pub received_qty: Option<u32>,
    pub damaged_qty: u32,
    pub accepted_qty: u32,
    pub unit_cost: i64,
}

impl From<ReceiptLine> for ReceiptLineOutput {
    fn from(l: ReceiptLine) -> Self {
        Self {
            accepted_qty: l.accepted_qty(),
            sku: l.sku,
            name: l.name,
            expected_qty: l.expected_qty,
            received_qty: l.received_qty,
            damaged_qty: l.damaged_qty,
            unit_cost: l.unit_cost,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub sku: String,
    pub expected_qty: u32,
    pub received_qty: u32,
    pub damaged_qty: u32,
    pub delta: i64,
    pub kind: DifferenceKind,
    pub value: i64,
}

impl From<ReceiptDifference> for Difference {
    fn from(d: ReceiptDifference) -> Self {
        Self {
            sku: d.sku,
            expected_qty: d.expected_qty,
            received_qty: d.received_qty,
            damaged_qty: d.damaged_qty,
            delta: d.delta,
            kind: d.kind,
            value: d.value,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub by: Uuid,
    pub by_username: String,
    #[serde(with = "ts_seconds")]
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

impl From<ManagerApproval> for Approval {
    fn from(a: ManagerApproval) -> Self {
        Self {
            by: a.by.into(),
            by_username: a.by_username,
            at: a.at.to_chrono(),
            note: a.note,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: Uuid,
    pub receipt_no: String,
    pub company_id: Uuid,
    pub warehouse: String,
    pub supplier_name: String,
    pub supplier_invoice_no: String,
    #[serde(with = "ts_seconds_option")]
    pub supplier_invoice_date: Option<DateTime<Utc>>,
    pub status: ReceiptStatus,
    pub lines: Vec<ReceiptLineOutput>,
    pub has_differences: bool,
    pub differences: Vec<Difference>,
    pub manager_approval: Option<Approval>,
    pub rejection_reason: Option<String>,
    pub history: Vec<History>,
    pub operation_ids: Vec<Uuid>,
    pub created_by: Uuid,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub update_at: DateTime<Utc>,
    pub version: i64,
}

impl From<MongoGoodsReceipt> for Receipt {
    fn from(m: MongoGoodsReceipt) -> Self {
        Self {
            id: m.id.into(),
            receipt_no: m.receipt_no,
            company_id: m.company_id.into(),
            warehouse: m.warehouse,
            supplier_name: m.supplier_name,
            supplier_invoice_no: m.supplier_invoice_no,
            supplier_invoice_date: m.supplier_invoice_date.map(|d| d.to_chrono()),
            status: m.status,
            lines: m.lines.into_iter().map(|l| l.into()).collect(),
            has_differences: m.has_differences,
            differences: m.differences.into_iter().map(|d| d.into()).collect(),
            manager_approval: m.manager_approval.map(|a| a.into()),
            rejection_reason: m.rejection_reason,
            history: m.history.into_iter().map(|h| h.into()).collect(),
            operation_ids: m.operation_ids.into_iter().map(|i| i.into()).collect(),
            created_by: m.created_by.into(),
            created_at: m.created_at.to_chrono(),
            update_at: m.update_at.to_chrono(),
            version: m.version,
        }
    }
}

pub async fn query_receipts(
    Query(query): Query<ReceiptQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PagedResponse<Receipt>>> {
    let page = query.page;
    let (has_next, receipts) = db.query_receipts(query).await?;
    Ok(PagedResponse::new(page, has_next, receipts).into())
}

pub async fn get_receipt(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Receipt>> {
    Ok(Json(db.get_receipt(id.into()).await?.into()))
}

#[instrument(name = "create receipt", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn create_receipt(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<ReceiptMessage>,
) -> Result<impl IntoResponse> {
    let actor = user_info.actor(AppPrivateRoute::Receipts);
    let receipt = db.create_receipt(message, &actor).await?;
    send_control_messages(&sender, &[ControlMessage::RefreshReceiptList]);
    Ok((StatusCode::CREATED, Json(Receipt::from(receipt))))
}

#[instrument(name = "update receipt draft", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn update_receipt_draft(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<ReceiptMessage>,
) -> Result<Json<Receipt>> {
    let actor = user_info.actor(AppPrivateRoute::Receipts);
    let receipt = db.update_receipt_draft(id.into(), message, &actor).await?;
    notify_changed(&sender, id);
    Ok(Json(receipt.into()))
}

async fn transition(
    user_info: &UserInfo,
    db: &DbClient,
    sender: &Arc<Sender<ControlMessage>>,
    id: Uuid,
    action: ReceiptAction,
) -> Result<MongoGoodsReceipt> {
    let actor = user_info.actor(AppPrivateRoute::Receipts);
    let receipt = db.transition_receipt(id.into(), action, &actor).await?;
    notify_changed(sender, id);
    Ok(receipt)
}

#[instrument(name = "start reception", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn start_reception(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Receipt>> {
    let receipt = transition(&user_info, &db, &sender, id, ReceiptAction::Start).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "record receipt counts", skip(user_info, db, sender, counts), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    lines = counts.len(),
))]
pub async fn record_counts(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(counts): Json<Vec<LineCount>>,
) -> Result<Json<Receipt>> {
    let action = ReceiptAction::RecordCounts(counts);
    let receipt = transition(&user_info, &db, &sender, id, action).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "verify receipt", skip(user_info, db, sender, notify), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn verify_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    State(notify): State<Arc<NotifyService>>,
) -> Result<Json<Receipt>> {
    let receipt = transition(&user_info, &db, &sender, id, ReceiptAction::Verify).await?;
    if receipt.has_differences {
        info!(
            "receipt {} verified with {} differences",
            receipt.receipt_no,
            receipt.differences.len()
        );
        notify.call_notify(
            format!("{} needs a manager approval", receipt.receipt_no),
            difference_notes(&receipt.differences),
        );
    }
    Ok(Json(receipt.into()))
}

#[instrument(name = "approve receipt differences", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn approve_differences(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    message: Option<Json<NoteMessage>>,
) -> Result<Json<Receipt>> {
    let note = message.map(|Json(m)| m.note).unwrap_or_default();
    let action = ReceiptAction::ApproveDifferences { note };
    let receipt = transition(&user_info, &db, &sender, id, action).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "approve receipt", skip(user_info, db, lock, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn approve_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(lock): State<Arc<dyn NamedLock>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Receipt>> {
    let actor = user_info.actor(AppPrivateRoute::Receipts);
    let receipt = with_lock(&lock, &receipt_lock_name(id), &actor.username, || {
        db.approve_receipt(id.into(), &actor)
    })
    .await?;
    send_control_messages(
        &sender,
        &[
            ControlMessage::RefreshReceiptList,
            ControlMessage::RefreshReceipt(id),
            ControlMessage::RefreshInventory,
        ],
    );
    Ok(Json(receipt.into()))
}

#[instrument(name = "reject receipt", skip(user_info, db, sender, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn reject_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
    Json(message): Json<RejectMessage>,
) -> Result<Json<Receipt>> {
    let action = ReceiptAction::Reject {
        reason: message.reason,
    };
    let receipt = transition(&user_info, &db, &sender, id, action).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "recount receipt", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn recount_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Receipt>> {
    let receipt = transition(&user_info, &db, &sender, id, ReceiptAction::Recount).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "reopen receipt", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn reopen_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Receipt>> {
    let receipt = transition(&user_info, &db, &sender, id, ReceiptAction::Reopen).await?;
    Ok(Json(receipt.into()))
}

#[instrument(name = "cancel receipt", skip(user_info, db, sender), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
))]
pub async fn cancel_receipt(
    user_info: UserInfo,
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<Json<Receipt>> {
    let receipt = transition(&user_info, &db, &sender, id, ReceiptAction::Cancel).await?;
    Ok(Json(receipt.into()))
}

#[inline]
fn notify_changed(sender: &Arc<Sender<ControlMessage>>, id: Uuid) {
    send_control_messages(
        sender,
        &[
            ControlMessage::RefreshReceiptList,
            ControlMessage::RefreshReceipt(id),
        ],
    );
}

fn difference_notes(differences: &[ReceiptDifference]) -> String {
    differences
        .iter()
        .map(|d| format!("{} {:?} {:+} ({} bani)", d.sku, d.kind, d.delta, d.value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_message_reads_camel_case_with_optional_fields() {
        let message: ReceiptMessage = serde_json::from_value(serde_json::json!({
            "companyId": "6f1c7f55-3e5a-4b43-9f3c-1f7c6a7f2a10",
            "warehouse": "buc1",
            "supplierName": "Textile Import SRL",
            "lines": [{"sku": "TS-01", "expectedQty": 3, "unitCost": 1250}],
        }))
        .unwrap();
        assert_eq!(message.supplier_invoice_no, "");
        assert!(message.supplier_invoice_date.is_none());
        assert_eq!(message.lines[0].name, "");
        assert_eq!(message.lines[0].expected_qty, 3);
    }

    #[test]
    fn counts_default_damaged_to_zero() {
        let counts: Vec<LineCount> = serde_json::from_value(serde_json::json!([
            {"sku": "TS-01", "receivedQty": 3},
            {"sku": "NEW-9", "name": "extra", "receivedQty": 1, "damagedQty": 1, "unitCost": 90},
        ]))
        .unwrap();
        assert_eq!(counts[0].damaged_qty, 0);
        assert_eq!(counts[1].unit_cost, Some(90));
    }

    #[test]
    fn difference_notes_list_one_line_per_sku() {
        let notes = difference_notes(&[
            ReceiptDifference {
                sku: String::from("TS-01"),
                expected_qty: 10,
                received_qty: 8,
                damaged_qty: 0,
                delta: -2,
                kind: DifferenceKind::Shortage,
                value: -2500,
            },
            ReceiptDifference {
                sku: String::from("TS-02"),
                expected_qty: 1,
                received_qty: 2,
                damaged_qty: 0,
                delta: 1,
                kind: DifferenceKind::Surplus,
                value: 700,
            },
        ]);
        assert_eq!(
            notes,
            "TS-01 Shortage -2 (-2500 bani)\nTS-02 Surplus +1 (700 bani)"
        );
    }
}
