pub mod auth;
pub mod awb;
pub mod company;
pub mod handover;
pub mod invenope;
pub mod inventory;
pub mod lock;
pub mod mongo;
pub mod order;
pub mod receipt;
pub mod settlement;

use crate::{
    error_result::{Error, Result},
    server::{
        awb::{AwbQuery, NewAwbMessage, TrackingEventMessage},
        company::{NewCompanyMessage, NewWarehouseMessage},
        handover::HandoverQuery,
        inventory::InventoryQuery,
        order::{InvoiceMessage, NewChannelOrderMessage, OrderQuery},
        receipt::{ReceiptMessage, ReceiptQuery},
        settlement::{SettlementInvoiceMessage, SettlementQuery},
    },
};
use axum::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use mongodb::bson::Uuid;
use serde::{Deserialize, Serialize};

use self::{
    auth::{Actor, User},
    awb::MongoAwb,
    company::{InvoicingProvider, MongoCompany, MongoWarehouse},
    handover::{Courier, FinalizeOutcome, HandoverReport, MongoHandoverSession, ScanOutcome},
    invenope::MongoInventoryOperation,
    inventory::MongoInventoryItem,
    order::MongoChannelOrder,
    receipt::{MongoGoodsReceipt, ReceiptAction},
    settlement::{MongoSettlement, SettlementRunOutcome},
};

pub const ITEMS_PER_PAGE: u32 = 10;

#[async_trait]
pub trait AuthDataBase: Send + Sync + 'static {
    async fn check_is_username_occupied(&self, username: &str) -> Result<bool>;

    async fn create_user(&self, user: User) -> Result<()>;

    async fn find_user(&self, id: Uuid) -> Result<User>;

    async fn find_user_by_username(&self, username: &str) -> Result<User>;
}

#[async_trait]
pub trait CompanyRepo: Send + Sync + 'static {
    async fn create_company(&self, message: NewCompanyMessage) -> Result<MongoCompany>;

    async fn list_companies(&self) -> Result<Vec<MongoCompany>>;

    async fn find_company(&self, id: Uuid) -> Result<MongoCompany>;

    /// the company must exist
    async fn create_warehouse(&self, message: NewWarehouseMessage) -> Result<MongoWarehouse>;

    async fn list_warehouses(&self) -> Result<Vec<MongoWarehouse>>;

    async fn find_warehouse(&self, code: &str) -> Result<MongoWarehouse>;
}

#[async_trait]
pub trait InventoryRepo: Send + Sync + 'static {
    async fn query_inventory(&self, query: InventoryQuery)
        -> Result<(bool, Vec<MongoInventoryItem>)>;

    /// newest first
    async fn get_inventory_item_operations(&self, sku: &str)
        -> Result<Vec<MongoInventoryOperation>>;

    async fn find_inventory_by_sku(&self, sku: &str) -> Result<Option<MongoInventoryItem>>;

    /// manual correction of an existing sku in a warehouse
    async fn adjust_inventory(
        &self,
        sku: &str,
        warehouse: &str,
        delta: i32,
        reason: &str,
        actor: &Actor,
    ) -> Result<MongoInventoryOperation>;
}

#[async_trait]
pub trait ReceiptRepo: Send + Sync + 'static {
    /// a new draft with the next NIR number of the current year
    async fn create_receipt(
        &self,
        message: ReceiptMessage,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt>;

    /// replace header and lines of a draft
    async fn update_receipt_draft(
        &self,
        id: Uuid,
        message: ReceiptMessage,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt>;

    async fn query_receipts(&self, query: ReceiptQuery) -> Result<(bool, Vec<MongoGoodsReceipt>)>;

    async fn get_receipt(&self, id: Uuid) -> Result<MongoGoodsReceipt>;

    /// every transition which does not touch stock, guarded by the receipt version.
    async fn transition_receipt(
        &self,
        id: Uuid,
        action: ReceiptAction,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt>;

    /// verified to approved, posting accepted quantities as reception operations
    /// in the same transaction as the status change.
    async fn approve_receipt(&self, id: Uuid, actor: &Actor) -> Result<MongoGoodsReceipt>;
}

#[async_trait]
pub trait OrderRepo: Send + Sync + 'static {
    /// returns false with the stored order when (channel, external_id) is already known.
    async fn ingest_order(&self, message: NewChannelOrderMessage)
        -> Result<(bool, MongoChannelOrder)>;

    async fn query_orders(&self, query: OrderQuery) -> Result<(bool, Vec<MongoChannelOrder>)>;

    async fn get_order(&self, id: Uuid) -> Result<MongoChannelOrder>;

    /// pending to invoiced
    async fn invoice_order(&self, id: Uuid, message: InvoiceMessage) -> Result<MongoChannelOrder>;

    /// also cancels an attached awb which has not been handed over yet
    async fn cancel_order(&self, id: Uuid) -> Result<MongoChannelOrder>;
}

#[async_trait]
pub trait AwbRepo: Send + Sync + 'static {
    async fn register_awb(&self, message: NewAwbMessage) -> Result<MongoAwb>;

    async fn query_awbs(&self, query: AwbQuery) -> Result<(bool, Vec<MongoAwb>)>;

    async fn get_awb(&self, awb_number: &str) -> Result<MongoAwb>;

    /// the event is always kept, the status only moves forward.
    async fn record_tracking(
        &self,
        awb_number: &str,
        message: TrackingEventMessage,
    ) -> Result<MongoAwb>;

    async fn cancel_awb(&self, awb_number: &str) -> Result<MongoAwb>;
}

#[async_trait]
pub trait HandoverRepo: Send + Sync + 'static {
    /// get or create the session of (date, warehouse, courier), true when created.
    async fn open_handover(
        &self,
        business_date: NaiveDate,
        warehouse: &str,
        courier: Courier,
        actor: &Actor,
    ) -> Result<(bool, MongoHandoverSession)>;

    async fn query_handovers(
        &self,
        query: HandoverQuery,
    ) -> Result<(bool, Vec<MongoHandoverSession>)>;

    async fn get_handover(&self, id: Uuid) -> Result<MongoHandoverSession>;

    async fn scan_awb(
        &self,
        id: Uuid,
        awb_number: &str,
        actor: &Actor,
        tz: Tz,
    ) -> Result<ScanOutcome>;

    async fn unscan_awb(
        &self,
        id: Uuid,
        awb_number: &str,
        actor: &Actor,
    ) -> Result<MongoHandoverSession>;

    async fn handover_report(&self, id: Uuid, tz: Tz) -> Result<HandoverReport>;

    /// open to finalized. missing awbs need a manager unless `auto` is set.
    async fn finalize_handover(
        &self,
        id: Uuid,
        actor: &Actor,
        note: Option<String>,
        auto: bool,
        tz: Tz,
    ) -> Result<FinalizeOutcome>;

    /// finalized to open, only on the business date of the session
    async fn reopen_handover(
        &self,
        id: Uuid,
        actor: &Actor,
        today: NaiveDate,
    ) -> Result<MongoHandoverSession>;

    async fn find_open_handovers_until(&self, date: NaiveDate)
        -> Result<Vec<MongoHandoverSession>>;
}

#[async_trait]
pub trait SettlementRepo: Send + Sync + 'static {
    async fn run_settlement(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        tz: Tz,
    ) -> Result<SettlementRunOutcome>;

    async fn query_settlements(
        &self,
        query: SettlementQuery,
    ) -> Result<(bool, Vec<MongoSettlement>)>;

    async fn get_settlement(&self, id: Uuid) -> Result<MongoSettlement>;

    async fn issue_settlement(
        &self,
        id: Uuid,
        message: SettlementInvoiceMessage,
    ) -> Result<MongoSettlement>;

    async fn mark_settlement_paid(&self, id: Uuid) -> Result<MongoSettlement>;

    /// only drafts, their orders become available for the next run
    async fn cancel_settlement(&self, id: Uuid) -> Result<MongoSettlement>;
}

/// reference to an invoice issued outside of this system
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRef {
    pub provider: InvoicingProvider,
    pub series: String,
    pub number: String,
    pub issued_at: mongodb::bson::DateTime,
}

/// one line of a workflow audit trail
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HistoryEntry {
    pub from: Option<String>,
    pub to: String,
    pub action: String,
    pub by: Uuid,
    pub by_username: String,
    pub at: mongodb::bson::DateTime,
    pub note: Option<String>,
}

impl HistoryEntry {
    pub fn new(
        from: Option<String>,
        to: impl ToString,
        action: &str,
        actor: &Actor,
        note: Option<String>,
    ) -> Self {
        Self {
            from,
            to: to.to_string(),
            action: action.to_owned(),
            by: actor.id,
            by_username: actor.username.clone(),
            at: Utc::now().into(),
            note,
        }
    }
}

/// integer division rounding halves away from zero
pub fn round_half_up_div(numerator: i128, denominator: i128) -> i128 {
    if denominator == 0 {
        return 0;
    }
    let (numerator, denominator) = if denominator < 0 {
        (-numerator, -denominator)
    } else {
        (numerator, denominator)
    };
    if numerator >= 0 {
        (numerator * 2 + denominator) / (denominator * 2)
    } else {
        -((-numerator * 2 + denominator) / (denominator * 2))
    }
}

/// `$limit`/`$skip` stages of the requested page, if any
pub fn page_stages(page: Option<u32>) -> Vec<mongodb::bson::Document> {
    sized_page_stages(ITEMS_PER_PAGE, page)
}

/// far pages saturate and come back empty
pub fn sized_page_stages(per_page: u32, page: Option<u32>) -> Vec<mongodb::bson::Document> {
    match page {
        Some(page) => {
            let skip = per_page.saturating_mul(page);
            vec![
                mongodb::bson::doc! {"$limit":per_page.saturating_add(skip)},
                mongodb::bson::doc! {"$skip":skip},
            ]
        }
        None => vec![],
    }
}

/// a wire quantity as a signed stock movement
pub fn stock_quantity(qty: u32) -> Result<i32> {
    i32::try_from(qty).map_err(|_| Error::Validation(format!("quantity {qty} is too large")))
}

/// `qty` units at `unit` bani each
pub fn line_amount(qty: u32, unit: i64) -> Result<i64> {
    i64::from(qty)
        .checked_mul(unit)
        .ok_or_else(|| Error::Validation(format!("{qty} x {unit} does not fit an amount")))
}

pub fn sum_amounts<I: IntoIterator<Item = i64>>(amounts: I) -> Result<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .ok_or_else(|| Error::Validation(String::from("total does not fit an amount")))
}
