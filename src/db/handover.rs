use std::{collections::HashSet, fmt::Display};

use axum::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document, Uuid},
    options::FindOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error_result::{is_duplicate_key, Error, Result, WorkflowError},
    server::handover::HandoverQuery,
};

use super::{
    auth::Actor,
    awb::{find_awb, AwbNumber, AwbStatus, MongoAwb},
    company::find_warehouse,
    invenope::{MongoInventoryOperation, MongoOperationType},
    mongo::{commit_with_retry, DbClient, AWBS_COL, HANDOVERS_COL, ORDERS_COL},
    order::{MongoChannelOrder, OrderStatus},
    page_stages, stock_quantity, HandoverRepo, HistoryEntry, ITEMS_PER_PAGE,
};

#[async_trait]
impl HandoverRepo for DbClient {
    #[instrument(name = "open handover", skip(self, actor), fields(by=%actor.username))]
    async fn open_handover(
        &self,
        business_date: NaiveDate,
        warehouse: &str,
        courier: Courier,
        actor: &Actor,
    ) -> Result<(bool, MongoHandoverSession)> {
        let warehouse = find_warehouse(self, warehouse).await?;
        if let Some(existing) =
            find_by_key(self, business_date, &warehouse.code, courier).await?
        {
            return Ok((false, existing));
        }
        let session = MongoHandoverSession::new(business_date, &warehouse.code, courier, actor);
        match self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .insert_one(&session, None)
            .await
        {
            Ok(_) => {
                info!(
                    "handover {} {} {} opened",
                    session.business_date, session.warehouse, session.courier
                );
                Ok((true, session))
            }
            Err(e) if is_duplicate_key(&e) => {
                let existing = find_by_key(self, business_date, &warehouse.code, courier)
                    .await?
                    .ok_or_else(|| Error::HandoverNotFound(business_date.to_string()))?;
                Ok((false, existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query_handovers(
        &self,
        query: HandoverQuery,
    ) -> Result<(bool, Vec<MongoHandoverSession>)> {
        query_handovers(self, query).await
    }

    async fn get_handover(&self, id: Uuid) -> Result<MongoHandoverSession> {
        find_handover(self, id).await
    }

    #[instrument(name = "scan awb", skip(self, actor, tz), fields(handover_id=%id, by=%actor.username))]
    async fn scan_awb(
        &self,
        id: Uuid,
        awb_number: &str,
        actor: &Actor,
        tz: Tz,
    ) -> Result<ScanOutcome> {
        let number = AwbNumber::parse(awb_number)?;
        let session = find_handover(self, id).await?;
        session.expect_open("scan")?;
        let awb = find_awb(self, number.as_str()).await?;
        if let Some(duplicate) = session.check_scan(&awb)? {
            info!("awb {} already scanned", awb.awb_number);
            return Ok(ScanOutcome {
                duplicate: true,
                scan: duplicate,
                session,
            });
        }
        let scan = HandoverScan {
            awb_number: awb.awb_number.clone(),
            order_id: awb.order_id,
            cod_amount: awb.cod_amount,
            scanned_at: Utc::now().into(),
            scanned_by: actor.id,
            scanned_by_username: actor.username.clone(),
            expected: awb.created_at.to_chrono() < day_end_utc(session.business_date, tz),
        };
        let res = self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .update_one(
                doc! {
                    "id":id,
                    "status":HandoverStatus::Open,
                    "scans.awb_number":{"$ne":&scan.awb_number},
                },
                doc! {
                    "$push":{"scans":bson::to_bson(&scan)?},
                    "$set":{"update_at":scan.scanned_at},
                },
                None,
            )
            .await?;
        let session = find_handover(self, id).await?;
        if res.matched_count == 0 {
            session.expect_open("scan")?;
            return match session.scans.iter().find(|s| s.awb_number == scan.awb_number) {
                Some(existing) => Ok(ScanOutcome {
                    duplicate: true,
                    scan: existing.clone(),
                    session: session.clone(),
                }),
                None => Err(Error::Changed),
            };
        }
        if !scan.expected {
            warn!("awb {} was created after the business date", scan.awb_number);
        }
        Ok(ScanOutcome {
            duplicate: false,
            scan,
            session,
        })
    }

    #[instrument(name = "unscan awb", skip(self, actor), fields(handover_id=%id, by=%actor.username))]
    async fn unscan_awb(
        &self,
        id: Uuid,
        awb_number: &str,
        actor: &Actor,
    ) -> Result<MongoHandoverSession> {
        let number = AwbNumber::parse(awb_number)?;
        let session = find_handover(self, id).await?;
        session.expect_open("unscan")?;
        if !session.scans.iter().any(|s| s.awb_number == number.as_str()) {
            return Err(Error::AwbNotFound(number.get_inner()));
        }
        let res = self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .update_one(
                doc! {"id":id,"status":HandoverStatus::Open},
                doc! {
                    "$pull":{"scans":{"awb_number":number.as_str()}},
                    "$set":{"update_at":Utc::now()},
                },
                None,
            )
            .await?;
        if res.matched_count == 0 {
            return Err(Error::Changed);
        }
        info!("awb {} removed from handover", number.as_str());
        find_handover(self, id).await
    }

    async fn handover_report(&self, id: Uuid, tz: Tz) -> Result<HandoverReport> {
        let session = find_handover(self, id).await?;
        build_report(self, &session, tz).await
    }

    #[instrument(name = "finalize handover", skip(self, actor, note, tz), fields(
        handover_id=%id,
        by=%actor.username,
        auto=auto,
    ))]
    async fn finalize_handover(
        &self,
        id: Uuid,
        actor: &Actor,
        note: Option<String>,
        auto: bool,
        tz: Tz,
    ) -> Result<FinalizeOutcome> {
        let mut session = find_handover(self, id).await?;
        session.expect_open(finalize_action(auto))?;
        let report = build_report(self, &session, tz).await?;
        let scans_seen = session.scans.len() as i64;
        let entry = session.finalize(&report, actor, note, auto)?;

        let mut orders = Vec::new();
        for scan in session.scans.iter() {
            if hand_over_awb(self, scan, &session).await? {
                orders.push(scan.order_id);
            }
        }
        let mut orders_shipped = 0;
        for order_id in orders {
            if ship_order(self, order_id).await? {
                orders_shipped += 1;
            }
        }

        let res = self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .update_one(
                doc! {
                    "id":id,
                    "status":HandoverStatus::Open,
                    "scans":{"$size":scans_seen},
                },
                doc! {
                    "$set":{
                        "status":session.status,
                        "missing_at_finalization":session.missing_at_finalization.clone(),
                        "finalized_by":session.finalized_by,
                        "finalized_by_username":session.finalized_by_username.as_deref(),
                        "finalized_at":session.finalized_at,
                        "auto_finalized":session.auto_finalized,
                        "manager_override":bson::to_bson(&session.manager_override)?,
                        "update_at":session.update_at,
                    },
                    "$push":{"history":bson::to_bson(&entry)?},
                },
                None,
            )
            .await?;
        if res.matched_count == 0 {
            // effects so far are idempotent, a retry finishes the job
            return Err(Error::Changed);
        }
        info!(
            "handover {} finalized, {} scanned, {} missing, {} orders shipped",
            session.id,
            report.scanned_count,
            report.missing.len(),
            orders_shipped
        );
        Ok(FinalizeOutcome {
            session,
            report,
            orders_shipped,
        })
    }

    #[instrument(name = "reopen handover", skip(self, actor), fields(handover_id=%id, by=%actor.username))]
    async fn reopen_handover(
        &self,
        id: Uuid,
        actor: &Actor,
        today: NaiveDate,
    ) -> Result<MongoHandoverSession> {
        let mut session = find_handover(self, id).await?;
        session.reopen(actor, today)?;
        let res = self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .replace_one(
                doc! {"id":id,"status":HandoverStatus::Finalized},
                &session,
                None,
            )
            .await?;
        if res.matched_count == 0 {
            return Err(Error::Changed);
        }
        info!("handover {} reopened", session.id);
        Ok(session)
    }

    async fn find_open_handovers_until(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MongoHandoverSession>> {
        let options = FindOptions::builder()
            .sort(doc! {"business_date":1,"warehouse":1})
            .build();
        let cursor = self
            .bo_db
            .collection::<MongoHandoverSession>(HANDOVERS_COL)
            .find(
                doc! {
                    "status":HandoverStatus::Open,
                    "business_date":{"$lte":date.to_string()},
                },
                options,
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

fn finalize_action(auto: bool) -> &'static str {
    if auto {
        "auto_finalize"
    } else {
        "finalize"
    }
}

pub async fn find_handover(db: &DbClient, id: Uuid) -> Result<MongoHandoverSession> {
    db.bo_db
        .collection::<MongoHandoverSession>(HANDOVERS_COL)
        .find_one(doc! {"id":id}, None)
        .await?
        .ok_or_else(|| Error::HandoverNotFound(id.to_string()))
}

async fn find_by_key(
    db: &DbClient,
    business_date: NaiveDate,
    warehouse: &str,
    courier: Courier,
) -> Result<Option<MongoHandoverSession>> {
    Ok(db
        .bo_db
        .collection::<MongoHandoverSession>(HANDOVERS_COL)
        .find_one(
            doc! {
                "business_date":business_date.to_string(),
                "warehouse":warehouse,
                "courier":courier,
            },
            None,
        )
        .await?)
}

async fn query_handovers(
    db: &DbClient,
    query: HandoverQuery,
) -> Result<(bool, Vec<MongoHandoverSession>)> {
    let mut filter = Document::new();
    let mut date_range = Document::new();
    if let Some(from) = query.from {
        date_range.insert("$gte", from.to_string());
    }
    if let Some(to) = query.to {
        date_range.insert("$lte", to.to_string());
    }
    if !date_range.is_empty() {
        filter.insert("business_date", date_range);
    }
    if let Some(warehouse) = query.warehouse.filter(|w| !w.trim().is_empty()) {
        filter.insert("warehouse", warehouse.trim().to_uppercase());
    }
    if let Some(status) = query.status {
        filter.insert("status", status);
    }
    let mut pipeline = vec![
        doc! {"$match":filter},
        doc! {"$sort":{"business_date":-1,"warehouse":1}},
    ];
    pipeline.extend(page_stages(query.page));
    let mut cursor = db
        .bo_db
        .collection::<Document>(HANDOVERS_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut sessions = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        sessions.push(bson::from_document(doc)?);
    }
    let has_next = query.page.is_some() && (sessions.len() as u32) == ITEMS_PER_PAGE;
    Ok((has_next, sessions))
}

/// awbs of the session's warehouse and courier still waiting for the courier
async fn pending_awbs(
    db: &DbClient,
    session: &MongoHandoverSession,
    day_end: DateTime<Utc>,
) -> Result<Vec<MongoAwb>> {
    let cursor = db
        .bo_db
        .collection::<MongoAwb>(AWBS_COL)
        .find(
            doc! {
                "warehouse":&session.warehouse,
                "courier":session.courier,
                "status":AwbStatus::Created,
                "created_at":{"$lt":bson::DateTime::from_chrono(day_end)},
            },
            None,
        )
        .await?;
    Ok(cursor.try_collect().await?)
}

async fn build_report(
    db: &DbClient,
    session: &MongoHandoverSession,
    tz: Tz,
) -> Result<HandoverReport> {
    if session.status == HandoverStatus::Finalized {
        return Ok(reconcile(session, &[]));
    }
    let pending = pending_awbs(db, session, day_end_utc(session.business_date, tz)).await?;
    Ok(reconcile(session, &pending))
}

/// created to handed over, true when the awb belongs to this session afterwards
async fn hand_over_awb(
    db: &DbClient,
    scan: &HandoverScan,
    session: &MongoHandoverSession,
) -> Result<bool> {
    let res = db
        .bo_db
        .collection::<MongoAwb>(AWBS_COL)
        .update_one(
            doc! {"awb_number":&scan.awb_number,"status":AwbStatus::Created},
            doc! {"$set":{
                "status":AwbStatus::HandedOver,
                "handed_over_at":session.finalized_at,
                "handover_session_id":session.id,
            }},
            None,
        )
        .await?;
    if res.modified_count == 1 {
        return Ok(true);
    }
    let awb = find_awb(db, &scan.awb_number).await?;
    if awb.handover_session_id == Some(session.id) {
        return Ok(true);
    }
    warn!(
        "awb {} is {} and was not handed over here",
        awb.awb_number, awb.status
    );
    Ok(false)
}

/// invoiced to shipped with its stock deducted, in one transaction.
/// false when the order was not waiting for shipment.
#[instrument(name = "ship order", skip(db))]
async fn ship_order(db: &DbClient, order_id: Uuid) -> Result<bool> {
    let mut session = db.start_transaction().await?;
    let collection = db.bo_db.collection::<MongoChannelOrder>(ORDERS_COL);
    let order = collection
        .find_one_with_session(doc! {"id":order_id}, None, &mut session)
        .await?
        .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
    if order.status != OrderStatus::Invoiced {
        session.abort_transaction().await?;
        info!("order {} is {}, not shipping again", order.order_no, order.status);
        return Ok(false);
    }
    let mut set = doc! {
        "status":OrderStatus::Shipped,
        "shipped_at":Utc::now(),
        "update_at":Utc::now(),
    };
    for (index, line) in order.lines.iter().enumerate() {
        let mut operation = MongoInventoryOperation::new(
            &line.sku,
            order.id,
            MongoOperationType::Shipment,
            -stock_quantity(line.quantity)?,
            &order.warehouse,
            0,
        )
        .with_note(order.order_no.clone());
        operation
            .run_self_with_session(db, &line.name, true, &mut session)
            .await?;
        set.insert(
            format!("lines.{index}.unit_cost_at_shipment"),
            operation.unit_cost,
        );
    }
    let res = collection
        .update_one_with_session(
            doc! {"id":order_id,"status":OrderStatus::Invoiced},
            doc! {"$set":set},
            None,
            &mut session,
        )
        .await?;
    if res.matched_count == 0 {
        session.abort_transaction().await?;
        return Err(Error::Changed);
    }
    commit_with_retry(&mut session).await?;
    info!("order {} shipped", order.order_no);
    Ok(true)
}

/// local midnight starting `date`, in utc
pub fn day_start_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(start) => start.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&midnight),
    }
}

/// the next local midnight after `date`, in utc
pub fn day_end_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    day_start_utc(date.succ_opt().unwrap_or(date), tz)
}

/// pending awbs against the scans of the session
pub fn reconcile(session: &MongoHandoverSession, pending: &[MongoAwb]) -> HandoverReport {
    let scanned: HashSet<&str> = session.scans.iter().map(|s| s.awb_number.as_str()).collect();
    let mut missing: Vec<String> = if session.status == HandoverStatus::Finalized {
        session.missing_at_finalization.clone()
    } else {
        pending
            .iter()
            .filter(|a| !scanned.contains(a.awb_number.as_str()))
            .map(|a| a.awb_number.clone())
            .collect()
    };
    missing.sort();
    missing.dedup();
    let unexpected: Vec<String> = session
        .scans
        .iter()
        .filter(|s| !s.expected)
        .map(|s| s.awb_number.clone())
        .collect();
    let expected_scanned = session.scans.iter().filter(|s| s.expected).count();
    HandoverReport {
        session_id: session.id,
        business_date: session.business_date,
        warehouse: session.warehouse.clone(),
        courier: session.courier,
        status: session.status,
        expected_count: expected_scanned + missing.len(),
        scanned_count: session.scans.len(),
        missing,
        unexpected,
        scanned_cod_total: session
            .scans
            .iter()
            .fold(0i64, |total, s| total.saturating_add(s.cod_amount)),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Courier {
    FanCourier,
}

impl Display for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FanCourier => write!(f, "fan_courier"),
        }
    }
}

impl From<Courier> for Bson {
    fn from(c: Courier) -> Self {
        Bson::String(c.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandoverStatus {
    Open,
    Finalized,
}

impl Display for HandoverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

impl From<HandoverStatus> for Bson {
    fn from(s: HandoverStatus) -> Self {
        Bson::String(s.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HandoverScan {
    pub awb_number: String,
    pub order_id: Uuid,
    pub cod_amount: i64,
    pub scanned_at: bson::DateTime,
    pub scanned_by: Uuid,
    pub scanned_by_username: String,
    /// created on or before the business date
    pub expected: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ManagerOverride {
    pub by: Uuid,
    pub by_username: String,
    pub at: bson::DateTime,
    pub missing: Vec<String>,
    pub note: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoHandoverSession {
    pub id: Uuid,
    /// stored as YYYY-MM-DD
    pub business_date: NaiveDate,
    pub warehouse: String,
    pub courier: Courier,
    pub status: HandoverStatus,
    pub scans: Vec<HandoverScan>,
    pub missing_at_finalization: Vec<String>,
    pub finalized_by: Option<Uuid>,
    pub finalized_by_username: Option<String>,
    pub finalized_at: Option<bson::DateTime>,
    pub auto_finalized: bool,
    pub manager_override: Option<ManagerOverride>,
    pub history: Vec<HistoryEntry>,
    pub created_at: bson::DateTime,
    pub update_at: bson::DateTime,
}

impl MongoHandoverSession {
    pub fn new(business_date: NaiveDate, warehouse: &str, courier: Courier, actor: &Actor) -> Self {
        let now = Utc::now().into();
        Self {
            id: Uuid::new(),
            business_date,
            warehouse: warehouse.to_owned(),
            courier,
            status: HandoverStatus::Open,
            scans: vec![],
            missing_at_finalization: vec![],
            finalized_by: None,
            finalized_by_username: None,
            finalized_at: None,
            auto_finalized: false,
            manager_override: None,
            history: vec![HistoryEntry::new(
                None,
                HandoverStatus::Open,
                "open",
                actor,
                None,
            )],
            created_at: now,
            update_at: now,
        }
    }

    fn expect_open(&self, action: &str) -> Result<()> {
        if self.status != HandoverStatus::Open {
            return Err(WorkflowError::invalid(self.status, action).into());
        }
        Ok(())
    }

    /// the existing scan when the awb was already scanned here,
    /// an error when it can not be scanned at all
    pub fn check_scan(&self, awb: &MongoAwb) -> Result<Option<HandoverScan>> {
        if awb.warehouse != self.warehouse || awb.courier != self.courier {
            return Err(Error::Validation(format!(
                "awb {} belongs to {} {}",
                awb.awb_number, awb.warehouse, awb.courier
            )));
        }
        if awb.status == AwbStatus::Cancelled {
            return Err(Error::Conflict(format!(
                "awb {} is cancelled",
                awb.awb_number
            )));
        }
        let existing = self
            .scans
            .iter()
            .find(|s| s.awb_number == awb.awb_number)
            .cloned();
        if awb.status != AwbStatus::Created && awb.handover_session_id != Some(self.id) {
            return Err(Error::Conflict(format!(
                "awb {} is already {}",
                awb.awb_number, awb.status
            )));
        }
        Ok(existing)
    }

    /// open to finalized. missing awbs need a manager unless finalized automatically.
    pub fn finalize(
        &mut self,
        report: &HandoverReport,
        actor: &Actor,
        note: Option<String>,
        auto: bool,
    ) -> Result<HistoryEntry> {
        let action = finalize_action(auto);
        self.expect_open(action)?;
        let now: bson::DateTime = Utc::now().into();
        if !report.missing.is_empty() && !auto {
            if !actor.is_manager() {
                return Err(WorkflowError::ManagerApprovalRequired.into());
            }
            self.manager_override = Some(ManagerOverride {
                by: actor.id,
                by_username: actor.username.clone(),
                at: now,
                missing: report.missing.clone(),
                note: note.clone(),
            });
        }
        let entry = HistoryEntry::new(
            Some(self.status.to_string()),
            HandoverStatus::Finalized,
            action,
            actor,
            note,
        );
        self.history.push(entry.clone());
        self.status = HandoverStatus::Finalized;
        self.missing_at_finalization = report.missing.clone();
        self.finalized_by = Some(actor.id);
        self.finalized_by_username = Some(actor.username.clone());
        self.finalized_at = Some(now);
        self.auto_finalized = auto;
        self.update_at = now;
        Ok(entry)
    }

    /// finalized to open, only during the business date itself
    pub fn reopen(&mut self, actor: &Actor, today: NaiveDate) -> Result<()> {
        if self.status != HandoverStatus::Finalized || self.business_date != today {
            return Err(WorkflowError::invalid(self.status, "reopen").into());
        }
        self.history.push(HistoryEntry::new(
            Some(self.status.to_string()),
            HandoverStatus::Open,
            "reopen",
            actor,
            None,
        ));
        self.status = HandoverStatus::Open;
        self.missing_at_finalization.clear();
        self.finalized_by = None;
        self.finalized_by_username = None;
        self.finalized_at = None;
        self.auto_finalized = false;
        self.manager_override = None;
        self.update_at = Utc::now().into();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub duplicate: bool,
    pub scan: HandoverScan,
    pub session: MongoHandoverSession,
}

#[derive(Debug, Clone)]
pub struct HandoverReport {
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

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub session: MongoHandoverSession,
    pub report: HandoverReport,
    pub orders_shipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::auth::UserRole;

    fn operator() -> Actor {
        Actor {
            id: Uuid::new(),
            username: String::from("operator"),
            role: UserRole::Editor,
        }
    }

    fn manager() -> Actor {
        Actor {
            id: Uuid::new(),
            username: String::from("manager"),
            role: UserRole::Full,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn awb(number: &str, status: AwbStatus) -> MongoAwb {
        MongoAwb {
            id: Uuid::new(),
            awb_number: number.into(),
            courier: Courier::FanCourier,
            order_id: Uuid::new(),
            warehouse: String::from("BUC1"),
            cod_amount: 1000,
            parcels: 1,
            weight_grams: 500,
            status,
            created_at: Utc::now().into(),
            handed_over_at: None,
            handover_session_id: None,
            events: vec![],
        }
    }

    fn scan(number: &str, expected: bool, cod_amount: i64) -> HandoverScan {
        HandoverScan {
            awb_number: number.into(),
            order_id: Uuid::new(),
            cod_amount,
            scanned_at: Utc::now().into(),
            scanned_by: Uuid::new(),
            scanned_by_username: String::from("operator"),
            expected,
        }
    }

    fn session() -> MongoHandoverSession {
        MongoHandoverSession::new(date(2026, 10, 19), "BUC1", Courier::FanCourier, &operator())
    }

    #[test]
    fn day_end_follows_the_business_time_zone() {
        let tz = chrono_tz::Europe::Bucharest;
        // summer time, utc+3
        assert_eq!(
            day_end_utc(date(2026, 7, 1), tz),
            Utc.with_ymd_and_hms(2026, 7, 1, 21, 0, 0).unwrap()
        );
        // winter time, utc+2
        assert_eq!(
            day_end_utc(date(2026, 12, 1), tz),
            Utc.with_ymd_and_hms(2026, 12, 1, 22, 0, 0).unwrap()
        );
        // the day the clocks go back lasts 25 hours
        assert_eq!(
            day_end_utc(date(2026, 10, 25), tz),
            Utc.with_ymd_and_hms(2026, 10, 25, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn reconcile_reports_missing_and_unexpected() {
        let mut s = session();
        s.scans = vec![
            scan("10000001", true, 1500),
            scan("10000009", false, 0),
        ];
        let pending = vec![
            awb("10000001", AwbStatus::Created),
            awb("10000002", AwbStatus::Created),
            awb("10000003", AwbStatus::Created),
        ];
        let report = reconcile(&s, &pending);
        assert_eq!(report.missing, vec!["10000002", "10000003"]);
        assert_eq!(report.unexpected, vec!["10000009"]);
        assert_eq!(report.expected_count, 3);
        assert_eq!(report.scanned_count, 2);
        assert_eq!(report.scanned_cod_total, 1500);
    }

    #[test]
    fn reconcile_of_finalized_session_uses_recorded_missing() {
        let mut s = session();
        s.status = HandoverStatus::Finalized;
        s.missing_at_finalization = vec![String::from("10000002")];
        s.scans = vec![scan("10000001", true, 0)];
        let report = reconcile(&s, &[awb("10000077", AwbStatus::Created)]);
        assert_eq!(report.missing, vec!["10000002"]);
        assert_eq!(report.expected_count, 2);
    }

    #[test]
    fn scan_checks() {
        let s = session();
        let mut other_warehouse = awb("10000001", AwbStatus::Created);
        other_warehouse.warehouse = String::from("CLJ1");
        assert!(matches!(
            s.check_scan(&other_warehouse),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            s.check_scan(&awb("10000001", AwbStatus::Cancelled)),
            Err(Error::Conflict(_))
        ));
        let mut elsewhere = awb("10000001", AwbStatus::HandedOver);
        elsewhere.handover_session_id = Some(Uuid::new());
        assert!(matches!(s.check_scan(&elsewhere), Err(Error::Conflict(_))));
        assert!(s
            .check_scan(&awb("10000001", AwbStatus::Created))
            .unwrap()
            .is_none());
    }

    #[test]
    fn scanning_twice_is_a_duplicate() {
        let mut s = session();
        s.scans = vec![scan("10000001", true, 0)];
        let existing = s.check_scan(&awb("10000001", AwbStatus::Created)).unwrap();
        assert_eq!(existing.unwrap().awb_number, "10000001");
        // handed over by this session before a reopen
        let mut handed = awb("10000001", AwbStatus::HandedOver);
        handed.handover_session_id = Some(s.id);
        assert!(s.check_scan(&handed).unwrap().is_some());
    }

    #[test]
    fn missing_awbs_need_a_manager() {
        let mut s = session();
        s.scans = vec![scan("10000001", true, 0)];
        let report = reconcile(&s, &[awb("10000002", AwbStatus::Created)]);
        match s.finalize(&report, &operator(), None, false) {
            Err(Error::Workflow(WorkflowError::ManagerApprovalRequired)) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.status, HandoverStatus::Open);
        s.finalize(&report, &manager(), Some(String::from("courier left early")), false)
            .unwrap();
        assert_eq!(s.status, HandoverStatus::Finalized);
        let manager_override = s.manager_override.clone().unwrap();
        assert_eq!(manager_override.missing, vec!["10000002"]);
        assert_eq!(s.missing_at_finalization, vec!["10000002"]);
        assert!(!s.auto_finalized);
        match s.finalize(&report, &manager(), None, false) {
            Err(Error::Workflow(WorkflowError::InvalidTransition { from, action })) => {
                assert_eq!(from, "finalized");
                assert_eq!(action, "finalize");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn complete_handover_is_finalized_by_an_operator() {
        let mut s = session();
        s.scans = vec![scan("10000001", true, 0)];
        let report = reconcile(&s, &[awb("10000001", AwbStatus::Created)]);
        let entry = s.finalize(&report, &operator(), None, false).unwrap();
        assert!(s.manager_override.is_none());
        assert_eq!(s.history.last().unwrap().action, "finalize");
        // the returned entry is the one pushed to the stored history
        let pushed = bson::to_bson(&entry).unwrap();
        assert!(matches!(pushed, Bson::Document(_)));
        assert_eq!(pushed, bson::to_bson(s.history.last().unwrap()).unwrap());
    }

    #[test]
    fn auto_finalize_bypasses_the_gate_but_keeps_missing() {
        let mut s = session();
        let report = reconcile(&s, &[awb("10000002", AwbStatus::Created)]);
        s.finalize(&report, &Actor::system(), None, true).unwrap();
        assert!(s.auto_finalized);
        assert!(s.manager_override.is_none());
        assert_eq!(s.missing_at_finalization, vec!["10000002"]);
        assert_eq!(s.history.last().unwrap().action, "auto_finalize");
        assert_eq!(s.history.last().unwrap().by_username, "system");
    }

    #[test]
    fn reopen_only_on_the_business_date() {
        let mut s = session();
        let report = reconcile(&s, &[]);
        s.finalize(&report, &operator(), None, false).unwrap();
        assert!(matches!(
            s.reopen(&manager(), date(2026, 10, 20)),
            Err(Error::Workflow(WorkflowError::InvalidTransition { .. }))
        ));
        s.reopen(&manager(), date(2026, 10, 19)).unwrap();
        assert_eq!(s.status, HandoverStatus::Open);
        assert!(s.finalized_at.is_none());
        assert!(matches!(
            s.reopen(&manager(), date(2026, 10, 19)),
            Err(Error::Workflow(WorkflowError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn business_date_is_stored_as_iso_string() {
        let doc = bson::to_document(&session()).unwrap();
        assert_eq!(doc.get_str("business_date").unwrap(), "2026-10-19");
        assert_eq!(doc.get_str("courier").unwrap(), "fan_courier");
    }
}
