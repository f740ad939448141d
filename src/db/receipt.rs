use std::{collections::HashSet, fmt::Display};

use axum::async_trait;
use chrono::{Datelike, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document, Uuid};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    error_result::{Error, Result, WorkflowError},
    server::{
        auth::SETTINGS,
        receipt::{ReceiptMessage, ReceiptQuery},
    },
};

use super::{
    auth::Actor,
    company::{find_company, find_warehouse},
    invenope::{MongoInventoryOperation, MongoOperationType},
    mongo::{commit_with_retry, DbClient, RECEIPTS_COL},
    line_amount, page_stages, stock_quantity, HistoryEntry, ReceiptRepo, ITEMS_PER_PAGE,
};

#[async_trait]
impl ReceiptRepo for DbClient {
    #[instrument(name = "create receipt", skip(self, message, actor), fields(by=%actor.username))]
    async fn create_receipt(
        &self,
        message: ReceiptMessage,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt> {
        let draft = ReceiptDraft::parse(message)?;
        check_company_warehouse(self, &draft).await?;
        let year = Utc::now().with_timezone(&SETTINGS.business_tz()).year();
        let seq = self.next_sequence(&format!("NIR-{year}")).await?;
        let receipt = MongoGoodsReceipt::new(receipt_no(year, seq), draft, actor);
        self.bo_db
            .collection::<MongoGoodsReceipt>(RECEIPTS_COL)
            .insert_one(&receipt, None)
            .await?;
        info!("receipt {} created", receipt.receipt_no);
        Ok(receipt)
    }

    async fn update_receipt_draft(
        &self,
        id: Uuid,
        message: ReceiptMessage,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt> {
        let draft = ReceiptDraft::parse(message)?;
        let mut receipt = find_receipt(self, id).await?;
        let version = receipt.version;
        receipt.update_draft(draft, actor)?;
        check_company_warehouse(self, &receipt.draft_view()).await?;
        save_receipt(self, &receipt, version).await?;
        Ok(receipt)
    }

    async fn query_receipts(&self, query: ReceiptQuery) -> Result<(bool, Vec<MongoGoodsReceipt>)> {
        query_receipts(self, query).await
    }

    async fn get_receipt(&self, id: Uuid) -> Result<MongoGoodsReceipt> {
        find_receipt(self, id).await
    }

    #[instrument(name = "receipt transition", skip(self, action, actor), fields(
        receipt_id=%id,
        action=%action.name(),
        by=%actor.username,
    ))]
    async fn transition_receipt(
        &self,
        id: Uuid,
        action: ReceiptAction,
        actor: &Actor,
    ) -> Result<MongoGoodsReceipt> {
        let mut receipt = find_receipt(self, id).await?;
        let version = receipt.version;
        receipt.apply(action, actor)?;
        save_receipt(self, &receipt, version).await?;
        info!("receipt {} is now {}", receipt.receipt_no, receipt.status);
        Ok(receipt)
    }

    #[instrument(name = "approve receipt", skip(self, actor), fields(receipt_id=%id, by=%actor.username))]
    async fn approve_receipt(&self, id: Uuid, actor: &Actor) -> Result<MongoGoodsReceipt> {
        let mut receipt = find_receipt(self, id).await?;
        let version = receipt.version;
        let postings = receipt.approve(actor)?;
        let mut session = self.start_transaction().await?;
        for posting in postings {
            let mut operation = MongoInventoryOperation::new(
                &posting.sku,
                receipt.id,
                MongoOperationType::Reception,
                stock_quantity(posting.quantity)?,
                &receipt.warehouse,
                posting.unit_cost,
            )
            .with_note(receipt.receipt_no.clone());
            let operation_id = operation
                .run_self_with_session(self, &posting.name, true, &mut session)
                .await?;
            receipt.operation_ids.push(operation_id);
        }
        let res = self
            .bo_db
            .collection::<MongoGoodsReceipt>(RECEIPTS_COL)
            .replace_one_with_session(
                doc! {"id":receipt.id,"status":ReceiptStatus::Verified,"version":version},
                &receipt,
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        commit_with_retry(&mut session).await?;
        info!(
            "receipt {} approved, {} operations posted",
            receipt.receipt_no,
            receipt.operation_ids.len()
        );
        Ok(receipt)
    }
}

pub fn receipt_no(year: i32, seq: i64) -> String {
    format!("NIR-{year}-{seq:05}")
}

async fn check_company_warehouse(db: &DbClient, draft: &ReceiptDraft) -> Result<()> {
    let company = find_company(db, draft.company_id).await?;
    let warehouse = find_warehouse(db, &draft.warehouse).await?;
    if warehouse.company_id != company.id {
        return Err(Error::Validation(format!(
            "warehouse {} does not belong to {}",
            warehouse.code, company.code
        )));
    }
    Ok(())
}

pub async fn find_receipt(db: &DbClient, id: Uuid) -> Result<MongoGoodsReceipt> {
    db.bo_db
        .collection::<MongoGoodsReceipt>(RECEIPTS_COL)
        .find_one(doc! {"id":id}, None)
        .await?
        .ok_or_else(|| Error::ReceiptNotFound(id.to_string()))
}

/// compare and set on the version read before the change
async fn save_receipt(db: &DbClient, receipt: &MongoGoodsReceipt, version: i64) -> Result<()> {
    let res = db
        .bo_db
        .collection::<MongoGoodsReceipt>(RECEIPTS_COL)
        .replace_one(doc! {"id":receipt.id,"version":version}, receipt, None)
        .await?;
    if res.matched_count == 0 {
        return Err(Error::Changed);
    }
    Ok(())
}

async fn query_receipts(
    db: &DbClient,
    query: ReceiptQuery,
) -> Result<(bool, Vec<MongoGoodsReceipt>)> {
    let mut filter = doc! {
        "created_at":{
            "$gte":bson::DateTime::from_chrono(query.from),
            "$lte":bson::DateTime::from_chrono(query.to),
        }
    };
    if let Some(status) = query.status {
        filter.insert("status", status);
    }
    if let Some(warehouse) = query.warehouse.filter(|w| !w.trim().is_empty()) {
        filter.insert("warehouse", warehouse.trim().to_uppercase());
    }
    if let Some(keyword) = query.keyword.filter(|k| !k.trim().is_empty()) {
        let regex = doc! {"$regex":keyword.trim(),"$options":"i"};
        filter.insert(
            "$or",
            vec![
                doc! {"receipt_no":regex.clone()},
                doc! {"supplier_name":regex.clone()},
                doc! {"supplier_invoice_no":regex.clone()},
                doc! {"lines.sku":regex},
            ],
        );
    }
    let mut pipeline = vec![doc! {"$match":filter}, doc! {"$sort":{"created_at":-1}}];
    pipeline.extend(page_stages(query.page));
    let mut cursor = db
        .bo_db
        .collection::<Document>(RECEIPTS_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut receipts = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        receipts.push(bson::from_document(doc)?);
    }
    let has_next = query.page.is_some() && (receipts.len() as u32) == ITEMS_PER_PAGE;
    Ok((has_next, receipts))
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptStatus {
    #[serde(rename = "CIORNA")]
    Draft,
    #[serde(rename = "IN_RECEPTIE")]
    InReception,
    #[serde(rename = "VERIFICAT")]
    Verified,
    #[serde(rename = "APROBAT")]
    Approved,
    #[serde(rename = "RESPINS")]
    Rejected,
    #[serde(rename = "ANULAT")]
    Cancelled,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "CIORNA",
            Self::InReception => "IN_RECEPTIE",
            Self::Verified => "VERIFICAT",
            Self::Approved => "APROBAT",
            Self::Rejected => "RESPINS",
            Self::Cancelled => "ANULAT",
        }
    }
}

impl Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ReceiptStatus> for Bson {
    fn from(s: ReceiptStatus) -> Self {
        Bson::String(s.as_str().to_owned())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub sku: String,
    pub name: String,
    /// 0 only for surplus lines found while counting
    pub expected_qty: u32,
    pub received_qty: Option<u32>,
    pub damaged_qty: u32,
    /// bani
    pub unit_cost: i64,
}

impl ReceiptLine {
    /// received and not damaged
    pub fn accepted_qty(&self) -> u32 {
        self.received_qty
            .unwrap_or(0)
            .saturating_sub(self.damaged_qty)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    Shortage,
    Surplus,
    Damaged,
    Match,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDifference {
    pub sku: String,
    pub expected_qty: u32,
    pub received_qty: u32,
    pub damaged_qty: u32,
    pub delta: i64,
    pub kind: DifferenceKind,
    /// value of what is missing (negative) or extra (positive), damaged goods count as missing
    pub value: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ManagerApproval {
    pub by: Uuid,
    pub by_username: String,
    pub at: bson::DateTime,
    pub note: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoGoodsReceipt {
    pub id: Uuid,
    pub receipt_no: String,
    pub company_id: Uuid,
    pub warehouse: String,
    pub supplier_name: String,
    pub supplier_invoice_no: String,
    pub supplier_invoice_date: Option<bson::DateTime>,
    pub status: ReceiptStatus,
    pub lines: Vec<ReceiptLine>,
    pub has_differences: bool,
    pub differences: Vec<ReceiptDifference>,
    pub manager_approval: Option<ManagerApproval>,
    pub rejection_reason: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub operation_ids: Vec<Uuid>,
    pub created_by: Uuid,
    pub created_at: bson::DateTime,
    pub update_at: bson::DateTime,
    pub version: i64,
}

/// a counted line, an unknown sku becomes a surplus line
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LineCount {
    pub sku: String,
    pub name: Option<String>,
    pub received_qty: u32,
    #[serde(default)]
    pub damaged_qty: u32,
    pub unit_cost: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ReceiptAction {
    Start,
    RecordCounts(Vec<LineCount>),
    Verify,
    ApproveDifferences { note: Option<String> },
    Reject { reason: String },
    Recount,
    Reopen,
    Cancel,
}

impl ReceiptAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::RecordCounts(_) => "record_counts",
            Self::Verify => "verify",
            Self::ApproveDifferences { .. } => "approve_differences",
            Self::Reject { .. } => "reject",
            Self::Recount => "recount",
            Self::Reopen => "reopen",
            Self::Cancel => "cancel",
        }
    }
}

/// stock to post for one line of an approved receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionPosting {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_cost: i64,
}

/// validated header and lines of a draft
#[derive(Debug, Clone)]
pub struct ReceiptDraft {
    pub company_id: Uuid,
    pub warehouse: String,
    pub supplier_name: String,
    pub supplier_invoice_no: String,
    pub supplier_invoice_date: Option<bson::DateTime>,
    pub lines: Vec<ReceiptLine>,
}

impl ReceiptDraft {
    pub fn parse(message: ReceiptMessage) -> Result<Self> {
        if message.supplier_name.trim().is_empty() {
            return Err(Error::Validation(String::from("supplier name is required")));
        }
        if message.lines.is_empty() {
            return Err(Error::Validation(String::from(
                "a receipt needs at least one line",
            )));
        }
        let mut skus = HashSet::new();
        let mut lines = Vec::with_capacity(message.lines.len());
        for line in message.lines {
            let sku = line.sku.trim().to_owned();
            if sku.is_empty() {
                return Err(Error::Validation(String::from("line sku is required")));
            }
            if !skus.insert(sku.clone()) {
                return Err(Error::Validation(format!("sku {sku} is listed twice")));
            }
            if line.expected_qty == 0 {
                return Err(Error::Validation(format!(
                    "expected quantity of {sku} must be positive"
                )));
            }
            if line.unit_cost < 0 {
                return Err(Error::Validation(format!(
                    "unit cost of {sku} must not be negative"
                )));
            }
            stock_quantity(line.expected_qty)?;
            line_amount(line.expected_qty, line.unit_cost)?;
            let name = if line.name.trim().is_empty() {
                sku.clone()
            } else {
                line.name.trim().to_owned()
            };
            lines.push(ReceiptLine {
                sku,
                name,
                expected_qty: line.expected_qty,
                received_qty: None,
                damaged_qty: 0,
                unit_cost: line.unit_cost,
            });
        }
        Ok(Self {
            company_id: message.company_id.into(),
            warehouse: message.warehouse.trim().to_uppercase(),
            supplier_name: message.supplier_name.trim().to_owned(),
            supplier_invoice_no: message.supplier_invoice_no.trim().to_owned(),
            supplier_invoice_date: message.supplier_invoice_date.map(|d| d.into()),
            lines,
        })
    }
}

impl MongoGoodsReceipt {
    pub fn new(receipt_no: String, draft: ReceiptDraft, actor: &Actor) -> Self {
        let now = Utc::now().into();
        Self {
            id: Uuid::new(),
            receipt_no,
            company_id: draft.company_id,
            warehouse: draft.warehouse,
            supplier_name: draft.supplier_name,
            supplier_invoice_no: draft.supplier_invoice_no,
            supplier_invoice_date: draft.supplier_invoice_date,
            status: ReceiptStatus::Draft,
            lines: draft.lines,
            has_differences: false,
            differences: vec![],
            manager_approval: None,
            rejection_reason: None,
            history: vec![HistoryEntry::new(
                None,
                ReceiptStatus::Draft,
                "create",
                actor,
                None,
            )],
            operation_ids: vec![],
            created_by: actor.id,
            created_at: now,
            update_at: now,
            version: 0,
        }
    }

    fn draft_view(&self) -> ReceiptDraft {
        ReceiptDraft {
            company_id: self.company_id,
            warehouse: self.warehouse.clone(),
            supplier_name: self.supplier_name.clone(),
            supplier_invoice_no: self.supplier_invoice_no.clone(),
            supplier_invoice_date: self.supplier_invoice_date,
            lines: self.lines.clone(),
        }
    }

    fn record(&mut self, to: ReceiptStatus, action: &str, actor: &Actor, note: Option<String>) {
        self.history.push(HistoryEntry::new(
            Some(self.status.to_string()),
            to,
            action,
            actor,
            note,
        ));
        self.status = to;
        self.version += 1;
        self.update_at = Utc::now().into();
    }

    fn expect_status(&self, allowed: &[ReceiptStatus], action: &str) -> Result<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(WorkflowError::invalid(self.status, action).into())
    }

    fn clear_review(&mut self) {
        self.has_differences = false;
        self.differences.clear();
        self.manager_approval = None;
    }

    pub fn update_draft(&mut self, draft: ReceiptDraft, actor: &Actor) -> Result<()> {
        self.expect_status(&[ReceiptStatus::Draft], "update")?;
        self.company_id = draft.company_id;
        self.warehouse = draft.warehouse;
        self.supplier_name = draft.supplier_name;
        self.supplier_invoice_no = draft.supplier_invoice_no;
        self.supplier_invoice_date = draft.supplier_invoice_date;
        self.lines = draft.lines;
        self.record(ReceiptStatus::Draft, "update", actor, None);
        Ok(())
    }

    /// every transition except approval
    pub fn apply(&mut self, action: ReceiptAction, actor: &Actor) -> Result<()> {
        let name = action.name();
        match action {
            ReceiptAction::Start => {
                self.expect_status(&[ReceiptStatus::Draft], name)?;
                self.record(ReceiptStatus::InReception, name, actor, None);
            }
            ReceiptAction::RecordCounts(counts) => {
                self.expect_status(&[ReceiptStatus::InReception], name)?;
                self.record_counts(counts)?;
                self.record(ReceiptStatus::InReception, name, actor, None);
            }
            ReceiptAction::Verify => {
                self.expect_status(&[ReceiptStatus::InReception], name)?;
                if self.lines.iter().any(|l| l.received_qty.is_none()) {
                    return Err(WorkflowError::CountsIncomplete.into());
                }
                self.differences = detect_differences(&self.lines);
                self.has_differences = !self.differences.is_empty();
                let note = self
                    .has_differences
                    .then(|| format!("{} lines differ", self.differences.len()));
                self.record(ReceiptStatus::Verified, name, actor, note);
            }
            ReceiptAction::ApproveDifferences { note } => {
                self.expect_status(&[ReceiptStatus::Verified], name)?;
                if !actor.is_manager() {
                    return Err(WorkflowError::ManagerApprovalRequired.into());
                }
                if !self.has_differences {
                    return Err(WorkflowError::NothingToApprove.into());
                }
                if self.manager_approval.is_some() {
                    return Err(WorkflowError::invalid(self.status, name).into());
                }
                self.manager_approval = Some(ManagerApproval {
                    by: actor.id,
                    by_username: actor.username.clone(),
                    at: Utc::now().into(),
                    note: note.clone(),
                });
                self.record(ReceiptStatus::Verified, name, actor, note);
            }
            ReceiptAction::Reject { reason } => {
                self.expect_status(&[ReceiptStatus::Verified], name)?;
                if !actor.is_manager() {
                    return Err(WorkflowError::ManagerApprovalRequired.into());
                }
                let reason = reason.trim().to_owned();
                if reason.is_empty() {
                    return Err(Error::Validation(String::from(
                        "a rejection needs a reason",
                    )));
                }
                self.rejection_reason = Some(reason.clone());
                self.record(ReceiptStatus::Rejected, name, actor, Some(reason));
            }
            ReceiptAction::Recount => {
                self.expect_status(&[ReceiptStatus::Verified], name)?;
                self.clear_review();
                self.record(ReceiptStatus::InReception, name, actor, None);
            }
            ReceiptAction::Reopen => {
                self.expect_status(&[ReceiptStatus::Rejected], name)?;
                self.clear_review();
                self.rejection_reason = None;
                self.record(ReceiptStatus::InReception, name, actor, None);
            }
            ReceiptAction::Cancel => {
                self.expect_status(&[ReceiptStatus::Draft, ReceiptStatus::InReception], name)?;
                self.record(ReceiptStatus::Cancelled, name, actor, None);
            }
        }
        Ok(())
    }

    /// moves to approved and returns what has to be posted to stock
    pub fn approve(&mut self, actor: &Actor) -> Result<Vec<ReceptionPosting>> {
        self.expect_status(&[ReceiptStatus::Verified], "approve")?;
        if self.has_differences && self.manager_approval.is_none() {
            return Err(WorkflowError::ManagerApprovalRequired.into());
        }
        let postings = self
            .lines
            .iter()
            .filter(|l| l.accepted_qty() > 0)
            .map(|l| ReceptionPosting {
                sku: l.sku.clone(),
                name: l.name.clone(),
                quantity: l.accepted_qty(),
                unit_cost: l.unit_cost,
            })
            .collect();
        self.record(ReceiptStatus::Approved, "approve", actor, None);
        Ok(postings)
    }

    /// all or nothing, nothing changes when one count is invalid
    fn record_counts(&mut self, counts: Vec<LineCount>) -> Result<()> {
        if counts.is_empty() {
            return Err(Error::Validation(String::from("no counts given")));
        }
        for count in counts.iter() {
            if count.sku.trim().is_empty() {
                return Err(Error::Validation(String::from("count sku is required")));
            }
            if count.damaged_qty > count.received_qty {
                return Err(Error::Validation(format!(
                    "damaged quantity of {} exceeds the received quantity",
                    count.sku.trim()
                )));
            }
            if count.unit_cost.map_or(false, |c| c < 0) {
                return Err(Error::Validation(format!(
                    "unit cost of {} must not be negative",
                    count.sku.trim()
                )));
            }
            stock_quantity(count.received_qty)?;
            let unit_cost = match self.lines.iter().find(|l| l.sku == count.sku.trim()) {
                Some(line) => line.unit_cost,
                None => count.unit_cost.unwrap_or(0),
            };
            line_amount(count.received_qty, unit_cost)?;
        }
        for count in counts {
            let sku = count.sku.trim().to_owned();
            match self.lines.iter_mut().find(|l| l.sku == sku) {
                Some(line) => {
                    line.received_qty = Some(count.received_qty);
                    line.damaged_qty = count.damaged_qty;
                }
                None => {
                    info!("{sku} was not expected, adding a surplus line");
                    self.lines.push(ReceiptLine {
                        name: count
                            .name
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or_else(|| sku.clone()),
                        sku,
                        expected_qty: 0,
                        received_qty: Some(count.received_qty),
                        damaged_qty: count.damaged_qty,
                        unit_cost: count.unit_cost.unwrap_or(0),
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn line_difference(line: &ReceiptLine) -> ReceiptDifference {
    let received = line.received_qty.unwrap_or(0);
    let delta = received as i64 - line.expected_qty as i64;
    let kind = if delta < 0 {
        DifferenceKind::Shortage
    } else if delta > 0 {
        DifferenceKind::Surplus
    } else if line.damaged_qty > 0 {
        DifferenceKind::Damaged
    } else {
        DifferenceKind::Match
    };
    // quantities times cost were checked to fit when entered
    let value = (received as i64 - line.damaged_qty as i64 - line.expected_qty as i64)
        .saturating_mul(line.unit_cost);
    ReceiptDifference {
        sku: line.sku.clone(),
        expected_qty: line.expected_qty,
        received_qty: received,
        damaged_qty: line.damaged_qty,
        delta,
        kind,
        value,
    }
}

/// the lines which do not match their expectation
pub fn detect_differences(lines: &[ReceiptLine]) -> Vec<ReceiptDifference> {
    lines
        .iter()
        .map(line_difference)
        .filter(|d| d.kind != DifferenceKind::Match)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::auth::UserRole;
    use crate::server::receipt::ReceiptLineMessage;

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

    fn message(lines: Vec<(&str, u32, i64)>) -> ReceiptMessage {
        ReceiptMessage {
            company_id: uuid::Uuid::new_v4(),
            warehouse: String::from(" buc1 "),
            supplier_name: String::from("Textile Import SRL"),
            supplier_invoice_no: String::from("TI-0042"),
            supplier_invoice_date: None,
            lines: lines
                .into_iter()
                .map(|(sku, expected_qty, unit_cost)| ReceiptLineMessage {
                    sku: sku.into(),
                    name: format!("item {sku}"),
                    expected_qty,
                    unit_cost,
                })
                .collect(),
        }
    }

    fn receipt(lines: Vec<(&str, u32, i64)>) -> MongoGoodsReceipt {
        let draft = ReceiptDraft::parse(message(lines)).unwrap();
        MongoGoodsReceipt::new(receipt_no(2026, 7), draft, &operator())
    }

    fn count(sku: &str, received: u32, damaged: u32) -> LineCount {
        LineCount {
            sku: sku.into(),
            name: None,
            received_qty: received,
            damaged_qty: damaged,
            unit_cost: None,
        }
    }

    fn verified(counts: Vec<LineCount>) -> MongoGoodsReceipt {
        let mut r = receipt(vec![("SKU-A", 10, 500), ("SKU-B", 4, 1200)]);
        let actor = operator();
        r.apply(ReceiptAction::Start, &actor).unwrap();
        r.apply(ReceiptAction::RecordCounts(counts), &actor).unwrap();
        r.apply(ReceiptAction::Verify, &actor).unwrap();
        r
    }

    fn workflow_error(result: Result<()>) -> WorkflowError {
        match result {
            Err(Error::Workflow(e)) => e,
            other => panic!("expected a workflow error, got {other:?}"),
        }
    }

    #[test]
    fn receipt_numbers_are_zero_padded_per_year() {
        assert_eq!(receipt_no(2026, 7), "NIR-2026-00007");
        assert_eq!(receipt_no(2027, 123456), "NIR-2027-123456");
    }

    #[test]
    fn draft_validation() {
        assert!(ReceiptDraft::parse(message(vec![])).is_err());
        assert!(ReceiptDraft::parse(message(vec![("A", 0, 1)])).is_err());
        assert!(ReceiptDraft::parse(message(vec![("A", 1, -1)])).is_err());
        assert!(ReceiptDraft::parse(message(vec![("A", 1, 1), (" A ", 2, 1)])).is_err());
        let draft = ReceiptDraft::parse(message(vec![("A", 1, 0)])).unwrap();
        assert_eq!(draft.warehouse, "BUC1");
    }

    #[test]
    fn new_receipt_is_a_draft_with_history() {
        let r = receipt(vec![("SKU-A", 10, 500)]);
        assert_eq!(r.status, ReceiptStatus::Draft);
        assert_eq!(r.version, 0);
        assert_eq!(r.history.len(), 1);
        assert_eq!(r.history[0].action, "create");
        assert_eq!(r.history[0].from, None);
    }

    #[test]
    fn matching_counts_verify_without_differences() {
        let r = verified(vec![count("SKU-A", 10, 0), count("SKU-B", 4, 0)]);
        assert_eq!(r.status, ReceiptStatus::Verified);
        assert!(!r.has_differences);
        assert!(r.differences.is_empty());
        // start, counts, verify
        assert_eq!(r.version, 3);
        assert_eq!(r.history.len(), 4);
        assert_eq!(r.history[3].from.as_deref(), Some("IN_RECEPTIE"));
        assert_eq!(r.history[3].to, "VERIFICAT");
    }

    #[test]
    fn verify_needs_every_line_counted() {
        let mut r = receipt(vec![("SKU-A", 10, 500), ("SKU-B", 4, 1200)]);
        let actor = operator();
        r.apply(ReceiptAction::Start, &actor).unwrap();
        r.apply(ReceiptAction::RecordCounts(vec![count("SKU-A", 10, 0)]), &actor)
            .unwrap();
        assert_eq!(
            workflow_error(r.apply(ReceiptAction::Verify, &actor)),
            WorkflowError::CountsIncomplete
        );
        assert_eq!(r.status, ReceiptStatus::InReception);
    }

    #[test]
    fn differences_are_classified_and_valued() {
        let r = verified(vec![
            count("SKU-A", 8, 0),
            count("SKU-B", 4, 1),
            LineCount {
                sku: String::from("SKU-C"),
                name: Some(String::from("extra scarf")),
                received_qty: 2,
                damaged_qty: 0,
                unit_cost: Some(300),
            },
        ]);
        assert!(r.has_differences);
        assert_eq!(r.lines.len(), 3);
        assert_eq!(r.lines[2].expected_qty, 0);
        assert_eq!(r.lines[2].name, "extra scarf");
        let by_sku = |sku: &str| r.differences.iter().find(|d| d.sku == sku).unwrap().clone();
        let a = by_sku("SKU-A");
        assert_eq!((a.kind, a.delta, a.value), (DifferenceKind::Shortage, -2, -1000));
        let b = by_sku("SKU-B");
        assert_eq!((b.kind, b.delta, b.value), (DifferenceKind::Damaged, 0, -1200));
        let c = by_sku("SKU-C");
        assert_eq!((c.kind, c.delta, c.value), (DifferenceKind::Surplus, 2, 600));
    }

    #[test]
    fn damaged_can_not_exceed_received_and_counts_are_atomic() {
        let mut r = receipt(vec![("SKU-A", 10, 500), ("SKU-B", 4, 1200)]);
        let actor = operator();
        r.apply(ReceiptAction::Start, &actor).unwrap();
        let res = r.apply(
            ReceiptAction::RecordCounts(vec![count("SKU-A", 10, 0), count("SKU-B", 1, 2)]),
            &actor,
        );
        assert!(matches!(res, Err(Error::Validation(_))));
        assert!(r.lines.iter().all(|l| l.received_qty.is_none()));
    }

    #[test]
    fn quantities_beyond_stock_range_are_refused() {
        let too_many = i32::MAX as u32 + 1;
        assert!(matches!(
            ReceiptDraft::parse(message(vec![("A", too_many, 1)])),
            Err(Error::Validation(_))
        ));
        assert!(ReceiptDraft::parse(message(vec![("A", i32::MAX as u32, 1)])).is_ok());
        assert!(matches!(
            ReceiptDraft::parse(message(vec![("A", 2, i64::MAX)])),
            Err(Error::Validation(_))
        ));

        let mut r = receipt(vec![("SKU-A", 10, 500)]);
        let actor = operator();
        r.apply(ReceiptAction::Start, &actor).unwrap();
        let res = r.apply(
            ReceiptAction::RecordCounts(vec![count("SKU-A", too_many, 0)]),
            &actor,
        );
        assert!(matches!(res, Err(Error::Validation(_))));
        let res = r.apply(
            ReceiptAction::RecordCounts(vec![LineCount {
                sku: String::from("SKU-X"),
                name: None,
                received_qty: 3,
                damaged_qty: 0,
                unit_cost: Some(i64::MAX / 2),
            }]),
            &actor,
        );
        assert!(matches!(res, Err(Error::Validation(_))));
        assert!(r.lines.iter().all(|l| l.received_qty.is_none()));
        assert_eq!(r.lines.len(), 1);
    }

    #[test]
    fn approve_without_differences_posts_accepted_quantities() {
        let mut r = verified(vec![count("SKU-A", 10, 0), count("SKU-B", 4, 0)]);
        let postings = r.approve(&operator()).unwrap();
        assert_eq!(r.status, ReceiptStatus::Approved);
        assert_eq!(
            postings,
            vec![
                ReceptionPosting {
                    sku: String::from("SKU-A"),
                    name: String::from("item SKU-A"),
                    quantity: 10,
                    unit_cost: 500
                },
                ReceptionPosting {
                    sku: String::from("SKU-B"),
                    name: String::from("item SKU-B"),
                    quantity: 4,
                    unit_cost: 1200
                },
            ]
        );
    }

    #[test]
    fn differences_need_manager_approval_before_approve() {
        let mut r = verified(vec![count("SKU-A", 8, 0), count("SKU-B", 4, 4)]);
        match r.approve(&operator()) {
            Err(Error::Workflow(WorkflowError::ManagerApprovalRequired)) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            workflow_error(r.apply(
                ReceiptAction::ApproveDifferences { note: None },
                &operator()
            )),
            WorkflowError::ManagerApprovalRequired
        );
        r.apply(
            ReceiptAction::ApproveDifferences {
                note: Some(String::from("supplier credit note follows")),
            },
            &manager(),
        )
        .unwrap();
        assert_eq!(
            workflow_error(r.apply(ReceiptAction::ApproveDifferences { note: None }, &manager())),
            WorkflowError::invalid(ReceiptStatus::Verified, "approve_differences")
        );
        let postings = r.approve(&operator()).unwrap();
        // fully damaged SKU-B posts nothing
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].quantity, 8);
    }

    #[test]
    fn nothing_to_approve_without_differences() {
        let mut r = verified(vec![count("SKU-A", 10, 0), count("SKU-B", 4, 0)]);
        assert_eq!(
            workflow_error(r.apply(ReceiptAction::ApproveDifferences { note: None }, &manager())),
            WorkflowError::NothingToApprove
        );
    }

    #[test]
    fn second_approve_is_an_invalid_transition() {
        let mut r = verified(vec![count("SKU-A", 10, 0), count("SKU-B", 4, 0)]);
        r.approve(&operator()).unwrap();
        match r.approve(&operator()) {
            Err(Error::Workflow(WorkflowError::InvalidTransition { from, action })) => {
                assert_eq!(from, "APROBAT");
                assert_eq!(action, "approve");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reject_then_reopen_clears_the_review() {
        let mut r = verified(vec![count("SKU-A", 9, 0), count("SKU-B", 4, 0)]);
        r.apply(ReceiptAction::ApproveDifferences { note: None }, &manager())
            .unwrap();
        assert!(matches!(
            r.apply(
                ReceiptAction::Reject {
                    reason: String::from("  ")
                },
                &manager()
            ),
            Err(Error::Validation(_))
        ));
        r.apply(
            ReceiptAction::Reject {
                reason: String::from("wrong supplier"),
            },
            &manager(),
        )
        .unwrap();
        assert_eq!(r.status, ReceiptStatus::Rejected);
        assert_eq!(r.rejection_reason.as_deref(), Some("wrong supplier"));
        r.apply(ReceiptAction::Reopen, &operator()).unwrap();
        assert_eq!(r.status, ReceiptStatus::InReception);
        assert!(r.rejection_reason.is_none());
        assert!(r.manager_approval.is_none());
        assert!(!r.has_differences);
    }

    #[test]
    fn recount_goes_back_to_reception() {
        let mut r = verified(vec![count("SKU-A", 9, 0), count("SKU-B", 4, 0)]);
        r.apply(ReceiptAction::Recount, &operator()).unwrap();
        assert_eq!(r.status, ReceiptStatus::InReception);
        assert!(r.differences.is_empty());
        r.apply(
            ReceiptAction::RecordCounts(vec![count("SKU-A", 10, 0)]),
            &operator(),
        )
        .unwrap();
        r.apply(ReceiptAction::Verify, &operator()).unwrap();
        assert!(!r.has_differences);
    }

    #[test]
    fn cancel_only_before_verification() {
        let mut draft = receipt(vec![("SKU-A", 1, 1)]);
        draft.apply(ReceiptAction::Cancel, &operator()).unwrap();
        assert_eq!(draft.status, ReceiptStatus::Cancelled);
        let mut r = verified(vec![count("SKU-A", 10, 0), count("SKU-B", 4, 0)]);
        assert_eq!(
            workflow_error(r.apply(ReceiptAction::Cancel, &operator())),
            WorkflowError::invalid(ReceiptStatus::Verified, "cancel")
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut r = receipt(vec![("SKU-A", 1, 1)]);
        let actor = operator();
        for action in [
            ReceiptAction::Verify,
            ReceiptAction::Recount,
            ReceiptAction::Reopen,
            ReceiptAction::RecordCounts(vec![count("SKU-A", 1, 0)]),
        ] {
            let name = action.name();
            assert_eq!(
                workflow_error(r.apply(action, &actor)),
                WorkflowError::invalid(ReceiptStatus::Draft, name)
            );
        }
        assert_eq!(r.version, 0);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReceiptStatus::InReception).unwrap(),
            "\"IN_RECEPTIE\""
        );
        let parsed: ReceiptStatus = serde_json::from_str("\"RESPINS\"").unwrap();
        assert_eq!(parsed, ReceiptStatus::Rejected);
    }
}
