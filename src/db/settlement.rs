use std::{collections::HashMap, fmt::Display};

use axum::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document, Uuid};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error_result::{Error, Result, WorkflowError},
    server::settlement::{SettlementInvoiceMessage, SettlementQuery},
};

use super::{
    company::{find_company, warehouse_owners},
    handover::{day_end_utc, day_start_utc},
    mongo::{commit_with_retry, DbClient, ORDERS_COL, SETTLEMENTS_COL},
    order::{MongoChannelOrder, OrderStatus},
    line_amount, page_stages, round_half_up_div, sum_amounts, CompanyRepo, InvoiceRef,
    SettlementRepo, ITEMS_PER_PAGE,
};

#[async_trait]
impl SettlementRepo for DbClient {
    #[instrument(name = "run settlement", skip(self, tz))]
    async fn run_settlement(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        tz: Tz,
    ) -> Result<SettlementRunOutcome> {
        if from > to {
            return Err(Error::Validation(format!("period {from}..{to} is empty")));
        }
        let orders = unsettled_orders(self, from, to, tz).await?;
        let owners = warehouse_owners(self).await?;
        let markups: HashMap<Uuid, u32> = self
            .list_companies()
            .await?
            .into_iter()
            .map(|c| (c.id, c.intercompany_markup_percent))
            .collect();
        let plan = plan_settlements(orders, &owners);
        let mut outcome = SettlementRunOutcome {
            created: vec![],
            orders_settled: 0,
            skipped_same_company: plan.skipped_same_company,
        };
        for group in plan.groups {
            let markup_percent = markups
                .get(&group.issuer_company_id)
                .copied()
                .unwrap_or_default();
            if let Some(settlement) =
                create_settlement(self, group, markup_percent, (from, to)).await?
            {
                outcome.orders_settled += settlement.order_ids.len();
                outcome.created.push(settlement.id);
            }
        }
        info!(
            "settlement run {from}..{to}: {} created, {} orders, {} same company",
            outcome.created.len(),
            outcome.orders_settled,
            outcome.skipped_same_company
        );
        Ok(outcome)
    }

    async fn query_settlements(
        &self,
        query: SettlementQuery,
    ) -> Result<(bool, Vec<MongoSettlement>)> {
        query_settlements(self, query).await
    }

    async fn get_settlement(&self, id: Uuid) -> Result<MongoSettlement> {
        find_settlement(self, id).await
    }

    #[instrument(name = "issue settlement", skip(self, message), fields(settlement_id=%id))]
    async fn issue_settlement(
        &self,
        id: Uuid,
        message: SettlementInvoiceMessage,
    ) -> Result<MongoSettlement> {
        let mut settlement = find_settlement(self, id).await?;
        let issuer = find_company(self, settlement.issuer_company_id).await?;
        let number = message.number.trim().to_owned();
        if number.is_empty() {
            return Err(Error::Validation(String::from("invoice number is required")));
        }
        settlement.issue(InvoiceRef {
            provider: issuer.invoicing_provider,
            series: message.series.trim().to_owned(),
            number,
            issued_at: message.issued_at.into(),
        })?;
        save_status(self, &settlement, SettlementStatus::Draft).await?;
        Ok(settlement)
    }

    #[instrument(name = "settlement paid", skip(self), fields(settlement_id=%id))]
    async fn mark_settlement_paid(&self, id: Uuid) -> Result<MongoSettlement> {
        let mut settlement = find_settlement(self, id).await?;
        settlement.mark_paid()?;
        save_status(self, &settlement, SettlementStatus::Issued).await?;
        Ok(settlement)
    }

    #[instrument(name = "cancel settlement", skip(self), fields(settlement_id=%id))]
    async fn cancel_settlement(&self, id: Uuid) -> Result<MongoSettlement> {
        let mut settlement = find_settlement(self, id).await?;
        settlement.cancel()?;
        let mut session = self.start_transaction().await?;
        let res = self
            .bo_db
            .collection::<MongoSettlement>(SETTLEMENTS_COL)
            .update_one_with_session(
                doc! {"id":id,"status":SettlementStatus::Draft},
                doc! {"$set":{"status":settlement.status,"update_at":settlement.update_at}},
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        let released = self
            .bo_db
            .collection::<Document>(ORDERS_COL)
            .update_many_with_session(
                doc! {"settlement_id":id},
                doc! {"$set":{"settlement_id":Bson::Null}},
                None,
                &mut session,
            )
            .await?;
        commit_with_retry(&mut session).await?;
        info!(
            "settlement {} cancelled, {} orders released",
            settlement.settlement_no, released.modified_count
        );
        Ok(settlement)
    }
}

pub fn settlement_no(year: i32, seq: i64) -> String {
    format!("IC-{year}-{seq:05}")
}

pub async fn find_settlement(db: &DbClient, id: Uuid) -> Result<MongoSettlement> {
    db.bo_db
        .collection::<MongoSettlement>(SETTLEMENTS_COL)
        .find_one(doc! {"id":id}, None)
        .await?
        .ok_or_else(|| Error::SettlementNotFound(id.to_string()))
}

async fn save_status(
    db: &DbClient,
    settlement: &MongoSettlement,
    from: SettlementStatus,
) -> Result<()> {
    let res = db
        .bo_db
        .collection::<MongoSettlement>(SETTLEMENTS_COL)
        .update_one(
            doc! {"id":settlement.id,"status":from},
            doc! {"$set":{
                "status":settlement.status,
                "invoice":bson::to_bson(&settlement.invoice)?,
                "update_at":settlement.update_at,
            }},
            None,
        )
        .await?;
    if res.matched_count == 0 {
        return Err(Error::Changed);
    }
    info!("settlement {} is now {}", settlement.settlement_no, settlement.status);
    Ok(())
}

/// an order is claimed only while it is still shipped or delivered and unclaimed
fn claim_filter(order_id: Uuid) -> Document {
    doc! {
        "id":order_id,
        "settlement_id":Bson::Null,
        "status":{"$in":[OrderStatus::Shipped, OrderStatus::Delivered]},
    }
}

/// shipped in the local period and not claimed by a settlement yet
async fn unsettled_orders(
    db: &DbClient,
    from: NaiveDate,
    to: NaiveDate,
    tz: Tz,
) -> Result<Vec<MongoChannelOrder>> {
    let cursor = db
        .bo_db
        .collection::<MongoChannelOrder>(ORDERS_COL)
        .find(
            doc! {
                "status":{"$in":[OrderStatus::Shipped, OrderStatus::Delivered]},
                "settlement_id":Bson::Null,
                "shipped_at":{
                    "$gte":bson::DateTime::from_chrono(day_start_utc(from, tz)),
                    "$lt":bson::DateTime::from_chrono(day_end_utc(to, tz)),
                },
            },
            None,
        )
        .await?;
    Ok(cursor.try_collect().await?)
}

/// claims the orders of the group and inserts their settlement in one transaction.
/// nothing is created when every order was claimed by a concurrent run.
async fn create_settlement(
    db: &DbClient,
    group: SettlementGroup,
    markup_percent: u32,
    period: (NaiveDate, NaiveDate),
) -> Result<Option<MongoSettlement>> {
    let settlement_id = Uuid::new();
    let mut session = db.start_transaction().await?;
    let mut claimed = Vec::with_capacity(group.orders.len());
    for order in group.orders {
        let res = db
            .bo_db
            .collection::<Document>(ORDERS_COL)
            .update_one_with_session(
                claim_filter(order.id),
                doc! {"$set":{"settlement_id":settlement_id}},
                None,
                &mut session,
            )
            .await?;
        if res.modified_count == 1 {
            claimed.push(order);
        } else {
            info!("order {} was claimed by another run", order.order_no);
        }
    }
    if claimed.is_empty() {
        session.abort_transaction().await?;
        return Ok(None);
    }
    let year = period.1.year();
    let seq = db.next_sequence(&format!("IC-{year}")).await?;
    let group = SettlementGroup {
        issuer_company_id: group.issuer_company_id,
        recipient_company_id: group.recipient_company_id,
        orders: claimed,
    };
    let mut settlement =
        MongoSettlement::build(settlement_no(year, seq), &group, markup_percent, period)?;
    settlement.id = settlement_id;
    db.bo_db
        .collection::<MongoSettlement>(SETTLEMENTS_COL)
        .insert_one_with_session(&settlement, None, &mut session)
        .await?;
    commit_with_retry(&mut session).await?;
    info!(
        "settlement {} created for {} orders, total {}",
        settlement.settlement_no,
        settlement.order_ids.len(),
        settlement.total
    );
    Ok(Some(settlement))
}

async fn query_settlements(
    db: &DbClient,
    query: SettlementQuery,
) -> Result<(bool, Vec<MongoSettlement>)> {
    let mut filter = Document::new();
    if let Some(status) = query.status {
        filter.insert("status", status);
    }
    if let Some(company_id) = query.company_id {
        let company_id: Uuid = company_id.into();
        filter.insert(
            "$or",
            vec![
                doc! {"issuer_company_id":company_id},
                doc! {"recipient_company_id":company_id},
            ],
        );
    }
    let mut pipeline = vec![doc! {"$match":filter}, doc! {"$sort":{"created_at":-1}}];
    pipeline.extend(page_stages(query.page));
    let mut cursor = db
        .bo_db
        .collection::<Document>(SETTLEMENTS_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut settlements = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        settlements.push(bson::from_document(doc)?);
    }
    let has_next = query.page.is_some() && (settlements.len() as u32) == ITEMS_PER_PAGE;
    Ok((has_next, settlements))
}

/// orders shipped by one company out of stock owned by another
#[derive(Debug, Clone)]
pub struct SettlementGroup {
    /// owner of the warehouse the goods left
    pub issuer_company_id: Uuid,
    /// the seller
    pub recipient_company_id: Uuid,
    pub orders: Vec<MongoChannelOrder>,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementPlan {
    pub groups: Vec<SettlementGroup>,
    pub skipped_same_company: usize,
}

/// groups by (issuer, recipient) in order of first appearance
pub fn plan_settlements(
    orders: Vec<MongoChannelOrder>,
    warehouse_owners: &HashMap<String, Uuid>,
) -> SettlementPlan {
    let mut plan = SettlementPlan::default();
    let mut index: HashMap<(Uuid, Uuid), usize> = HashMap::new();
    for order in orders {
        let Some(issuer) = warehouse_owners.get(&order.warehouse).copied() else {
            warn!("warehouse {} of order {} has no owner", order.warehouse, order.order_no);
            continue;
        };
        if issuer == order.company_id {
            plan.skipped_same_company += 1;
            continue;
        }
        let key = (issuer, order.company_id);
        match index.get(&key) {
            Some(&i) => plan.groups[i].orders.push(order),
            None => {
                index.insert(key, plan.groups.len());
                plan.groups.push(SettlementGroup {
                    issuer_company_id: issuer,
                    recipient_company_id: order.company_id,
                    orders: vec![order],
                });
            }
        }
    }
    plan
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Draft,
    Issued,
    Paid,
    Cancelled,
}

impl Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Issued => write!(f, "issued"),
            Self::Paid => write!(f, "paid"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<SettlementStatus> for Bson {
    fn from(s: SettlementStatus) -> Self {
        Bson::String(s.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SettlementLine {
    pub order_id: Uuid,
    pub order_no: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_cost: i64,
    pub amount: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoSettlement {
    pub id: Uuid,
    pub settlement_no: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub issuer_company_id: Uuid,
    pub recipient_company_id: Uuid,
    pub lines: Vec<SettlementLine>,
    pub order_ids: Vec<Uuid>,
    pub subtotal: i64,
    pub markup_percent: u32,
    pub markup_amount: i64,
    pub total: i64,
    pub status: SettlementStatus,
    pub invoice: Option<InvoiceRef>,
    pub created_at: bson::DateTime,
    pub update_at: bson::DateTime,
}

impl MongoSettlement {
    /// lines at the cost recorded when the stock left, plus the issuer's markup
    pub fn build(
        settlement_no: String,
        group: &SettlementGroup,
        markup_percent: u32,
        period: (NaiveDate, NaiveDate),
    ) -> Result<Self> {
        let mut lines = Vec::new();
        for order in group.orders.iter() {
            for line in order.lines.iter() {
                let unit_cost = match line.unit_cost_at_shipment {
                    Some(cost) => cost,
                    None => {
                        warn!(
                            "{} of order {} has no shipment cost, settled at 0",
                            line.sku, order.order_no
                        );
                        0
                    }
                };
                lines.push(SettlementLine {
                    order_id: order.id,
                    order_no: order.order_no.clone(),
                    sku: line.sku.clone(),
                    quantity: line.quantity,
                    unit_cost,
                    amount: line_amount(line.quantity, unit_cost)?,
                });
            }
        }
        let subtotal = sum_amounts(lines.iter().map(|l| l.amount))?;
        let markup_amount = i64::try_from(round_half_up_div(
            subtotal as i128 * markup_percent as i128,
            100,
        ))
        .map_err(|_| Error::Validation(format!("markup of {subtotal} does not fit an amount")))?;
        let total = sum_amounts([subtotal, markup_amount])?;
        let now = Utc::now().into();
        Ok(Self {
            id: Uuid::new(),
            settlement_no,
            period_from: period.0,
            period_to: period.1,
            issuer_company_id: group.issuer_company_id,
            recipient_company_id: group.recipient_company_id,
            lines,
            order_ids: group.orders.iter().map(|o| o.id).collect(),
            subtotal,
            markup_percent,
            markup_amount,
            total,
            status: SettlementStatus::Draft,
            invoice: None,
            created_at: now,
            update_at: now,
        })
    }

    fn expect_status(&self, from: SettlementStatus, action: &str) -> Result<()> {
        if self.status != from {
            return Err(WorkflowError::invalid(self.status, action).into());
        }
        Ok(())
    }

    pub fn issue(&mut self, invoice: InvoiceRef) -> Result<()> {
        self.expect_status(SettlementStatus::Draft, "issue")?;
        self.invoice = Some(invoice);
        self.status = SettlementStatus::Issued;
        self.update_at = Utc::now().into();
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<()> {
        self.expect_status(SettlementStatus::Issued, "paid")?;
        self.status = SettlementStatus::Paid;
        self.update_at = Utc::now().into();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.expect_status(SettlementStatus::Draft, "cancel")?;
        self.status = SettlementStatus::Cancelled;
        self.update_at = Utc::now().into();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettlementRunOutcome {
    pub created: Vec<Uuid>,
    pub orders_settled: usize,
    pub skipped_same_company: usize,
}
