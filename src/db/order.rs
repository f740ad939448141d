use std::fmt::Display;

use axum::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document, Uuid};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error_result::{is_duplicate_key, Error, Result, WorkflowError},
    server::order::{InvoiceMessage, NewChannelOrderMessage, OrderQuery},
};

use super::{
    awb::AwbStatus,
    company::{find_company, find_warehouse},
    mongo::{commit_with_retry, DbClient, AWBS_COL, ORDERS_COL},
    line_amount, page_stages, stock_quantity, sum_amounts, InvoiceRef, OrderRepo,
    ITEMS_PER_PAGE,
};

#[async_trait]
impl OrderRepo for DbClient {
    #[instrument(name = "ingest order", skip(self, message), fields(
        channel=?message.channel,
        external_id=%message.external_id,
    ))]
    async fn ingest_order(
        &self,
        message: NewChannelOrderMessage,
    ) -> Result<(bool, MongoChannelOrder)> {
        let order = MongoChannelOrder::parse(message)?;
        if let Some(existing) = find_by_external_id(self, order.channel, &order.external_id).await? {
            info!("order already ingested as {}", existing.id);
            return Ok((false, existing));
        }
        find_company(self, order.company_id).await?;
        find_warehouse(self, &order.warehouse).await?;
        match self
            .bo_db
            .collection::<MongoChannelOrder>(ORDERS_COL)
            .insert_one(&order, None)
            .await
        {
            Ok(_) => {
                info!("order {} ingested", order.order_no);
                Ok((true, order))
            }
            Err(e) if is_duplicate_key(&e) => {
                // lost the race against the same payload
                let existing = find_by_external_id(self, order.channel, &order.external_id)
                    .await?
                    .ok_or_else(|| Error::OrderNotFound(order.external_id.clone()))?;
                Ok((false, existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query_orders(&self, query: OrderQuery) -> Result<(bool, Vec<MongoChannelOrder>)> {
        query_orders(self, query).await
    }

    async fn get_order(&self, id: Uuid) -> Result<MongoChannelOrder> {
        find_order(self, id).await
    }

    #[instrument(name = "invoice order", skip(self, message), fields(order_id=%id))]
    async fn invoice_order(&self, id: Uuid, message: InvoiceMessage) -> Result<MongoChannelOrder> {
        let mut order = find_order(self, id).await?;
        let provider = match message.provider {
            Some(provider) => provider,
            None => find_company(self, order.company_id).await?.invoicing_provider,
        };
        let series = message.series.trim().to_owned();
        let number = message.number.trim().to_owned();
        if number.is_empty() {
            return Err(Error::Validation(String::from("invoice number is required")));
        }
        order.invoice(InvoiceRef {
            provider,
            series,
            number,
            issued_at: message.issued_at.into(),
        })?;
        let res = self
            .bo_db
            .collection::<MongoChannelOrder>(ORDERS_COL)
            .update_one(
                doc! {"id":id,"status":OrderStatus::Pending},
                doc! {"$set":{
                    "status":order.status,
                    "invoice":bson::to_bson(&order.invoice)?,
                    "update_at":order.update_at,
                }},
                None,
            )
            .await?;
        if res.matched_count == 0 {
            return Err(Error::Changed);
        }
        info!("order {} invoiced", order.order_no);
        Ok(order)
    }

    #[instrument(name = "cancel order", skip(self), fields(order_id=%id))]
    async fn cancel_order(&self, id: Uuid) -> Result<MongoChannelOrder> {
        let mut order = find_order(self, id).await?;
        let from = order.status;
        order.cancel()?;
        let mut session = self.start_transaction().await?;
        let res = self
            .bo_db
            .collection::<MongoChannelOrder>(ORDERS_COL)
            .update_one_with_session(
                doc! {"id":id,"status":from},
                doc! {"$set":{"status":order.status,"update_at":order.update_at}},
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        if let Some(awb_number) = order.awb_number.as_deref() {
            let res = self
                .bo_db
                .collection::<Document>(AWBS_COL)
                .update_one_with_session(
                    doc! {"awb_number":awb_number,"status":AwbStatus::Created},
                    doc! {"$set":{"status":AwbStatus::Cancelled}},
                    None,
                    &mut session,
                )
                .await?;
            if res.modified_count == 1 {
                info!("awb {awb_number} cancelled with its order");
            } else {
                warn!("awb {awb_number} of a cancelled order is no longer created");
            }
        }
        commit_with_retry(&mut session).await?;
        info!("order {} cancelled", order.order_no);
        Ok(order)
    }
}

pub async fn find_order(db: &DbClient, id: Uuid) -> Result<MongoChannelOrder> {
    db.bo_db
        .collection::<MongoChannelOrder>(ORDERS_COL)
        .find_one(doc! {"id":id}, None)
        .await?
        .ok_or_else(|| Error::OrderNotFound(id.to_string()))
}

async fn find_by_external_id(
    db: &DbClient,
    channel: Channel,
    external_id: &str,
) -> Result<Option<MongoChannelOrder>> {
    Ok(db
        .bo_db
        .collection::<MongoChannelOrder>(ORDERS_COL)
        .find_one(doc! {"channel":channel,"external_id":external_id}, None)
        .await?)
}

async fn query_orders(db: &DbClient, query: OrderQuery) -> Result<(bool, Vec<MongoChannelOrder>)> {
    let mut filter = doc! {
        "placed_at":{
            "$gte":bson::DateTime::from_chrono(query.from),
            "$lte":bson::DateTime::from_chrono(query.to),
        }
    };
    if let Some(channel) = query.channel {
        filter.insert("channel", channel);
    }
    if let Some(status) = query.status {
        filter.insert("status", status);
    }
    if let Some(keyword) = query.keyword.filter(|k| !k.trim().is_empty()) {
        let regex = doc! {"$regex":keyword.trim(),"$options":"i"};
        filter.insert(
            "$or",
            vec![
                doc! {"order_no":regex.clone()},
                doc! {"external_id":regex.clone()},
                doc! {"customer_name":regex.clone()},
                doc! {"awb_number":regex.clone()},
                doc! {"lines.sku":regex},
            ],
        );
    }
    let mut pipeline = vec![doc! {"$match":filter}, doc! {"$sort":{"placed_at":-1}}];
    pipeline.extend(page_stages(query.page));
    let mut cursor = db
        .bo_db
        .collection::<Document>(ORDERS_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut orders = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        orders.push(bson::from_document(doc)?);
    }
    let has_next = query.page.is_some() && (orders.len() as u32) == ITEMS_PER_PAGE;
    Ok((has_next, orders))
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shopify,
    Trendyol,
    Temu,
}

impl From<Channel> for Bson {
    fn from(c: Channel) -> Self {
        match c {
            Channel::Shopify => Bson::String(String::from("shopify")),
            Channel::Trendyol => Bson::String(String::from("trendyol")),
            Channel::Temu => Bson::String(String::from("temu")),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Invoiced,
    Shipped,
    Delivered,
    Returned,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Invoiced => "invoiced",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OrderStatus> for Bson {
    fn from(s: OrderStatus) -> Self {
        Bson::String(s.as_str().to_owned())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    /// bani
    pub unit_price: i64,
    /// item cost when the stock left the warehouse
    pub unit_cost_at_shipment: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoChannelOrder {
    pub id: Uuid,
    pub channel: Channel,
    pub external_id: String,
    pub order_no: String,
    /// the seller
    pub company_id: Uuid,
    /// fulfilled from
    pub warehouse: String,
    pub customer_name: String,
    pub lines: Vec<OrderLine>,
    pub total: i64,
    pub cod_amount: i64,
    pub status: OrderStatus,
    pub invoice: Option<InvoiceRef>,
    pub awb_number: Option<String>,
    pub shipped_at: Option<bson::DateTime>,
    pub settlement_id: Option<Uuid>,
    pub placed_at: bson::DateTime,
    pub created_at: bson::DateTime,
    pub update_at: bson::DateTime,
}

impl MongoChannelOrder {
    pub fn parse(message: NewChannelOrderMessage) -> Result<Self> {
        let external_id = message.external_id.trim().to_owned();
        if external_id.is_empty() {
            return Err(Error::Validation(String::from("external id is required")));
        }
        if message.lines.is_empty() {
            return Err(Error::Validation(String::from(
                "an order needs at least one line",
            )));
        }
        if message.cod_amount < 0 {
            return Err(Error::Validation(String::from(
                "cod amount must not be negative",
            )));
        }
        let mut lines = Vec::with_capacity(message.lines.len());
        for line in message.lines {
            let sku = line.sku.trim().to_owned();
            if sku.is_empty() {
                return Err(Error::Validation(String::from("line sku is required")));
            }
            if line.quantity == 0 {
                return Err(Error::Validation(format!(
                    "quantity of {sku} must be positive"
                )));
            }
            stock_quantity(line.quantity)?;
            if line.unit_price < 0 {
                return Err(Error::Validation(format!(
                    "unit price of {sku} must not be negative"
                )));
            }
            lines.push(OrderLine {
                name: line.name.trim().to_owned(),
                sku,
                quantity: line.quantity,
                unit_price: line.unit_price,
                unit_cost_at_shipment: None,
            });
        }
        let order_no = match message.order_no.as_deref().map(str::trim) {
            Some(no) if !no.is_empty() => no.to_owned(),
            _ => external_id.clone(),
        };
        let now = Utc::now().into();
        Ok(Self {
            id: Uuid::new(),
            channel: message.channel,
            external_id,
            order_no,
            company_id: message.company_id.into(),
            warehouse: message.warehouse.trim().to_uppercase(),
            customer_name: message.customer_name.trim().to_owned(),
            total: order_total(&lines)?,
            lines,
            cod_amount: message.cod_amount,
            status: OrderStatus::Pending,
            invoice: None,
            awb_number: None,
            shipped_at: None,
            settlement_id: None,
            placed_at: message.placed_at.into(),
            created_at: now,
            update_at: now,
        })
    }

    pub fn invoice(&mut self, invoice: InvoiceRef) -> Result<()> {
        if self.status != OrderStatus::Pending {
            return Err(WorkflowError::invalid(self.status, "invoice").into());
        }
        self.invoice = Some(invoice);
        self.status = OrderStatus::Invoiced;
        self.update_at = Utc::now().into();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Invoiced) {
            return Err(WorkflowError::invalid(self.status, "cancel").into());
        }
        self.status = OrderStatus::Cancelled;
        self.update_at = Utc::now().into();
        Ok(())
    }
}

pub fn order_total(lines: &[OrderLine]) -> Result<i64> {
    let amounts = lines
        .iter()
        .map(|l| line_amount(l.quantity, l.unit_price))
        .collect::<Result<Vec<_>>>()?;
    sum_amounts(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::company::InvoicingProvider, server::order::OrderLineMessage};

    fn message(lines: Vec<(&str, u32, i64)>) -> NewChannelOrderMessage {
        NewChannelOrderMessage {
            channel: Channel::Trendyol,
            external_id: String::from(" 778899 "),
            order_no: None,
            company_id: uuid::Uuid::new_v4(),
            warehouse: String::from("buc1"),
            customer_name: String::from("Ana Popescu"),
            lines: lines
                .into_iter()
                .map(|(sku, quantity, unit_price)| OrderLineMessage {
                    sku: sku.into(),
                    name: format!("item {sku}"),
                    quantity,
                    unit_price,
                })
                .collect(),
            cod_amount: 0,
            placed_at: Utc::now(),
        }
    }

    fn invoice_ref() -> InvoiceRef {
        InvoiceRef {
            provider: InvoicingProvider::Oblio,
            series: String::from("BO"),
            number: String::from("1001"),
            issued_at: Utc::now().into(),
        }
    }

    #[test]
    fn parse_totals_lines_and_defaults_order_no() {
        let order = MongoChannelOrder::parse(message(vec![("A", 2, 4999), ("B", 1, 1500)])).unwrap();
        assert_eq!(order.total, 11498);
        assert_eq!(order.order_no, "778899");
        assert_eq!(order.external_id, "778899");
        assert_eq!(order.warehouse, "BUC1");
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn parse_rejects_bad_lines() {
        assert!(MongoChannelOrder::parse(message(vec![])).is_err());
        assert!(MongoChannelOrder::parse(message(vec![("A", 0, 1)])).is_err());
        assert!(MongoChannelOrder::parse(message(vec![("A", 1, -1)])).is_err());
        assert!(MongoChannelOrder::parse(message(vec![(" ", 1, 1)])).is_err());
    }

    #[test]
    fn parse_rejects_quantities_beyond_stock_range() {
        let too_many = i32::MAX as u32 + 1;
        assert!(matches!(
            MongoChannelOrder::parse(message(vec![("A", too_many, 1)])),
            Err(Error::Validation(_))
        ));
        let order = MongoChannelOrder::parse(message(vec![("A", i32::MAX as u32, 1)])).unwrap();
        assert_eq!(order.total, i32::MAX as i64);
    }

    #[test]
    fn overflowing_totals_are_refused() {
        assert!(matches!(
            MongoChannelOrder::parse(message(vec![("A", 2, i64::MAX / 2 + 1)])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            MongoChannelOrder::parse(message(vec![("A", 1, i64::MAX), ("B", 1, 1)])),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn invoice_only_pending_orders() {
        let mut order = MongoChannelOrder::parse(message(vec![("A", 1, 100)])).unwrap();
        order.invoice(invoice_ref()).unwrap();
        assert_eq!(order.status, OrderStatus::Invoiced);
        match order.invoice(invoice_ref()) {
            Err(Error::Workflow(WorkflowError::InvalidTransition { from, action })) => {
                assert_eq!(from, "invoiced");
                assert_eq!(action, "invoice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancel_before_shipment_only() {
        let mut order = MongoChannelOrder::parse(message(vec![("A", 1, 100)])).unwrap();
        order.invoice(invoice_ref()).unwrap();
        order.cancel().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        let mut shipped = MongoChannelOrder::parse(message(vec![("A", 1, 100)])).unwrap();
        shipped.status = OrderStatus::Shipped;
        assert!(matches!(shipped.cancel(), Err(Error::Workflow(_))));
    }
}
