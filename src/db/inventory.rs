use crate::{
    db::{
        auth::Actor,
        company::find_warehouse,
        invenope::MongoOperationType,
        mongo::{commit_with_retry, OPERATIONS_COL},
    },
    error_result::{Error, Result},
    server::inventory::InventoryQuery,
};
use axum::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document, Uuid};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{
    invenope::MongoInventoryOperation,
    mongo::{DbClient, INVENTORY_COL},
    round_half_up_div, sized_page_stages, InventoryRepo,
};

#[async_trait]
impl InventoryRepo for DbClient {
    async fn query_inventory(
        &self,
        query: InventoryQuery,
    ) -> Result<(bool, Vec<MongoInventoryItem>)> {
        query_inventory(self, query).await
    }

    async fn get_inventory_item_operations(&self, sku: &str) -> Result<Vec<MongoInventoryOperation>> {
        find_inventory_item_operations_by_sku(self, sku).await
    }

    async fn find_inventory_by_sku(&self, sku: &str) -> Result<Option<MongoInventoryItem>> {
        find_inventory_by_sku(self, sku).await
    }

    async fn adjust_inventory(
        &self,
        sku: &str,
        warehouse: &str,
        delta: i32,
        reason: &str,
        actor: &Actor,
    ) -> Result<MongoInventoryOperation> {
        adjust_inventory(self, sku, warehouse, delta, reason, actor).await
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoInventoryItem {
    pub sku: String,
    pub name: String,
    pub quantity: Vec<Quantity>,
    /// weighted average in bani
    pub unit_cost: i64,
    pub created_at: mongodb::bson::DateTime,
    pub update_at: mongodb::bson::DateTime,
    pub operation_ids: Vec<Uuid>,
}

impl MongoInventoryItem {
    pub fn new(
        sku: &str,
        name: &str,
        warehouse: &str,
        count: i32,
        unit_cost: i64,
        operation_id: Uuid,
    ) -> Self {
        Self {
            sku: sku.to_owned(),
            name: name.to_owned(),
            quantity: vec![Quantity {
                warehouse: warehouse.to_owned(),
                quantity: count,
            }],
            unit_cost,
            created_at: Utc::now().into(),
            update_at: Utc::now().into(),
            operation_ids: vec![operation_id],
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    pub warehouse: String,
    pub quantity: i32,
}

/// stock over every warehouse
pub fn on_hand(quantity: &[Quantity]) -> i32 {
    quantity.iter().map(|q| q.quantity).sum()
}

/// weighted average cost after receiving `qty` units at `cost`.
/// negative stock does not weigh in, and the cost stays when nothing would be on hand.
pub fn weighted_unit_cost(on_hand: i32, old_cost: i64, qty: u32, cost: i64) -> i64 {
    let existing = on_hand.max(0) as i128;
    let qty = qty as i128;
    let denominator = existing + qty;
    if denominator == 0 {
        return old_cost;
    }
    round_half_up_div(existing * old_cost as i128 + qty * cost as i128, denominator) as i64
}

pub async fn find_inventory_item_operations_by_sku(
    db: &DbClient,
    sku: &str,
) -> Result<Vec<MongoInventoryOperation>> {
    let options = FindOptions::builder().sort(doc! {"time":-1}).build();
    let cursor = db
        .bo_db
        .collection::<MongoInventoryOperation>(OPERATIONS_COL)
        .find(doc! {"sku":sku}, options)
        .await?;
    Ok(cursor.try_collect().await?)
}

const ITEMS_PER_PAGE_LOCAL: u32 = 35;

async fn query_inventory(
    db: &DbClient,
    query: InventoryQuery,
) -> Result<(bool, Vec<MongoInventoryItem>)> {
    let mut pipeline = vec![doc! {
      "$sort":{
        "update_at":-1,
        "sku":1,
      }
    }];
    if !query.show_zero_quantity {
        pipeline.push(doc! {
          "$match":{
           "quantity":{
            "$elemMatch":{
              "quantity":{
                "$ne":0
              }
            }
           }
          }
        })
    }

    // because the unsupported of array query, "wh1,wh2" is split here
    if let Some(warehouse) = query.warehouse.filter(|w| !w.trim().is_empty()) {
        let warehouses: Vec<&str> = warehouse.split(',').map(|w| w.trim()).collect();
        pipeline.push(doc! {
          "$match":{
            "quantity":{
              "$elemMatch":{
                "warehouse":{"$in":warehouses},
              }
            }
          }
        })
    }

    if !query.keyword.trim().is_empty() {
        pipeline.push(doc! {
          "$match":{
          "$or":[
            {"sku":{"$regex":query.keyword.trim(),"$options":"i"}},
            {"name":{"$regex":query.keyword.trim(),"$options":"i"}},
          ]
        }
        })
    }
    let has_page = query.page.is_some();
    pipeline.extend(sized_page_stages(ITEMS_PER_PAGE_LOCAL, query.page));
    let items = aggregate_items(db, pipeline).await?;
    Ok((
        has_page && (items.len() as u32) == ITEMS_PER_PAGE_LOCAL,
        items,
    ))
}

async fn aggregate_items(db: &DbClient, pipeline: Vec<Document>) -> Result<Vec<MongoInventoryItem>> {
    let mut cursor = db
        .bo_db
        .collection::<MongoInventoryItem>(INVENTORY_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut items = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        items.push(mongodb::bson::from_document(doc)?)
    }
    Ok(items)
}

pub async fn find_inventory_by_sku(db: &DbClient, sku: &str) -> Result<Option<MongoInventoryItem>> {
    let res = db
        .bo_db
        .collection::<MongoInventoryItem>(INVENTORY_COL)
        .find_one(doc! {"sku":sku}, None)
        .await?;
    Ok(res)
}

#[instrument(name = "adjust inventory", skip(db, actor), fields(by=%actor.username))]
async fn adjust_inventory(
    db: &DbClient,
    sku: &str,
    warehouse: &str,
    delta: i32,
    reason: &str,
    actor: &Actor,
) -> Result<MongoInventoryOperation> {
    if delta == 0 {
        return Err(Error::Validation(String::from("adjustment delta must not be 0")));
    }
    if reason.trim().is_empty() {
        return Err(Error::Validation(String::from("adjustment needs a reason")));
    }
    find_warehouse(db, warehouse).await?;
    let mut session = db.start_transaction().await?;
    let mut operation = MongoInventoryOperation::new(
        sku,
        actor.id,
        MongoOperationType::Adjustment,
        delta,
        warehouse,
        0,
    )
    .with_note(reason.trim());
    operation
        .run_self_with_session(db, sku, false, &mut session)
        .await?;
    commit_with_retry(&mut session).await?;
    info!("adjusted {sku} in {warehouse} by {delta}");
    Ok(operation)
}
