use crate::error_result::{Error, Result};
use chrono::prelude::*;
use mongodb::bson::{doc, Bson, Uuid};
use mongodb::ClientSession;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{
    inventory::{on_hand, weighted_unit_cost, MongoInventoryItem},
    mongo::{DbClient, INVENTORY_COL, OPERATIONS_COL},
};

/// one stock movement of a sku in a warehouse, never updated after insertion.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoInventoryOperation {
    pub id: Uuid,
    pub sku: String,
    pub time: mongodb::bson::DateTime,
    pub related_id: Uuid,
    pub operation_type: MongoOperationType,
    pub count: i32,
    pub warehouse: String,
    /// reception: the cost the goods came in with. otherwise the item cost at the time of the move.
    pub unit_cost: i64,
    pub note: Option<String>,
}

impl MongoInventoryOperation {
    pub fn new(
        sku: &str,
        related_id: Uuid,
        operation_type: MongoOperationType,
        count: i32,
        warehouse: &str,
        unit_cost: i64,
    ) -> Self {
        Self {
            id: Uuid::new(),
            sku: sku.into(),
            time: Utc::now().into(),
            related_id,
            operation_type,
            count,
            warehouse: warehouse.into(),
            unit_cost,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    async fn insert_self_with_session(
        &self,
        db: &DbClient,
        session: &mut ClientSession,
    ) -> Result<()> {
        info!(
            "try insert new operation id:{},sku:{} type:{:?} warehouse:{} count:{}",
            self.id, &self.sku, &self.operation_type, &self.warehouse, self.count
        );
        db.bo_db
            .collection::<MongoInventoryOperation>(OPERATIONS_COL)
            .insert_one_with_session(self, None, session)
            .await?;
        info!("insert operation success");
        Ok(())
    }

    /// apply the movement to the inventory item then record the operation.
    /// a reception re-weights the item cost, other operations take the current item cost.
    /// `item_name` is used when the item has to be created (`upsert`).
    #[instrument(name="run inventory operation",skip(self,db,session,item_name),fields(
        operation_id=%self.id,
        target_item=%self.sku,
        operation_type=?self.operation_type,
    ))]
    pub async fn run_self_with_session(
        &mut self,
        db: &DbClient,
        item_name: &str,
        upsert: bool,
        session: &mut ClientSession,
    ) -> Result<Uuid> {
        info!(
            "run update inventory id:{} sku:{} warehouse:{} count:{}",
            self.id, &self.sku, &self.warehouse, self.count
        );
        let collection = db.bo_db.collection::<MongoInventoryItem>(INVENTORY_COL);
        let current = collection
            .find_one_with_session(doc! {"sku":&self.sku}, None, &mut *session)
            .await?;
        let Some(item) = current else {
            if !upsert {
                return Err(Error::InventoryItemNotFound(self.sku.clone()));
            }
            info!("need insert item:{}", &self.sku);
            if self.operation_type != MongoOperationType::Reception {
                self.unit_cost = 0;
            }
            let item = MongoInventoryItem::new(
                &self.sku,
                item_name,
                &self.warehouse,
                self.count,
                self.unit_cost,
                self.id,
            );
            if item.quantity[0].quantity < 0 {
                warn!("{} created with negative stock {}", self.sku, self.count);
            }
            collection
                .insert_one_with_session(&item, None, &mut *session)
                .await?;
            self.insert_self_with_session(db, session).await?;
            return Ok(self.id);
        };
        let unit_cost = match self.operation_type {
            MongoOperationType::Reception => weighted_unit_cost(
                on_hand(&item.quantity),
                item.unit_cost,
                self.count.unsigned_abs(),
                self.unit_cost,
            ),
            _ => {
                self.unit_cost = item.unit_cost;
                item.unit_cost
            }
        };
        let has_warehouse = item.quantity.iter().any(|q| q.warehouse == self.warehouse);
        let (query, update) = if has_warehouse {
            (
                doc! {"sku":&self.sku,"quantity.warehouse":&self.warehouse},
                doc! {
                    "$inc":{"quantity.$.quantity":self.count},
                    "$set":{"update_at":Utc::now(),"unit_cost":unit_cost},
                    "$push":{"operation_ids":&self.id},
                },
            )
        } else {
            (
                doc! {"sku":&self.sku},
                doc! {
                    "$set":{"update_at":Utc::now(),"unit_cost":unit_cost},
                    "$push":{
                        "quantity":{"warehouse":&self.warehouse,"quantity":self.count},
                        "operation_ids":&self.id,
                    },
                },
            )
        };
        collection
            .update_one_with_session(query, update, None, &mut *session)
            .await?;
        let remaining = item
            .quantity
            .iter()
            .find(|q| q.warehouse == self.warehouse)
            .map(|q| q.quantity)
            .unwrap_or(0)
            + self.count;
        if remaining < 0 {
            warn!(
                "{} is oversold in {}, quantity now {}",
                self.sku, self.warehouse, remaining
            );
        }
        self.insert_self_with_session(db, session).await?;
        info!("inventory update success");
        Ok(self.id)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MongoOperationType {
    Reception,
    Shipment,
    Adjustment,
}

impl From<MongoOperationType> for Bson {
    fn from(o: MongoOperationType) -> Self {
        match o {
            MongoOperationType::Reception => Bson::String(String::from("reception")),
            MongoOperationType::Shipment => Bson::String(String::from("shipment")),
            MongoOperationType::Adjustment => Bson::String(String::from("adjustment")),
        }
    }
}
