use std::fmt::Display;

use axum::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document, Uuid};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error_result::{is_duplicate_key, Error, Result, WorkflowError},
    server::awb::{AwbQuery, NewAwbMessage, TrackingEventMessage},
};

pub use self::domain::{AwbNumber, AwbValidateError};

use super::{
    handover::Courier,
    mongo::{commit_with_retry, DbClient, AWBS_COL, ORDERS_COL},
    order::{find_order, OrderStatus},
    page_stages, AwbRepo, ITEMS_PER_PAGE,
};

#[async_trait]
impl AwbRepo for DbClient {
    #[instrument(name = "register awb", skip(self, message), fields(order_id=%message.order_id))]
    async fn register_awb(&self, message: NewAwbMessage) -> Result<MongoAwb> {
        let number = AwbNumber::parse(&message.awb_number)?;
        if message.parcels == 0 {
            return Err(Error::Validation(String::from("an awb has at least one parcel")));
        }
        let order = find_order(self, message.order_id.into()).await?;
        if order.status != OrderStatus::Invoiced {
            return Err(WorkflowError::invalid(order.status, "register_awb").into());
        }
        if let Some(current) = order.awb_number.as_deref() {
            let attached = find_awb(self, current).await?;
            if attached.status != AwbStatus::Cancelled {
                return Err(Error::Conflict(format!(
                    "order {} already has awb {current}",
                    order.order_no
                )));
            }
        }
        let awb = MongoAwb {
            id: Uuid::new(),
            awb_number: number.get_inner(),
            courier: message.courier,
            order_id: order.id,
            warehouse: order.warehouse.clone(),
            cod_amount: order.cod_amount,
            parcels: message.parcels,
            weight_grams: message.weight_grams,
            status: AwbStatus::Created,
            created_at: Utc::now().into(),
            handed_over_at: None,
            handover_session_id: None,
            events: vec![],
        };
        let mut session = self.start_transaction().await?;
        if let Err(e) = self
            .bo_db
            .collection::<MongoAwb>(AWBS_COL)
            .insert_one_with_session(&awb, None, &mut session)
            .await
        {
            session.abort_transaction().await?;
            if is_duplicate_key(&e) {
                return Err(Error::Conflict(format!(
                    "awb {} is already registered",
                    awb.awb_number
                )));
            }
            return Err(e.into());
        }
        let res = self
            .bo_db
            .collection::<Document>(ORDERS_COL)
            .update_one_with_session(
                doc! {
                    "id":order.id,
                    "status":OrderStatus::Invoiced,
                    "awb_number":order.awb_number.as_deref(),
                },
                doc! {"$set":{"awb_number":&awb.awb_number,"update_at":awb.created_at}},
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        commit_with_retry(&mut session).await?;
        info!("awb {} registered for {}", awb.awb_number, order.order_no);
        Ok(awb)
    }

    async fn query_awbs(&self, query: AwbQuery) -> Result<(bool, Vec<MongoAwb>)> {
        query_awbs(self, query).await
    }

    async fn get_awb(&self, awb_number: &str) -> Result<MongoAwb> {
        let number = AwbNumber::parse(awb_number)?;
        find_awb(self, number.as_str()).await
    }

    #[instrument(name = "record tracking", skip(self, message), fields(awb=%awb_number))]
    async fn record_tracking(
        &self,
        awb_number: &str,
        message: TrackingEventMessage,
    ) -> Result<MongoAwb> {
        let number = AwbNumber::parse(awb_number)?;
        let mut awb = find_awb(self, number.as_str()).await?;
        let from = awb.status;
        let event = TrackingEvent {
            status: message.status,
            at: message.at.into(),
            location: message.location.filter(|l| !l.trim().is_empty()),
            note: message.note.filter(|n| !n.trim().is_empty()),
            recorded_at: Utc::now().into(),
            applied: false,
        };
        let (advanced, recorded) = awb.apply_tracking(event);
        let mut session = self.start_transaction().await?;
        let res = self
            .bo_db
            .collection::<MongoAwb>(AWBS_COL)
            .update_one_with_session(
                doc! {"awb_number":&awb.awb_number,"status":from},
                doc! {
                    "$set":{"status":awb.status},
                    "$push":{"events":bson::to_bson(&recorded)?},
                },
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        if let Some(order_status) = advanced.and_then(order_status_after) {
            let res = self
                .bo_db
                .collection::<Document>(ORDERS_COL)
                .update_one_with_session(
                    doc! {"id":awb.order_id,"status":OrderStatus::Shipped},
                    doc! {"$set":{"status":order_status,"update_at":Utc::now()}},
                    None,
                    &mut session,
                )
                .await?;
            if res.modified_count == 0 {
                warn!("order {} was not shipped, left as is", awb.order_id);
            }
        }
        commit_with_retry(&mut session).await?;
        match advanced {
            Some(to) => info!("awb {} moved from {from} to {to}", awb.awb_number),
            None => info!("awb {} event recorded, status stays {from}", awb.awb_number),
        }
        Ok(awb)
    }

    #[instrument(name = "cancel awb", skip(self), fields(awb=%awb_number))]
    async fn cancel_awb(&self, awb_number: &str) -> Result<MongoAwb> {
        let number = AwbNumber::parse(awb_number)?;
        let mut awb = find_awb(self, number.as_str()).await?;
        if awb.status != AwbStatus::Created {
            return Err(WorkflowError::invalid(awb.status, "cancel").into());
        }
        awb.status = AwbStatus::Cancelled;
        let mut session = self.start_transaction().await?;
        let res = self
            .bo_db
            .collection::<MongoAwb>(AWBS_COL)
            .update_one_with_session(
                doc! {"awb_number":&awb.awb_number,"status":AwbStatus::Created},
                doc! {"$set":{"status":AwbStatus::Cancelled}},
                None,
                &mut session,
            )
            .await?;
        if res.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::Changed);
        }
        self.bo_db
            .collection::<Document>(ORDERS_COL)
            .update_one_with_session(
                doc! {"id":awb.order_id,"awb_number":&awb.awb_number},
                doc! {"$set":{"awb_number":Bson::Null,"update_at":Utc::now()}},
                None,
                &mut session,
            )
            .await?;
        commit_with_retry(&mut session).await?;
        info!("awb {} cancelled", awb.awb_number);
        Ok(awb)
    }
}

pub async fn find_awb(db: &DbClient, awb_number: &str) -> Result<MongoAwb> {
    db.bo_db
        .collection::<MongoAwb>(AWBS_COL)
        .find_one(doc! {"awb_number":awb_number}, None)
        .await?
        .ok_or_else(|| Error::AwbNotFound(awb_number.to_owned()))
}

async fn query_awbs(db: &DbClient, query: AwbQuery) -> Result<(bool, Vec<MongoAwb>)> {
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
    let mut pipeline = vec![doc! {"$match":filter}, doc! {"$sort":{"created_at":-1}}];
    pipeline.extend(page_stages(query.page));
    let mut cursor = db
        .bo_db
        .collection::<Document>(AWBS_COL)
        .aggregate(pipeline, None)
        .await?;
    let mut awbs = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        awbs.push(bson::from_document(doc)?);
    }
    let has_next = query.page.is_some() && (awbs.len() as u32) == ITEMS_PER_PAGE;
    Ok((has_next, awbs))
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AwbStatus {
    Created,
    HandedOver,
    InTransit,
    Delivered,
    Returned,
    Cancelled,
}

impl AwbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::HandedOver => "handed_over",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for AwbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AwbStatus> for Bson {
    fn from(s: AwbStatus) -> Self {
        Bson::String(s.as_str().to_owned())
    }
}

/// statuses reported by the courier
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    InTransit,
    Delivered,
    Returned,
}

impl From<TrackingStatus> for AwbStatus {
    fn from(s: TrackingStatus) -> Self {
        match s {
            TrackingStatus::InTransit => AwbStatus::InTransit,
            TrackingStatus::Delivered => AwbStatus::Delivered,
            TrackingStatus::Returned => AwbStatus::Returned,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TrackingEvent {
    pub status: TrackingStatus,
    /// as reported by the courier
    pub at: bson::DateTime,
    pub location: Option<String>,
    pub note: Option<String>,
    pub recorded_at: bson::DateTime,
    /// false when the event did not move the status
    pub applied: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoAwb {
    pub id: Uuid,
    pub awb_number: String,
    pub courier: Courier,
    pub order_id: Uuid,
    pub warehouse: String,
    pub cod_amount: i64,
    pub parcels: u32,
    pub weight_grams: u32,
    pub status: AwbStatus,
    pub created_at: bson::DateTime,
    pub handed_over_at: Option<bson::DateTime>,
    pub handover_session_id: Option<Uuid>,
    pub events: Vec<TrackingEvent>,
}

impl MongoAwb {
    /// keeps the event, returns the new status when it moved forward and the event as stored
    pub fn apply_tracking(
        &mut self,
        mut event: TrackingEvent,
    ) -> (Option<AwbStatus>, TrackingEvent) {
        let next = advance(self.status, event.status);
        event.applied = next.is_some();
        if let Some(next) = next {
            self.status = next;
        }
        self.events.push(event.clone());
        (next, event)
    }
}

/// the forward edges of the courier lifecycle, handed over is only set by a handover
pub fn advance(current: AwbStatus, event: TrackingStatus) -> Option<AwbStatus> {
    match (current, event) {
        (AwbStatus::HandedOver, e) => Some(e.into()),
        (AwbStatus::InTransit, TrackingStatus::Delivered | TrackingStatus::Returned) => {
            Some(event.into())
        }
        _ => None,
    }
}

fn order_status_after(status: AwbStatus) -> Option<OrderStatus> {
    match status {
        AwbStatus::Delivered => Some(OrderStatus::Delivered),
        AwbStatus::Returned => Some(OrderStatus::Returned),
        _ => None,
    }
}

mod domain {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum AwbValidateError {
        #[error("Invalid awb number not number")]
        AwbNumberNotNumber,
        #[error("Invalid awb number length, need 8 to 16 digits")]
        AwbNumberLength,
    }

    /// FanCourier awb number
    /// parse requirement:
    /// 1. numeric
    /// 2. 8 to 16 digits
    pub struct AwbNumber(String);

    impl AwbNumber {
        pub fn parse(input: &str) -> Result<Self, AwbValidateError> {
            let input = input.trim();
            if !input.chars().all(|c| c.is_ascii_digit()) {
                return Err(AwbValidateError::AwbNumberNotNumber);
            }
            if !(8..=16).contains(&input.len()) {
                return Err(AwbValidateError::AwbNumberLength);
            }
            Ok(AwbNumber(String::from(input)))
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn get_inner(self) -> String {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awb(status: AwbStatus) -> MongoAwb {
        MongoAwb {
            id: Uuid::new(),
            awb_number: String::from("2150000123"),
            courier: Courier::FanCourier,
            order_id: Uuid::new(),
            warehouse: String::from("BUC1"),
            cod_amount: 0,
            parcels: 1,
            weight_grams: 800,
            status,
            created_at: Utc::now().into(),
            handed_over_at: None,
            handover_session_id: None,
            events: vec![],
        }
    }

    fn event(status: TrackingStatus) -> TrackingEvent {
        TrackingEvent {
            status,
            at: Utc::now().into(),
            location: None,
            note: None,
            recorded_at: Utc::now().into(),
            applied: false,
        }
    }

    #[test]
    fn awb_number_parse() {
        assert_eq!(AwbNumber::parse(" 2150000123 ").unwrap().get_inner(), "2150000123");
        assert!(AwbNumber::parse("12345678").is_ok());
        assert!(AwbNumber::parse("1234567890123456").is_ok());
        assert_eq!(
            AwbNumber::parse("1234567").err(),
            Some(AwbValidateError::AwbNumberLength)
        );
        assert_eq!(
            AwbNumber::parse("12345678901234567").err(),
            Some(AwbValidateError::AwbNumberLength)
        );
        assert_eq!(
            AwbNumber::parse("21500A0123").err(),
            Some(AwbValidateError::AwbNumberNotNumber)
        );
        assert_eq!(
            AwbNumber::parse("").err(),
            Some(AwbValidateError::AwbNumberLength)
        );
    }

    #[test]
    fn tracking_only_moves_forward() {
        assert_eq!(
            advance(AwbStatus::HandedOver, TrackingStatus::InTransit),
            Some(AwbStatus::InTransit)
        );
        assert_eq!(
            advance(AwbStatus::HandedOver, TrackingStatus::Delivered),
            Some(AwbStatus::Delivered)
        );
        assert_eq!(
            advance(AwbStatus::InTransit, TrackingStatus::Returned),
            Some(AwbStatus::Returned)
        );
        assert_eq!(advance(AwbStatus::InTransit, TrackingStatus::InTransit), None);
        assert_eq!(advance(AwbStatus::Delivered, TrackingStatus::InTransit), None);
        assert_eq!(advance(AwbStatus::Returned, TrackingStatus::Delivered), None);
        assert_eq!(advance(AwbStatus::Created, TrackingStatus::InTransit), None);
        assert_eq!(advance(AwbStatus::Cancelled, TrackingStatus::Delivered), None);
    }

    #[test]
    fn ignored_events_are_still_recorded() {
        let mut a = awb(AwbStatus::Created);
        assert_eq!(a.apply_tracking(event(TrackingStatus::InTransit)).0, None);
        assert_eq!(a.status, AwbStatus::Created);
        assert_eq!(a.events.len(), 1);
        assert!(!a.events[0].applied);

        let mut a = awb(AwbStatus::HandedOver);
        assert_eq!(
            a.apply_tracking(event(TrackingStatus::Delivered)).0,
            Some(AwbStatus::Delivered)
        );
        assert_eq!(a.apply_tracking(event(TrackingStatus::InTransit)).0, None);
        assert_eq!(a.status, AwbStatus::Delivered);
        assert_eq!(a.events.len(), 2);
        assert!(a.events[0].applied);
        assert!(!a.events[1].applied);
    }

    #[test]
    fn pushed_event_is_the_stored_one() {
        let mut a = awb(AwbStatus::HandedOver);
        let (advanced, recorded) = a.apply_tracking(event(TrackingStatus::InTransit));
        assert_eq!(advanced, Some(AwbStatus::InTransit));
        assert!(recorded.applied);
        let pushed = bson::to_bson(&recorded).unwrap();
        let stored = bson::to_bson(&a.events[0]).unwrap();
        assert_eq!(pushed, stored);
        assert!(matches!(pushed, Bson::Document(_)));
    }

    #[test]
    fn final_courier_statuses_move_the_order() {
        assert_eq!(order_status_after(AwbStatus::Delivered), Some(OrderStatus::Delivered));
        assert_eq!(order_status_after(AwbStatus::Returned), Some(OrderStatus::Returned));
        assert_eq!(order_status_after(AwbStatus::InTransit), None);
    }
}
