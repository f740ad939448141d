use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::prelude::*;
use chrono::serde::ts_seconds;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        company::{InvoicingProvider, MongoCompany, MongoWarehouse},
        mongo::DbClient,
        CompanyRepo,
    },
    error_result::Result,
};

use super::{auth::UserInfo, AppState};

pub fn get_companies_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_companies).post(create_company))
        .route("/:id", get(get_company))
}

pub fn get_warehouses_router() -> Router<AppState> {
    Router::new().route("/", get(list_warehouses).post(create_warehouse))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewCompanyMessage {
    pub code: String,
    pub name: String,
    pub cui: String,
    pub invoicing_provider: InvoicingProvider,
    #[serde(default)]
    pub intercompany_markup_percent: u32,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewWarehouseMessage {
    pub code: String,
    pub name: String,
    pub company_id: Uuid,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub cui: String,
    pub invoicing_provider: InvoicingProvider,
    pub intercompany_markup_percent: u32,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl From<MongoCompany> for Company {
    fn from(m: MongoCompany) -> Self {
        Self {
            id: m.id.into(),
            code: m.code,
            name: m.name,
            cui: m.cui,
            invoicing_provider: m.invoicing_provider,
            intercompany_markup_percent: m.intercompany_markup_percent,
            created_at: m.created_at.to_chrono(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub code: String,
    pub name: String,
    pub company_id: Uuid,
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl From<MongoWarehouse> for Warehouse {
    fn from(m: MongoWarehouse) -> Self {
        Self {
            code: m.code,
            name: m.name,
            company_id: m.company_id.into(),
            created_at: m.created_at.to_chrono(),
        }
    }
}

#[instrument(name = "create company", skip(user_info, db, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    code = %message.code,
))]
pub async fn create_company(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    Json(message): Json<NewCompanyMessage>,
) -> Result<impl IntoResponse> {
    let company = db.create_company(message).await?;
    Ok((StatusCode::CREATED, Json(Company::from(company))))
}

pub async fn list_companies(State(db): State<Arc<DbClient>>) -> Result<Json<Vec<Company>>> {
    let companies = db.list_companies().await?;
    Ok(companies.into_iter().map(Company::from).collect::<Vec<_>>().into())
}

pub async fn get_company(
    Path(id): Path<Uuid>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Company>> {
    Ok(Json(db.find_company(id.into()).await?.into()))
}

#[instrument(name = "create warehouse", skip(user_info, db, message), fields(
    request_id = %Uuid::new_v4(),
    action_by = %user_info.user_id,
    code = %message.code,
))]
pub async fn create_warehouse(
    user_info: UserInfo,
    State(db): State<Arc<DbClient>>,
    Json(message): Json<NewWarehouseMessage>,
) -> Result<impl IntoResponse> {
    let warehouse = db.create_warehouse(message).await?;
    Ok((StatusCode::CREATED, Json(Warehouse::from(warehouse))))
}

pub async fn list_warehouses(State(db): State<Arc<DbClient>>) -> Result<Json<Vec<Warehouse>>> {
    let warehouses = db.list_warehouses().await?;
    Ok(warehouses
        .into_iter()
        .map(Warehouse::from)
        .collect::<Vec<_>>()
        .into())
}
