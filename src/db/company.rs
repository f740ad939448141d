use std::collections::HashMap;

use axum::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Uuid},
    options::FindOptions,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error_result::{is_duplicate_key, Error, Result},
    server::company::{NewCompanyMessage, NewWarehouseMessage},
};

use super::{
    mongo::{DbClient, COMPANIES_COL, WAREHOUSES_COL},
    CompanyRepo,
};

#[async_trait]
impl CompanyRepo for DbClient {
    async fn create_company(&self, message: NewCompanyMessage) -> Result<MongoCompany> {
        let company = MongoCompany::parse(message)?;
        match self
            .bo_db
            .collection::<MongoCompany>(COMPANIES_COL)
            .insert_one(&company, None)
            .await
        {
            Ok(_) => {
                info!("company {} created", company.code);
                Ok(company)
            }
            Err(e) if is_duplicate_key(&e) => Err(Error::Conflict(format!(
                "company code {} already exists",
                company.code
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_companies(&self) -> Result<Vec<MongoCompany>> {
        let options = FindOptions::builder().sort(doc! {"code":1}).build();
        let cursor = self
            .bo_db
            .collection::<MongoCompany>(COMPANIES_COL)
            .find(None, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_company(&self, id: Uuid) -> Result<MongoCompany> {
        find_company(self, id).await
    }

    async fn create_warehouse(&self, message: NewWarehouseMessage) -> Result<MongoWarehouse> {
        let code = normalize_code(&message.code);
        if code.is_empty() || message.name.trim().is_empty() {
            return Err(Error::Validation(String::from(
                "warehouse code and name are required",
            )));
        }
        let company = find_company(self, message.company_id.into()).await?;
        let warehouse = MongoWarehouse {
            code,
            name: message.name.trim().to_owned(),
            company_id: company.id,
            created_at: Utc::now().into(),
        };
        match self
            .bo_db
            .collection::<MongoWarehouse>(WAREHOUSES_COL)
            .insert_one(&warehouse, None)
            .await
        {
            Ok(_) => {
                info!("warehouse {} created for {}", warehouse.code, company.code);
                Ok(warehouse)
            }
            Err(e) if is_duplicate_key(&e) => Err(Error::Conflict(format!(
                "warehouse code {} already exists",
                warehouse.code
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_warehouses(&self) -> Result<Vec<MongoWarehouse>> {
        list_warehouses(self).await
    }

    async fn find_warehouse(&self, code: &str) -> Result<MongoWarehouse> {
        find_warehouse(self, code).await
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoCompany {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    /// fiscal code
    pub cui: String,
    pub invoicing_provider: InvoicingProvider,
    pub intercompany_markup_percent: u32,
    pub created_at: mongodb::bson::DateTime,
}

impl MongoCompany {
    fn parse(message: NewCompanyMessage) -> Result<Self> {
        let code = normalize_code(&message.code);
        if code.is_empty() {
            return Err(Error::Validation(String::from("company code is required")));
        }
        if message.name.trim().is_empty() {
            return Err(Error::Validation(String::from("company name is required")));
        }
        if message.intercompany_markup_percent > 100 {
            return Err(Error::Validation(format!(
                "markup {} is out of 0..=100",
                message.intercompany_markup_percent
            )));
        }
        Ok(Self {
            id: Uuid::new(),
            code,
            name: message.name.trim().to_owned(),
            cui: message.cui.trim().to_owned(),
            invoicing_provider: message.invoicing_provider,
            intercompany_markup_percent: message.intercompany_markup_percent,
            created_at: Utc::now().into(),
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MongoWarehouse {
    pub code: String,
    pub name: String,
    /// owner of the stock kept here
    pub company_id: Uuid,
    pub created_at: mongodb::bson::DateTime,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoicingProvider {
    Oblio,
    Facturis,
    Smartbill,
}

impl From<InvoicingProvider> for Bson {
    fn from(p: InvoicingProvider) -> Self {
        match p {
            InvoicingProvider::Oblio => Bson::String(String::from("oblio")),
            InvoicingProvider::Facturis => Bson::String(String::from("facturis")),
            InvoicingProvider::Smartbill => Bson::String(String::from("smartbill")),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub async fn find_company(db: &DbClient, id: Uuid) -> Result<MongoCompany> {
    db.bo_db
        .collection::<MongoCompany>(COMPANIES_COL)
        .find_one(doc! {"id":id}, None)
        .await?
        .ok_or_else(|| Error::CompanyNotFound(id.to_string()))
}

pub async fn find_warehouse(db: &DbClient, code: &str) -> Result<MongoWarehouse> {
    let code = normalize_code(code);
    db.bo_db
        .collection::<MongoWarehouse>(WAREHOUSES_COL)
        .find_one(doc! {"code":&code}, None)
        .await?
        .ok_or(Error::WarehouseNotFound(code))
}

pub async fn list_warehouses(db: &DbClient) -> Result<Vec<MongoWarehouse>> {
    let options = FindOptions::builder().sort(doc! {"code":1}).build();
    let cursor = db
        .bo_db
        .collection::<MongoWarehouse>(WAREHOUSES_COL)
        .find(None, options)
        .await?;
    Ok(cursor.try_collect().await?)
}

/// warehouse code to the company owning its stock
pub async fn warehouse_owners(db: &DbClient) -> Result<HashMap<String, Uuid>> {
    Ok(list_warehouses(db)
        .await?
        .into_iter()
        .map(|w| (w.code, w.company_id))
        .collect())
}
