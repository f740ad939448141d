use super::{
    auth::{self, User},
    AuthDataBase,
};
use crate::error_result::{is_duplicate_key, Error, Result};
use axum::async_trait;
use mongodb::{
    bson::{doc, Document, Uuid},
    options::{
        Acknowledgment, ClientOptions, FindOneAndUpdateOptions, IndexOptions, ReadConcern,
        ReturnDocument, TransactionOptions, WriteConcern,
    },
    Client, ClientSession, Database, IndexModel,
};
use tracing::{info, warn};

pub const INVENTORY_COL: &str = "inventory";
pub const OPERATIONS_COL: &str = "operations";
pub const USERS_COL: &str = "users";
pub const COMPANIES_COL: &str = "companies";
pub const WAREHOUSES_COL: &str = "warehouses";
pub const RECEIPTS_COL: &str = "receipts";
pub const ORDERS_COL: &str = "orders";
pub const AWBS_COL: &str = "awbs";
pub const HANDOVERS_COL: &str = "handovers";
pub const SETTLEMENTS_COL: &str = "settlements";
pub const COUNTERS_COL: &str = "counters";
pub const LOCKS_COL: &str = "locks";

#[derive(Clone, Debug)]
pub struct DbClient {
    pub client: Client,
    pub bo_db: Database,
}

impl DbClient {
    pub async fn init(connect_string: &str, database_name: &str) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connect_string).await?;
        client_options.app_name = Some(String::from("backoffice"));
        let client = Client::with_options(client_options)?;
        client.list_database_names(None, None).await?;
        let database = client.database(database_name);
        let db = Self {
            client,
            bo_db: database,
        };
        db.create_indexes().await?;
        info!("db started successfully");
        Ok(db)
    }

    async fn create_indexes(&self) -> Result<()> {
        for (collection, keys) in unique_indexes() {
            let model = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build();
            self.bo_db
                .collection::<Document>(collection)
                .create_index(model, None)
                .await?;
        }
        info!("indexes ensured");
        Ok(())
    }

    /// atomically increase the named counter and return the new value.
    /// two first calls racing on the upsert collide on the unique key, the loser retries once.
    pub async fn next_sequence(&self, key: &str) -> Result<i64> {
        match self.increase_counter(key).await {
            Err(Error::Mongodb(e)) if is_duplicate_key(&e) => {
                warn!("counter {key} was created concurrently, retry");
                self.increase_counter(key).await
            }
            res => res,
        }
    }

    async fn increase_counter(&self, key: &str) -> Result<i64> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .bo_db
            .collection::<Document>(COUNTERS_COL)
            .find_one_and_update(doc! {"key":key}, doc! {"$inc":{"seq":1_i64}}, options)
            .await?;
        counter
            .and_then(|c| c.get_i64("seq").ok())
            .ok_or_else(|| Error::Conflict(format!("counter {key} returned no value")))
    }

    pub async fn start_transaction(&self) -> Result<ClientSession> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::majority())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;
        Ok(session)
    }
}

/// commit, retrying while the outcome of the commit is unknown.
pub async fn commit_with_retry(session: &mut ClientSession) -> Result<()> {
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(error) => {
                if error.contains_label(mongodb::error::UNKNOWN_TRANSACTION_COMMIT_RESULT) {
                    continue;
                }
                return Err(error.into());
            }
        }
    }
}

#[async_trait]
impl AuthDataBase for DbClient {
    async fn check_is_username_occupied(&self, username: &str) -> Result<bool> {
        auth::check_is_username_occupied(self, username).await
    }

    async fn create_user(&self, user: User) -> Result<()> {
        auth::create_user(self, user).await
    }

    async fn find_user(&self, id: Uuid) -> Result<User> {
        auth::find_user(self, id).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<User> {
        auth::find_user_by_username(self, username).await
    }
}

fn unique_indexes() -> Vec<(&'static str, Document)> {
    vec![
        (USERS_COL, doc! {"username":1}),
        (RECEIPTS_COL, doc! {"receipt_no":1}),
        (RECEIPTS_COL, doc! {"id":1}),
        (ORDERS_COL, doc! {"channel":1,"external_id":1}),
        (ORDERS_COL, doc! {"id":1}),
        (AWBS_COL, doc! {"awb_number":1}),
        (
            HANDOVERS_COL,
            doc! {"business_date":1,"warehouse":1,"courier":1},
        ),
        (SETTLEMENTS_COL, doc! {"settlement_no":1}),
        (COUNTERS_COL, doc! {"key":1}),
        (LOCKS_COL, doc! {"name":1}),
        (COMPANIES_COL, doc! {"code":1}),
        (WAREHOUSES_COL, doc! {"code":1}),
        (INVENTORY_COL, doc! {"sku":1}),
    ]
}
