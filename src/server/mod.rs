pub mod auth;
pub mod awb;
pub mod company;
pub mod handover;
pub mod inventory;
pub mod middleware;
pub mod order;
pub mod path_control;
pub mod receipt;
pub mod settlement;
pub mod ws;

use crate::{
    application_path_gen::PrivatePath,
    configuration::LockBackend,
    db::{company::InvoicingProvider, mongo::DbClient, HistoryEntry, InvoiceRef},
    error_result::{Error, Result},
    lock::{LockGuard, MapLock, NamedLock},
    scheduler::Scheduler,
    server::{
        auth::{get_user_info_handler, login, sign_up, token_refresh_handler, UserInfo, SETTINGS},
        ws::{handle_ws, ControlMessage},
    },
    services::notify_service::NotifyService,
};
use axum::{
    extract::FromRef,
    http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_TYPE, LOCATION},
    http::{HeaderValue, StatusCode},
    middleware::from_extractor,
    response::IntoResponse,
    routing::{any, get, post},
    Extension, Router,
};
use chrono::prelude::*;
use chrono::serde::ts_seconds;
use mongodb::bson::Bson;
use path_control::ApplicationPath;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, future::Future, net::TcpListener, sync::Arc, time::Duration};
use tokio::sync::broadcast::Sender;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use tracing::{error, info, instrument};

const ALLOWED_ORIGINS: [&str; 3] = [
    "https://backoffice.local",
    "http://localhost:3000",
    "http://localhost:8000",
];

/// how long a workflow lock survives a crashed holder
const WORKFLOW_LOCK_TTL: Duration = Duration::from_secs(120);

#[derive(Clone, FromRef)]
pub struct AppState {
    pub(crate) db_client: Arc<DbClient>,
    pub(crate) lock: Arc<dyn NamedLock>,
    pub(crate) sender: Arc<Sender<ControlMessage>>,
    pub(crate) notify: Arc<NotifyService>,
}

impl AppState {
    pub fn new(db_client: Arc<DbClient>) -> Self {
        let lock = match SETTINGS.lock_backend {
            LockBackend::Database => db_client.clone() as Arc<dyn NamedLock>,
            LockBackend::Memory => MapLock::new() as Arc<dyn NamedLock>,
        };
        let (tx, _rx) = tokio::sync::broadcast::channel::<ControlMessage>(100);
        Self {
            db_client,
            lock,
            sender: Arc::new(tx),
            notify: Arc::new(NotifyService::new(&SETTINGS.notify)),
        }
    }
}

#[instrument(skip(db_client))]
pub async fn server_start(db_client: DbClient, listener: TcpListener) -> Result<()> {
    let state = AppState::new(Arc::new(db_client));
    let origins = ALLOWED_ORIGINS
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
            Method::PUT,
        ])
        .allow_credentials(true)
        .allow_headers(vec![
            AUTHORIZATION,
            CONTENT_TYPE,
            LOCATION,
            CONTENT_LANGUAGE,
            CONTENT_ENCODING,
        ])
        .allow_origin(origins);
    let layer = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors);
    let PrivatePath {
        health_check_path,
        user_info_path,
        control_path,
        companies_path,
        warehouses_path,
        inventory_path,
        receipts_path,
        orders_path,
        awbs_path,
        handovers_path,
        settlements_path,
    } = PrivatePath::default();
    let control_route = Router::new().route("/", get(handle_ws));
    let health_check_route = Router::new().route("/", get(health_check));
    let user_info_route = Router::new().route("/", get(get_user_info_handler));
    let private_route = Router::new()
        .nest(
            health_check_path.root_path().as_str(),
            health_check_path.inject_auth_router(health_check_route),
        )
        .nest(
            user_info_path.root_path().as_str(),
            user_info_path.inject_auth_router(user_info_route),
        )
        .nest(
            control_path.root_path().as_str(),
            control_path.inject_auth_router(control_route),
        )
        .nest(
            companies_path.root_path().as_str(),
            companies_path.inject_auth_router(company::get_companies_router()),
        )
        .nest(
            warehouses_path.root_path().as_str(),
            warehouses_path.inject_auth_router(company::get_warehouses_router()),
        )
        .nest(
            inventory_path.root_path().as_str(),
            inventory_path.inject_auth_router(inventory::get_inventory_router()),
        )
        .nest(
            receipts_path.root_path().as_str(),
            receipts_path.inject_auth_router(receipt::get_router()),
        )
        .nest(
            orders_path.root_path().as_str(),
            orders_path.inject_auth_router(order::get_router()),
        )
        .nest(
            awbs_path.root_path().as_str(),
            awbs_path.inject_auth_router(awb::get_router()),
        )
        .nest(
            handovers_path.root_path().as_str(),
            handovers_path.inject_auth_router(handover::get_router()),
        )
        .nest(
            settlements_path.root_path().as_str(),
            settlements_path.inject_auth_router(settlement::get_router()),
        )
        .route_layer(from_extractor::<UserInfo>());
    let sign_up_route = Router::new().route("/", post(sign_up));
    let login_route = Router::new().route("/", post(login));
    let refresh_token_route = Router::new().route("/", any(token_refresh_handler));
    let public_route = Router::new()
        .nest("/signup", sign_up_route)
        .nest("/refresh_token", refresh_token_route)
        .nest("/login", login_route);
    let api_route = Router::new()
        .nest("/public", public_route)
        .nest("/private", private_route)
        .layer(Extension(state.clone()))
        .with_state(state.clone());

    if SETTINGS.scheduler.enabled {
        Scheduler::new(state, &SETTINGS.scheduler, SETTINGS.business_tz()).spawn();
    } else {
        info!("scheduler is disabled");
    }

    let app = Router::new().nest("/api/v1", api_route).layer(layer);
    info!("server started at {}", listener.local_addr()?);
    axum::Server::from_tcp(listener)
        .map_err(|e| Error::HttpResponse(format!("can not bind listener: {e}")))?
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::HttpResponse(format!("server stopped: {e}")))?;
    Ok(())
}

async fn health_check() -> Result<impl IntoResponse> {
    Ok(StatusCode::OK)
}

/// take the named lock for a user triggered action, held means 409.
async fn acquire_lock(
    lock: &Arc<dyn NamedLock>,
    name: &str,
    owner: &str,
) -> Result<LockGuard> {
    lock.try_acquire(name, WORKFLOW_LOCK_TTL, owner)
        .await?
        .ok_or_else(|| Error::LockHeld(name.to_owned()))
}

/// a failed release only leaves the lock to expire
pub async fn release_lock(lock: &Arc<dyn NamedLock>, guard: LockGuard) {
    let name = guard.name.clone();
    if let Err(e) = lock.release(guard).await {
        error!("release lock {name} failed: {e}");
    }
}

/// runs `action` while holding the named lock, released whatever the outcome
pub async fn with_lock<T, F, Fut>(
    lock: &Arc<dyn NamedLock>,
    name: &str,
    owner: &str,
    action: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let guard = acquire_lock(lock, name, owner).await?;
    let res = action().await;
    release_lock(lock, guard).await;
    res
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<D> {
    pub data: Vec<D>,
    pub next: u32,
    pub has_next: bool,
}

impl<D> PagedResponse<D> {
    pub fn new<M: Into<D>>(page: Option<u32>, has_next: bool, items: Vec<M>) -> Self {
        Self {
            data: items.into_iter().map(|i| i.into()).collect(),
            next: page.unwrap_or(0).saturating_add(1),
            has_next,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub from: Option<String>,
    pub to: String,
    pub action: String,
    pub by: uuid::Uuid,
    pub by_username: String,
    #[serde(with = "ts_seconds")]
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

impl From<HistoryEntry> for History {
    fn from(h: HistoryEntry) -> Self {
        Self {
            from: h.from,
            to: h.to,
            action: h.action,
            by: h.by.into(),
            by_username: h.by_username,
            at: h.at.to_chrono(),
            note: h.note,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub provider: InvoicingProvider,
    pub series: String,
    pub number: String,
    #[serde(with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
}

impl From<InvoiceRef> for Invoice {
    fn from(i: InvoiceRef) -> Self {
        Self {
            provider: i.provider,
            series: i.series,
            number: i.number,
            issued_at: i.issued_at.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppPrivateRoute {
    HealthCheck,
    UserInfo,
    Control,
    Companies,
    Warehouses,
    Inventory,
    Receipts,
    Orders,
    Awbs,
    Handovers,
    Settlements,
    Root,
}

impl AppPrivateRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::UserInfo => "user_info",
            Self::Control => "control",
            Self::Companies => "companies",
            Self::Warehouses => "warehouses",
            Self::Inventory => "inventory",
            Self::Receipts => "receipts",
            Self::Orders => "orders",
            Self::Awbs => "awbs",
            Self::Handovers => "handovers",
            Self::Settlements => "settlements",
            Self::Root => "root",
        }
    }
}

impl From<String> for AppPrivateRoute {
    fn from(s: String) -> Self {
        match s.as_str() {
            "/health_check" => AppPrivateRoute::HealthCheck,
            "/user_info" => AppPrivateRoute::UserInfo,
            "/control" => AppPrivateRoute::Control,
            "/companies" => AppPrivateRoute::Companies,
            "/warehouses" => AppPrivateRoute::Warehouses,
            "/inventory" => AppPrivateRoute::Inventory,
            "/receipts" => AppPrivateRoute::Receipts,
            "/orders" => AppPrivateRoute::Orders,
            "/awbs" => AppPrivateRoute::Awbs,
            "/handovers" => AppPrivateRoute::Handovers,
            "/settlements" => AppPrivateRoute::Settlements,
            _ => AppPrivateRoute::Root,
        }
    }
}

impl Display for AppPrivateRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AppPrivateRoute> for Bson {
    fn from(r: AppPrivateRoute) -> Self {
        Bson::String(r.as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locked_action_is_refused_while_held() {
        let lock = MapLock::new() as Arc<dyn NamedLock>;
        let held = acquire_lock(&lock, "handover:1", "finalizer").await.unwrap();
        let mut ran = false;
        let flag = &mut ran;
        let res = with_lock(&lock, "handover:1", "clerk", move || async move {
            *flag = true;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(Error::LockHeld(name)) if name == "handover:1"));
        assert!(!ran);
        release_lock(&lock, held).await;

        let res = with_lock(&lock, "handover:1", "clerk", || async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn lock_is_released_after_a_failed_action() {
        let lock = MapLock::new() as Arc<dyn NamedLock>;
        let res: Result<()> = with_lock(&lock, "receipt:1", "clerk", || async {
            Err(Error::Changed)
        })
        .await;
        assert!(matches!(res, Err(Error::Changed)));
        assert!(acquire_lock(&lock, "receipt:1", "manager").await.is_ok());
    }

    #[test]
    fn route_prefix_maps_to_private_route() {
        assert_eq!(
            AppPrivateRoute::from(String::from("/receipts")),
            AppPrivateRoute::Receipts
        );
        assert_eq!(
            AppPrivateRoute::from(String::from("/handovers")),
            AppPrivateRoute::Handovers
        );
        assert_eq!(
            AppPrivateRoute::from(String::from("/unknown")),
            AppPrivateRoute::Root
        );
    }

    #[test]
    fn private_route_is_stored_as_its_snake_case_name() {
        for route in [AppPrivateRoute::Settlements, AppPrivateRoute::UserInfo] {
            let as_json = serde_json::to_value(route).unwrap();
            assert_eq!(as_json, serde_json::json!(route.to_string()));
        }
    }

    #[test]
    fn paged_response_points_to_the_next_page() {
        let res = PagedResponse::<String>::new(Some(2), true, vec!["a", "b"]);
        assert_eq!(res.next, 3);
        assert!(res.has_next);
        assert_eq!(res.data, vec![String::from("a"), String::from("b")]);
        let res = PagedResponse::<String>::new(None, false, Vec::<&str>::new());
        assert_eq!(res.next, 1);
        let res = PagedResponse::<String>::new(Some(u32::MAX), false, Vec::<&str>::new());
        assert_eq!(res.next, u32::MAX);
    }
}
