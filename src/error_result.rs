use axum::{http::StatusCode, response::IntoResponse, response::Redirect};
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, instrument};

use crate::db::{auth::UserRole, awb::AwbValidateError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
    #[error(transparent)]
    Mongodb(#[from] mongodb::error::Error),
    #[error("can not find inventory item {0}")]
    InventoryItemNotFound(String),
    #[error("can not find receipt {0}")]
    ReceiptNotFound(String),
    #[error("can not find order {0}")]
    OrderNotFound(String),
    #[error("can not find awb {0}")]
    AwbNotFound(String),
    #[error("can not find handover session {0}")]
    HandoverNotFound(String),
    #[error("can not find settlement {0}")]
    SettlementNotFound(String),
    #[error("can not find company {0}")]
    CompanyNotFound(String),
    #[error("can not find warehouse {0}")]
    WarehouseNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    AwbValidate(#[from] AwbValidateError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("{0}")]
    Conflict(String),
    #[error("lock {0} is held by another run")]
    LockHeld(String),
    #[error("Changed")]
    Changed,
    #[error(transparent)]
    Uuid(#[from] mongodb::bson::uuid::Error),
    #[error(transparent)]
    SerdeJsonBody(#[from] serde_json::Error),
    #[error(transparent)]
    BsonDe(#[from] mongodb::bson::de::Error),
    #[error(transparent)]
    BsonSer(#[from] mongodb::bson::ser::Error),
    #[error(transparent)]
    Auth(AuthError),
    #[error("tokio handler error")]
    TokioHandler(#[from] JoinError),
    #[error(transparent)]
    HttpRequest(#[from] reqwest::Error),
    #[error("http response error : {0}")]
    HttpResponse(String),
    #[error("Path not found")]
    PathNotFound,
}

/// rejections of a receipt or handover state machine.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WorkflowError {
    #[error("can not {action} from status {from}")]
    InvalidTransition { from: String, action: String },
    #[error("differences need a manager approval")]
    ManagerApprovalRequired,
    #[error("there are no differences to approve")]
    NothingToApprove,
    #[error("every line must be counted before verification")]
    CountsIncomplete,
}

impl WorkflowError {
    pub fn invalid(from: impl ToString, action: &str) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            action: action.to_owned(),
        }
    }
}

impl IntoResponse for Error {
    #[instrument(name = "change error into response", skip(self))]
    fn into_response(self) -> axum::response::Response {
        error!("got error raw : {self:?}, message:{self}");
        let (status, message) = match self {
            Error::InventoryItemNotFound(_)
            | Error::ReceiptNotFound(_)
            | Error::OrderNotFound(_)
            | Error::AwbNotFound(_)
            | Error::HandoverNotFound(_)
            | Error::SettlementNotFound(_)
            | Error::CompanyNotFound(_)
            | Error::WarehouseNotFound(_)
            | Error::PathNotFound => (StatusCode::NOT_FOUND, format!("{self}")),
            Error::Validation(_) | Error::AwbValidate(_) => {
                (StatusCode::BAD_REQUEST, format!("{self}"))
            }
            Error::Workflow(ref e) => match e {
                WorkflowError::ManagerApprovalRequired => {
                    (StatusCode::FORBIDDEN, format!("{self}"))
                }
                _ => (StatusCode::CONFLICT, format!("{self}")),
            },
            Error::Conflict(_) | Error::LockHeld(_) => (StatusCode::CONFLICT, format!("{self}")),
            Error::Changed => (
                StatusCode::CONFLICT,
                String::from("requested has been changed"),
            ),
            Error::Auth(e) => match e {
                AuthError::CookieHeaderNotFound => (
                    StatusCode::UNAUTHORIZED,
                    String::from("CookieHeaderNotFound"),
                ),
                AuthError::InvalidSignupSecret => (
                    StatusCode::BAD_REQUEST,
                    String::from("invalid signup secret"),
                ),
                AuthError::UsernameOccupied => (
                    StatusCode::BAD_REQUEST,
                    String::from("username is occupied"),
                ),
                AuthError::UserNotFound => (
                    StatusCode::UNAUTHORIZED,
                    String::from("username is not found"),
                ),
                AuthError::InvalidPassword => {
                    (StatusCode::UNAUTHORIZED, String::from("invalid password"))
                }
                AuthError::JWTError(e) => (StatusCode::UNAUTHORIZED, format!("InvalidToken:{e}")),
                AuthError::JWTTokenNotFound => {
                    (StatusCode::UNAUTHORIZED, String::from("TokenNotFound"))
                }
                AuthError::TokenNeedRefresh => {
                    (StatusCode::UNAUTHORIZED, String::from("TokenNeedRefresh"))
                }
                AuthError::JWTTokenNeedRefresh(uri) => {
                    let encoded = general_purpose::URL_SAFE_NO_PAD.encode(uri.as_bytes());
                    let path = format!("/api/v1/public/refresh_token?uri={}", encoded);
                    return Redirect::temporary(&path).into_response();
                }
                AuthError::InvalidRedirectUri => {
                    (StatusCode::BAD_REQUEST, String::from("invalid redirect uri"))
                }
                AuthError::PermissionNotEnough { got, need } => {
                    error!(
                        "Got permission Error user got :{:?} but need :{}",
                        got, need
                    );
                    (StatusCode::FORBIDDEN, String::from("PermissionNotEnough"))
                }
                AuthError::PasswordHashProcess(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("Internal server error"),
                ),
            },
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("Internal server error"),
            ),
        };
        error!("returning error message:{message}");

        (status, message).into_response()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid signup secret")]
    InvalidSignupSecret,
    #[error("cookie header is not found")]
    CookieHeaderNotFound,
    #[error("username is occupied")]
    UsernameOccupied,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid password")]
    InvalidPassword,
    #[error("password process got error: {0:?}")]
    PasswordHashProcess(pbkdf2::password_hash::Error),
    #[error(transparent)]
    JWTError(#[from] jsonwebtoken::errors::Error),
    #[error("token not found")]
    JWTTokenNotFound,
    #[error("token need refresh")]
    JWTTokenNeedRefresh(String),
    #[error("TokenNeedRefresh")]
    TokenNeedRefresh,
    #[error("invalid redirect uri")]
    InvalidRedirectUri,
    #[error("PermissionNotEnough")]
    PermissionNotEnough {
        got: Option<UserRole>,
        need: UserRole,
    },
}
impl From<pbkdf2::password_hash::Error> for AuthError {
    fn from(e: pbkdf2::password_hash::Error) -> Self {
        Self::PasswordHashProcess(e)
    }
}

/// true when a write was rejected by a unique index.
pub fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        ErrorKind::Command(e) => e.code == 11000,
        _ => false,
    }
}
