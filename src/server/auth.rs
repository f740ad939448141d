use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    headers::HeaderName,
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::prelude::*;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JWTErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use once_cell::sync::Lazy;
use pbkdf2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use pbkdf2::Pbkdf2;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    configuration::{get_configuration, Settings},
    db::{
        auth::{effective_role, Actor, User, UserRole},
        mongo::DbClient,
        AuthDataBase,
    },
    error_result::{AuthError, Error, Result},
};

use super::AppPrivateRoute;

pub const ACCESS_COOKIE_NAME: &str = "bo_token";
pub const REFRESH_COOKIE_NAME: &str = "bo_id";

pub static COOKIE_ATTRIBUTE: Lazy<&'static str> = Lazy::new(|| match std::env::var("IS_TEST") {
    Ok(_) => " SameSite=Strict; Path=/; HttpOnly; Max-Age=1814400",
    Err(_) => " SameSite=Strict; Path=/; Secure; HttpOnly; Max-Age=1814400",
});

pub static SETTINGS: Lazy<Settings> =
    Lazy::new(|| get_configuration().expect("Failed to load configuration"));

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignUpMessage {
    username: String,
    password: Secret<String>,
    role: UserRole,
    #[serde(default)]
    sub_role: HashMap<AppPrivateRoute, UserRole>,
    secret: Secret<String>,
}

#[instrument(name = "sign up new user", skip(message, db),fields(
    request_id=%Uuid::new_v4(),
    username=%message.username,
))]
pub async fn sign_up(
    State(db): State<Arc<DbClient>>,
    Json(message): Json<SignUpMessage>,
) -> Result<impl IntoResponse> {
    if message.secret.expose_secret() != SETTINGS.signup_secret.expose_secret() {
        info!("signup secret is incorrect");
        return Err(Error::Auth(AuthError::InvalidSignupSecret));
    }
    let username = message.username.trim().to_owned();
    if username.is_empty() {
        return Err(Error::Validation(String::from("username is required")));
    }
    if db.check_is_username_occupied(&username).await? {
        info!("{} is occupied", username);
        return Err(Error::Auth(AuthError::UsernameOccupied));
    }
    let password = message.password;
    let handler =
        tokio::task::spawn_blocking(move || generate_password_hash(password.expose_secret()));
    let password_hash = handler.await??;
    info!("create new user :{}", username);
    let user = User::new(username, password_hash, message.role, message.sub_role);
    db.create_user(user).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GetUserInfoResponse {
    id: Uuid,
    username: String,
    role: UserRole,
}

pub async fn get_user_info_handler(user_info: UserInfo) -> Result<Json<GetUserInfoResponse>> {
    Ok(Json(GetUserInfoResponse {
        id: user_info.user_id,
        username: user_info.username,
        role: user_info.role,
    }))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginMessage {
    username: String,
    password: Secret<String>,
}

#[instrument(name = "login in user", skip(message, db),fields(
    request_id=%Uuid::new_v4(),
    username=%message.username,
))]
pub async fn login(
    State(db): State<Arc<DbClient>>,
    Json(message): Json<LoginMessage>,
) -> Result<Response> {
    let user = db.find_user_by_username(message.username.trim()).await?;
    let hash = user.hash.clone();
    let password = message.password;
    tokio::task::spawn_blocking(move || verify_password(password.expose_secret(), &hash))
        .await??;
    info!("login {}", user.username);
    let access_token = generate_access_token(user.id.into())?;
    let refresh_token = generate_refresh_token(user.id.into())?;
    Ok(get_cookie_headers(&access_token, &refresh_token).into_response())
}

pub struct RefreshAuthInfo(pub Uuid);

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenQuery {
    uri: Option<String>,
}

#[instrument(name = "refresh access token", skip(query, db,auth_info),fields(
    request_id=%Uuid::new_v4(),
    use_id=%auth_info.0,
))]
pub async fn token_refresh_handler(
    Query(query): Query<RefreshTokenQuery>,
    auth_info: RefreshAuthInfo,
    State(db): State<Arc<DbClient>>,
) -> Result<Response> {
    let user = db.find_user(auth_info.0.into()).await?;
    info!("user is {}", user.username);
    let access_token = generate_access_token(user.id.into())?;
    let refresh_token = generate_refresh_token(user.id.into())?;
    if let Some(uri_str) = query.uri {
        let redirect_to_str = format!("/api/v1/private{}", decode_redirect_uri(&uri_str)?);
        info!("redirect to provided uri :{}", redirect_to_str);
        return Ok((
            get_cookie_headers(&access_token, &refresh_token),
            Redirect::temporary(&redirect_to_str),
        )
            .into_response());
    }
    Ok((
        get_cookie_headers(&access_token, &refresh_token),
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!(BearerTokenResponse {
            access_token,
            refresh_token
        })
        .to_string(),
    )
        .into_response())
}

/// the private path an expired request is sent back to, only paths on this server
fn decode_redirect_uri(encoded: &str) -> Result<String> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|_| Error::Auth(AuthError::InvalidRedirectUri))?;
    let decoded =
        String::from_utf8(bytes).map_err(|_| Error::Auth(AuthError::InvalidRedirectUri))?;
    if !decoded.starts_with('/') || decoded.starts_with("//") {
        return Err(Error::Auth(AuthError::InvalidRedirectUri));
    }
    Ok(decoded)
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BearerTokenResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    user_id: Uuid,
    exp: i64,
}

#[derive(Debug, Deserialize, Serialize)]
struct RefreshClaims {
    user_id: Uuid,
    exp: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserInfo {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub sub_role: HashMap<AppPrivateRoute, UserRole>,
}

impl UserInfo {
    /// the acting user with the role effective on `route`
    pub fn actor(&self, route: AppPrivateRoute) -> Actor {
        Actor {
            id: self.user_id.into(),
            username: self.username.clone(),
            role: effective_role(self.role, &self.sub_role, &route),
        }
    }
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id.into(),
            username: user.username,
            role: user.role,
            sub_role: user.sub_role,
        }
    }
}

#[inline]
fn generate_password_hash(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Pbkdf2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Auth(e.into()))?
        .to_string();
    verify_password(password, &hash)?;
    Ok(hash)
}

#[inline]
fn verify_password(password: &str, password_hash: &str) -> Result<()> {
    let parsed = PasswordHash::new(password_hash).map_err(|e| Error::Auth(e.into()))?;
    Pbkdf2
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::Auth(AuthError::InvalidPassword))
}

#[inline]
pub fn parse_access_token(
    token: &str,
    uri_opt: impl Into<Option<String>>,
    is_auth_token: bool,
) -> Result<Uuid> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(SETTINGS.access_token_secret.expose_secret().as_bytes()),
        &Validation::new(Algorithm::HS512),
    )
    .map_err(|e| {
        if e.kind() == &JWTErrorKind::ExpiredSignature {
            if is_auth_token {
                return Error::Auth(AuthError::TokenNeedRefresh);
            }
            if let Some(uri) = uri_opt.into() {
                return Error::Auth(AuthError::JWTTokenNeedRefresh(uri));
            }
            return Error::Auth(AuthError::JWTError(e));
        }
        Error::Auth(AuthError::JWTError(e))
    })?;
    Ok(decoded.claims.user_id)
}

#[inline]
pub fn parse_refresh_token(token: &str) -> Result<Uuid> {
    let decoded = decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(SETTINGS.refresh_token_secret.expose_secret().as_bytes()),
        &Validation::new(Algorithm::HS512),
    )
    .map_err(|e| Error::Auth(e.into()))?;
    Ok(decoded.claims.user_id)
}

#[inline]
fn expires_in(seconds: u32) -> i64 {
    Utc::now().timestamp() + i64::from(seconds)
}

#[inline]
pub fn generate_access_token(user_id: Uuid) -> Result<String> {
    let claims = Claims {
        user_id,
        exp: expires_in(SETTINGS.access_expiration),
    };
    let header = Header::new(Algorithm::HS512);
    encode(
        &header,
        &claims,
        &EncodingKey::from_secret(SETTINGS.access_token_secret.expose_secret().as_bytes()),
    )
    .map_err(|e| Error::Auth(AuthError::JWTError(e)))
}

#[inline]
pub fn generate_refresh_token(user_id: Uuid) -> Result<String> {
    let claims = RefreshClaims {
        user_id,
        exp: expires_in(SETTINGS.refresh_expiration),
    };
    let header = Header::new(Algorithm::HS512);
    encode(
        &header,
        &claims,
        &EncodingKey::from_secret(SETTINGS.refresh_token_secret.expose_secret().as_bytes()),
    )
    .map_err(|e| Error::Auth(AuthError::JWTError(e)))
}

#[inline]
pub fn get_cookie_headers(
    access_token: &str,
    refresh_token: &str,
) -> AppendHeaders<[(HeaderName, String); 2]> {
    AppendHeaders([
        (
            SET_COOKIE,
            format!(
                "{ACCESS_COOKIE_NAME}={access_token}; {}",
                COOKIE_ATTRIBUTE.trim(),
            ),
        ),
        (
            SET_COOKIE,
            format!(
                "{REFRESH_COOKIE_NAME}={refresh_token}; {}",
                COOKIE_ATTRIBUTE.trim(),
            ),
        ),
    ])
}
