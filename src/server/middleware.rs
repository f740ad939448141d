use axum::{
    async_trait,
    extract::{FromRequestParts, State, TypedHeader},
    headers::{authorization::Bearer, Authorization, Cookie},
    http::{request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use tracing::error;

use crate::{
    db::{auth::effective_role, AuthDataBase},
    error_result::{AuthError, Error, Result},
};
use std::{result::Result as StdResult, sync::Arc};

use super::{
    auth::{
        parse_access_token, parse_refresh_token, RefreshAuthInfo, UserInfo, ACCESS_COOKIE_NAME,
        REFRESH_COOKIE_NAME,
    },
    path_control::ApplicationPath,
    AppPrivateRoute, AppState,
};

#[async_trait]
impl<S> FromRequestParts<S> for UserInfo
where
    S: Send + Sync,
{
    type Rejection = Response;
    async fn from_request_parts(req: &mut Parts, state: &S) -> StdResult<Self, Self::Rejection> {
        let Extension(state) = Extension::<AppState>::from_request_parts(req, state)
            .await
            .map_err(|e| {
                error!("app state extension is missing: {e}");
                e.into_response()
            })?;
        let id = match TypedHeader::<Cookie>::from_request_parts(req, &state).await {
            Ok(TypedHeader(cookie)) => {
                let token = cookie
                    .get(ACCESS_COOKIE_NAME)
                    .ok_or(Error::Auth(AuthError::JWTTokenNotFound))
                    .map_err(|e| e.into_response())?;
                parse_access_token(token, req.uri.to_string(), false)
                    .map_err(|e| e.into_response())?
            }
            Err(_) => {
                let Ok(TypedHeader(authorization)) =
                    TypedHeader::<Authorization<Bearer>>::from_request_parts(req, &state).await
                else {
                    error!("not found cookie and auth header either!");
                    return Err(Error::Auth(AuthError::CookieHeaderNotFound).into_response());
                };
                parse_access_token(authorization.token(), None, true)
                    .map_err(|e| e.into_response())?
            }
        };
        let user = state
            .db_client
            .find_user(id.into())
            .await
            .map_err(|e| e.into_response())?;
        Ok(user.into())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RefreshAuthInfo
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(req: &mut Parts, state: &S) -> StdResult<Self, Self::Rejection> {
        match TypedHeader::<Cookie>::from_request_parts(req, state).await {
            Ok(TypedHeader(cookie)) => {
                let token = cookie
                    .get(REFRESH_COOKIE_NAME)
                    .ok_or(Error::Auth(AuthError::JWTTokenNotFound))
                    .map_err(|e| e.into_response())?;
                let user_id = parse_refresh_token(token).map_err(|e| e.into_response())?;
                Ok(Self(user_id))
            }
            Err(_) => {
                if let Ok(TypedHeader(authorization)) =
                    TypedHeader::<Authorization<Bearer>>::from_request_parts(req, state).await
                {
                    let user_id = parse_refresh_token(authorization.token())
                        .map_err(|e| e.into_response())?;
                    return Ok(Self(user_id));
                }
                error!("not found cookie and auth header either!");
                Err(Error::Auth(AuthError::CookieHeaderNotFound).into_response())
            }
        }
    }
}

/// rejects the request unless the role effective on this route reaches the one
/// configured for the matched path and method.
pub async fn auth<B>(
    State(state): State<Arc<dyn ApplicationPath>>,
    user_info: UserInfo,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response> {
    let Ok(matched) = state.get_matcher().at(req.uri().path()) else {
        return Err(Error::PathNotFound);
    };
    let Some(need) = matched.value.get(req.method()).copied() else {
        return Err(Error::PathNotFound);
    };
    let route = AppPrivateRoute::from(state.root_path());
    let got = effective_role(user_info.role, &user_info.sub_role, &route);
    if got <= need {
        return Ok(next.run(req).await);
    }
    Err(Error::Auth(AuthError::PermissionNotEnough {
        got: Some(got),
        need,
    }))
}
