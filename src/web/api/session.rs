//! Browser session endpoints: login redirect, profile, token and logout

use crate::error::ServiceResult;
use crate::secure::identity::TOKEN_NAME;
use crate::secure::{AccessLevel, Caller};
use crate::web::server::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginQuery {
    pub redirect: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    pub email: String,
    pub name: String,
    pub auth_level: String,
}

#[derive(Debug, Serialize)]
pub struct TokenReply {
    pub token: String,
}

/// Sends the browser to the identity service's sign-in page
pub async fn login(State(state): State<AppState>, Query(query): Query<LoginQuery>) -> Redirect {
    let redirect = if query.redirect.is_empty() {
        "/"
    } else {
        query.redirect.as_str()
    };
    match state.gate.resolver() {
        Some(resolver) => Redirect::to(&resolver.authorize_url(redirect)),
        None => Redirect::to(redirect),
    }
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Json<Profile> {
    let level = state.gate.level(&caller, None);
    let (email, name) = caller
        .identity
        .as_deref()
        .map(|i| (i.email.clone(), i.name.clone()))
        .unwrap_or_default();
    Json(Profile {
        email,
        name,
        auth_level: level.as_str().to_string(),
    })
}

/// Echoes the credential the caller authenticated with
pub async fn token(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServiceResult<Json<TokenReply>> {
    state.gate.require(&caller, None, AccessLevel::Read)?;
    Ok(Json(TokenReply {
        token: caller.token.clone().unwrap_or_default(),
    }))
}

/// Forgets the caller's cached identity and clears the credential cookie
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServiceResult<Response> {
    state.gate.require(&caller, None, AccessLevel::Read)?;
    if let (Some(resolver), Some(token)) = (state.gate.resolver(), caller.token.as_deref()) {
        resolver.evict(token);
    }
    let cookie = format!("{}=; Path=/; Max-Age=0; HttpOnly", TOKEN_NAME);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({"msg": "logged out"})),
    )
        .into_response())
}
