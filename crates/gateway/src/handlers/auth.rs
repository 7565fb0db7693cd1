use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use docvault_protocol::{
    ChangePasswordRequest, ChangePasswordResponse, LoginRequest, LoginResponse, RefreshRequest,
    RefreshResponse, SuccessResponse, UserProfile, REFRESH_COOKIE,
};

use crate::config::CookiePolicy;
use crate::error::{GatewayError, GatewayResult};
use crate::extractors::AuthUser;
use crate::models::ClientMetadata;
use crate::session::{IssuedSession, LoginAttempt};
use crate::AppState;

const COOKIE_PATH: &str = "/auth";

// ── COOKIES ─────────────────────────────────────────────────────

pub(crate) fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all("cookie") {
        let Ok(cookie_header) = header.to_str() else {
            continue;
        };
        for pair in cookie_header.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == name && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// `max_age_secs: None` makes a session cookie that dies with the browser.
pub(crate) fn build_cookie(
    name: &str,
    value: &str,
    max_age_secs: Option<u64>,
    policy: CookiePolicy,
) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; HttpOnly; SameSite={}",
        name,
        value,
        COOKIE_PATH,
        policy.same_site.as_str()
    );
    if let Some(max_age) = max_age_secs {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if policy.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(crate) fn clear_cookie(name: &str, policy: CookiePolicy) -> String {
    build_cookie(name, "", Some(0), policy)
}

fn cookie_headers(cookie: String) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&cookie) {
        headers.append(SET_COOKIE, v);
    }
    headers
}

fn refresh_cookie(state: &AppState, session: &IssuedSession) -> HeaderMap {
    let max_age = session
        .remember_me
        .then(|| state.refresh_cookie_max_age.as_secs());
    cookie_headers(build_cookie(
        REFRESH_COOKIE,
        &session.refresh_token,
        max_age,
        state.cookies,
    ))
}

fn client_metadata(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientMetadata {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    ClientMetadata {
        ip_address: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.chars().take(512).collect()),
    }
}

/// Cookie first, then the JSON body fallback.
fn presented_refresh_token(headers: &HeaderMap, body: &Bytes) -> Option<String> {
    get_cookie_value(headers, REFRESH_COOKIE).or_else(|| {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<RefreshRequest>(body)
            .ok()
            .and_then(|req| req.refresh_token)
    })
}

// ── HANDLERS ────────────────────────────────────────────────────

pub async fn login(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return GatewayError::validation(rejection.body_text()).into_response();
        }
    };
    let client = client_metadata(&headers, peer.map(|ConnectInfo(addr)| addr));

    let attempt = LoginAttempt {
        email: payload.email,
        password: payload.password,
        tenant_hint: payload.tenant_id,
        remember_me: payload.remember_me.unwrap_or(false),
    };

    match state.sessions.login(attempt, client).await {
        Ok(success) => {
            let headers = refresh_cookie(&state, &success.session);
            let body = LoginResponse {
                success: true,
                access_token: success.session.access_token,
                expires_in: success.session.expires_in,
                user: success.user,
            };
            (headers, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let presented = presented_refresh_token(&headers, &body);
    let client = client_metadata(&headers, peer.map(|ConnectInfo(addr)| addr));

    match state.sessions.refresh(presented.as_deref(), client).await {
        Ok(session) => {
            let headers = refresh_cookie(&state, &session);
            let body = RefreshResponse {
                success: true,
                access_token: session.access_token,
                expires_in: session.expires_in,
            };
            (headers, Json(body)).into_response()
        }
        Err(err) if err.code().requires_reauthentication() => {
            let headers = cookie_headers(clear_cookie(REFRESH_COOKIE, state.cookies));
            (headers, err).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let presented = presented_refresh_token(&headers, &body);
    state.sessions.logout(presented.as_deref()).await;

    let headers = cookie_headers(clear_cookie(REFRESH_COOKIE, state.cookies));
    (headers, Json(SuccessResponse { success: true })).into_response()
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> GatewayResult<Json<UserProfile>> {
    Ok(Json(state.sessions.current_user(&user.claims).await?))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> GatewayResult<Json<ChangePasswordResponse>> {
    let Json(payload) = payload.map_err(|r| GatewayError::validation(r.body_text()))?;
    let revoked_sessions = state
        .sessions
        .change_password(&user.claims, &payload.current_password, &payload.new_password)
        .await?;

    Ok(Json(ChangePasswordResponse {
        success: true,
        revoked_sessions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;

    #[test]
    fn cookie_lookup_handles_multiple_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("a=1; docvault_refresh=tok; b=2"),
        );
        assert_eq!(get_cookie_value(&headers, REFRESH_COOKIE).as_deref(), Some("tok"));
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn session_cookies_have_no_max_age() {
        let policy = CookiePolicy::new(true, SameSite::Lax);
        let session = build_cookie(REFRESH_COOKIE, "v", None, policy);
        assert!(!session.contains("Max-Age"));
        assert!(session.contains("HttpOnly"));
        assert!(session.contains("Secure"));
        assert!(session.contains("SameSite=Lax"));

        let persistent = build_cookie(REFRESH_COOKIE, "v", Some(60), policy);
        assert!(persistent.contains("Max-Age=60"));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let cookie = clear_cookie(REFRESH_COOKIE, CookiePolicy::new(false, SameSite::Strict));
        assert!(cookie.starts_with("docvault_refresh=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let meta = client_metadata(&headers, Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.9"));

        let meta = client_metadata(&HeaderMap::new(), Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(meta.ip_address.as_deref(), Some("127.0.0.1"));
    }
}
