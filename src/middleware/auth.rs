use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    config::TOKEN_KEY,
    guard::{Decision, RouteGuard},
    token,
};

fn security_headers() -> [(HeaderName, &'static str); 4] {
    [
        (header::X_XSS_PROTECTION, "1; mode=block"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        (header::X_FRAME_OPTIONS, "DENY"),
    ]
}

/// State for [`route_guard`].
#[derive(Clone)]
pub struct GuardState {
    pub guard: Arc<RouteGuard>,
    pub cookie_name: String,
}

impl Default for GuardState {
    fn default() -> Self {
        Self::new(RouteGuard::default())
    }
}

impl GuardState {
    pub fn new(guard: RouteGuard) -> Self {
        Self {
            guard: Arc::new(guard),
            cookie_name: TOKEN_KEY.to_string(),
        }
    }

    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }
}

/// Applies the [`RouteGuard`] to the access token found in the session cookie.
///
/// Allowed requests holding an unexpired token get the decoded
/// [`Claims`](crate::token::Claims) in their extensions; the others are redirected to the login or access-denied page.
/// Every response carries the standard security headers.
pub async fn route_guard(State(state): State<GuardState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let access_token = get_cookie(request.headers(), &state.cookie_name).map(str::to_string);

    let decision = match state.guard.decide(&path, access_token.as_deref()) {
        Decision::RedirectLogin { expired, .. } => Decision::RedirectLogin {
            callback_url: request
                .uri()
                .path_and_query()
                .map_or_else(|| path.clone(), |pq| pq.as_str().to_string()),
            expired,
        },
        other => other,
    };

    let mut response = match state.guard.target(&decision) {
        None => {
            let now = OffsetDateTime::now_utc();
            if let Some(claims) = access_token
                .as_deref()
                .and_then(token::decode_claims)
                .filter(|claims| !claims.is_expired_at(now))
            {
                request.extensions_mut().insert(claims);
            }
            next.run(request).await
        }
        Some(target) => {
            debug!(path = %path, ?decision, "Route guard redirect");
            Redirect::temporary(&target).into_response()
        }
    };

    apply_security_headers(response.headers_mut());
    response
}

fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in security_headers() {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// Reads a cookie value from the `Cookie` header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie_header
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; minibiz_auth_token=abc.def.ghi ;other=1"),
        );
        assert_eq!(get_cookie(&headers, "minibiz_auth_token"), Some("abc.def.ghi"));
        assert_eq!(get_cookie(&headers, "other"), Some("1"));
        assert_eq!(get_cookie(&headers, "missing"), None);
        assert_eq!(get_cookie(&HeaderMap::new(), "theme"), None);
    }

    #[test]
    fn security_headers_are_set() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block");
        assert_eq!(headers[header::REFERRER_POLICY], "strict-origin-when-cross-origin");
    }
}
