//! Navigation guard: decides whether a path may be shown to the holder of a
//! token, or where to send them instead.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::{
    error::{ApiError, Result},
    storage::TokenStore,
    token,
};

pub const LOGIN_PATH: &str = "/login";
pub const FORBIDDEN_PATH: &str = "/acesso-negado";

pub const CALLBACK_URL_PARAM: &str = "callbackUrl";
pub const EXPIRED_PARAM: &str = "expired";

const PUBLIC_PATHS: &[&str] = &[
    "/login",
    "/register",
    "/forgot-password",
    "/reset-password",
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/forgot-password",
    "/api/auth/reset-password",
    "/api/auth/refresh",
];

const PUBLIC_PREFIXES: &[&str] = &["/api/public", "/_next"];

const STATIC_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "ico", "svg", "webp", "css", "js"];

/// Roles allowed under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub path_prefix: String,
    pub allowed_roles: Vec<String>,
}

impl RouteRule {
    pub fn new<I, S>(path_prefix: impl Into<String>, allowed_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_prefix: path_prefix.into(),
            allowed_roles: allowed_roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        matches_prefix(path, &self.path_prefix)
    }

    pub fn allows(&self, role: Option<&str>) -> bool {
        role.is_some_and(|role| self.allowed_roles.iter().any(|allowed| allowed == role))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectLogin { callback_url: String, expired: bool },
    RedirectForbidden,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Redirect target as an origin-relative path with its query string.
    pub fn target(&self, login_path: &str, forbidden_path: &str) -> Option<String> {
        match self {
            Decision::Allow => None,
            Decision::RedirectForbidden => Some(forbidden_path.to_string()),
            Decision::RedirectLogin {
                callback_url,
                expired,
            } => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                if *expired {
                    query.append_pair(EXPIRED_PARAM, "true");
                }
                query.append_pair(CALLBACK_URL_PARAM, callback_url);
                Some(format!("{login_path}?{}", query.finish()))
            }
        }
    }

    /// Redirect target resolved against `base`, or `None` for [`Decision::Allow`].
    pub fn location(&self, base: &Url, login_path: &str, forbidden_path: &str) -> Result<Option<Url>> {
        self.target(login_path, forbidden_path)
            .map(|target| base.join(&target))
            .transpose()
            .map_err(|e| ApiError::InvalidRequest {
                message: format!("redirect target: {e}"),
            })
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = match prefix.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    if prefix == "/" {
        return path.starts_with('/');
    }

    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn is_static_asset(path: &str) -> bool {
    path.rsplit_once('.').is_some_and(|(_, extension)| {
        STATIC_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    })
}

/// Role-based route protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGuard {
    pub public_paths: Vec<String>,
    pub rules: Vec<RouteRule>,
    pub login_path: String,
    pub forbidden_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self {
            public_paths: PUBLIC_PATHS.iter().map(|path| path.to_string()).collect(),
            rules: vec![
                RouteRule::new("/admin", ["ADMIN"]),
                RouteRule::new("/admin/users", ["ADMIN"]),
                RouteRule::new("/admin/settings", ["ADMIN"]),
                RouteRule::new("/gerente", ["ADMIN", "MANAGER"]),
                RouteRule::new("/relatorios", ["ADMIN", "MANAGER"]),
            ],
            login_path: LOGIN_PATH.to_string(),
            forbidden_path: FORBIDDEN_PATH.to_string(),
        }
    }
}

impl RouteGuard {
    /// A guard with no public paths and no rules; every path needs a token.
    pub fn empty() -> Self {
        Self {
            public_paths: Vec::new(),
            rules: Vec::new(),
            login_path: LOGIN_PATH.to_string(),
            forbidden_path: FORBIDDEN_PATH.to_string(),
        }
    }

    pub fn with_public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }

    pub fn with_rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|public| matches_prefix(path, public))
            || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
            || path == "/favicon.ico"
            || is_static_asset(path)
    }

    /// The most specific rule covering `path`.
    pub fn rule_for(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(path))
            .max_by_key(|rule| rule.path_prefix.len())
    }

    pub fn decide(&self, path: &str, access_token: Option<&str>) -> Decision {
        self.decide_at(path, access_token, OffsetDateTime::now_utc())
    }

    pub fn decide_at(&self, path: &str, access_token: Option<&str>, now: OffsetDateTime) -> Decision {
        if self.is_public(path) {
            return Decision::Allow;
        }

        let Some(access_token) = access_token.filter(|t| !t.is_empty()) else {
            return Decision::RedirectLogin {
                callback_url: path.to_string(),
                expired: false,
            };
        };

        let claims = match token::decode_claims(access_token) {
            Some(claims) if !claims.is_expired_at(now) => claims,
            _ => {
                return Decision::RedirectLogin {
                    callback_url: path.to_string(),
                    expired: true,
                };
            }
        };

        match self.rule_for(path) {
            Some(rule) if !rule.allows(claims.role.as_deref()) => Decision::RedirectForbidden,
            _ => Decision::Allow,
        }
    }

    /// Client-side variant reading the token from the store.
    pub fn decide_with_store(&self, path: &str, tokens: &TokenStore) -> Decision {
        self.decide(path, tokens.get().as_deref())
    }

    pub fn target(&self, decision: &Decision) -> Option<String> {
        decision.target(&self.login_path, &self.forbidden_path)
    }

    pub fn location(&self, decision: &Decision, base: &Url) -> Result<Option<Url>> {
        decision.location(base, &self.login_path, &self.forbidden_path)
    }
}
