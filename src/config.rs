use serde::{Deserialize, Serialize};
use time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const API_URL_ENV: &str = "MINIBIZ_API_URL";

pub const TOKEN_KEY: &str = "minibiz_auth_token";
pub const REFRESH_TOKEN_KEY: &str = "minibiz_refresh_token";

/// Paths of the backend's authentication endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRoutes {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub forgot_password: String,
    pub reset_password: String,
}

impl Default for AuthRoutes {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_string(),
            register: "/api/auth/register".to_string(),
            refresh: "/api/auth/refresh".to_string(),
            forgot_password: "/api/auth/forgot-password".to_string(),
            reset_password: "/api/auth/reset-password".to_string(),
        }
    }
}

impl AuthRoutes {
    /// Endpoints that must never trigger a token refresh when they answer 401.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        [&self.login, &self.register, &self.refresh]
            .iter()
            .any(|route| path.contains(route.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    pub access_token_key: String,
    pub refresh_token_key: String,
    /// Remaining lifetime under which `check_and_refresh` renews the token.
    pub refresh_threshold: Duration,
    pub auth_routes: AuthRoutes,
    pub timeout: Option<std::time::Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token_key: TOKEN_KEY.to_string(),
            refresh_token_key: REFRESH_TOKEN_KEY.to_string(),
            refresh_threshold: Duration::minutes(5),
            auth_routes: AuthRoutes::default(),
            timeout: None,
        }
    }

    /// Reads the base URL from `MINIBIZ_API_URL`, falling back to the local backend.
    pub fn from_env() -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    pub fn with_token_keys(
        mut self,
        access_token_key: impl Into<String>,
        refresh_token_key: impl Into<String>,
    ) -> Self {
        self.access_token_key = access_token_key.into();
        self.refresh_token_key = refresh_token_key.into();
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn with_auth_routes(mut self, routes: AuthRoutes) -> Self {
        self.auth_routes = routes;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
