use std::{collections::BTreeMap, fmt, sync::Arc};

use reqwest::{
    Method, StatusCode,
    header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    config::SessionConfig,
    error::{ApiError, Result},
    hooks::{BoxFuture, HookChain},
    storage::TokenStore,
};

const JSON: &str = "application/json";

/// Browser-style cache directive, sent as `Cache-Control`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    Default,
    NoStore,
    Reload,
    #[default]
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    pub fn cache_control(self) -> Option<&'static str> {
        match self {
            CacheMode::Default | CacheMode::ForceCache => None,
            CacheMode::NoStore => Some("no-store"),
            CacheMode::Reload | CacheMode::NoCache => Some("no-cache"),
            CacheMode::OnlyIfCached => Some("only-if-cached"),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Attach `Authorization: Bearer <token>` when a token is stored.
    pub requires_auth: bool,
    pub custom_headers: BTreeMap<String, String>,
    pub cache: CacheMode,
    /// Cleared on the single retry issued after a token refresh.
    pub retry: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
            custom_headers: BTreeMap::new(),
            cache: CacheMode::default(),
            retry: true,
        }
    }
}

impl RequestOptions {
    /// Options for endpoints that must not carry the access token.
    pub fn public() -> Self {
        Self {
            requires_auth: false,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

/// Request descriptor handed to before-request hooks.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub cache: CacheMode,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            cache: CacheMode::default(),
        }
    }
}

/// Fully buffered response handed to after-response hooks.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"))
    }

    fn into_error(self) -> ApiError {
        let message = serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|body| {
                ["message", "error"]
                    .iter()
                    .find_map(|key| body.get(key).and_then(Value::as_str).map(str::to_string))
            })
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                let reason = self.status.canonical_reason().unwrap_or("Unknown error");
                format!("{}: {}", self.status.as_u16(), reason)
            });

        ApiError::http(self.status, message)
    }

    /// Success bodies become JSON; 204 and empty bodies become `{}`.
    fn into_value(self) -> Result<Value> {
        if !self.status.is_success() {
            return Err(self.into_error());
        }

        if self.status == StatusCode::NO_CONTENT || self.body.is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        match serde_json::from_slice::<Value>(&self.body) {
            Ok(value) => Ok(value),
            Err(_) if !self.is_json() => {
                Ok(Value::String(String::from_utf8_lossy(&self.body).into_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A request that failed, captured so an error hook can issue it again.
#[derive(Clone)]
pub struct RetryableRequest {
    client: ApiClient,
    method: Method,
    path: String,
    body: Option<Value>,
    options: RequestOptions,
}

impl fmt::Debug for RetryableRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

impl RetryableRequest {
    pub fn new(
        client: ApiClient,
        method: Method,
        path: impl Into<String>,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Self {
        Self {
            client,
            method,
            path: path.into(),
            body,
            options,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// `false` once this request is itself a retry.
    pub fn retry_allowed(&self) -> bool {
        self.options.retry
    }

    /// Issues the original request again with retries disabled.
    pub fn retry(&self) -> BoxFuture<'_, Result<Value>> {
        let options = self.options.clone().without_retry();
        self.client
            .request_value(self.method.clone(), &self.path, self.body.clone(), options)
    }
}

/// HTTP client for the MiniBiz REST API.
///
/// Cheap to clone; clones share the connection pool, token store and hooks.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<SessionConfig>,
    tokens: TokenStore,
    hooks: Arc<HookChain>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("tokens", &self.tokens)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: SessionConfig, tokens: TokenStore, hooks: HookChain) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self::with_http_client(http, config, tokens, hooks))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        config: SessionConfig,
        tokens: TokenStore,
        hooks: HookChain,
    ) -> Self {
        let tokens = tokens.configured(&config);
        Self {
            http,
            config: Arc::new(config),
            tokens,
            hooks: Arc::new(hooks),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Sends one request and returns the raw JSON value.
    ///
    /// On failure the error runs through the on-error hooks, which may
    /// recover it (for instance by refreshing the token and retrying).
    pub fn request_value<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match self.send(&method, path, body.as_ref(), &options).await {
                Ok(value) => Ok(value),
                Err(error) => {
                    debug!(method = %method, path, status = error.status(), "API request failed: {}", error);
                    let request = RetryableRequest::new(self.clone(), method, path, body, options);
                    self.hooks.run_error_chain(error, &request).await
                }
            }
        })
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request_value(method, path, body, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with(path, RequestOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.post_with(path, body, RequestOptions::default()).await
    }

    pub async fn post_with<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, Some(body), options).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        let config = self.build_config(method, path, body, options)?;
        let config = self.hooks.apply_before_request(config);
        let response = self.execute(config).await?;
        let response = self.hooks.apply_after_response(response);
        response.into_value()
    }

    fn build_config(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<RequestConfig> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));

        for (name, value) in &options.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidRequest {
                message: format!("header name {name:?}: {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| ApiError::InvalidRequest {
                message: format!("header value for {name}: {e}"),
            })?;
            headers.append(name, value);
        }

        if options.requires_auth {
            if let Some(token) = self.tokens.get() {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    ApiError::InvalidRequest {
                        message: "stored access token is not a valid header value".to_string(),
                    }
                })?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        if let Some(directive) = options.cache.cache_control() {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(directive));
        }

        Ok(RequestConfig {
            method: method.clone(),
            url: self.config.url_for(path),
            headers,
            body: body.filter(|_| *method != Method::GET).cloned(),
            cache: options.cache,
        })
    }

    async fn execute(&self, config: RequestConfig) -> Result<HttpResponse> {
        let mut builder = self
            .http
            .request(config.method.clone(), &config.url)
            .headers(config.headers);
        if let Some(body) = &config.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(method = %config.method, url = %config.url, "API request failed to send: {}", e);
            ApiError::from(e)
        })?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!(url = %url, "Failed to read response body: {}", e);
            ApiError::from(e)
        })?;

        Ok(HttpResponse {
            status,
            url,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_with_token(token: Option<&str>) -> ApiClient {
        let tokens = TokenStore::default();
        if let Some(token) = token {
            tokens.save(token, None);
        }
        ApiClient::new(
            SessionConfig::new("http://localhost:8080"),
            tokens,
            HookChain::new(),
        )
        .unwrap()
    }

    fn response(status: StatusCode, content_type: Option<&'static str>, body: &[u8]) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        HttpResponse {
            status,
            url: "http://localhost:8080/api/clients".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn default_headers_and_bearer_token() {
        let client = client_with_token(Some("abc"));
        let config = client
            .build_config(&Method::GET, "/api/clients", None, &RequestOptions::default())
            .unwrap();

        assert_eq!(config.url, "http://localhost:8080/api/clients");
        assert_eq!(config.headers[CONTENT_TYPE], "application/json");
        assert_eq!(config.headers[ACCEPT], "application/json");
        assert_eq!(config.headers[AUTHORIZATION], "Bearer abc");
        assert_eq!(config.headers[CACHE_CONTROL], "no-cache");
    }

    #[test]
    fn public_requests_skip_authorization() {
        let client = client_with_token(Some("abc"));
        let config = client
            .build_config(&Method::POST, "/api/auth/login", None, &RequestOptions::public())
            .unwrap();
        assert!(config.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn no_token_means_no_authorization() {
        let client = client_with_token(None);
        let config = client
            .build_config(&Method::GET, "/api/clients", None, &RequestOptions::default())
            .unwrap();
        assert!(config.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn custom_headers_and_cache_mode() {
        let client = client_with_token(None);
        let options = RequestOptions::default()
            .with_header("X-Tenant", "loja-1")
            .with_cache(CacheMode::Default);
        let config = client
            .build_config(&Method::GET, "/api/products", None, &options)
            .unwrap();
        assert_eq!(config.headers["x-tenant"], "loja-1");
        assert!(config.headers.get(CACHE_CONTROL).is_none());
    }

    #[test]
    fn invalid_custom_header_is_rejected() {
        let client = client_with_token(None);
        let options = RequestOptions::default().with_header("bad header", "x");
        let result = client.build_config(&Method::GET, "/api/products", None, &options);
        assert!(matches!(result, Err(ApiError::InvalidRequest { .. })));
    }

    #[test]
    fn body_is_dropped_for_get() {
        let client = client_with_token(None);
        let body = json!({"name": "Caneta"});
        let get = client
            .build_config(&Method::GET, "/api/products", Some(&body), &RequestOptions::default())
            .unwrap();
        let post = client
            .build_config(&Method::POST, "/api/products", Some(&body), &RequestOptions::default())
            .unwrap();
        assert_eq!(get.body, None);
        assert_eq!(post.body, Some(body));
    }

    #[test]
    fn error_message_comes_from_json_body() {
        let err = response(
            StatusCode::BAD_REQUEST,
            Some("application/json"),
            br#"{"message":"Email already registered"}"#,
        )
        .into_value()
        .unwrap_err();
        assert_eq!(err, ApiError::http(StatusCode::BAD_REQUEST, "Email already registered"));

        let err = response(StatusCode::FORBIDDEN, Some("application/json"), br#"{"error":"Forbidden"}"#)
            .into_value()
            .unwrap_err();
        assert_eq!(err.message(), "Forbidden");
    }

    #[test]
    fn error_message_falls_back_to_status_line() {
        let err = response(StatusCode::INTERNAL_SERVER_ERROR, Some("text/html"), b"<html>")
            .into_value()
            .unwrap_err();
        assert_eq!(err.message(), "500: Internal Server Error");
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn no_content_yields_empty_object() {
        let value = response(StatusCode::NO_CONTENT, None, b"").into_value().unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn plain_text_success_body_becomes_string() {
        let value = response(StatusCode::OK, Some("text/plain"), b"Password reset email sent")
            .into_value()
            .unwrap();
        assert_eq!(value, json!("Password reset email sent"));
    }

    #[test]
    fn malformed_json_success_body_is_a_decode_error() {
        let err = response(StatusCode::OK, Some("application/json"), b"{oops")
            .into_value()
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
