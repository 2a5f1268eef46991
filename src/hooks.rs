//! Extension points run around every request.
//!
//! Before-request and after-response hooks run in registration order and may
//! replace the value they are given. On-error hooks form a fallible chain: the
//! first hook to return `Ok` supplies the result, an `Err` is handed to the
//! next hook, and the last error reaches the caller.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{
    client::{HttpResponse, RequestConfig, RetryableRequest},
    error::{ApiError, Result},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BeforeRequestFn = Arc<dyn Fn(RequestConfig) -> RequestConfig + Send + Sync>;
pub type AfterResponseFn = Arc<dyn Fn(HttpResponse) -> HttpResponse + Send + Sync>;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Interceptor for failed requests.
///
/// Return `Ok` to recover (typically with the value of `request.retry()`),
/// or `Err` to pass the same or a new error to the next hook.
///
/// # Example Implementation
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use minibiz_session::{ApiError, ErrorHook, Result, RetryableRequest};
///
/// struct RetryOnUnavailable;
///
/// #[async_trait]
/// impl ErrorHook for RetryOnUnavailable {
///     async fn on_error(&self, error: ApiError, request: &RetryableRequest) -> Result<Value> {
///         if error.status() == 503 && request.retry_allowed() {
///             return request.retry().await;
///         }
///         Err(error)
///     }
/// }
/// ```
#[async_trait]
pub trait ErrorHook: Send + Sync {
    async fn on_error(&self, error: ApiError, request: &RetryableRequest) -> Result<Value>;
}

/// Adapts an async closure into an [`ErrorHook`].
pub struct FnErrorHook<F>(F);

#[async_trait]
impl<F, Fut> ErrorHook for FnErrorHook<F>
where
    F: Fn(ApiError, RetryableRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn on_error(&self, error: ApiError, request: &RetryableRequest) -> Result<Value> {
        (self.0)(error, request.clone()).await
    }
}

/// A single registration in the [`HookChain`].
#[derive(Clone)]
pub enum Hook {
    BeforeRequest(BeforeRequestFn),
    AfterResponse(AfterResponseFn),
    OnError(Arc<dyn ErrorHook>),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Hook::BeforeRequest(_) => "BeforeRequest",
            Hook::AfterResponse(_) => "AfterResponse",
            Hook::OnError(_) => "OnError",
        };
        f.write_str(kind)
    }
}

impl Hook {
    pub fn before_request<F>(hook: F) -> Self
    where
        F: Fn(RequestConfig) -> RequestConfig + Send + Sync + 'static,
    {
        Hook::BeforeRequest(Arc::new(hook))
    }

    pub fn after_response<F>(hook: F) -> Self
    where
        F: Fn(HttpResponse) -> HttpResponse + Send + Sync + 'static,
    {
        Hook::AfterResponse(Arc::new(hook))
    }

    pub fn on_error(hook: impl ErrorHook + 'static) -> Self {
        Hook::OnError(Arc::new(hook))
    }

    pub fn on_error_fn<F, Fut>(hook: F) -> Self
    where
        F: Fn(ApiError, RetryableRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Hook::OnError(Arc::new(FnErrorHook(hook)))
    }

    /// Logs every outgoing request at debug level.
    pub fn request_logger() -> Self {
        Hook::before_request(|config| {
            debug!(method = %config.method, url = %config.url, "API request");
            config
        })
    }

    /// Logs every response at debug level.
    pub fn response_logger() -> Self {
        Hook::after_response(|response| {
            debug!(
                url = %response.url,
                status = response.status.as_u16(),
                status_text = response.status_text(),
                "API response"
            );
            response
        })
    }

    /// Tags each request with a fresh `X-Request-Id`, keeping one set by the caller.
    pub fn request_id() -> Self {
        Hook::before_request(|mut config| {
            let name = HeaderName::from_static(REQUEST_ID_HEADER);
            if !config.headers.contains_key(&name) {
                if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                    config.headers.insert(name, value);
                }
            }
            config
        })
    }
}

#[derive(Clone, Default)]
pub struct HookChain {
    before_request: Vec<BeforeRequestFn>,
    after_response: Vec<AfterResponseFn>,
    on_error: Vec<Arc<dyn ErrorHook>>,
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("before_request", &self.before_request.len())
            .field("after_response", &self.after_response.len())
            .field("on_error", &self.on_error.len())
            .finish()
    }
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Hook) -> &mut Self {
        match hook {
            Hook::BeforeRequest(hook) => self.before_request.push(hook),
            Hook::AfterResponse(hook) => self.after_response.push(hook),
            Hook::OnError(hook) => self.on_error.push(hook),
        }
        self
    }

    pub fn with(mut self, hook: Hook) -> Self {
        self.register(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty() && self.after_response.is_empty() && self.on_error.is_empty()
    }

    pub fn apply_before_request(&self, config: RequestConfig) -> RequestConfig {
        self.before_request
            .iter()
            .fold(config, |config, hook| hook(config))
    }

    pub fn apply_after_response(&self, response: HttpResponse) -> HttpResponse {
        self.after_response
            .iter()
            .fold(response, |response, hook| hook(response))
    }

    pub async fn run_error_chain(&self, error: ApiError, request: &RetryableRequest) -> Result<Value> {
        let mut error = error;
        for hook in &self.on_error {
            match hook.on_error(error, request).await {
                Ok(value) => return Ok(value),
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}
