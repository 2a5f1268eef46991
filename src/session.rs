use std::{fmt, sync::Arc};

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    client::{ApiClient, RequestOptions},
    config::SessionConfig,
    error::{ApiError, Result},
    hooks::{Hook, HookChain},
    models::{
        AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
        ResetPasswordRequest, User,
    },
    refresher::{RefreshCoordinator, TokenRefreshHook},
    resources::{CLIENTS_PATH, Clients, PRODUCTS_PATH, Products, Sales},
    storage::{TokenStorage, TokenStore},
    token,
};

const EVENT_CAPACITY: usize = 16;

/// Session lifecycle notifications.
///
/// `Ended` is sent whenever the tokens are dropped, either by `logout` or
/// because a refresh failed. Front-ends react to it by going back to the
/// login screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(User),
    Refreshed,
    Ended,
}

pub struct SessionBuilder {
    config: SessionConfig,
    tokens: TokenStore,
    http: Option<reqwest::Client>,
    hooks: Vec<Hook>,
}

impl SessionBuilder {
    fn new(config: SessionConfig) -> Self {
        Self {
            config,
            tokens: TokenStore::default(),
            http: None,
            hooks: Vec::new(),
        }
    }

    pub fn storage(mut self, backend: Arc<dyn TokenStorage>) -> Self {
        self.tokens = TokenStore::new(backend);
        self
    }

    /// Runs without persistent storage; tokens are never kept.
    pub fn detached(mut self) -> Self {
        self.tokens = TokenStore::detached();
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Registers a hook after the built-in token refresh hook.
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<Session> {
        let tokens = self.tokens.configured(&self.config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let coordinator = Arc::new(RefreshCoordinator::new(
            tokens.clone(),
            self.config.auth_routes.refresh.clone(),
            events.clone(),
        ));

        let mut hooks = HookChain::new().with(Hook::on_error(TokenRefreshHook::new(
            coordinator.clone(),
            self.config.auth_routes.clone(),
        )));
        for hook in self.hooks {
            hooks.register(hook);
        }

        let client = match self.http {
            Some(http) => ApiClient::with_http_client(http, self.config, tokens, hooks),
            None => ApiClient::new(self.config, tokens, hooks)?,
        };

        Ok(Session {
            client,
            coordinator,
            events,
        })
    }
}

/// Authenticated access to the MiniBiz backend.
///
/// Build one per application and share it; clones are cheap and see the same
/// tokens, hooks and refresh state.
#[derive(Clone)]
pub struct Session {
    client: ApiClient,
    coordinator: Arc<RefreshCoordinator>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("refreshing", &self.coordinator.is_refreshing())
            .finish()
    }
}

impl Session {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn tokens(&self) -> &TokenStore {
        self.client.tokens()
    }

    pub fn config(&self) -> &SessionConfig {
        self.client.config()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .client
            .post_with(&self.config().auth_routes.login, &request, RequestOptions::public())
            .await?;

        if response.token.is_empty() {
            return Err(ApiError::http(
                reqwest::StatusCode::UNAUTHORIZED,
                "Authentication failed",
            ));
        }

        self.start(&response);
        Ok(response)
    }

    /// Registers a new account.
    ///
    /// Backends that log the user in straight away return a token, which is
    /// stored; otherwise the response only carries a message.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse> {
        let mut response: AuthResponse = self
            .client
            .post_with(&self.config().auth_routes.register, request, RequestOptions::public())
            .await?;

        if response.token.is_empty() {
            response
                .message
                .get_or_insert_with(|| "Registration successful".to_string());
        } else {
            self.start(&response);
        }

        Ok(response)
    }

    pub fn logout(&self) {
        info!("Logging out");
        self.coordinator.end_session();
    }

    /// Forces a refresh, sharing any refresh already in flight.
    pub async fn refresh_token(&self) -> Result<String> {
        self.coordinator.refresh(&self.client).await
    }

    /// Renews the access token when it is about to expire.
    ///
    /// Returns `false` when there is no usable session.
    pub async fn check_and_refresh(&self) -> Result<bool> {
        let Some(access_token) = self.tokens().get() else {
            return Ok(false);
        };
        let Some(remaining) = token::expires_in(&access_token, OffsetDateTime::now_utc()) else {
            return Ok(false);
        };

        if remaining >= self.config().refresh_threshold {
            return Ok(true);
        }

        debug!(seconds_left = remaining.whole_seconds(), "Access token close to expiry");
        match self.refresh_token().await {
            Ok(_) => Ok(true),
            Err(ApiError::RefreshFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `true` when a token is stored and has not expired.
    pub fn is_authenticated(&self) -> bool {
        self.tokens()
            .get()
            .is_some_and(|access_token| !token::is_expired(&access_token))
    }

    /// The user the stored token was issued to.
    pub fn current_user(&self) -> Option<User> {
        let access_token = self.tokens().get()?;
        token::decode_claims(&access_token).map(|claims| claims.user())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse> {
        let request = ForgotPasswordRequest {
            email: email.to_string(),
        };
        let body = serde_json::to_value(&request)?;
        let value = self
            .client
            .request_value(
                reqwest::Method::POST,
                &self.config().auth_routes.forgot_password,
                Some(body),
                RequestOptions::public(),
            )
            .await?;

        Ok(message_from(value, "Password recovery email sent"))
    }

    pub async fn reset_password(&self, reset_token: &str, password: &str) -> Result<MessageResponse> {
        let encoded: String = url::form_urlencoded::byte_serialize(reset_token.as_bytes()).collect();
        let path = format!("{}?token={encoded}", self.config().auth_routes.reset_password);
        let body = serde_json::to_value(ResetPasswordRequest {
            password: password.to_string(),
        })?;

        let value = self
            .client
            .request_value(reqwest::Method::POST, &path, Some(body), RequestOptions::public())
            .await?;

        Ok(message_from(value, "Password reset successfully"))
    }

    pub fn clients(&self) -> Clients {
        Clients::new(self.client.clone(), CLIENTS_PATH)
    }

    pub fn products(&self) -> Products {
        Products::new(self.client.clone(), PRODUCTS_PATH)
    }

    pub fn sales(&self) -> Sales {
        Sales::new(self.client.clone())
    }

    fn start(&self, response: &AuthResponse) {
        self.tokens()
            .save(&response.token, response.refresh_token.as_deref());

        let user = response
            .user
            .clone()
            .or_else(|| token::decode_claims(&response.token).map(|claims| claims.user()))
            .unwrap_or_else(|| User {
                id: None,
                name: response.name.clone().unwrap_or_default(),
                email: String::new(),
                role: None,
            });

        info!(email = %user.email, "Session started");
        let _ = self.events.send(SessionEvent::LoggedIn(user));
    }
}

/// Plain-text and `{message}` bodies both become a [`MessageResponse`].
fn message_from(value: Value, fallback: &str) -> MessageResponse {
    let message = match value {
        Value::String(text) if !text.is_empty() => text,
        Value::Object(body) => body
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string()),
        _ => fallback.to_string(),
    };

    MessageResponse { message }
}
