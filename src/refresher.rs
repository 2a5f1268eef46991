use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::{
    client::{ApiClient, RequestOptions, RetryableRequest},
    config::AuthRoutes,
    error::{ApiError, Result},
    hooks::ErrorHook,
    models::{RefreshRequest, RefreshResponse},
    session::SessionEvent,
    storage::TokenStore,
};

type Waiter = oneshot::Sender<Result<String>>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

/// Single-flight token refresh.
///
/// At most one call to the refresh endpoint is in flight. Callers arriving
/// while it runs are queued and settled, in arrival order, with the outcome
/// of that one call.
pub struct RefreshCoordinator {
    tokens: TokenStore,
    refresh_path: String,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
}

impl RefreshCoordinator {
    pub fn new(
        tokens: TokenStore,
        refresh_path: impl Into<String>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            tokens,
            refresh_path: refresh_path.into(),
            state: Mutex::new(RefreshState::default()),
            events,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Exchanges the stored refresh token for a new access token.
    ///
    /// On failure the stored tokens are cleared and every queued caller
    /// receives [`ApiError::RefreshFailed`]. Without a refresh token nothing
    /// is sent and nothing is cleared.
    pub async fn refresh(&self, client: &ApiClient) -> Result<String> {
        let Some(refresh_token) = self.tokens.get_refresh() else {
            return Err(ApiError::refresh_failed("No refresh token available"));
        };

        let waiter = {
            let mut state = self.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("Token refresh already in flight, queued");
            return rx
                .await
                .unwrap_or_else(|_| Err(ApiError::refresh_failed("Token refresh was abandoned")));
        }

        let in_flight = InFlight {
            coordinator: self,
            settled: false,
        };

        let response = client
            .post_with::<RefreshResponse, _>(
                &self.refresh_path,
                &RefreshRequest { refresh_token },
                RequestOptions::public(),
            )
            .await;

        in_flight.settle(response)
    }

    /// Clears the tokens and tells subscribers the session is over.
    pub fn end_session(&self) {
        self.tokens.clear();
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::Ended);
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_waiters(&self) -> VecDeque<Waiter> {
        let mut state = self.lock();
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    }
}

/// Resets the coordinator even if the initiating future is dropped mid-call.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, response: Result<RefreshResponse>) -> Result<String> {
        self.settled = true;
        let coordinator = self.coordinator;

        let response = response.and_then(|response| {
            if response.token.is_empty() {
                Err(ApiError::refresh_failed("Refresh response did not contain a token"))
            } else {
                Ok(response)
            }
        });

        match response {
            Ok(response) => {
                coordinator
                    .tokens
                    .save(&response.token, response.refresh_token.as_deref());

                let waiters = coordinator.take_waiters();
                info!(waiters = waiters.len(), "Access token refreshed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(response.token.clone()));
                }
                let _ = coordinator.events.send(SessionEvent::Refreshed);

                Ok(response.token)
            }
            Err(error) => {
                warn!("Token refresh failed: {}", error);
                coordinator.tokens.clear();

                let failure = match error {
                    ApiError::RefreshFailed { .. } => error,
                    other => ApiError::refresh_failed(other.message()),
                };
                for waiter in coordinator.take_waiters() {
                    let _ = waiter.send(Err(failure.clone()));
                }

                Err(failure)
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let waiters = self.coordinator.take_waiters();
        warn!(waiters = waiters.len(), "Token refresh dropped before completion");
        for waiter in waiters {
            let _ = waiter.send(Err(ApiError::refresh_failed("Token refresh was abandoned")));
        }
    }
}

/// On-error hook that answers a 401 by refreshing the token and retrying
/// the request once.
///
/// Auth endpoints and requests that are already retries are left alone.
pub struct TokenRefreshHook {
    coordinator: Arc<RefreshCoordinator>,
    routes: AuthRoutes,
}

impl TokenRefreshHook {
    pub fn new(coordinator: Arc<RefreshCoordinator>, routes: AuthRoutes) -> Self {
        Self {
            coordinator,
            routes,
        }
    }
}

#[async_trait]
impl ErrorHook for TokenRefreshHook {
    async fn on_error(&self, error: ApiError, request: &RetryableRequest) -> Result<Value> {
        if !error.is_unauthorized()
            || !request.retry_allowed()
            || self.routes.is_auth_endpoint(request.path())
        {
            return Err(error);
        }

        debug!(path = request.path(), "Access token rejected, refreshing");
        match self.coordinator.refresh(request.client()).await {
            Ok(_) => request.retry().await,
            Err(failure) => {
                self.coordinator.end_session();
                Err(failure)
            }
        }
    }
}
