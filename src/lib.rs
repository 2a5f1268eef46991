pub mod client;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guard;
pub mod hooks;
pub mod middleware;
pub mod models;
pub mod refresher;
pub mod resources;
pub mod session;
pub mod storage;
pub mod token;

pub use client::{ApiClient, CacheMode, HttpResponse, RequestConfig, RequestOptions, RetryableRequest};
pub use config::{AuthRoutes, SessionConfig};
pub use error::{ApiError, ErrorResponse, Result};
pub use extractors::{OptionalSessionUser, SessionUser};
pub use guard::{Decision, RouteGuard, RouteRule};
pub use hooks::{ErrorHook, Hook, HookChain};
pub use middleware::{GuardState, route_guard};
pub use models::{ApiResponse, AuthResponse, Empty, PageResponse, User};
pub use refresher::{RefreshCoordinator, TokenRefreshHook};
pub use resources::{Resource, Sales};
pub use session::{Session, SessionBuilder, SessionEvent};
pub use storage::{FileStorage, MemoryStorage, TokenStorage, TokenStore};
pub use token::Claims;

pub mod prelude {
    pub use crate::{
        client::{ApiClient, CacheMode, RequestOptions, RetryableRequest},
        config::SessionConfig,
        error::{ApiError, Result},
        extractors::{OptionalSessionUser, SessionUser},
        guard::{Decision, RouteGuard, RouteRule},
        hooks::{ErrorHook, Hook, HookChain},
        middleware::{GuardState, route_guard},
        models::*,
        session::{Session, SessionEvent},
        storage::{FileStorage, MemoryStorage, TokenStorage, TokenStore},
        token::Claims,
    };
}
