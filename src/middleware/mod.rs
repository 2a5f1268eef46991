mod auth;

pub use auth::{GuardState, get_cookie, route_guard};
