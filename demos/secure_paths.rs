//! Serves a few pages behind the MiniBiz route guard.
//!
//! Set the `minibiz_auth_token` cookie to a token issued by the backend and
//! browse to `/dashboard`, `/relatorios` or `/admin`.

use axum::{Json, Router, routing::get};
use minibiz_session::prelude::*;
use serde::Serialize;

#[derive(Serialize)]
struct Page {
    title: &'static str,
    user: User,
}

async fn dashboard(session: SessionUser) -> Json<Page> {
    Json(Page {
        title: "Dashboard",
        user: session.user,
    })
}

async fn reports(session: SessionUser) -> Json<Page> {
    Json(Page {
        title: "Relatórios",
        user: session.user,
    })
}

async fn admin(session: SessionUser) -> Json<Page> {
    Json(Page {
        title: "Administração",
        user: session.user,
    })
}

async fn login(OptionalSessionUser(current): OptionalSessionUser) -> String {
    match current {
        Some(session) => format!("Already signed in as {}", session.user.email),
        None => "Sign in to continue".to_string(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("minibiz_session=debug")
        .init();

    let guard = RouteGuard::default()
        .with_rule(RouteRule::new("/relatorios/financeiro", ["ADMIN"]));

    let app = Router::new()
        .route("/login", get(login))
        .route("/acesso-negado", get(|| async { "Access denied" }))
        .route("/dashboard", get(dashboard))
        .route("/relatorios", get(reports))
        .route("/relatorios/financeiro", get(reports))
        .route("/admin", get(admin))
        .layer(axum::middleware::from_fn_with_state(
            GuardState::new(guard),
            route_guard,
        ));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    println!("Server running on http://localhost:3000");
    axum::serve(listener, app).await.unwrap();
}
