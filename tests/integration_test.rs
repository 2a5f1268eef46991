use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::get,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use minibiz_session::{error::NETWORK_ERROR_MESSAGE, prelude::*};
use serde_json::json;
use time::OffsetDateTime;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header as header_eq, method, path, query_param},
};

fn jwt(role: &str, expires_in: i64) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = Claims {
        sub: "12".to_string(),
        name: Some("Carla Souza".to_string()),
        email: Some("carla@minibiz.test".to_string()),
        role: Some(role.to_string()),
        iss: Some("minibiz-api".to_string()),
        iat: Some(now - 30),
        exp: now + expires_in,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"backend-secret")).unwrap()
}

fn empty_page() -> serde_json::Value {
    json!({"content": [], "totalElements": 0, "totalPages": 0, "size": 10, "number": 0})
}

fn session_for(server: &MockServer) -> Session {
    Session::new(SessionConfig::new(server.uri())).unwrap()
}

async fn mount_refresh(server: &MockServer, delay: Duration, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({"refreshToken": "R1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "T2", "refreshToken": "R2"}))
                .set_delay(delay),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_products(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(header_eq("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(header_eq("Authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_page()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_unauthorized_request_refreshes_and_retries() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::ZERO, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/clients"))
        .and(header_eq("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/clients"))
        .and(header_eq("Authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"id": 1, "name": "Padaria Central", "email": "contato@padaria.test"}],
            "totalElements": 1,
            "totalPages": 1,
            "size": 10,
            "number": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let mut events = session.subscribe();
    session.tokens().save("T1", Some("R1"));

    let page = session.clients().list(0, 10).await.unwrap();

    assert_eq!(page.content.len(), 1);
    assert_eq!(page.content[0].name, "Padaria Central");
    assert_eq!(session.tokens().get().as_deref(), Some("T2"));
    assert_eq!(session.tokens().get_refresh().as_deref(), Some("R2"));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Refreshed);
}

#[tokio::test]
async fn test_failed_refresh_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Refresh token expired"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let mut events = session.subscribe();
    session.tokens().save("T1", Some("R1"));

    let err = session.products().list(0, 10).await.unwrap_err();

    assert_eq!(err, ApiError::refresh_failed("Refresh token expired"));
    assert_eq!(err.status(), 401);
    assert!(!session.tokens().has_token());
    assert_eq!(session.tokens().get_refresh(), None);
    assert!(!session.is_authenticated());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Ended);
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::from_millis(200), 1).await;
    mount_products(&server).await;

    let session = session_for(&server);
    session.tokens().save("T1", Some("R1"));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.products().list(0, 10).await })
        })
        .collect();

    for handle in handles {
        let page = handle.await.unwrap().unwrap();
        assert!(page.content.is_empty());
    }
    assert_eq!(session.tokens().get().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_refresh_waiters_resolve_in_arrival_order() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::from_millis(100), 1).await;

    let session = session_for(&server);
    session.tokens().save("T1", Some("R1"));
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|index| {
            let session = session.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let token = session.refresh_token().await;
                order.lock().unwrap().push(index);
                token
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok("T2".to_string()));
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_failed_refresh_rejects_every_waiter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.tokens().save("T1", Some("R1"));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.refresh_token().await })
        })
        .collect();

    for handle in handles {
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("waiter must not hang")
            .unwrap();
        assert!(matches!(result, Err(ApiError::RefreshFailed { .. })));
    }
    assert!(!session.tokens().has_token());
}

#[tokio::test]
async fn test_dropped_refresh_releases_waiters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "T2"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.tokens().save("T1", Some("R1"));

    let initiator = {
        let session = session.clone();
        tokio::spawn(async move { session.refresh_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.refresh_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    initiator.abort();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must be released")
        .unwrap();
    assert_eq!(result, Err(ApiError::refresh_failed("Token refresh was abandoned")));
    assert_eq!(session.tokens().get().as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_check_and_refresh_renews_tokens_close_to_expiry() {
    let server = MockServer::start().await;
    mount_refresh(&server, Duration::ZERO, 1).await;

    let session = session_for(&server);
    session.tokens().save(&jwt("USER", 60), Some("R1"));

    assert_eq!(session.check_and_refresh().await, Ok(true));
    assert_eq!(session.tokens().get().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_login_stores_tokens_and_announces_user() {
    let server = MockServer::start().await;
    let access = jwt("ADMIN", 3600);
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "carla@minibiz.test", "password": "s3nha"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": access,
            "refreshToken": "R1",
            "user": {"id": 12, "name": "Carla Souza", "email": "carla@minibiz.test", "role": "ADMIN"}
        })))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let mut events = session.subscribe();

    let response = session.login("carla@minibiz.test", "s3nha").await.unwrap();

    assert_eq!(response.token, access);
    assert_eq!(session.tokens().get(), Some(access));
    assert_eq!(session.tokens().get_refresh().as_deref(), Some("R1"));
    assert!(session.is_authenticated());
    assert_eq!(session.current_user().unwrap().role.as_deref(), Some("ADMIN"));
    match events.recv().await.unwrap() {
        SessionEvent::LoggedIn(user) => assert_eq!(user.id, Some(12)),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_login_rejection_does_not_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Bad credentials"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T2"})))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.tokens().save("old", Some("R1"));

    let err = session.login("carla@minibiz.test", "wrong").await.unwrap_err();

    assert_eq!(err.status(), 401);
    assert_eq!(err.message(), "Bad credentials");
}

#[tokio::test]
async fn test_login_without_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Carla"})))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let err = session.login("carla@minibiz.test", "s3nha").await.unwrap_err();

    assert_eq!(err.message(), "Authentication failed");
    assert!(!session.tokens().has_token());
}

#[tokio::test]
async fn test_network_failure_is_reported_with_status_zero() {
    let session = Session::new(SessionConfig::new("http://127.0.0.1:1")).unwrap();

    let err = session.products().get(1).await.unwrap_err();

    assert!(err.is_network_error());
    assert_eq!(err.status(), 0);
    assert_eq!(err.message(), NETWORK_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_hooks_run_around_requests() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/products/4"))
        .and(header_eq("X-Tenant", "loja-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let responses = Arc::new(AtomicUsize::new(0));
    let counter = responses.clone();
    let session = Session::builder(SessionConfig::new(server.uri()))
        .hook(Hook::request_id())
        .hook(Hook::before_request(|mut config| {
            config
                .headers
                .insert("x-tenant", reqwest::header::HeaderValue::from_static("loja-1"));
            config
        }))
        .hook(Hook::after_response(move |response| {
            counter.fetch_add(1, Ordering::SeqCst);
            response
        }))
        .build()
        .unwrap();

    session.products().delete(4).await.unwrap();

    assert_eq!(responses.load(Ordering::SeqCst), 1);
    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_password_recovery_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/forgot-password"))
        .and(body_json(json!({"email": "carla@minibiz.test"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("Email sent"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/reset-password"))
        .and(query_param("token", "a+b/c"))
        .and(body_json(json!({"password": "nova-senha"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let session = session_for(&server);

    let forgot = session.forgot_password("carla@minibiz.test").await.unwrap();
    assert_eq!(forgot.message, "Email sent");

    let reset = session.reset_password("a+b/c", "nova-senha").await.unwrap();
    assert_eq!(reset.message, "Password reset successfully");
}

#[tokio::test]
async fn test_financial_report_uses_backend_field_names() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/vendas/relatorio-financeiro"))
        .and(body_json(json!({"dataInicio": "2024-01-01", "dataFim": "2024-01-31"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalVendas": 3,
            "valorTotal": 150.0,
            "ticketMedio": 50.0
        })))
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.tokens().save("T1", None);

    let report = session
        .sales()
        .financial_report(&SaleReportRequest {
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            client_id: None,
            client_name: None,
        })
        .await
        .unwrap();

    assert_eq!(report.sale_count, 3);
    assert_eq!(report.average_ticket, 50.0);
}

fn guarded_app() -> Router {
    async fn whoami(user: SessionUser) -> String {
        user.user.email
    }

    Router::new()
        .route("/dashboard", get(whoami))
        .route("/admin/users", get(whoami))
        .route("/api/public/me", get(whoami))
        .route("/login", get(|| async { "login" }))
        .layer(axum::middleware::from_fn_with_state(
            GuardState::default(),
            route_guard,
        ))
}

fn page_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("minibiz_auth_token={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

#[tokio::test]
async fn test_guard_redirects_anonymous_visitors_to_login() {
    let response = guarded_app()
        .oneshot(page_request("/dashboard?tab=vendas", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/login?callbackUrl=%2Fdashboard%3Ftab%3Dvendas"
    );
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
}

#[tokio::test]
async fn test_guard_flags_expired_tokens() {
    let expired = jwt("USER", -60);
    let response = guarded_app()
        .oneshot(page_request("/dashboard", Some(&expired)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/login?expired=true&callbackUrl=%2Fdashboard");
}

#[tokio::test]
async fn test_guard_enforces_roles() {
    let user = jwt("USER", 3600);
    let response = guarded_app()
        .oneshot(page_request("/admin/users", Some(&user)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/acesso-negado");

    let admin = jwt("ADMIN", 3600);
    let response = guarded_app()
        .oneshot(page_request("/admin/users", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_guard_passes_claims_to_handlers() {
    let token = jwt("MANAGER", 3600);
    let response = guarded_app()
        .oneshot(page_request("/dashboard", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"carla@minibiz.test");
}

#[tokio::test]
async fn test_guard_leaves_public_pages_open() {
    let response = guarded_app()
        .oneshot(page_request("/login", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::REFERRER_POLICY],
        "strict-origin-when-cross-origin"
    );
}

#[tokio::test]
async fn test_expired_cookie_on_public_route_is_not_a_session() {
    let expired = jwt("ADMIN", -3600);
    let response = guarded_app()
        .oneshot(page_request("/api/public/me", Some(&expired)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");

    let fresh = jwt("ADMIN", 3600);
    let response = guarded_app()
        .oneshot(page_request("/api/public/me", Some(&fresh)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
