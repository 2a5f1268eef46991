//! Logs in against a MiniBiz backend and lists the first page of clients.
//!
//! ```sh
//! MINIBIZ_API_URL=http://localhost:8080 \
//! MINIBIZ_EMAIL=admin@minibiz.test MINIBIZ_PASSWORD=secret \
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use minibiz_session::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("minibiz_session=debug")),
        )
        .init();

    let token_file = std::env::temp_dir().join("minibiz-session.json");
    let session = Session::builder(SessionConfig::from_env())
        .storage(Arc::new(FileStorage::new(token_file)))
        .hook(Hook::request_id())
        .hook(Hook::request_logger())
        .hook(Hook::response_logger())
        .build()?;

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(?event, "Session event");
        }
    });

    if !session.check_and_refresh().await? {
        let email = std::env::var("MINIBIZ_EMAIL").unwrap_or_else(|_| "admin@minibiz.test".to_string());
        let password = std::env::var("MINIBIZ_PASSWORD").unwrap_or_default();
        session.login(&email, &password).await?;
    }

    if let Some(user) = session.current_user() {
        println!("Logged in as {} ({})", user.name, user.role.unwrap_or_default());
    }

    let page = session.clients().list(0, 10).await?;
    println!("{} clients in total", page.total_elements);
    for client in page.content {
        println!("  #{} {} <{}>", client.id.unwrap_or_default(), client.name, client.email);
    }

    let products: ApiResponse<PageResponse<Product>> = session.products().list(0, 5).await.into();
    println!("{}", serde_json::to_string_pretty(&products).unwrap_or_default());

    Ok(())
}
