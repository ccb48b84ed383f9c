mod error;
mod routes;
mod state;

use std::env;

use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("satchel_api=info".parse().expect("valid directive")),
        )
        .init();

    let bind_addr =
        env::var("SATCHEL_API_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let auth_token = env::var("SATCHEL_API_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty());
    if auth_token.is_none() {
        tracing::warn!("SATCHEL_API_TOKEN not set; requests are unauthenticated");
    }

    let state = AppState::new(auth_token);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("satchel-api listening on {bind_addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
