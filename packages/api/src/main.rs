use std::env::set_var;
use std::sync::Arc;

use api::{app, state::AppState};
use lambda_http::{run, Error};
use shared::config::{Config, StoreBackend};
use shared::repositories::{
    dynamodb_store::DynamoDbStore, memory_store::InMemoryStore, store::Store,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(false)
        .without_time()
        .init();

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::from_config(&config)),
        StoreBackend::DynamoDb => Arc::new(DynamoDbStore::connect(&config).await),
    };
    info!("Using {:?} store", config.store_backend);

    // ToDo: Tighten this up
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = app(AppState::new(store, &config)).layer(cors);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        set_var("AWS_LAMBDA_HTTP_IGNORE_STAGE_IN_PATH", "true");
        return run(router).await;
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
