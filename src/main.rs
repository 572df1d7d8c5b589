mod access_control;
mod auth;
mod catalog;
mod config;
mod config_tests;
mod database;
mod handlers;
mod integrations;
mod models;
mod openapi;
mod plugin;
mod store;
mod utils;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppState, Config};
use crate::database::{create_pool, init_database};
use crate::integrations::toolkits::load_toolkit_metadata;
use crate::openapi::ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载配置
    let config = Config::from_file()?;

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 初始化数据库
    let pool = create_pool(&config.database.url).await?;
    init_database(&pool).await?;
    info!("Database initialized");

    let bind_address = config.bind_address();
    let state = AppState::new(pool, config)?;

    // 加载第三方工具包元数据
    match &state.broker {
        Some(broker) => {
            let metadata = load_toolkit_metadata(broker.as_ref(), &state.config.toolkits).await;
            *state.toolkit_tools.write().await = metadata;
        }
        None if !state.config.toolkits.is_empty() => {
            warn!("Toolkits are configured but no broker is set, authorization checks are skipped");
        }
        None => {}
    }

    let app = Router::new()
        .nest("/api/v1/tools", handlers::tools::router(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server running on http://{}", bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
