mod auth;
mod config;
mod error;
mod imaging;
mod inference;
mod pipeline;
mod quota;
mod routes;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use auth::identity::{IdentityProvider, SupabaseIdentityProvider};
use auth::jwt::JwtService;
use config::{AppConfig, BackendsConfig};
use imaging::ImageAcquirer;
use inference::{BackendRegistry, Dispatcher};
use pipeline::InferencePipeline;
use quota::QuotaTracker;
use routes::configure_routes;
use std::env;
use std::sync::Arc;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let backends_config = BackendsConfig::load(&config.backends_config)
        .map_err(|e| startup_error("Failed to read backend configuration", e))?;
    let registry = BackendRegistry::from_config(&backends_config)
        .map_err(|e| startup_error("Failed to load models at startup", e))?;
    log::info!("Loaded backends: {:?}", registry.kinds());
    let dispatcher = Arc::new(
        Dispatcher::new(registry).map_err(|e| startup_error("Failed to start model workers", e))?,
    );

    let http_client = ImageAcquirer::http_client(config.fetch_timeout)
        .map_err(|e| startup_error("Failed to build HTTP client", e))?;

    // Create authentication services
    let jwt_service = JwtService::new(&config.jwt_secret, config.token_ttl_minutes);
    let identity: Arc<dyn IdentityProvider> = Arc::new(
        SupabaseIdentityProvider::new(
            http_client.clone(),
            &config.supabase_url,
            config.supabase_key.clone(),
        )
        .map_err(|e| startup_error("Invalid identity provider settings", e))?,
    );

    let quota = Arc::new(QuotaTracker::new(config.daily_limit));
    log::info!("Daily quota is {} requests per user", quota.daily_limit());

    let pipeline = web::Data::new(InferencePipeline::new(
        quota.clone(),
        ImageAcquirer::new(http_client, config.max_image_bytes),
        dispatcher,
    ));
    let quota = web::Data::from(quota);
    let jwt_service = web::Data::new(jwt_service);
    let identity = web::Data::from(identity);

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(quota.clone())
            .app_data(jwt_service.clone())
            .app_data(identity.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
