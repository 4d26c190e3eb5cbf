mod config;
mod error;
mod inference;
mod routes;
mod upload;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use inference::detector::RegionDetector;
use inference::severity::SeverityClassifier;
use routes::configure_routes;
use std::env;
use std::fs;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::from_env();
    fs::create_dir_all(&config.upload_dir)?;

    let detector = RegionDetector::load(
        &config.detector_model_path(),
        &config.detector_labels_path(),
    )
    .map_err(|e| {
        log::error!("Failed to load detection model at startup: {e}");
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Detection model loading failed: {e}"),
        )
    })?;

    let classifier = SeverityClassifier::load(
        &config.backbone_model_path(),
        &config.forest_model_path(),
    )
    .map_err(|e| {
        log::error!("Failed to load severity models at startup: {e}");
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Severity model loading failed: {e}"),
        )
    })?;

    log::info!(
        "Loaded detection and severity models from {}",
        config.model_dir.display()
    );

    let detector = web::Data::new(detector);
    let classifier = web::Data::new(classifier);
    let config = web::Data::new(config);

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    let config_data = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(detector.clone())
            .app_data(classifier.clone())
            .app_data(config_data.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
