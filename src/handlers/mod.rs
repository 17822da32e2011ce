pub mod decode;
pub mod encode;

use crate::error::AppError;
use crate::{health, websocket};
use actix_web::web;

/// Register every route of the service. Shared by `main` and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::Input(format!("invalid JSON body: {}", err)).into()
    }))
    .route("/health", web::get().to(health::health_check))
    .route("/metrics", web::get().to(health::detailed_metrics))
    .route("/encode", web::post().to(encode::encode))
    .route("/decode", web::post().to(decode::decode))
    .route("/decode-webm", web::post().to(decode::decode_webm))
    .route("/ws/cli", web::get().to(websocket::cli_websocket));
}
