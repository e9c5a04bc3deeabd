//! # stt-bridge
//!
//! A WebSocket speech-to-text service: clients hold a persistent connection,
//! send one binary WAV clip per message, and receive one text message back
//! per clip, either the transcription or the empty string when the clip
//! could not be decoded.
//!
//! Startup order matters here: configuration and logging come up first, then
//! the acoustic model is loaded synchronously, and only once a warmup decode
//! has succeeded does the listener bind. A process that accepts connections
//! can always transcribe.

mod audio;
mod config;
mod device;
mod error;
mod health;
mod middleware;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{Transcriber, TranscriberConfig};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("starting stt-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Model load is deliberately blocking at startup: there is no partial
    // availability, the process either transcribes or exits.
    let device = device::select(config.model.device.parse().map_err(anyhow::Error::msg)?);
    let transcriber_config = TranscriberConfig {
        model: config.model.name.parse()?,
        language: Some(config.model.language.clone()).filter(|l| !l.is_empty()),
        max_clip_seconds: config.limits.max_clip_seconds,
    };
    let transcriber = Arc::new(Transcriber::load(transcriber_config, device).await?);

    let app_state = AppState::new(config.clone(), transcriber);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("listening on {}", bind_addr);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            .route("/ws/stt", web::get().to(websocket::stt_websocket))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::service_metrics))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    info!("server stopped");
    Ok(())
}

/// Console logging via tracing; `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stt_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
