use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use facemood::config::Settings;
use facemood::detector::EmotionDetector;
use facemood::server::routes;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve emotion detection over HTTP
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML config file (default: ./facemood.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the config
    #[arg(short, long)]
    port: Option<u16>,

    /// TorchScript emotion model, overriding the config
    #[arg(short, long)]
    model: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(model) = args.model {
        settings.analysis.emotion_model = model;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    // Loaded once; every request shares this handle
    let detector = web::Data::new(
        EmotionDetector::from_settings(&settings.analysis).context("failed to load models")?,
    );

    let server_settings = settings.server.clone();
    let bind = (server_settings.host.clone(), server_settings.port);
    info!(
        "listening on {}:{} (route prefix {:?})",
        bind.0, bind.1, server_settings.route_prefix
    );

    // Start the HTTP server
    let mut server = HttpServer::new(move || {
        let settings = server_settings.clone();
        App::new()
            .app_data(detector.clone())
            .app_data(web::Data::new(settings.clone()))
            .wrap(middleware::Logger::default())
            .configure(|cfg| routes::configure(cfg, &settings))
    });
    if let Some(workers) = settings.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind)?.run().await?;
    Ok(())
}
