use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use umpire_replay::api;
use umpire_replay::capture::FfmpegCapture;
use umpire_replay::config::Config;
use umpire_replay::extractor::FfmpegExtractor;
use umpire_replay::s3_uploader::S3Uploader;
use umpire_replay::SessionController;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let layout = config.layout();
    tokio::fs::create_dir_all(&config.buffer_dir).await?;
    tokio::fs::create_dir_all(&config.clips_dir).await?;

    let uploader = S3Uploader::new(
        &config.s3_bucket,
        config.aws_region.as_deref(),
        config.s3_endpoint.as_deref(),
    )
    .await?;
    let capture = FfmpegCapture::new(
        layout.clone(),
        config.tools.clone(),
        Duration::from_secs(config.capture_grace_secs),
    );
    let extractor = FfmpegExtractor::new(
        layout,
        config.profile.clone(),
        config.tools.clone(),
        config.buffer_slack_secs,
    );

    let settings = config.controller_settings();
    info!(
        "Cameras: {}; rolling buffer holds {} clips",
        settings
            .cameras
            .iter()
            .map(|c| c.id.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        settings.buffer_capacity
    );

    let controller = Arc::new(SessionController::new(
        settings,
        Arc::new(capture),
        Arc::new(extractor),
        Arc::new(uploader),
    ));

    info!("Server running on http://{}:{}", config.host, config.port);
    api::run_api_server(controller, &config.host, config.port).await?;
    Ok(())
}
