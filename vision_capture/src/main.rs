use anyhow::Context;
use std::{process::ExitCode, sync::Arc};
use vision_capture::{
    camera::{HighGuiPreview, OpenCvCamera},
    capture::BoxError,
    client::OllamaClient,
    config::{self, Config},
    start_app, telemetry,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match config::get_configuration() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = telemetry::init_subscriber(telemetry::get_subscriber(&config));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = OllamaClient::new(&config.inference_server)
        .context("Failed to build inference server client")?;
    tracing::info!("Using inference server at {}", client.base_url());

    start_app(&config, Arc::new(client), |capture| {
        let camera = OpenCvCamera::open(capture.max_camera_index)?;
        let preview = HighGuiPreview::new(&capture.window_name)?;
        Ok::<_, BoxError>((camera, preview))
    })
    .await?;

    Ok(())
}
