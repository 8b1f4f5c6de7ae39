use crate::capture::{
    run_capture_loop, BoxError, CaptureError, CaptureStore, CaptureSummary, FrameSource, Preview,
    StoreError,
};
use crate::client::InferenceServer;
use crate::config::{CaptureConfig, Config};
use crate::pipeline::InferencePipeline;
use crate::provisioner::{ensure_model_ready, ProvisionError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("Failed to open capture devices: {0}")]
    Devices(#[source] BoxError),
    #[error("Failed to prepare photos directory: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Provisions the model, then runs the capture loop on devices produced by
/// `open_devices`. Devices are only opened once the model is known to be
/// available, so a missing server never touches the camera.
pub async fn start_app<S, F, P, O>(
    config: &Config,
    server: Arc<S>,
    open_devices: O,
) -> Result<CaptureSummary, AppError>
where
    S: InferenceServer + ?Sized,
    F: FrameSource,
    P: Preview,
    O: FnOnce(&CaptureConfig) -> Result<(F, P), BoxError>,
{
    ensure_model_ready(server.as_ref(), &config.model.name).await?;

    let (mut source, mut preview) = open_devices(&config.capture).map_err(AppError::Devices)?;
    let store = CaptureStore::new(&config.capture.photos_dir)?;
    let pipeline = InferencePipeline::new(server, &config.model.name);

    tracing::info!("System Online. Press [SPACE] to analyze, [Q] to quit.");

    let summary = run_capture_loop(
        &mut source,
        &mut preview,
        &pipeline,
        &store,
        &config.capture.prompt,
    )
    .await?;

    tracing::info!(
        "Capture loop finished after {} frames and {} analyses",
        summary.frames,
        summary.analyses
    );
    Ok(summary)
}
