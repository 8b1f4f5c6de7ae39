use crate::client::{ClientError, InferenceServer, ProgressEvent};
use futures::StreamExt;
use thiserror::Error;
use tracing::instrument;

/// Download progress is only reported at these percentage steps.
const PROGRESS_STEP: u64 = 20;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to communicate with the inference server: {0}")]
    Unreachable(#[source] ClientError),
    #[error("Inference server returned an invalid model listing: {0}")]
    InvalidResponse(#[source] ClientError),
    #[error("Model pull failed: {0}")]
    PullFailed(#[source] ClientError),
}

impl ProvisionError {
    fn from_listing(err: ClientError) -> Self {
        match err {
            ClientError::Decode(_) => ProvisionError::InvalidResponse(err),
            other => ProvisionError::Unreachable(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Pulled { progress_lines: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLine {
    Percent(u64),
    Status(String),
}

/// Rate limits pull progress: a byte-count event is reported only when its
/// truncated percentage lands on a multiple of [`PROGRESS_STEP`] and differs
/// from the last reported one. Status-only events are passed through.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    last_bucket: Option<u64>,
}

impl ProgressReporter {
    pub fn observe(&mut self, event: &ProgressEvent) -> Option<ProgressLine> {
        if let Some(total) = event.total.filter(|&total| total > 0) {
            let completed = event.completed.unwrap_or(0).min(total);
            let percent = (u128::from(completed) * 100 / u128::from(total)) as u64;

            if percent % PROGRESS_STEP != 0 || self.last_bucket == Some(percent) {
                return None;
            }
            self.last_bucket = Some(percent);
            return Some(ProgressLine::Percent(percent));
        }

        if event.status.is_empty() {
            None
        } else {
            Some(ProgressLine::Status(event.status.clone()))
        }
    }
}

/// Makes sure `model_name` can be served, pulling it when the server does not
/// list it yet. Listed identifiers match on substring, so `moondream` is
/// satisfied by `moondream:latest`.
#[instrument(skip(server))]
pub async fn ensure_model_ready<S>(server: &S, model_name: &str) -> Result<Provisioned, ProvisionError>
where
    S: InferenceServer + ?Sized,
{
    tracing::info!("Verifying model '{}'...", model_name);
    let models = server
        .list_models()
        .await
        .map_err(ProvisionError::from_listing)?;

    if models.iter().any(|m| m.contains(model_name)) {
        tracing::info!("Model '{}' is ready.", model_name);
        return Ok(Provisioned::AlreadyPresent);
    }

    tracing::info!(
        "Model '{}' not found. Starting pull (this may take a minute)...",
        model_name
    );
    let mut events = server
        .pull_model(model_name)
        .await
        .map_err(ProvisionError::PullFailed)?;

    let mut reporter = ProgressReporter::default();
    let mut progress_lines = 0;
    while let Some(event) = events.next().await {
        let event = event.map_err(ProvisionError::PullFailed)?;
        match reporter.observe(&event) {
            Some(ProgressLine::Percent(percent)) => {
                tracing::info!("Downloading {}: {}%", model_name, percent);
            }
            Some(ProgressLine::Status(status)) => {
                tracing::info!("Ollama status: {}", status);
            }
            None => continue,
        }
        progress_lines += 1;
    }

    tracing::info!("Model download complete.");
    Ok(Provisioned::Pulled { progress_lines })
}
