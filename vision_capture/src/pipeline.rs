use crate::client::{ChatRequest, ClientError, InferenceServer};
use crate::frame::{encode_jpeg, Frame, FrameError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use std::{
    io::{self, Write},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tracing::instrument;

pub const DEFAULT_PROMPT: &str = "Describe this image in one short sentence.";
pub const NO_CONTENT: &str = "No content found";
pub const ANALYSIS_FAILED: &str = "Failed to analyze image.";

/// Side of the square every frame is stretched to before encoding. Vision
/// models of this size work on far smaller inputs than a camera delivers and
/// CPU latency grows with the payload, so the resize is never skipped.
pub const MODEL_INPUT_SIZE: u32 = 512;
const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Frame preparation failed: {0}")]
    Frame(#[from] FrameError),
    #[error("Inference request failed: {0}")]
    Request(#[from] ClientError),
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    message: ResponseMessage,
    done: bool,
}

#[derive(Deserialize)]
struct ResponseMessage {
    role: String,
    content: String,
}

/// Pulls the answer text out of a chat response.
///
/// Servers have answered with slightly different documents over time, so the
/// full typed shape is tried first and a plain `message.content` lookup is
/// the fallback.
pub fn extract_content(response: &Value) -> Option<String> {
    if let Ok(parsed) = ChatResponse::deserialize(response) {
        tracing::debug!(
            model = %parsed.model,
            role = %parsed.message.role,
            done = parsed.done,
            "Structured chat response"
        );
        return Some(parsed.message.content);
    }

    response
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Downscales, JPEG encodes and base64 encodes `frame` for transport.
pub fn encode_frame(frame: &Frame) -> Result<String, FrameError> {
    let small = frame.resize_exact(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE)?;
    let jpg = encode_jpeg(&small, JPEG_QUALITY)?;
    Ok(STANDARD.encode(jpg))
}

/// Writes a labelled result to `out` and flushes straight away so it shows up
/// even when the output is redirected.
pub fn write_result<W: Write + ?Sized>(out: &mut W, label: &str, text: &str) -> io::Result<()> {
    writeln!(out, "\n{}: {}\n", label, text)?;
    out.flush()
}

pub fn echo_result(label: &str, text: &str) {
    let _ = write_result(&mut std::io::stdout().lock(), label, text);
}

pub struct InferencePipeline<S: InferenceServer + ?Sized> {
    server: Arc<S>,
    model: String,
}

impl<S: InferenceServer + ?Sized> InferencePipeline<S> {
    pub fn new(server: Arc<S>, model: &str) -> Self {
        Self {
            server,
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Describes `frame`. Never fails: any error is logged and replaced by
    /// [`ANALYSIS_FAILED`] so a bad request cannot take the capture loop down.
    #[instrument(skip(self, frame, prompt), fields(model = %self.model))]
    pub async fn analyze(&self, frame: &Frame, prompt: &str) -> String {
        let start = Instant::now();

        match self.describe(frame, prompt).await {
            Ok(content) => {
                tracing::info!("DONE! Analysis took {:.2}s", start.elapsed().as_secs_f64());
                echo_result("AI SAYS", &content);
                content
            }
            Err(e) => {
                tracing::error!(
                    "Inference error after {:.2}s: {}",
                    start.elapsed().as_secs_f64(),
                    e
                );
                ANALYSIS_FAILED.to_string()
            }
        }
    }

    async fn describe(&self, frame: &Frame, prompt: &str) -> Result<String, PipelineError> {
        let image = encode_frame(frame)?;
        tracing::info!("AI is thinking... (CPU-only servers can take ~30s for vision tasks)");

        let request = ChatRequest::user_message(&self.model, prompt, vec![image]);
        let response = self.server.chat(&request).await?;

        Ok(extract_content(&response).unwrap_or_else(|| NO_CONTENT.to_string()))
    }
}
