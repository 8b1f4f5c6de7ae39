use crate::config::InferenceServerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream::BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to read response stream: {0}")]
    Stream(#[from] LinesCodecError),
    #[error("Server reported an error: {0}")]
    Server(String),
}

/// One line of a pull stream. Byte counts only appear while a layer is
/// being transferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// A non-streaming request made of one user message carrying `images`.
    pub fn user_message(model: &str, prompt: &str, images: Vec<String>) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
                images,
            }],
            stream: false,
        }
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub type ProgressStream = BoxStream<'static, Result<ProgressEvent, ClientError>>;

#[async_trait]
pub trait InferenceServer: Send + Sync + 'static {
    /// Identifiers of every model the server can serve right now.
    async fn list_models(&self) -> Result<Vec<String>, ClientError>;

    async fn pull_model(&self, name: &str) -> Result<ProgressStream, ClientError>;

    /// Sends a chat request and returns the raw response document.
    async fn chat(&self, request: &ChatRequest) -> Result<Value, ClientError>;
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(config: &InferenceServerConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.get_request_timeout() {
            builder = builder.timeout(timeout);
        }
        let base_url = config.get_address();
        tracing::debug!("Inference server client configured for {}", base_url);

        Ok(Self {
            client: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ClientError::Status { status, message })
}

#[async_trait]
impl InferenceServer for OllamaClient {
    #[instrument(skip(self))]
    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let body = check_status(response).await?.bytes().await?;
        let tags: TagsResponse = serde_json::from_slice(&body)?;

        Ok(tags
            .models
            .into_iter()
            .filter_map(|entry| entry.model.or(entry.name))
            .collect())
    }

    #[instrument(skip(self))]
    async fn pull_model(&self, name: &str) -> Result<ProgressStream, ClientError> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "model": name, "stream": true }))
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(ndjson_events(response.bytes_stream().map_err(io::Error::other)))
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn chat(&self, request: &ChatRequest) -> Result<Value, ClientError> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;

        Ok(serde_json::from_slice(&body)?)
    }
}

fn parse_progress_line(line: &[u8]) -> Result<ProgressEvent, ClientError> {
    if let Ok(ErrorBody { error }) = serde_json::from_slice::<ErrorBody>(line) {
        return Err(ClientError::Server(error));
    }
    Ok(serde_json::from_slice(line)?)
}

/// Splits a chunked body into newline-delimited JSON progress events. Lines
/// may straddle chunk boundaries and the last line may lack its newline; the
/// stream ends after the first read error.
fn ndjson_events<S>(body: S) -> ProgressStream
where
    S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
{
    FramedRead::new(StreamReader::new(body), LinesCodec::new())
        .filter(|line| future::ready(!matches!(line, Ok(l) if l.trim().is_empty())))
        .map(|line| match line {
            Ok(line) => parse_progress_line(line.as_bytes()),
            Err(e) => Err(ClientError::Stream(e)),
        })
        .boxed()
}
