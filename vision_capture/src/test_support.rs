//! In-process doubles for the inference server used by the unit tests.

use crate::client::{
    ChatRequest, ClientError, InferenceServer, OllamaClient, ProgressEvent, ProgressStream,
};
use crate::config::InferenceServerConfig;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{convert::Infallible, sync::Arc};
use tokio::net::TcpListener;

/// Canned answers of the fake HTTP server, plus what it received.
#[derive(Default)]
pub struct FakeOllamaState {
    pub models: Vec<String>,
    pub pull_lines: Vec<String>,
    pub chat_status: StatusCode,
    pub chat_body: Value,
    pub pull_requests: Mutex<Vec<Value>>,
    pub chat_requests: Mutex<Vec<Value>>,
}

pub struct FakeOllama {
    pub base_url: String,
    pub state: Arc<FakeOllamaState>,
}

impl FakeOllama {
    pub async fn spawn(state: FakeOllamaState) -> Self {
        let state = Arc::new(state);
        let router = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/pull", post(pull))
            .route("/api/chat", post(chat))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn config(&self) -> InferenceServerConfig {
        InferenceServerConfig {
            host: self.base_url.clone(),
            request_timeout_secs: Some(5),
        }
    }

    pub fn client(&self) -> OllamaClient {
        OllamaClient::new(&self.config()).unwrap()
    }
}

async fn tags(State(state): State<Arc<FakeOllamaState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .iter()
        .map(|m| json!({ "name": m, "model": m, "size": 1 }))
        .collect();
    Json(json!({ "models": models }))
}

async fn pull(State(state): State<Arc<FakeOllamaState>>, Json(body): Json<Value>) -> Response {
    state.pull_requests.lock().push(body);
    let chunks: Vec<Result<Bytes, Infallible>> = state
        .pull_lines
        .iter()
        .map(|line| Ok(Bytes::from(format!("{}\n", line))))
        .collect();
    Body::from_stream(stream::iter(chunks)).into_response()
}

async fn chat(State(state): State<Arc<FakeOllamaState>>, Json(body): Json<Value>) -> Response {
    state.chat_requests.lock().push(body);
    (state.chat_status, Json(state.chat_body.clone())).into_response()
}

/// A server address nothing listens on.
pub async fn unreachable_config() -> InferenceServerConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    InferenceServerConfig {
        host: format!("http://{}", addr),
        request_timeout_secs: Some(5),
    }
}

/// In-memory server that records every call it receives.
#[derive(Default)]
pub struct StubServer {
    pub models: Vec<String>,
    pub list_error: Option<String>,
    pub pull_events: Vec<Result<ProgressEvent, String>>,
    pub chat_reply: Option<Value>,
    pub pulls: Mutex<Vec<String>>,
    pub chats: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl InferenceServer for StubServer {
    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        match &self.list_error {
            Some(message) => Err(ClientError::Server(message.clone())),
            None => Ok(self.models.clone()),
        }
    }

    async fn pull_model(&self, name: &str) -> Result<ProgressStream, ClientError> {
        self.pulls.lock().push(name.to_string());
        let events: Vec<Result<ProgressEvent, ClientError>> = self
            .pull_events
            .iter()
            .cloned()
            .map(|event| event.map_err(ClientError::Server))
            .collect();
        Ok(stream::iter(events).boxed())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value, ClientError> {
        self.chats.lock().push(request.clone());
        self.chat_reply
            .clone()
            .ok_or_else(|| ClientError::Server("model runner crashed".into()))
    }
}

pub fn progress(status: &str, completed: Option<u64>, total: Option<u64>) -> ProgressEvent {
    ProgressEvent {
        status: status.to_string(),
        digest: None,
        completed,
        total,
    }
}
