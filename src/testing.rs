//! In-process mock of the secrets-engine HTTP API for tests.
//!
//! Records every request and answers from a table of canned responses keyed
//! by method and path.  Unknown routes get the server's 404 shape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method:    String,
    pub path:      String,
    pub query:     Option<String>,
    pub token:     Option<String>,
    pub namespace: Option<String>,
    pub body:      Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Canned {
    Json(u16, Value),
    Empty(u16),
    Raw(u16, Vec<u8>),
}

#[derive(Clone, Default)]
struct MockState {
    routes:   Arc<Mutex<HashMap<(String, String), Canned>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

pub struct MockServer {
    addr:  SocketAddr,
    state: MockState,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn on(&self, method: &str, path: &str, canned: Canned) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), canned);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(Recorded {
        method:    method.to_string(),
        path:      path.clone(),
        query:     uri.query().map(str::to_string),
        token:     header(&headers, "x-vault-token"),
        namespace: header(&headers, "x-vault-namespace"),
        body:      serde_json::from_slice(&body).ok(),
    });

    let canned = state
        .routes
        .lock()
        .unwrap()
        .get(&(method.to_string(), path))
        .cloned();
    match canned {
        Some(Canned::Json(status, v)) => (code(status), Json(v)).into_response(),
        Some(Canned::Empty(status)) => code(status).into_response(),
        Some(Canned::Raw(status, bytes)) => (code(status), bytes).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "errors": [] }))).into_response(),
    }
}

fn code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap()
}
