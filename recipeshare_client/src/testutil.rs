use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};

pub struct CannedResponse {
    pub status: u16,
    pub body: Value,
    pub gate: Option<Arc<Notify>>,
}

impl CannedResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            gate: None,
        }
    }

    pub fn status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            gate: None,
        }
    }

    /// A 200 response that is not returned until the gate is notified,
    /// for driving completion order from tests.
    pub fn gated(body: Value, gate: Arc<Notify>) -> Self {
        Self {
            status: 200,
            body,
            gate: Some(gate),
        }
    }
}

/// Transport fake serving canned responses in FIFO order and recording
/// every request it sees. Running out of canned responses is a transport
/// error, which callers treat like any network failure.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<CannedResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: CannedResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let canned = self.responses.lock().unwrap().pop_front();
        self.requests.lock().unwrap().push(request);
        let Some(canned) = canned else {
            return Err(TransportError("no canned response".into()));
        };
        if let Some(gate) = canned.gate {
            gate.notified().await;
        }
        Ok(ApiResponse {
            status: canned.status,
            body: canned.body,
        })
    }
}
