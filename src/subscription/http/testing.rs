//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;

use super::error::RequestError;
use super::transport::{Transport, TransportRequest, TransportResponse};

type Reply = Result<(StatusCode, String), RequestError>;
type Handler = dyn Fn(&TransportRequest) -> Reply + Send + Sync;

/// Answers requests from a closure or a fixed sequence, recording every call.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    handler: Arc<Handler>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(handler: impl Fn(&TransportRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn json(value: Value) -> Self {
        let body = value.to_string();
        Self::new(move |_| Ok((StatusCode::OK, body.clone())))
    }

    /// Replays `replies` in order, repeating the last one when exhausted.
    pub(crate) fn sequence(replies: Vec<Reply>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            let mut replies = replies.lock();
            if replies.len() > 1 {
                replies.pop_front().unwrap_or_else(|| Err(RequestError::network("empty script")))
            } else {
                replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(RequestError::network("empty script")))
            }
        })
    }

    #[must_use]
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.handler)(&request);
        self.requests.lock().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        reply.map(|(status, body)| TransportResponse::new(status, body))
    }
}
