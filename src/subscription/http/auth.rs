//! Bearer token supply and single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::RequestError;

/// Source of the bearer token attached to every request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current access token, if the session has one.
    async fn access_token(&self) -> Option<String>;

    /// Obtains a new access token, making it the current one.
    async fn refresh(&self) -> Result<String, RequestError>;
}

/// A fixed token that cannot be refreshed.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// No authentication.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }

    async fn refresh(&self) -> Result<String, RequestError> {
        Err(RequestError::auth("static token cannot be refreshed"))
    }
}

/// A token together with the refresh generation it was read in.
#[derive(Debug, Clone)]
pub(crate) struct Credential {
    pub(crate) token: Option<String>,
    pub(crate) generation: u64,
}

/// Wraps a [`TokenProvider`] so that concurrent refresh demands collapse into
/// one call.
///
/// Every request remembers the generation its token was read in. A refresh
/// asked for an older generation than the current one reuses the outcome of
/// the refresh that already happened.
pub(crate) struct AuthGate {
    provider: Arc<dyn TokenProvider>,
    generation: AtomicU64,
    last: Mutex<Option<Result<String, RequestError>>>,
}

impl AuthGate {
    pub(crate) fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub(crate) async fn current(&self) -> Credential {
        let generation = self.generation.load(Ordering::Acquire);
        let token = self.provider.access_token().await;
        Credential { token, generation }
    }

    /// Refreshes the token unless a refresh already completed since `seen`.
    pub(crate) async fn refresh(&self, seen: &Credential) -> Result<Credential, RequestError> {
        let mut last = self.last.lock().await;
        let generation = self.generation.load(Ordering::Acquire);

        if generation != seen.generation {
            if let Some(outcome) = last.as_ref() {
                debug!(generation, "reusing completed token refresh");
                return outcome.clone().map(|token| Credential {
                    token: Some(token),
                    generation,
                });
            }
        }

        debug!(generation, "refreshing access token");
        let outcome = self.provider.refresh().await;
        *last = Some(outcome.clone());
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        outcome.map(|token| Credential {
            token: Some(token),
            generation,
        })
    }
}
