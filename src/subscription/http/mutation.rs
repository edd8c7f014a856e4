//! Writes and the cache invalidation that follows them.
//!
//! # Design Pattern: Transaction-based Operations
//!
//! Mutations are one-off operations, not subscriptions. A mutation runs its
//! request once (writes are never retried), and on success invalidates the
//! tags its endpoint declares. Every subscribed query carrying one of those
//! tags refetches; unsubscribed ones are marked stale.
//!
//! Invalidation happens before the caller sees the result, so a caller that
//! awaits `mutate` and then reads an invalidated query always observes the
//! refetch rather than pre-write data.
//!
//! # Example
//!
//! ```rust,ignore
//! use storekeep::subscription::http::MutationDispatcher;
//!
//! let dispatcher = MutationDispatcher::new(client.clone());
//! let order = dispatcher.mutate::<CancelOrder>(5).await?;
//!
//! // Or as a command for message-driven consumers:
//! let cmd = dispatcher.command::<CancelOrder>(5).map(Message::OrderCancelled);
//! ```

use tracing::{debug, warn};

use crate::Command;

use super::endpoint::MutationEndpoint;
use super::error::RequestError;
use super::query::QueryClient;

/// Executes writes against the API and invalidates the affected cache entries.
#[derive(Debug, Clone)]
pub struct MutationDispatcher {
    client: QueryClient,
}

impl MutationDispatcher {
    #[must_use]
    pub const fn new(client: QueryClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub const fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Runs `M` with `args`.
    ///
    /// On success the tags from [`MutationEndpoint::invalidates_tags`] are
    /// invalidated before this returns.
    ///
    /// # Errors
    ///
    /// Returns the classified [`RequestError`] if the request or the response
    /// transform fails. A failed mutation leaves every cache entry untouched.
    pub async fn mutate<M: MutationEndpoint>(&self, args: M::Args) -> Result<M::Output, RequestError> {
        let request = M::request(&args);
        debug!(mutation = M::NAME, method = %request.method, path = %request.path, "dispatching mutation");

        let raw = match self.client.executor().execute(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(mutation = M::NAME, error = %e, "mutation failed");
                return Err(e);
            }
        };
        let output = M::transform(raw)?;

        let tags = M::invalidates_tags(&output, &args);
        if !tags.is_empty() {
            let outcome = self.client.invalidate_tags(&tags);
            debug!(
                mutation = M::NAME,
                tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
                refetched = outcome.refetched.len(),
                "mutation invalidated cache"
            );
        }
        Ok(output)
    }

    /// Wraps [`mutate`](Self::mutate) in a [`Command`] that yields the result
    /// once.
    pub fn command<M: MutationEndpoint>(
        &self,
        args: M::Args,
    ) -> Command<Result<M::Output, RequestError>> {
        let dispatcher = self.clone();
        Command::future(async move { dispatcher.mutate::<M>(args).await })
    }
}
