//! Cached, tag-invalidated access to the admin HTTP API.
//!
//! This module provides subscription-based reads and command-based writes,
//! similar to RTK Query or TanStack Query.
//!
//! # Features
//!
//! - **Queries**: Subscription-based reads with caching, request deduplication
//!   and automatic refetching
//! - **Mutations**: One-off writes that invalidate the tags they touch
//! - **Tags**: Each cached read declares which resources it shows; each write
//!   declares which resources it changed
//! - **Requests**: Bearer auth with single-flight token refresh, timeouts, and
//!   bounded retry with jittered backoff for idempotent reads
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storekeep::subscription::http::{
//!     ClientSettings, MutationDispatcher, QueryClient, RequestExecutor, StaticToken,
//! };
//!
//! let (executor_config, query_config) = ClientSettings::load()?.into_parts();
//! let executor = RequestExecutor::new(executor_config, Arc::new(StaticToken::new(token)));
//! let client = QueryClient::with_config(executor, query_config);
//! let dispatcher = MutationDispatcher::new(client.clone());
//!
//! let mut order = client.resolve::<GetOrder>(5)?;
//! println!("{:?}", order.settled().await.data());
//!
//! dispatcher.mutate::<CancelOrder>(5).await?;
//! // `order` refetches on its own; the next settled state is post-cancel.
//! println!("{:?}", order.settled().await.data());
//! ```

mod auth;
mod cache;
mod config;
mod endpoint;
mod error;
mod executor;
mod key;
pub mod mutation;
pub mod query;
mod subscribers;
mod tag;
mod tag_index;
#[cfg(test)]
mod testing;
mod transport;

// Re-export main types
pub use auth::{StaticToken, TokenProvider};
pub use config::{
    CacheSettings, ClientSettings, ConfigError, ExecutorConfig, QueryConfig, RetryPolicy,
    RetrySettings,
};
pub use endpoint::{HttpRequest, MutationEndpoint, QueryEndpoint};
pub use error::RequestError;
pub use executor::RequestExecutor;
pub use key::CacheKey;
pub use mutation::MutationDispatcher;
pub use query::{Invalidation, Query, QueryClient, QueryHandle, QueryResult, QueryStatus};
pub use subscribers::SubscriptionToken;
pub use tag::{ResourceType, Tag, TagId};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
