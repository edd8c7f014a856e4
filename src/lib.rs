//! # Storekeep - cached data access for a store administration API
//!
//! Storekeep sits between an admin front end and its HTTP API. Reads go
//! through a shared cache that deduplicates concurrent requests and keeps
//! results alive while anyone is subscribed. Writes declare which resources
//! they changed, and every cached read showing one of those resources is
//! refetched.
//!
//! ## Core Components
//!
//! - [`QueryClient`](subscription::http::QueryClient): The cache and its fetch lifecycle
//! - [`MutationDispatcher`](subscription::http::MutationDispatcher): Writes plus invalidation
//! - [`RequestExecutor`](subscription::http::RequestExecutor): Auth, timeout, and retry for one request
//! - [`Command`](command::Command): One-off asynchronous results for message-driven consumers
//! - [`Subscription`](subscription::Subscription): Long-lived streams, such as a query's state
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde::Deserialize;
//! use storekeep::subscription::http::{
//!     ExecutorConfig, HttpRequest, QueryClient, QueryEndpoint, RequestExecutor, ResourceType,
//!     StaticToken, Tag,
//! };
//!
//! #[derive(Debug, Clone, Deserialize)]
//! struct Order {
//!     id: u64,
//!     status: String,
//! }
//!
//! struct GetOrder;
//!
//! impl QueryEndpoint for GetOrder {
//!     const NAME: &'static str = "getOrder";
//!     type Args = u64;
//!     type Output = Order;
//!
//!     fn request(id: &u64) -> HttpRequest {
//!         HttpRequest::get(format!("/orders/{id}"))
//!     }
//!
//!     fn provides_tags(order: &Order, _: &u64) -> Vec<Tag> {
//!         vec![Tag::id(ResourceType::Order, order.id)]
//!     }
//! }
//!
//! # async fn run() -> Result<(), storekeep::subscription::http::RequestError> {
//! let executor = RequestExecutor::new(
//!     ExecutorConfig::new("https://admin.example.com/api"),
//!     Arc::new(StaticToken::new("token")),
//! );
//! let client = QueryClient::new(executor);
//!
//! let mut order = client.resolve::<GetOrder>(5)?;
//! if let Some(order) = order.settled().await.data() {
//!     println!("order {} is {}", order.id, order.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod prelude;
pub mod subscription;

pub use command::Command;
pub use futures::stream::BoxStream;
