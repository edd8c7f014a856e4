//! Endpoint descriptors.
//!
//! Every read and write the dashboard performs is a zero-sized type
//! implementing [`QueryEndpoint`] or [`MutationEndpoint`]. The descriptor says
//! how to build the HTTP request, how to turn the JSON response into a typed
//! value, and which [`Tag`]s the result provides or invalidates.
//!
//! # Example
//!
//! ```
//! use serde::Deserialize;
//! use storekeep::subscription::http::{
//!     HttpRequest, MutationEndpoint, QueryEndpoint, ResourceType, Tag,
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
//! struct CancelOrder;
//!
//! impl MutationEndpoint for CancelOrder {
//!     const NAME: &'static str = "cancelOrder";
//!     type Args = u64;
//!     type Output = Order;
//!
//!     fn request(id: &u64) -> HttpRequest {
//!         HttpRequest::post(format!("/orders/{id}/cancel"))
//!     }
//!
//!     fn invalidates_tags(_: &Order, id: &u64) -> Vec<Tag> {
//!         vec![Tag::id(ResourceType::Order, id), Tag::list(ResourceType::Order)]
//!     }
//! }
//! ```

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::RequestError;
use super::tag::Tag;

/// Method, path and payload of an endpoint call, relative to the API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query-string parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArguments`] if `body` is not JSON-representable.
    pub fn with_body<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, RequestError> {
        let value = serde_json::to_value(body).map_err(|e| RequestError::InvalidArguments {
            message: e.to_string(),
        })?;
        Ok(self.json(value))
    }

    /// `GET`-style reads that may be retried without side effects.
    #[must_use]
    pub fn is_idempotent_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// A cached read.
pub trait QueryEndpoint: Send + Sync + 'static {
    /// Endpoint name; the first half of every [`CacheKey`](super::key::CacheKey).
    /// Must be unique per output type.
    const NAME: &'static str;

    type Args: Serialize + Clone + Send + Sync + 'static;
    type Output: DeserializeOwned + Clone + Send + Sync + 'static;

    fn request(args: &Self::Args) -> HttpRequest;

    /// Converts the raw response into the cached value.
    fn transform(raw: Value) -> Result<Self::Output, RequestError> {
        serde_json::from_value(raw).map_err(RequestError::decode)
    }

    /// Tags carried by a successful result.
    fn provides_tags(_result: &Self::Output, _args: &Self::Args) -> Vec<Tag> {
        Vec::new()
    }
}

/// A write whose success invalidates cached reads.
pub trait MutationEndpoint: Send + Sync + 'static {
    const NAME: &'static str;

    type Args: Send + Sync + 'static;
    type Output: DeserializeOwned + Send + 'static;

    fn request(args: &Self::Args) -> HttpRequest;

    fn transform(raw: Value) -> Result<Self::Output, RequestError> {
        serde_json::from_value(raw).map_err(RequestError::decode)
    }

    /// Tags whose entries become stale once the write succeeds.
    fn invalidates_tags(_result: &Self::Output, _args: &Self::Args) -> Vec<Tag> {
        Vec::new()
    }
}
