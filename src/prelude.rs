//! Prelude module for convenient imports.
//!
//! ```
//! use storekeep::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] and [`MutationDispatcher`] - The cache and the write path
//! - [`QueryEndpoint`] and [`MutationEndpoint`] - Endpoint descriptors
//! - [`Tag`] and [`ResourceType`] - Cache invalidation tags
//! - [`Command`] and [`Subscription`] - Message-driven adapters

pub use crate::command::Command;
pub use crate::subscription::Subscription;
pub use crate::subscription::http::{
    HttpRequest, MutationDispatcher, MutationEndpoint, QueryClient, QueryEndpoint, QueryResult,
    RequestError, RequestExecutor, ResourceType, Tag,
};
