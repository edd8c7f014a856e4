//! Long-lived sources of values.
//!
//! A [`Subscription`] wraps a [`SubscriptionSource`] and produces a fresh
//! stream each time it is started. Consumers that diff their subscriptions
//! between renders compare them by [`SubscriptionId`]: two subscriptions with
//! the same id describe the same underlying source and only one of them needs
//! to run.

pub mod http;

use std::any::TypeId;

use futures::StreamExt;

use crate::BoxStream;

/// Identity of a subscription: the source type plus a hash of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Creates an id for source type `T` with the given parameter hash.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }
}

/// Something that can be turned into a stream of values.
pub trait SubscriptionSource: Send + 'static {
    type Output;

    /// Starts the source. Each call returns an independent stream.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    fn id(&self) -> SubscriptionId;
}

/// A type-erased subscription producing values of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// use storekeep::subscription::Subscription;
/// use storekeep::subscription::http::Query;
///
/// let orders = Subscription::new(Query::<ListOrders>::new((), client.clone()))
///     .map(Message::OrdersChanged);
/// ```
pub struct Subscription<T> {
    id: SubscriptionId,
    spawn: Box<dyn Fn() -> BoxStream<'static, T> + Send>,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn new<S>(source: S) -> Self
    where
        S: SubscriptionSource<Output = T>,
    {
        let id = source.id();
        Self {
            id,
            spawn: Box::new(move || source.stream()),
        }
    }

    /// Transforms every value of the subscription. The id is unchanged.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Subscription<U>
    where
        F: Fn(T) -> U + Clone + Send + Sync + 'static,
        U: Send + 'static,
    {
        let spawn = self.spawn;
        Subscription {
            id: self.id,
            spawn: Box::new(move || (spawn)().map(f.clone()).boxed()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Starts the subscription.
    pub fn stream(&self) -> BoxStream<'static, T> {
        (self.spawn)()
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
