//! Invalidation tags.
//!
//! A [`Tag`] labels what a cached read contains so that writes can name what
//! they change. Queries *provide* tags, mutations *invalidate* them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of resources the dashboard API serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Product,
    Order,
    Inventory,
    Invoice,
    Policy,
    Tenant,
    TenantSettings,
    Category,
    Customer,
}

/// Identifier half of a tag: one concrete resource or the whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagId {
    /// The collection sentinel (`LIST`).
    List,
    /// A single resource.
    Id(String),
}

/// A `(resourceType, identifier)` label attached to cache entries.
///
/// # Example
///
/// ```
/// use storekeep::subscription::http::{ResourceType, Tag};
///
/// let order = Tag::id(ResourceType::Order, 5);
/// assert_eq!(order.to_string(), "Order:5");
///
/// let orders = Tag::list(ResourceType::Order);
/// assert!(orders.is_list());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub resource: ResourceType,
    pub id: TagId,
}

impl Tag {
    /// Tag for a single resource.
    pub fn id(resource: ResourceType, id: impl ToString) -> Self {
        Self {
            resource,
            id: TagId::Id(id.to_string()),
        }
    }

    /// Tag for the collection of a resource type.
    #[must_use]
    pub const fn list(resource: ResourceType) -> Self {
        Self {
            resource,
            id: TagId::List,
        }
    }

    /// The usual tag set for a list response: the `LIST` sentinel plus one tag
    /// per item, so that both collection writes and item writes reach it.
    pub fn list_and_items<I>(resource: ResourceType, ids: I) -> Vec<Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        std::iter::once(Self::list(resource))
            .chain(ids.into_iter().map(|id| Self::id(resource, id)))
            .collect()
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self.id, TagId::List)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            TagId::List => write!(f, "{:?}:LIST", self.resource),
            TagId::Id(id) => write!(f, "{:?}:{id}", self.resource),
        }
    }
}
