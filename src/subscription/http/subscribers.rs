use std::collections::{HashMap, HashSet};

use super::cache::CacheEntry;
use super::key::CacheKey;
use super::tag_index::TagIndex;

/// Receipt for one live subscription to a cache key.
///
/// Tokens are not `Clone`; each one releases exactly one subscriber.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    id: u64,
    key: CacheKey,
}

impl SubscriptionToken {
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Subscriber counting and the eviction rules built on it.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionManager {
    next_id: u64,
    active: HashSet<u64>,
}

impl SubscriptionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Counts a new subscriber on `entry` and cancels any pending eviction.
    pub(crate) fn subscribe(&mut self, entry: &mut CacheEntry) -> SubscriptionToken {
        entry.subscribers += 1;
        if let Some(eviction) = entry.eviction.take() {
            eviction.cancel();
        }

        self.next_id += 1;
        self.active.insert(self.next_id);
        SubscriptionToken {
            id: self.next_id,
            key: entry.key.clone(),
        }
    }

    /// Releases `token`. Returns `true` when its entry just lost its last
    /// subscriber. Releasing a token twice is a no-op.
    pub(crate) fn unsubscribe(
        &mut self,
        token: &SubscriptionToken,
        entries: &mut HashMap<CacheKey, CacheEntry>,
    ) -> bool {
        if !self.active.remove(&token.id) {
            return false;
        }
        let Some(entry) = entries.get_mut(&token.key) else {
            return false;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        entry.subscribers == 0
    }

    /// Removes `key` and its tag registrations if nobody subscribes to it and
    /// no request for it is in flight.
    pub(crate) fn evict(
        &self,
        key: &CacheKey,
        entries: &mut HashMap<CacheKey, CacheEntry>,
        tags: &mut TagIndex,
    ) -> bool {
        match entries.get(key) {
            Some(entry) if entry.subscribers == 0 && entry.in_flight.is_none() => {}
            _ => return false,
        }
        entries.remove(key);
        tags.remove(key);
        true
    }

    /// Number of unreleased tokens across all keys.
    pub(crate) fn active(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::http::cache::Fetched;
    use crate::subscription::http::error::RequestError;
    use crate::subscription::http::tag::{ResourceType, Tag};
    use futures::FutureExt;
    use std::sync::Arc;

    fn entries(key: &CacheKey) -> HashMap<CacheKey, CacheEntry> {
        let entry = CacheEntry::new(
            key.clone(),
            Arc::new(|| async { Err::<Fetched, _>(RequestError::Timeout) }.boxed()),
        );
        HashMap::from([(key.clone(), entry)])
    }

    fn key() -> CacheKey {
        CacheKey::new("getOrder", &5).expect("serializable")
    }

    #[test]
    fn test_subscribe_counts() {
        let key = key();
        let mut entries = entries(&key);
        let mut manager = SubscriptionManager::new();

        let entry = entries.get_mut(&key).expect("entry");
        let a = manager.subscribe(entry);
        let b = manager.subscribe(entry);
        assert_eq!(entry.subscribers, 2);
        assert_ne!(a, b);
        assert_eq!(a.key(), &key);

        assert!(!manager.unsubscribe(&a, &mut entries));
        assert!(manager.unsubscribe(&b, &mut entries));
        assert_eq!(entries[&key].subscribers, 0);
        assert_eq!(manager.active(), 0);
    }

    #[test]
    fn test_double_unsubscribe_is_ignored() {
        let key = key();
        let mut entries = entries(&key);
        let mut manager = SubscriptionManager::new();

        let a = manager.subscribe(entries.get_mut(&key).expect("entry"));
        let _b = manager.subscribe(entries.get_mut(&key).expect("entry"));

        assert!(!manager.unsubscribe(&a, &mut entries));
        assert!(!manager.unsubscribe(&a, &mut entries));
        assert_eq!(entries[&key].subscribers, 1);
    }

    #[test]
    fn test_subscribe_cancels_pending_eviction() {
        let key = key();
        let mut entries = entries(&key);
        let mut manager = SubscriptionManager::new();
        let eviction = tokio_util::sync::CancellationToken::new();

        let entry = entries.get_mut(&key).expect("entry");
        entry.eviction = Some(eviction.clone());
        let _token = manager.subscribe(entry);

        assert!(eviction.is_cancelled());
        assert!(entry.eviction.is_none());
    }

    #[test]
    fn test_evict_only_unused_entries() {
        let key = key();
        let mut entries = entries(&key);
        let mut tags = TagIndex::new();
        tags.register(&key, [Tag::id(ResourceType::Order, 5)]);
        let mut manager = SubscriptionManager::new();

        let token = manager.subscribe(entries.get_mut(&key).expect("entry"));
        assert!(!manager.evict(&key, &mut entries, &mut tags));

        manager.unsubscribe(&token, &mut entries);
        assert!(manager.evict(&key, &mut entries, &mut tags));
        assert!(entries.is_empty());
        assert!(tags.keys_for(&[Tag::id(ResourceType::Order, 5)]).is_empty());
        assert!(!manager.evict(&key, &mut entries, &mut tags));
    }

    #[test]
    fn test_evict_waits_for_in_flight_request() {
        let key = key();
        let mut entries = entries(&key);
        let mut tags = TagIndex::new();
        let manager = SubscriptionManager::new();

        entries.get_mut(&key).expect("entry").in_flight =
            Some(futures::future::ready(()).boxed().shared());
        assert!(!manager.evict(&key, &mut entries, &mut tags));

        entries.get_mut(&key).expect("entry").in_flight = None;
        assert!(manager.evict(&key, &mut entries, &mut tags));
    }
}
