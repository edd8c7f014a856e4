use std::collections::{HashMap, HashSet, VecDeque};

use super::key::CacheKey;
use super::tag::Tag;

/// Inverted index from tag to the cache keys currently carrying it.
///
/// The forward map (key to tags) is the authoritative tag set of each entry;
/// the reverse map is derived from it and updated in the same call.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    by_key: HashMap<CacheKey, HashSet<Tag>>,
    by_tag: HashMap<Tag, HashSet<CacheKey>>,
}

impl TagIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces the tag set of `key` with `tags`.
    pub(crate) fn register(&mut self, key: &CacheKey, tags: impl IntoIterator<Item = Tag>) {
        self.remove(key);
        let tags: HashSet<Tag> = tags.into_iter().collect();
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.by_key.insert(key.clone(), tags);
    }

    /// Drops every registration of `key`.
    pub(crate) fn remove(&mut self, key: &CacheKey) {
        let Some(old) = self.by_key.remove(key) else {
            return;
        };
        for tag in old {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    /// Union of the keys carrying any of `tags`.
    pub(crate) fn keys_for<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> HashSet<CacheKey> {
        tags.into_iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flatten()
            .cloned()
            .collect()
    }

    pub(crate) fn tags_for(&self, key: &CacheKey) -> HashSet<Tag> {
        self.by_key.get(key).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}

/// Recently invalidated tags, numbered by invalidation epoch.
///
/// A fetch remembers the epoch it started in. If it settles with a tag that
/// was invalidated after that epoch, its response may predate the write, even
/// when the entry carried no tags at the time the write landed.
#[derive(Debug, Default)]
pub(crate) struct InvalidationLog {
    epoch: u64,
    recent: VecDeque<(u64, Tag)>,
}

impl InvalidationLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Records one invalidation of `tags` and returns its epoch.
    pub(crate) fn record<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>) -> u64 {
        self.epoch += 1;
        let epoch = self.epoch;
        self.recent
            .extend(tags.into_iter().map(|tag| (epoch, tag.clone())));
        epoch
    }

    /// Whether any of `tags` was invalidated after epoch `since`.
    pub(crate) fn invalidated_since<'a>(
        &self,
        since: u64,
        tags: impl IntoIterator<Item = &'a Tag>,
    ) -> bool {
        let tags: HashSet<&Tag> = tags.into_iter().collect();
        self.recent
            .iter()
            .rev()
            .take_while(|(epoch, _)| *epoch > since)
            .any(|(_, tag)| tags.contains(tag))
    }

    /// Forgets invalidations that no running fetch can have raced with.
    /// `oldest` is the start epoch of the oldest fetch still in flight.
    pub(crate) fn prune(&mut self, oldest: Option<u64>) {
        let Some(oldest) = oldest else {
            self.recent.clear();
            return;
        };
        while self.recent.front().is_some_and(|(epoch, _)| *epoch <= oldest) {
            self.recent.pop_front();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::http::tag::ResourceType;
    use proptest::prelude::*;

    #[test]
    fn test_invalidation_log_tracks_epochs() {
        let order = Tag::id(ResourceType::Order, 5);
        let invoices = Tag::list(ResourceType::Invoice);
        let mut log = InvalidationLog::new();

        let started = log.epoch();
        assert_eq!(log.record([&order]), 1);
        assert!(log.invalidated_since(started, [&order]));
        assert!(!log.invalidated_since(started, [&invoices]));
        assert!(!log.invalidated_since(log.epoch(), [&order]));

        log.record([&invoices]);
        assert!(log.invalidated_since(1, [&order, &invoices]));
        assert!(!log.invalidated_since(1, [&order]));
    }

    #[test]
    fn test_invalidation_log_prune() {
        let order = Tag::id(ResourceType::Order, 5);
        let mut log = InvalidationLog::new();
        log.record([&order]);
        log.record([&order]);
        log.record([&order]);

        log.prune(Some(2));
        assert_eq!(log.len(), 1);
        assert!(log.invalidated_since(2, [&order]));

        log.prune(None);
        assert_eq!(log.len(), 0);
        assert_eq!(log.epoch(), 3);
    }

    fn key(id: u32) -> CacheKey {
        CacheKey::new("getOrder", &id).expect("serializable")
    }

    #[test]
    fn test_register_and_lookup() {
        let mut index = TagIndex::new();
        index.register(&key(1), [Tag::id(ResourceType::Order, 1)]);
        index.register(
            &key(2),
            [Tag::id(ResourceType::Order, 2), Tag::list(ResourceType::Order)],
        );

        let hits = index.keys_for(&[Tag::id(ResourceType::Order, 1)]);
        assert_eq!(hits, HashSet::from([key(1)]));

        let hits = index.keys_for(&[Tag::list(ResourceType::Order), Tag::id(ResourceType::Order, 1)]);
        assert_eq!(hits, HashSet::from([key(1), key(2)]));

        assert!(index.keys_for(&[Tag::list(ResourceType::Invoice)]).is_empty());
    }

    #[test]
    fn test_register_replaces_previous_tags() {
        let mut index = TagIndex::new();
        index.register(&key(1), [Tag::id(ResourceType::Order, 1)]);
        index.register(&key(1), [Tag::id(ResourceType::Invoice, 9)]);

        assert!(index.keys_for(&[Tag::id(ResourceType::Order, 1)]).is_empty());
        assert_eq!(
            index.keys_for(&[Tag::id(ResourceType::Invoice, 9)]),
            HashSet::from([key(1)])
        );
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn test_remove_cleans_reverse_map() {
        let mut index = TagIndex::new();
        index.register(&key(1), [Tag::list(ResourceType::Order)]);
        index.register(&key(2), [Tag::list(ResourceType::Order)]);
        index.remove(&key(1));

        assert_eq!(
            index.keys_for(&[Tag::list(ResourceType::Order)]),
            HashSet::from([key(2)])
        );
        index.remove(&key(2));
        assert_eq!(index.tag_count(), 0);
        assert!(index.tags_for(&key(2)).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u32, Vec<(u8, Option<u8>)>),
        Remove(u32),
    }

    fn tag_of((kind, id): (u8, Option<u8>)) -> Tag {
        let resource = if kind % 2 == 0 {
            ResourceType::Order
        } else {
            ResourceType::Invoice
        };
        id.map_or_else(|| Tag::list(resource), |id| Tag::id(resource, id))
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..6, prop::collection::vec((0u8..2, prop::option::of(0u8..4)), 0..4))
                .prop_map(|(k, tags)| Op::Register(k, tags)),
            (0u32..6).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn keys_for_matches_entry_tag_sets(
            ops in prop::collection::vec(op(), 0..40),
            query in prop::collection::vec((0u8..2, prop::option::of(0u8..4)), 0..4),
        ) {
            let mut index = TagIndex::new();
            let mut model: HashMap<CacheKey, HashSet<Tag>> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(k, tags) => {
                        let tags: HashSet<Tag> = tags.into_iter().map(tag_of).collect();
                        index.register(&key(k), tags.clone());
                        model.insert(key(k), tags);
                    }
                    Op::Remove(k) => {
                        index.remove(&key(k));
                        model.remove(&key(k));
                    }
                }
            }

            let query: HashSet<Tag> = query.into_iter().map(tag_of).collect();
            let expected: HashSet<CacheKey> = model
                .iter()
                .filter(|(_, tags)| !tags.is_disjoint(&query))
                .map(|(k, _)| k.clone())
                .collect();

            prop_assert_eq!(index.keys_for(&query), expected);
            for (k, tags) in &model {
                prop_assert_eq!(&index.tags_for(k), tags);
            }
        }
    }
}
