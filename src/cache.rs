//! Bounded, time-limited caches for the reasoning hot paths.
//!
//! Every cached value is derived state that can be recomputed from the rule
//! store and the schema, so invalidation is coarse and total: a schema
//! commit calls `LogicCache::clear` and everything is rebuilt on demand.
//! Within a schema epoch the caches are append-mostly and shared across
//! query threads.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::concludable::{Concludable, Resolvable};
use crate::pattern::{Conjunction, TypeAnnotations};
use crate::rule::Rule;
use crate::unify::Unifier;

/// Capacity and entry lifetime shared by all the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(600),
        }
    }
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A concurrent map with bounded capacity and per-entry expiry. Reads of an
/// expired entry behave as a miss; inserting at capacity evicts the oldest
/// entry.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: config.capacity.max(1),
            ttl: config.ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.evict_if_full();
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetch or compute. The dashmap entry lock makes the computation
    /// happen at most once per key; distinct keys proceed concurrently.
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        self.evict_if_full();
        self.entries
            .entry(key)
            .or_insert_with(|| Entry {
                value: compute(),
                inserted_at: Instant::now(),
            })
            .value
            .clone()
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_full(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

// ---------------------------------------------------------------------------
// LogicCache
// ---------------------------------------------------------------------------

/// The reasoning caches, invalidated as one at schema-commit boundaries.
pub struct LogicCache {
    rules: TtlCache<String, Arc<Rule>>,
    applicability: TtlCache<Concludable, Arc<HashMap<String, HashSet<Unifier>>>>,
    annotations: TtlCache<Conjunction, TypeAnnotations>,
    coherence: TtlCache<Conjunction, bool>,
    resolvables: TtlCache<Conjunction, Arc<Vec<Resolvable>>>,
}

impl LogicCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            rules: TtlCache::new(config),
            applicability: TtlCache::new(config),
            annotations: TtlCache::new(config),
            coherence: TtlCache::new(config),
            resolvables: TtlCache::new(config),
        }
    }

    pub fn rules(&self) -> &TtlCache<String, Arc<Rule>> {
        &self.rules
    }

    pub fn applicability(
        &self,
    ) -> &TtlCache<Concludable, Arc<HashMap<String, HashSet<Unifier>>>> {
        &self.applicability
    }

    pub fn annotations(&self) -> &TtlCache<Conjunction, TypeAnnotations> {
        &self.annotations
    }

    pub fn coherence(&self) -> &TtlCache<Conjunction, bool> {
        &self.coherence
    }

    pub fn resolvables(&self) -> &TtlCache<Conjunction, Arc<Vec<Resolvable>>> {
        &self.resolvables
    }

    /// Drop everything. Called whenever the schema (types or rules) may
    /// have changed; cached unifiers and annotations are only valid within
    /// one schema epoch.
    pub fn clear(&self) {
        debug!(
            rules = self.rules.len(),
            applicability = self.applicability.len(),
            annotations = self.annotations.len(),
            "clearing logic caches"
        );
        self.rules.clear();
        self.applicability.clear();
        self.annotations.clear();
        self.coherence.clear();
        self.resolvables.clear();
    }
}

impl Default for LogicCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(capacity: usize, ttl: Duration) -> TtlCache<String, u32> {
        TtlCache::new(CacheConfig { capacity, ttl })
    }

    #[test]
    fn get_or_insert_computes_once() {
        let cache = small(16, Duration::from_secs(60));
        let mut calls = 0;
        let first = cache.get_or_insert_with("k".into(), || {
            calls += 1;
            7
        });
        let second = cache.get_or_insert_with("k".into(), || {
            calls += 1;
            8
        });
        assert_eq!((first, second, calls), (7, 7, 1));
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = small(16, Duration::ZERO);
        cache.insert("k".into(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"k".into()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_the_oldest_entry() {
        let cache = small(2, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".into(), 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".into()), None);
        assert_eq!(cache.get(&"c".into()), Some(3));
    }

    #[test]
    fn clear_empties_every_cache() {
        let caches = LogicCache::default();
        caches.rules().insert(
            "r".into(),
            Arc::new(make_rule()),
        );
        caches.coherence().insert(Conjunction::default(), true);
        caches.clear();
        assert!(caches.rules().is_empty());
        assert!(caches.coherence().is_empty());
    }

    fn make_rule() -> Rule {
        use crate::common::{Label, Var};
        use crate::pattern::{Constraint, IsaRef, Pattern, RolePlayer, RoleRef};
        use crate::schema::{RuleStructure, SchemaTypes, TypeAnnotator};

        struct Schema;
        impl SchemaTypes for Schema {
            fn subtype_labels(&self, label: &Label) -> Vec<Label> {
                vec![label.clone()]
            }
            fn is_abstract(&self, _label: &Label) -> bool {
                false
            }
            fn relates(&self, relation_type: &Label, role_name: &str) -> Option<Label> {
                Some(Label::scoped(relation_type.name.clone(), role_name))
            }
            fn value_type(&self, _attribute_type: &Label) -> Option<crate::common::ValueType> {
                None
            }
        }
        struct Annotator;
        impl TypeAnnotator for Annotator {
            fn annotate(
                &self,
                _conjunction: &Conjunction,
            ) -> crate::error::LogicResult<TypeAnnotations> {
                Ok(TypeAnnotations::new())
            }
        }

        let structure = RuleStructure::new(
            "r",
            Pattern::Constraint(Constraint::Isa {
                thing: Var::named("x"),
                isa: IsaRef::label(Var::anon(0), Label::of("person")),
            }),
            vec![Constraint::Relation {
                relation: Var::anon(1),
                isa: Some(IsaRef::label(Var::anon(2), Label::of("employment"))),
                players: vec![RolePlayer::new(
                    Some(RoleRef::label(Var::anon(3), Label::of("employee"))),
                    Var::named("x"),
                )],
            }],
        );
        Rule::load(structure, &Schema, &Annotator).unwrap()
    }
}
