// Copyright 2025 Rowmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Plan cache for compiled binders and deserializers
//!
//! Entries live in a sharded concurrent map so lookups on unrelated keys
//! never contend. Only the maintenance sweep takes a global lock.
//!
//! # Example
//!
//! ```ignore
//! let cache = PlanCache::new(&MapperConfig::default());
//! let plan = cache.get_or_create(&key, || Ok(CompiledPlan::new(binder)))?;
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::core::{Result, TypeKey};

use super::binder::ParamBinder;
use super::config::MapperConfig;
use super::identity::PlanKey;

/// A deserializer together with the column hash it was compiled against
#[derive(Clone)]
pub struct DeserializerState {
    /// Column hash of the reader the deserializer was built for
    pub column_hash: u64,
    /// Type-erased deserializer (a row deserializer or a multi-map tuple)
    pub deserializer: Arc<dyn Any + Send + Sync>,
}

/// A compiled execution plan
///
/// The binder is fixed at creation. The deserializer is attached on first
/// read because it depends on the reader's column layout, and replaced when
/// that layout drifts.
pub struct CompiledPlan {
    binder: Option<ParamBinder>,
    deserializer: RwLock<Option<DeserializerState>>,
    hits: AtomicU64,
}

impl CompiledPlan {
    /// Creates a plan with an optional parameter binder
    pub fn new(binder: Option<ParamBinder>) -> Self {
        Self {
            binder,
            deserializer: RwLock::new(None),
            hits: AtomicU64::new(0),
        }
    }

    /// The parameter binder, if the plan has parameters
    pub fn binder(&self) -> Option<&ParamBinder> {
        self.binder.as_ref()
    }

    /// The current deserializer state
    pub fn deserializer(&self) -> Option<DeserializerState> {
        self.deserializer.read().clone()
    }

    /// Replaces the deserializer state
    pub fn set_deserializer(&self, state: DeserializerState) {
        *self.deserializer.write() = Some(state);
    }

    /// Returns the deserializer compiled for `column_hash`, building and
    /// storing a new one when the cached one was compiled for other columns
    pub fn deserializer_for<D, F>(&self, column_hash: u64, build: F) -> Result<D>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<D>,
    {
        if let Some(state) = self.deserializer() {
            if state.column_hash == column_hash {
                if let Some(cached) = state.deserializer.downcast_ref::<D>() {
                    return Ok(cached.clone());
                }
            } else {
                tracing::debug!(
                    previous = state.column_hash,
                    current = column_hash,
                    "column layout changed, rebuilding deserializer"
                );
            }
        }
        let built = build()?;
        self.set_deserializer(DeserializerState {
            column_hash,
            deserializer: Arc::new(built.clone()),
        });
        Ok(built)
    }

    /// Number of cache hits recorded for this plan
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// One entry reported by [`PlanCache::cached_sql`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSql {
    /// Connection identity
    pub connection: String,
    /// Normalized SQL text
    pub sql: String,
    /// Hits recorded for the entry
    pub hits: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries
    pub size: usize,
    /// Total lookups that found an entry
    pub hits: u64,
    /// Total lookups that did not
    pub misses: u64,
    /// Number of completed maintenance sweeps
    pub sweeps: u64,
}

type PurgeListener = Arc<dyn Fn() + Send + Sync>;

/// Concurrent, self-pruning plan cache
pub struct PlanCache {
    entries: DashMap<PlanKey, Arc<CompiledPlan>, FxBuildHasher>,
    insertions: AtomicUsize,
    collect_per_items: usize,
    collect_hit_count_min: u64,
    sweep_lock: Mutex<()>,
    listeners: RwLock<Vec<PurgeListener>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeps: AtomicU64,
}

impl PlanCache {
    /// Creates an empty cache using the sweep settings of `config`
    pub fn new(config: &MapperConfig) -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
            insertions: AtomicUsize::new(0),
            collect_per_items: config.collect_per_items.max(1),
            collect_hit_count_min: config.collect_hit_count_min,
            sweep_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Looks up a plan, recording a hit when found
    pub fn get(&self, key: &PlanKey) -> Option<Arc<CompiledPlan>> {
        match self.entries.get(key) {
            Some(entry) => {
                entry.record_hit();
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sql = key.sql(), hits = entry.hits(), "plan cache hit");
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sql = key.sql(), "plan cache miss");
                None
            }
        }
    }

    /// Returns the published plan for `key`, building it with `factory` on a miss
    ///
    /// The factory runs outside any lock and may run on several threads at
    /// once; the first published plan wins and every caller receives it. A
    /// failing factory inserts nothing.
    pub fn get_or_create<F>(&self, key: &PlanKey, factory: F) -> Result<Arc<CompiledPlan>>
    where
        F: FnOnce() -> Result<CompiledPlan>,
    {
        if let Some(plan) = self.get(key) {
            return Ok(plan);
        }

        let built = Arc::new(factory()?);
        let (published, inserted) = match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&built));
                (built, true)
            }
        };

        if inserted {
            self.after_insert();
        }
        Ok(published)
    }

    /// Like [`get_or_create`](Self::get_or_create), but with `add_to_cache`
    /// unset a missing plan is built for this call only and never published
    pub fn resolve<F>(&self, key: &PlanKey, add_to_cache: bool, factory: F) -> Result<Arc<CompiledPlan>>
    where
        F: FnOnce() -> Result<CompiledPlan>,
    {
        if add_to_cache {
            return self.get_or_create(key, factory);
        }
        match self.get(key) {
            Some(plan) => Ok(plan),
            None => Ok(Arc::new(factory()?)),
        }
    }

    fn after_insert(&self) {
        let count = self.insertions.fetch_add(1, Ordering::AcqRel) + 1;
        if count < self.collect_per_items {
            return;
        }
        if let Some(_guard) = self.sweep_lock.try_lock() {
            self.insertions.store(0, Ordering::Release);
            let before = self.entries.len();
            let floor = self.collect_hit_count_min;
            self.entries.retain(|_, plan| plan.hits() > floor);
            self.sweeps.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                before,
                after = self.entries.len(),
                floor,
                "plan cache sweep"
            );
        }
    }

    /// Removes every entry and notifies purge listeners
    pub fn purge(&self) {
        self.entries.clear();
        tracing::debug!("plan cache purged");
        let listeners: Vec<PurgeListener> = self.listeners.read().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Removes entries whose declared result shape, or one of its
    /// multi-map shapes, is `result`
    pub fn purge_by_result_type(&self, result: TypeKey) {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| key.result() != Some(result) && !key.others().contains(&result));
        tracing::debug!(
            type_name = result.name(),
            removed = before.saturating_sub(self.entries.len()),
            "plan cache purged by result type"
        );
    }

    /// Registers a callback fired after every [`purge`](Self::purge)
    pub fn on_purged<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Number of cached plans
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached SQL with at most `ignore_hit_count_above` hits, most used first
    pub fn cached_sql(&self, ignore_hit_count_above: u64) -> Vec<CachedSql> {
        let mut out: Vec<CachedSql> = self
            .entries
            .iter()
            .filter(|e| e.value().hits() <= ignore_hit_count_above)
            .map(|e| CachedSql {
                connection: e.key().connection().to_string(),
                sql: e.key().sql().to_string(),
                hits: e.value().hits(),
            })
            .collect();
        out.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.sql.cmp(&b.sql)));
        out
    }

    /// Key hashes shared by more than one distinct key, with their counts
    pub fn hash_collisions(&self) -> Vec<(u64, usize)> {
        let mut counts: FxHashMap<u64, usize> = FxHashMap::default();
        for entry in self.entries.iter() {
            *counts.entry(entry.key().hash_code()).or_insert(0) += 1;
        }
        let mut out: Vec<(u64, usize)> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
        out.sort_unstable();
        out
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}
