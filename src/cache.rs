//! Type-erased storage for intermediate results of functors and residual linearizations.
//!
//! Entries are keyed by the identity of the functor that produced them and, for per-point
//! data, the quadrature point. Two scopes exist:
//!
//! - [`CacheScope::Setup`] entries (such as prepared symbolic derivatives) are computed once and
//!   reused for every cell. If the assembler was given a persistent [`DifferentiationCache`],
//!   they live in that cache's slot for the current worker and survive across assembly passes.
//! - [`CacheScope::Visitation`] entries are only valid while one cell or face is visited and are
//!   discarded by [`DataStorage::begin_visitation`].
use std::any::Any;
use std::collections::hash_map::Entry;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use crate::symbolic::FunctorId;

/// The key of a cache entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    functor: FunctorId,
    tag: &'static str,
    q_point: Option<usize>,
}

impl CacheKey {
    /// A key for data that does not depend on the quadrature point.
    pub fn setup(functor: FunctorId, tag: &'static str) -> Self {
        Self {
            functor,
            tag,
            q_point: None,
        }
    }

    /// A key for data computed at a single quadrature point.
    pub fn quadrature_point(functor: FunctorId, tag: &'static str, q_point: usize) -> Self {
        Self {
            functor,
            tag,
            q_point: Some(q_point),
        }
    }

    pub fn functor(&self) -> FunctorId {
        self.functor
    }

    pub fn q_point(&self) -> Option<usize> {
        self.q_point
    }
}

/// A map from [`CacheKey`]s to values of arbitrary type.
#[derive(Default)]
pub struct DataStorage {
    entries: FxHashMap<CacheKey, Box<dyn Any + Send + Sync>>,
    visitations: u64,
}

impl Debug for DataStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStorage")
            .field("n_entries", &self.entries.len())
            .field("visitations", &self.visitations)
            .finish()
    }
}

fn downcast_mut<'a, V: Any>(key: &CacheKey, entry: &'a mut Box<dyn Any + Send + Sync>) -> &'a mut V {
    entry.downcast_mut::<V>().unwrap_or_else(|| {
        panic!(
            "Cache entry {key:?} holds a value of a different type than {}",
            std::any::type_name::<V>()
        )
    })
}

impl DataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The number of times [`begin_visitation`](Self::begin_visitation) has been called.
    pub fn visitations(&self) -> u64 {
        self.visitations
    }

    /// Insert a value unless the key is already present.
    ///
    /// Returns the stored value, which is the existing one if the key was present.
    /// Panics if an existing entry has a different type.
    pub fn add_unique<V: Any + Send + Sync>(&mut self, key: CacheKey, value: V) -> &mut V {
        self.get_or_insert_with(key, || value)
    }

    pub fn get<V: Any>(&self, key: &CacheKey) -> Option<&V> {
        self.entries.get(key).and_then(|entry| entry.downcast_ref())
    }

    pub fn get_mut<V: Any>(&mut self, key: &CacheKey) -> Option<&mut V> {
        self.entries.get_mut(key).and_then(|entry| entry.downcast_mut())
    }

    pub fn get_or_insert_with<V, F>(&mut self, key: CacheKey, create: F) -> &mut V
    where
        V: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Box::new(create()));
        downcast_mut(&key, entry)
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with), but creation may fail.
    ///
    /// Nothing is stored if creation fails.
    pub fn get_or_try_insert_with<V, E, F>(&mut self, key: CacheKey, create: F) -> Result<&mut V, E>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Result<V, E>,
    {
        let entry = match self.entries.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Box::new(create()?)),
        };
        Ok(downcast_mut(&key, entry))
    }

    /// Start visiting a new cell or face: drops every per-quadrature-point entry.
    pub fn begin_visitation(&mut self) {
        self.entries.retain(|key, _| key.q_point.is_none());
        self.visitations += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A user-owned cache with one [`DataStorage`] slot per assembly worker.
///
/// The number of slots is fixed at construction. An assembler that runs with more workers than
/// the cache has slots refuses to start.
pub struct DifferentiationCache {
    slots: Vec<Mutex<DataStorage>>,
}

impl Debug for DifferentiationCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DifferentiationCache")
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

impl Default for DifferentiationCache {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DifferentiationCache {
    /// A cache with `queue_length` slots.
    pub fn new(queue_length: usize) -> Self {
        assert!(queue_length > 0, "A differentiation cache needs at least one slot");
        Self {
            slots: (0..queue_length).map(|_| Mutex::new(DataStorage::new())).collect(),
        }
    }

    pub fn queue_length(&self) -> usize {
        self.slots.len()
    }

    /// Lock the storage of the given slot. Panics if the slot index is out of range.
    pub fn lock(&self, slot: usize) -> MutexGuard<'_, DataStorage> {
        assert!(
            slot < self.slots.len(),
            "Cache slot {slot} out of range (queue length {})",
            self.slots.len()
        );
        self.slots[slot].lock()
    }

    pub fn clear(&self) {
        for slot in &self.slots {
            slot.lock().clear();
        }
    }
}

/// The lifetime of a cache entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Setup,
    Visitation,
}

/// Mutable access to either a worker's own storage or a locked persistent slot.
pub enum CacheRef<'a> {
    Local(&'a mut DataStorage),
    Shared(MutexGuard<'a, DataStorage>),
}

impl<'a> Deref for CacheRef<'a> {
    type Target = DataStorage;

    fn deref(&self) -> &DataStorage {
        match self {
            Self::Local(storage) => storage,
            Self::Shared(guard) => guard,
        }
    }
}

impl<'a> DerefMut for CacheRef<'a> {
    fn deref_mut(&mut self) -> &mut DataStorage {
        match self {
            Self::Local(storage) => storage,
            Self::Shared(guard) => guard,
        }
    }
}

/// The cache view of one assembly worker.
pub struct FunctorCache<'a> {
    local: &'a mut DataStorage,
    persistent: Option<&'a DifferentiationCache>,
    slot: usize,
}

impl<'a> FunctorCache<'a> {
    /// Panics if a persistent cache is given and `slot` is not below its queue length.
    pub fn new(local: &'a mut DataStorage, persistent: Option<&'a DifferentiationCache>, slot: usize) -> Self {
        if let Some(cache) = persistent {
            assert!(
                slot < cache.queue_length(),
                "Worker slot {slot} exceeds the cache queue length {}",
                cache.queue_length()
            );
        }
        Self { local, persistent, slot }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn has_persistent_cache(&self) -> bool {
        self.persistent.is_some()
    }

    /// The storage for entries of the given scope.
    pub fn get(&mut self, scope: CacheScope) -> CacheRef<'_> {
        match (scope, self.persistent) {
            (CacheScope::Setup, Some(cache)) => CacheRef::Shared(cache.lock(self.slot)),
            _ => CacheRef::Local(&mut *self.local),
        }
    }

    /// The worker's own storage, which is where per-visit results are written.
    pub fn destination(&mut self) -> &mut DataStorage {
        &mut *self.local
    }

    /// Start visiting a new cell or face.
    pub fn begin_visitation(&mut self) {
        self.local.begin_visitation();
    }
}
