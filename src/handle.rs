//! Handle table mapping opaque numeric handles to managed objects.
//!
//! The native side never sees a Rust reference. It holds a [`Handle`], and
//! every call back into the bridge resolves that handle through a
//! [`HandleTable`]. Handles come from a monotonically increasing counter, so
//! a value is never handed out twice by the same table.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::HandleError;

const SHARD_COUNT: usize = 16;

/// Opaque, process-unique token for a managed object.
///
/// Zero is reserved as the null value on the C side, see
/// [`Handle::into_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Convert a raw value received from the native side.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    /// Raw value for the native side.
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }

    /// Raw value of an optional handle, `0` for none.
    pub fn into_raw(handle: Option<Handle>) -> u64 {
        handle.map(Handle::as_raw).unwrap_or(0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Removal policy of a handle table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePolicy {
    /// May be removed by either side, and the stored object may be replaced.
    Removable,
    /// Written once, read many times, removed exactly once at teardown.
    SingleOwner,
}

struct Entry<T> {
    object: T,
    policy: HandlePolicy,
}

/// Thread-safe handle table.
///
/// Values are cloned out on lookup, so `T` is normally an `Arc` or an enum of
/// `Arc`s. No lock is held once a method returns.
pub struct HandleTable<T> {
    shards: Vec<RwLock<HashMap<Handle, Entry<T>>>>,
    next: AtomicU64,
}

impl<T: Clone> HandleTable<T> {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            next: AtomicU64::new(1),
        }
    }

    /// Store an object and return its fresh handle.
    pub fn register(&self, object: T, policy: HandlePolicy) -> Handle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // The counter starts at one and a u64 does not wrap in practice.
        let handle = Handle::from_raw(raw).unwrap_or_else(|| unreachable!("handle counter wrapped"));

        self.write_shard(handle)
            .insert(handle, Entry { object, policy });
        handle
    }

    /// Look up the object behind a handle.
    pub fn resolve(&self, handle: Handle) -> Result<T, HandleError> {
        self.read_shard(handle)
            .get(&handle)
            .map(|entry| entry.object.clone())
            .ok_or(HandleError::NotFound(handle))
    }

    /// Detach and return the object. Exactly one concurrent caller succeeds.
    pub fn remove(&self, handle: Handle) -> Result<T, HandleError> {
        self.write_shard(handle)
            .remove(&handle)
            .map(|entry| entry.object)
            .ok_or(HandleError::NotFound(handle))
    }

    /// Remove the entry only if `predicate` accepts its object.
    ///
    /// Returns `Ok(None)` and leaves the entry untouched when the predicate
    /// rejects it.
    pub fn take_if(
        &self,
        handle: Handle,
        predicate: impl FnOnce(&T) -> bool,
    ) -> Result<Option<T>, HandleError> {
        let mut shard = self.write_shard(handle);
        let entry = shard.get(&handle).ok_or(HandleError::NotFound(handle))?;
        if !predicate(&entry.object) {
            return Ok(None);
        }
        Ok(shard.remove(&handle).map(|entry| entry.object))
    }

    /// Swap the object behind a removable handle, returning the previous one.
    pub fn replace(&self, handle: Handle, object: T) -> Result<T, HandleError> {
        let mut shard = self.write_shard(handle);
        let entry = shard
            .get_mut(&handle)
            .ok_or(HandleError::NotFound(handle))?;
        if entry.policy == HandlePolicy::SingleOwner {
            return Err(HandleError::Immutable(handle));
        }
        Ok(std::mem::replace(&mut entry.object, object))
    }

    /// Policy of a live handle.
    pub fn policy(&self, handle: Handle) -> Option<HandlePolicy> {
        self.read_shard(handle).get(&handle).map(|entry| entry.policy)
    }

    /// Check if a handle is live.
    pub fn contains(&self, handle: Handle) -> bool {
        self.read_shard(handle).contains_key(&handle)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(handle: Handle) -> usize {
        (handle.as_raw() % SHARD_COUNT as u64) as usize
    }

    // A panic while a shard lock is held cannot leave an entry half-written,
    // so poisoned locks are recovered rather than propagated.
    fn read_shard(&self, handle: Handle) -> RwLockReadGuard<'_, HashMap<Handle, Entry<T>>> {
        self.shards[Self::shard_index(handle)]
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn write_shard(&self, handle: Handle) -> RwLockWriteGuard<'_, HashMap<Handle, Entry<T>>> {
        self.shards[Self::shard_index(handle)]
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
