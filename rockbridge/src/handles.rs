//! Slot-indexed handle table.
//!
//! Native code can only hold small fixed-width values, so objects that must be
//! reachable from the other side of the FFI boundary are parked here and
//! referred to by a [`Handle`]. The table keeps the object alive until the
//! matching release.
//!
//! Slots are assigned lowest-index first, and a released slot is reused by the
//! very next [`HandleTable::retain`]. Each slot also carries a generation that is
//! bumped on release, so a handle that outlived its object is recognized as
//! stale instead of silently resolving to whatever reused the slot.

use log::{debug, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;

use crate::config::HandleTableOptions;

/// Opaque reference to an object retained in a [`HandleTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index of this handle.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot at the time this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the handle into a `u64` suitable for passing across the FFI
    /// boundary: `generation << 32 | index`.
    pub fn into_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Reverses [`Handle::into_raw`].
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            generation: 0,
            entry: None,
        }
    }
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    live: usize,
}

/// Registry mapping small integer slots to live objects.
///
/// Every operation runs under a single mutex. Use [`HandleTable::lock`] when a
/// caller needs several operations to happen atomically.
pub struct HandleTable<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    /// Creates a table with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(HandleTableOptions::default().initial_capacity)
    }

    /// Creates a table with `capacity` empty slots. A capacity of zero is
    /// treated as one so that doubling always makes progress.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(1));
        slots.resize_with(capacity.max(1), Slot::empty);
        Self {
            inner: Mutex::new(Slots { slots, live: 0 }),
        }
    }

    /// Creates a table from validated options.
    pub fn from_options(options: &HandleTableOptions) -> Result<Self, crate::Error> {
        options.validate()?;
        Ok(Self::with_capacity(options.initial_capacity))
    }

    /// Locks the table for a sequence of operations.
    pub fn lock(&self) -> HandleTableGuard<'_, T> {
        HandleTableGuard {
            inner: self.inner.lock(),
        }
    }

    /// Stores `value` in the lowest empty slot, growing the table if needed.
    pub fn retain(&self, value: T) -> Handle {
        self.lock().retain(value)
    }

    /// Clears the slot referenced by `handle` and returns its value. Releasing an
    /// empty slot or a stale handle does nothing.
    pub fn release(&self, handle: Handle) -> Option<T> {
        self.lock().release(handle)
    }

    /// Returns a clone of the value referenced by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is empty or stale: the native side used a handle after
    /// releasing it, and the table no longer matches the native object graph.
    pub fn lookup(&self, handle: Handle) -> T
    where
        T: Clone,
    {
        match self.try_lookup(handle) {
            Some(value) => value,
            None => unregistered_handle(handle),
        }
    }

    /// Returns a clone of the value referenced by `handle`, or `None` if the
    /// handle is empty or stale.
    pub fn try_lookup(&self, handle: Handle) -> Option<T>
    where
        T: Clone,
    {
        self.lock().get(handle).cloned()
    }

    /// Returns true if `handle` currently references a live value.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.lock().get(handle).is_some()
    }

    /// Number of slots, live or empty.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a [`HandleTable`] for the lifetime of the guard.
pub struct HandleTableGuard<'a, T> {
    inner: MutexGuard<'a, Slots<T>>,
}

impl<T> HandleTableGuard<'_, T> {
    /// See [`HandleTable::retain`].
    pub fn retain(&mut self, value: T) -> Handle {
        let inner = &mut *self.inner;
        let slots = &mut inner.slots;
        let index = match slots.iter().position(|slot| slot.entry.is_none()) {
            Some(index) => index,
            None => {
                let old_capacity = slots.len();
                slots.resize_with(old_capacity * 2, Slot::empty);
                debug!(
                    "grew handle table [old_capacity={}, new_capacity={}]",
                    old_capacity,
                    slots.len()
                );
                old_capacity
            }
        };

        let index = match u32::try_from(index) {
            Ok(index) => index,
            Err(_) => handle_space_exhausted(index),
        };
        let slot = &mut slots[index as usize];
        slot.entry = Some(value);
        inner.live += 1;

        let handle = Handle {
            index,
            generation: slot.generation,
        };
        trace!("retained handle [handle={}]", handle);
        handle
    }

    /// See [`HandleTable::release`].
    pub fn release(&mut self, handle: Handle) -> Option<T> {
        let inner = &mut *self.inner;
        let Some(slot) = inner.slots.get_mut(handle.index()) else {
            warn!("ignoring release of unknown handle [handle={}]", handle);
            return None;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            warn!("ignoring release of stale handle [handle={}]", handle);
            return None;
        }

        let value = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        inner.live -= 1;
        trace!("released handle [handle={}]", handle);
        value
    }

    /// Returns the value referenced by `handle`, if live.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.inner
            .slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Returns the value referenced by `handle` mutably, if live.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.inner
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

#[allow(clippy::panic)]
#[cold]
pub(crate) fn unregistered_handle(handle: Handle) -> ! {
    panic!("handle {handle} is not registered; the handle table and the native object graph are out of sync")
}

#[allow(clippy::panic)]
#[cold]
fn handle_space_exhausted(index: usize) -> ! {
    panic!("handle table exhausted the 32-bit index space at slot {index}")
}
