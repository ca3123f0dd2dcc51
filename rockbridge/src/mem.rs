//! An ordered in-memory key/value store whose cursors implement [`RawCursor`].
//!
//! `MemStore` plays the part of the native engine in tests and demos: it has
//! the same cursor positioning semantics, including the engine's habit of
//! reporting scan failures through `status` rather than from the positioning
//! calls themselves. Like the engine's cursors, a `MemCursor` that runs off
//! either end stays invalid until it is repositioned, and stepping it while
//! invalid is a contract violation.

use bytes::Bytes;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::cursor::RawCursor;

#[derive(Default)]
struct MemStoreInner {
    entries: BTreeMap<Bytes, Bytes>,
    scan_error: Option<String>,
}

/// Thread-safe ordered map of byte keys to byte values.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.inner.write().entries.insert(key.into(), value.into());
    }

    /// Removes `key`, returning its previous value.
    pub fn delete(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.write().entries.remove(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Opens a cursor over a snapshot of the current contents. The cursor is
    /// unpositioned until one of the seek calls is made.
    pub fn cursor(&self) -> MemCursor {
        let inner = self.inner.read();
        match &inner.scan_error {
            Some(error) => MemCursor {
                entries: Vec::new(),
                pos: None,
                error: Some(error.clone()),
            },
            None => MemCursor {
                entries: inner
                    .entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                pos: None,
                error: None,
            },
        }
    }

    /// Makes every cursor opened from now on fail with `message`.
    pub fn fail_scans(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("failing subsequent scans [message={}]", message);
        self.inner.write().scan_error = Some(message);
    }
}

/// Cursor over a [`MemStore`] snapshot.
pub struct MemCursor {
    entries: Vec<(Bytes, Bytes)>,
    pos: Option<usize>,
    error: Option<String>,
}

impl MemCursor {
    fn current(&self) -> Option<&(Bytes, Bytes)> {
        self.pos.and_then(|pos| self.entries.get(pos))
    }

    fn position(&self) -> usize {
        match self.pos {
            Some(pos) => pos,
            None => stepped_while_invalid(),
        }
    }
}

impl RawCursor for MemCursor {
    fn valid(&self) -> bool {
        self.current().is_some()
    }

    fn key(&self) -> &[u8] {
        self.current().map(|(k, _)| k.as_ref()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current().map(|(_, v)| v.as_ref()).unwrap_or_default()
    }

    fn next(&mut self) {
        let next = self.position() + 1;
        self.pos = (next < self.entries.len()).then_some(next);
    }

    fn prev(&mut self) {
        self.pos = self.position().checked_sub(1);
    }

    fn seek(&mut self, key: &[u8]) {
        let pos = self.entries.partition_point(|(k, _)| k.as_ref() < key);
        self.pos = (pos < self.entries.len()).then_some(pos);
    }

    fn seek_for_prev(&mut self, key: &[u8]) {
        let pos = self.entries.partition_point(|(k, _)| k.as_ref() <= key);
        self.pos = pos.checked_sub(1);
    }

    fn seek_to_first(&mut self) {
        self.pos = (!self.entries.is_empty()).then_some(0);
    }

    fn seek_to_last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    fn status(&self) -> Result<(), String> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[allow(clippy::panic)]
#[cold]
fn stepped_while_invalid() -> ! {
    panic!("cursor stepped while invalid; reposition it with a seek first")
}
