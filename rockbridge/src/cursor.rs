//! Batched range-scan cursors.
//!
//! Crossing into the native engine costs far more than reading a record, so a
//! [`BatchedCursor`] asks the native cursor for many records at once. Records
//! are packed into an arena owned by the Rust side and served from there until
//! the batch is drained. The packed layout of each record is:
//!
//! ```text
//! | key_len (u32 BE) | key | value_len (u32 BE) | value |
//! ```
//!
//! After a batch the native cursor rests on the last record written, so
//! resuming with another batch, or re-seeking for `prev`, needs nothing beyond
//! the native cursor's own position. Records too large for the arena are read
//! through the native single-record accessors instead.

use bytes::BufMut;
use log::trace;
use std::ops::Range;

use crate::config::CursorOptions;
use crate::error::BridgeError;

const LEN_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// The native range-scan primitive driven by a [`BatchedCursor`].
///
/// `key` and `value` are only meaningful while `valid` returns true. `next`
/// and `prev` require `valid`: once the cursor runs off either end it stays
/// invalid until one of the seek calls repositions it.
pub trait RawCursor {
    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn next(&mut self);

    fn prev(&mut self);

    /// Positions at the first key at or after `key`.
    fn seek(&mut self, key: &[u8]);

    /// Positions at the last key at or before `key`.
    fn seek_for_prev(&mut self, key: &[u8]);

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Returns the engine's error message if the scan failed.
    fn status(&self) -> Result<(), String>;

    /// Steps off the current record and packs as many whole records as fit
    /// into `arena`, returning the number of bytes written. See [`fill_batch`].
    fn next_batch(&mut self, arena: &mut [u8]) -> usize {
        fill_batch(self, arena)
    }
}

/// Batched fetch built on the single-record primitives of `cursor`.
///
/// Steps `cursor` off its current record, then writes records into `arena`
/// while they fit. On return the cursor is positioned on the last record
/// written. If nothing was written it stays on the first record that did not
/// fit, or is invalid at the end of the range. An invalid cursor is left
/// untouched and nothing is written.
pub fn fill_batch<C: RawCursor + ?Sized>(cursor: &mut C, arena: &mut [u8]) -> usize {
    if !cursor.valid() {
        return 0;
    }
    cursor.next();

    let mut written = 0;
    let mut last_record = None;
    while cursor.valid() {
        let Some(len) = encode_record(&mut arena[written..], cursor.key(), cursor.value()) else {
            break;
        };
        last_record = Some(written);
        written += len;
        cursor.next();
    }

    if let Some(start) = last_record {
        // The loop stepped past the last record; seek back so the cursor rests
        // on it.
        if let Some((key, _, _)) = decode_record(&arena[start..written]) {
            cursor.seek(key);
        }
    }
    written
}

/// Size in bytes of a packed record.
pub fn record_len(key_len: usize, value_len: usize) -> usize {
    2 * LEN_PREFIX_SIZE + key_len + value_len
}

/// Packs one record at the front of `buf`. Returns the bytes written, or
/// `None` if the record does not fit.
pub fn encode_record(mut buf: &mut [u8], key: &[u8], value: &[u8]) -> Option<usize> {
    let len = record_len(key.len(), value.len());
    if len > buf.len() {
        return None;
    }
    let key_len = u32::try_from(key.len()).ok()?;
    let value_len = u32::try_from(value.len()).ok()?;
    buf.put_u32(key_len);
    buf.put_slice(key);
    buf.put_u32(value_len);
    buf.put_slice(value);
    Some(len)
}

/// Reads the record at the front of `buf`, returning its key, value and
/// packed size. Returns `None` if `buf` does not start with a whole record.
pub fn decode_record(buf: &[u8]) -> Option<(&[u8], &[u8], usize)> {
    let key_len = read_len_prefix(buf)?;
    let key_end = LEN_PREFIX_SIZE.checked_add(key_len)?;
    let key = buf.get(LEN_PREFIX_SIZE..key_end)?;

    let rest = buf.get(key_end..)?;
    let value_len = read_len_prefix(rest)?;
    let value_end = LEN_PREFIX_SIZE.checked_add(value_len)?;
    let value = rest.get(LEN_PREFIX_SIZE..value_end)?;

    Some((key, value, key_end + value_end))
}

fn read_len_prefix(buf: &[u8]) -> Option<usize> {
    let prefix: [u8; LEN_PREFIX_SIZE] = buf.get(..LEN_PREFIX_SIZE)?.try_into().ok()?;
    usize::try_from(u32::from_be_bytes(prefix)).ok()
}

/// Arena size to use after a batch of `current` bytes was fully consumed.
/// Doubles below `max`, clamping at `max`; never shrinks.
pub fn grow_arena(current: usize, max: usize) -> usize {
    if current < max {
        current.saturating_mul(2).min(max)
    } else {
        current
    }
}

/// Counters describing how a [`BatchedCursor`] fetched its records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorStats {
    /// Batched fetches issued to the native cursor.
    pub batches: u64,
    /// Records delivered through the arena.
    pub arena_records: u64,
    /// Fetches that returned nothing because the next record exceeded the
    /// arena, leaving it to be read through the native accessors.
    pub fallback_reads: u64,
}

/// Side of the range an invalid [`BatchedCursor`] ran off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum End {
    BeforeFirst,
    AfterLast,
}

/// A cursor that fetches records from a [`RawCursor`] in batches.
///
/// Slices returned by [`key`](Self::key) and [`value`](Self::value) borrow the
/// cursor and are invalidated by the next positioning call.
///
/// Running off either end leaves the cursor invalid, and stepping back
/// returns to the boundary record: `prev` after the last record lands on the
/// last record, `next` before the first lands on the first. The native cursor
/// is never stepped while invalid; the cursor repositions it instead.
pub struct BatchedCursor<C: RawCursor> {
    raw: C,
    arena: Vec<u8>,
    max_arena_size: usize,
    /// Unconsumed part of the last batch. `None` until the first fetch after a
    /// reposition.
    remainder: Option<Range<usize>>,
    /// Set while the native cursor is invalid because the scan ran off an end.
    end: Option<End>,
    stats: CursorStats,
}

impl<C: RawCursor> BatchedCursor<C> {
    /// Wraps `raw` with the default arena bounds.
    pub fn new(raw: C) -> Self {
        let options = CursorOptions::default();
        Self::build(raw, &options)
    }

    /// Wraps `raw`, sizing the arena by `options`.
    pub fn with_options(raw: C, options: &CursorOptions) -> Result<Self, crate::Error> {
        options.validate()?;
        Ok(Self::build(raw, options))
    }

    fn build(raw: C, options: &CursorOptions) -> Self {
        Self {
            raw,
            arena: vec![0; options.min_arena_size],
            max_arena_size: options.max_arena_size,
            remainder: None,
            end: None,
            stats: CursorStats::default(),
        }
    }

    /// Returns false once the cursor has moved past either end of the range.
    pub fn valid(&self) -> bool {
        self.has_remainder() || self.raw.valid()
    }

    /// Returns true if the cursor is valid and its key starts with `prefix`.
    pub fn valid_for_prefix(&self, prefix: &[u8]) -> bool {
        self.key().is_some_and(|key| key.starts_with(prefix))
    }

    pub fn key(&self) -> Option<&[u8]> {
        match self.current_record() {
            Some((key, _)) => Some(key),
            None if self.raw.valid() => Some(self.raw.key()),
            None => None,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self.current_record() {
            Some((_, value)) => Some(value),
            None if self.raw.valid() => Some(self.raw.value()),
            None => None,
        }
    }

    /// Moves to the next record, fetching a new batch once the current one is
    /// drained.
    pub fn next(&mut self) {
        match self.end {
            Some(End::AfterLast) => return,
            Some(End::BeforeFirst) => {
                self.raw.seek_to_first();
                self.reposition(End::AfterLast);
                return;
            }
            None => {}
        }

        if let Some(range) = self.remainder.as_mut().filter(|r| !r.is_empty()) {
            let len = match decode_record(&self.arena[range.clone()]) {
                Some((_, _, len)) => len,
                None => framing_violation(range.len()),
            };
            range.start += len;
        }
        if self.has_remainder() || !self.raw.valid() {
            return;
        }

        if self.remainder.is_some() {
            let grown = grow_arena(self.arena.len(), self.max_arena_size);
            if grown != self.arena.len() {
                trace!(
                    "growing cursor arena [from={}, to={}]",
                    self.arena.len(),
                    grown
                );
                self.arena = vec![0; grown];
            }
        }
        self.fetch();
        if !self.has_remainder() && !self.raw.valid() {
            self.end = Some(End::AfterLast);
        }
    }

    /// Moves to the previous record.
    pub fn prev(&mut self) {
        match self.end {
            Some(End::BeforeFirst) => return,
            Some(End::AfterLast) => {
                self.raw.seek_to_last();
                self.reposition(End::BeforeFirst);
                return;
            }
            None => {}
        }

        if let Some(range) = self.remainder.clone().filter(|r| !r.is_empty()) {
            // The native cursor is ahead of the logical position; bring it back
            // before stepping.
            let len = range.len();
            match decode_record(&self.arena[range]) {
                Some((key, _, _)) => self.raw.seek(key),
                None => framing_violation(len),
            }
        }
        self.remainder = None;
        if !self.raw.valid() {
            return;
        }
        self.raw.prev();
        if !self.raw.valid() {
            self.end = Some(End::BeforeFirst);
        }
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.raw.seek(key);
        self.reposition(End::AfterLast);
    }

    pub fn seek_for_prev(&mut self, key: &[u8]) {
        self.raw.seek_for_prev(key);
        self.reposition(End::BeforeFirst);
    }

    pub fn seek_to_first(&mut self) {
        self.raw.seek_to_first();
        self.reposition(End::AfterLast);
    }

    pub fn seek_to_last(&mut self) {
        self.raw.seek_to_last();
        self.reposition(End::BeforeFirst);
    }

    /// Returns the error the native cursor hit, if any.
    pub fn status(&self) -> Result<(), crate::Error> {
        self.raw
            .status()
            .map_err(|msg| BridgeError::CursorError(msg).into())
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    /// Current arena size in bytes.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Bytes of the last batch not yet consumed.
    pub fn remainder_len(&self) -> usize {
        self.remainder.as_ref().map_or(0, |r| r.len())
    }

    /// Closes the cursor, releasing the native cursor and the arena.
    pub fn close(self) {
        trace!("closing batched cursor [stats={:?}]", self.stats);
    }

    /// Drops the batch after the native cursor moved. If the move left it
    /// invalid, the scan is past `missed_side`.
    fn reposition(&mut self, missed_side: End) {
        self.remainder = None;
        self.end = if self.raw.valid() {
            None
        } else {
            Some(missed_side)
        };
    }

    fn has_remainder(&self) -> bool {
        self.remainder.as_ref().is_some_and(|r| !r.is_empty())
    }

    fn current_record(&self) -> Option<(&[u8], &[u8])> {
        let range = self.remainder.clone().filter(|r| !r.is_empty())?;
        let len = range.len();
        match decode_record(&self.arena[range]) {
            Some((key, value, _)) => Some((key, value)),
            None => framing_violation(len),
        }
    }

    fn fetch(&mut self) {
        let written = self.raw.next_batch(&mut self.arena);
        if written > self.arena.len() {
            oversized_batch(written, self.arena.len());
        }

        let mut records = 0;
        let mut rest = &self.arena[..written];
        while !rest.is_empty() {
            match decode_record(rest) {
                Some((_, _, len)) => rest = &rest[len..],
                None => framing_violation(rest.len()),
            }
            records += 1;
        }

        self.stats.batches += 1;
        self.stats.arena_records += records;
        if written == 0 && self.raw.valid() {
            self.stats.fallback_reads += 1;
            trace!(
                "record exceeds cursor arena, reading natively [arena_len={}]",
                self.arena.len()
            );
        }
        self.remainder = Some(0..written);
    }
}

#[allow(clippy::panic)]
#[cold]
fn framing_violation(remaining: usize) -> ! {
    panic!("cursor arena does not start with a whole record [remaining={remaining}]")
}

#[allow(clippy::panic)]
#[cold]
fn oversized_batch(written: usize, arena_len: usize) -> ! {
    panic!("batched fetch wrote past the arena [written={written}, arena_len={arena_len}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_ARENA_SIZE;
    use crate::mem::MemStore;
    use crate::ErrorKind;
    use proptest::prelude::*;
    use rstest::rstest;

    fn seeded_store() -> MemStore {
        let store = MemStore::new();
        for i in 100..200 {
            store.put(i.to_string(), format!("{i:x}"));
        }
        store
    }

    fn expect<C: RawCursor>(cursor: &BatchedCursor<C>, i: u32) {
        assert!(cursor.valid());
        assert_eq!(cursor.key(), Some(i.to_string().as_bytes()));
        assert_eq!(cursor.value(), Some(format!("{i:x}").as_bytes()));
    }

    #[test]
    fn test_cursor_iterates_all_keys() {
        let store = MemStore::new();
        for key in ["key1", "key2", "key3"] {
            store.put(key, "val");
        }

        let mut cursor = BatchedCursor::new(store.cursor());
        let mut keys = Vec::new();
        cursor.seek_to_first();
        while cursor.valid() {
            keys.push(cursor.key().map(<[u8]>::to_vec));
            cursor.next();
        }
        assert!(cursor.status().is_ok());
        assert_eq!(
            keys,
            vec![
                Some(b"key1".to_vec()),
                Some(b"key2".to_vec()),
                Some(b"key3".to_vec())
            ]
        );
    }

    #[test]
    fn test_cursor_seeking() {
        let store = seeded_store();
        let mut cursor = BatchedCursor::new(store.cursor());

        // Next after seek_to_first works repeatedly.
        for _ in 0..2 {
            cursor.seek_to_first();
            expect(&cursor, 100);
            cursor.next();
            expect(&cursor, 101);
            cursor.next();
            expect(&cursor, 102);
        }

        // As does prev from inside a batch.
        cursor.prev();
        expect(&cursor, 101);
        cursor.next();
        expect(&cursor, 102);

        cursor.seek(b"132");
        expect(&cursor, 132);
        cursor.next();
        expect(&cursor, 133);
        cursor.seek(b"122");
        expect(&cursor, 122);
        cursor.next();
        expect(&cursor, 123);

        cursor.seek_to_last();
        expect(&cursor, 199);
        cursor.prev();
        expect(&cursor, 198);
        cursor.next();
        expect(&cursor, 199);

        cursor.next();
        assert!(!cursor.valid());
        assert_eq!(cursor.key(), None);

        cursor.seek_to_first();
        expect(&cursor, 100);
        cursor.next();
        expect(&cursor, 101);
        cursor.prev();
        expect(&cursor, 100);

        cursor.prev();
        assert!(!cursor.valid());

        // At most two consecutive nexts, so the arena grew exactly once.
        assert_eq!(cursor.arena_len(), 2 * crate::config::DEFAULT_MIN_ARENA_SIZE);
    }

    #[test]
    fn test_small_arena_falls_back_then_grows() {
        let store = seeded_store();
        let options = CursorOptions {
            min_arena_size: 8,
            max_arena_size: DEFAULT_MAX_ARENA_SIZE,
        };
        let mut cursor =
            BatchedCursor::with_options(store.cursor(), &options).expect("valid options");
        cursor.seek_to_first();

        // The record does not fit, so it is read natively.
        cursor.next();
        assert_eq!(cursor.remainder_len(), 0);
        expect(&cursor, 101);
        assert_eq!(cursor.stats().fallback_reads, 1);

        cursor.next();
        assert_eq!(cursor.arena_len(), 16);
        assert_eq!(cursor.remainder_len(), 13);
        expect(&cursor, 102);

        cursor.next();
        assert_eq!(cursor.arena_len(), 32);
        assert_eq!(cursor.remainder_len(), 26);
        expect(&cursor, 103);

        cursor.next();
        assert_eq!(cursor.arena_len(), 32);
        assert_eq!(cursor.remainder_len(), 13);
        expect(&cursor, 104);

        cursor.next();
        assert_eq!(cursor.arena_len(), 64);
        assert_eq!(cursor.remainder_len(), 52);
        expect(&cursor, 105);

        assert_eq!(
            cursor.stats(),
            CursorStats {
                batches: 4,
                arena_records: 7,
                fallback_reads: 1,
            }
        );
    }

    #[test]
    fn test_end_states_are_not_sticky() {
        let store = seeded_store();
        let mut cursor = BatchedCursor::new(store.cursor());

        cursor.seek(b"197");
        cursor.next();
        cursor.next();
        expect(&cursor, 199);
        cursor.next();
        assert!(!cursor.valid());
        cursor.prev();
        expect(&cursor, 199);

        cursor.seek_to_first();
        cursor.prev();
        assert!(!cursor.valid());
        cursor.next();
        expect(&cursor, 100);
        cursor.next();
        expect(&cursor, 101);
    }

    #[test]
    fn test_prev_right_after_seek_and_next() {
        let store = seeded_store();
        let mut cursor = BatchedCursor::new(store.cursor());

        cursor.seek(b"150");
        cursor.next();
        expect(&cursor, 151);
        cursor.prev();
        expect(&cursor, 150);

        cursor.seek(b"160");
        cursor.prev();
        expect(&cursor, 159);
    }

    #[test]
    fn test_seek_for_prev_discards_batch() {
        let store = seeded_store();
        let mut cursor = BatchedCursor::new(store.cursor());
        cursor.seek_to_first();
        cursor.next();
        assert!(cursor.remainder_len() > 0);

        cursor.seek_for_prev(b"150a");
        assert_eq!(cursor.remainder_len(), 0);
        expect(&cursor, 150);
        cursor.next();
        expect(&cursor, 151);
    }

    #[test]
    fn test_valid_for_prefix() {
        let store = seeded_store();
        let mut cursor = BatchedCursor::new(store.cursor());
        cursor.seek(b"18");

        let mut seen = 0;
        while cursor.valid_for_prefix(b"18") {
            seen += 1;
            cursor.next();
        }
        assert_eq!(seen, 10);
        expect(&cursor, 190);
    }

    #[test]
    fn test_status_reports_engine_error() {
        let store = seeded_store();
        store.fail_scans("corruption: checksum mismatch");

        let mut cursor = BatchedCursor::new(store.cursor());
        cursor.seek_to_first();
        assert!(!cursor.valid());

        let err = cursor.status().expect_err("scan should fail");
        assert_eq!(err.kind(), ErrorKind::Iterator);
        assert!(err.message().contains("checksum mismatch"));
        cursor.close();
    }

    #[test]
    fn test_with_options_rejects_inverted_bounds() {
        let store = seeded_store();
        let options = CursorOptions {
            min_arena_size: 64,
            max_arena_size: 32,
        };
        let result = BatchedCursor::with_options(store.cursor(), &options);
        assert!(matches!(result, Err(e) if e.kind() == ErrorKind::Invalid));
    }

    #[rstest]
    #[case(8, 64, 16)]
    #[case(32, 64, 64)]
    #[case(48, 64, 64)]
    #[case(64, 64, 64)]
    #[case(100, 64, 100)]
    fn test_grow_arena(#[case] current: usize, #[case] max: usize, #[case] expected: usize) {
        assert_eq!(grow_arena(current, max), expected);
    }

    #[test]
    fn test_fill_batch_rests_on_last_written_record() {
        let store = seeded_store();
        let mut raw = store.cursor();
        raw.seek_to_first();

        let mut arena = [0u8; 30];
        let written = fill_batch(&mut raw, &mut arena);
        assert_eq!(written, 26);
        assert_eq!(raw.key(), b"102");

        let (key, value, len) = decode_record(&arena).expect("first record");
        assert_eq!((key, value, len), (&b"101"[..], &b"65"[..], 13));
    }

    #[test]
    fn test_fill_batch_stops_at_end_of_range() {
        let store = seeded_store();
        let mut raw = store.cursor();
        raw.seek(b"198");

        let mut arena = [0u8; 4096];
        assert_eq!(fill_batch(&mut raw, &mut arena), 13);
        assert_eq!(raw.key(), b"199");
        assert_eq!(fill_batch(&mut raw, &mut arena), 0);
        assert!(!raw.valid());
    }

    #[test]
    fn test_fill_batch_leaves_invalid_cursor_untouched() {
        let store = seeded_store();
        let mut raw = store.cursor();

        let mut arena = [0u8; 64];
        assert_eq!(fill_batch(&mut raw, &mut arena), 0);
        raw.seek(b"2");
        assert_eq!(fill_batch(&mut raw, &mut arena), 0);
        assert!(!raw.valid());
    }

    #[test]
    fn test_fill_batch_leaves_oversized_record() {
        let store = seeded_store();
        let mut raw = store.cursor();
        raw.seek_to_first();

        let mut arena = [0u8; 12];
        assert_eq!(fill_batch(&mut raw, &mut arena), 0);
        assert_eq!(raw.key(), b"101");
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let mut buf = [0u8; 16];
        let len = encode_record(&mut buf, b"key", b"value").expect("fits");
        assert_eq!(len, 16);
        assert!(decode_record(&buf[..15]).is_none());
        assert!(encode_record(&mut buf[..15], b"key", b"value").is_none());
    }

    struct OverfillingCursor;

    impl RawCursor for OverfillingCursor {
        fn valid(&self) -> bool {
            true
        }
        fn key(&self) -> &[u8] {
            b""
        }
        fn value(&self) -> &[u8] {
            b""
        }
        fn next(&mut self) {}
        fn prev(&mut self) {}
        fn seek(&mut self, _key: &[u8]) {}
        fn seek_for_prev(&mut self, _key: &[u8]) {}
        fn seek_to_first(&mut self) {}
        fn seek_to_last(&mut self) {}
        fn status(&self) -> Result<(), String> {
            Ok(())
        }
        fn next_batch(&mut self, arena: &mut [u8]) -> usize {
            // Claims a record longer than what follows the prefix.
            arena[..4].copy_from_slice(&100u32.to_be_bytes());
            8
        }
    }

    #[test]
    #[should_panic(expected = "does not start with a whole record")]
    fn test_malformed_batch_panics() {
        let mut cursor = BatchedCursor::new(OverfillingCursor);
        cursor.next();
    }

    proptest! {
        #[test]
        fn test_batched_scan_matches_native_scan(
            entries in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 0..24),
                proptest::collection::vec(any::<u8>(), 0..48),
                0..64,
            ),
            min_arena_size in 1usize..128,
        ) {
            let store = MemStore::new();
            for (k, v) in &entries {
                store.put(k.clone(), v.clone());
            }
            let options = CursorOptions { min_arena_size, max_arena_size: 256 };
            let mut cursor = BatchedCursor::with_options(store.cursor(), &options)
                .expect("valid options");

            let mut forward = Vec::new();
            cursor.seek_to_first();
            while cursor.valid() {
                let key = cursor.key().map(<[u8]>::to_vec).unwrap_or_default();
                let value = cursor.value().map(<[u8]>::to_vec).unwrap_or_default();
                forward.push((key, value));
                cursor.next();
            }
            let expected: Vec<_> = entries.into_iter().collect();
            prop_assert_eq!(&forward, &expected);

            let mut backward = Vec::new();
            cursor.seek_to_last();
            while cursor.valid() {
                backward.push(cursor.key().map(<[u8]>::to_vec).unwrap_or_default());
                cursor.prev();
            }
            backward.reverse();
            let keys: Vec<_> = expected.into_iter().map(|(k, _)| k).collect();
            prop_assert_eq!(backward, keys);
        }
    }
}
