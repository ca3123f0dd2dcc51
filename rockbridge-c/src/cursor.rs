//! Native cursor bridge for `rockbridge-c`.
//!
//! `CRawCursor` adapts a native range-scan cursor, described by a
//! `rockbridge_raw_cursor_t` callback table, into rockbridge's `RawCursor` so it
//! can be driven by a `BatchedCursor`. Native engines without their own batched
//! fetch can call `rockbridge_raw_cursor_fill_batch` to get one.

use crate::ffi::{
    error_from_bridge_error, error_result, rockbridge_error_kind_t, rockbridge_event_fn,
    rockbridge_raw_cursor_t, rockbridge_result_t, success_result,
};
use log::trace;
use rockbridge::cursor::{fill_batch, RawCursor};
use std::ffi::c_void;
use std::os::raw::c_char;
use std::ptr;

type LenFn = unsafe extern "C" fn(context: *mut c_void, out_len: *mut usize) -> *const u8;
type KeyFn = unsafe extern "C" fn(context: *mut c_void, key: *const u8, key_len: usize);
type StepFn = unsafe extern "C" fn(context: *mut c_void);

/// `RawCursor` over a native cursor callback table.
pub struct CRawCursor {
    context_addr: usize,
    valid_fn: unsafe extern "C" fn(context: *mut c_void) -> bool,
    key_fn: LenFn,
    value_fn: LenFn,
    next_fn: StepFn,
    prev_fn: StepFn,
    seek_fn: KeyFn,
    seek_for_prev_fn: KeyFn,
    seek_to_first_fn: StepFn,
    seek_to_last_fn: StepFn,
    status_fn: unsafe extern "C" fn(
        context: *mut c_void,
        out_message: *mut *const c_char,
        out_len: *mut usize,
    ) -> bool,
    next_batch_fn:
        Option<unsafe extern "C" fn(context: *mut c_void, arena: *mut u8, arena_len: usize) -> usize>,
    destroy_fn: rockbridge_event_fn,
}

fn required<T>(callback: Option<T>, name: &str) -> Result<T, rockbridge::Error> {
    callback.ok_or_else(|| rockbridge::Error::invalid(format!("cursor callback `{name}` is null")))
}

impl CRawCursor {
    /// Takes ownership of the native cursor described by `cursor`. Its
    /// `destroy` callback runs when the returned value drops.
    ///
    /// # Safety
    ///
    /// The callbacks must implement the `rockbridge_raw_cursor_t` contract for
    /// `cursor.context`, and the context must stay valid until drop.
    pub unsafe fn new(cursor: &rockbridge_raw_cursor_t) -> Result<Self, rockbridge::Error> {
        Ok(Self {
            context_addr: cursor.context as usize,
            valid_fn: required(cursor.valid, "valid")?,
            key_fn: required(cursor.key, "key")?,
            value_fn: required(cursor.value, "value")?,
            next_fn: required(cursor.next, "next")?,
            prev_fn: required(cursor.prev, "prev")?,
            seek_fn: required(cursor.seek, "seek")?,
            seek_for_prev_fn: required(cursor.seek_for_prev, "seek_for_prev")?,
            seek_to_first_fn: required(cursor.seek_to_first, "seek_to_first")?,
            seek_to_last_fn: required(cursor.seek_to_last, "seek_to_last")?,
            status_fn: required(cursor.status, "status")?,
            next_batch_fn: cursor.next_batch,
            destroy_fn: cursor.destroy,
        })
    }

    /// Borrows the native cursor: the fetch uses the single-record callbacks
    /// and `destroy` is never called.
    unsafe fn borrowed(cursor: &rockbridge_raw_cursor_t) -> Result<Self, rockbridge::Error> {
        let mut raw = Self::new(cursor)?;
        raw.next_batch_fn = None;
        raw.destroy_fn = None;
        Ok(raw)
    }

    fn context(&self) -> *mut c_void {
        self.context_addr as *mut c_void
    }

    fn slice(&self, accessor: LenFn) -> &[u8] {
        let mut len = 0usize;
        // SAFETY: The accessor returns a slice owned by the native cursor that
        // stays valid until the cursor moves, which requires `&mut self`.
        unsafe {
            let data = accessor(self.context(), &mut len);
            if data.is_null() || len == 0 {
                return &[];
            }
            std::slice::from_raw_parts(data, len)
        }
    }
}

impl RawCursor for CRawCursor {
    fn valid(&self) -> bool {
        // SAFETY: Callback contract checked at construction.
        unsafe { (self.valid_fn)(self.context()) }
    }

    fn key(&self) -> &[u8] {
        self.slice(self.key_fn)
    }

    fn value(&self) -> &[u8] {
        self.slice(self.value_fn)
    }

    fn next(&mut self) {
        // SAFETY: Callback contract checked at construction.
        unsafe { (self.next_fn)(self.context()) }
    }

    fn prev(&mut self) {
        // SAFETY: Callback contract checked at construction.
        unsafe { (self.prev_fn)(self.context()) }
    }

    fn seek(&mut self, key: &[u8]) {
        // SAFETY: `key` is valid for the duration of the call.
        unsafe { (self.seek_fn)(self.context(), key.as_ptr(), key.len()) }
    }

    fn seek_for_prev(&mut self, key: &[u8]) {
        // SAFETY: `key` is valid for the duration of the call.
        unsafe { (self.seek_for_prev_fn)(self.context(), key.as_ptr(), key.len()) }
    }

    fn seek_to_first(&mut self) {
        // SAFETY: Callback contract checked at construction.
        unsafe { (self.seek_to_first_fn)(self.context()) }
    }

    fn seek_to_last(&mut self) {
        // SAFETY: Callback contract checked at construction.
        unsafe { (self.seek_to_last_fn)(self.context()) }
    }

    fn status(&self) -> Result<(), String> {
        let mut message: *const c_char = ptr::null();
        let mut len = 0usize;
        // SAFETY: Both out parameters are valid for writes; the message is
        // copied before any other cursor call.
        unsafe {
            if !(self.status_fn)(self.context(), &mut message, &mut len) {
                return Ok(());
            }
            if message.is_null() || len == 0 {
                return Err("native cursor failed".to_string());
            }
            let bytes = std::slice::from_raw_parts(message as *const u8, len);
            Err(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn next_batch(&mut self, arena: &mut [u8]) -> usize {
        match self.next_batch_fn {
            // SAFETY: `arena` is writable for its full length during the call.
            Some(next_batch) => unsafe {
                next_batch(self.context(), arena.as_mut_ptr(), arena.len())
            },
            None => fill_batch(self, arena),
        }
    }
}

impl Drop for CRawCursor {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy_fn {
            trace!("destroying native cursor");
            // SAFETY: The native cursor is owned by this value and destroyed
            // exactly once.
            unsafe { destroy(self.context()) };
        }
    }
}

/// Runs the default batched fetch over a native cursor using its
/// single-record callbacks.
///
/// ## Arguments
/// - `cursor`: Callback table of the native cursor. Not taken over; `destroy`
///   is not called.
/// - `arena`: Buffer receiving packed records.
/// - `arena_len`: Length of `arena`.
/// - `out_written`: Output pointer populated with the bytes written.
///
/// ## Returns
/// - `rockbridge_result_t` indicating success/failure.
///
/// ## Errors
/// - Returns `ROCKBRIDGE_ERROR_KIND_INVALID` for null pointers or missing
///   required callbacks.
///
/// ## Safety
/// - `cursor` must describe a live native cursor.
/// - `arena` must point to `arena_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_raw_cursor_fill_batch(
    cursor: *const rockbridge_raw_cursor_t,
    arena: *mut u8,
    arena_len: usize,
    out_written: *mut usize,
) -> rockbridge_result_t {
    if cursor.is_null() {
        return error_result(
            rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
            "cursor pointer is null",
        );
    }
    if out_written.is_null() {
        return error_result(
            rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
            "out_written pointer is null",
        );
    }
    if arena.is_null() && arena_len > 0 {
        return error_result(
            rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
            "arena pointer is null",
        );
    }

    let mut raw = match CRawCursor::borrowed(&*cursor) {
        Ok(raw) => raw,
        Err(err) => return error_from_bridge_error(&err),
    };
    let arena: &mut [u8] = if arena_len == 0 {
        Default::default()
    } else {
        std::slice::from_raw_parts_mut(arena, arena_len)
    };
    *out_written = fill_batch(&mut raw, arena);
    success_result()
}
