//! Core FFI types and conversion helpers for `rockbridge-c`.
//!
//! This module defines the public C ABI data structures: the result type,
//! observer handles, and the callback tables through which native code
//! supplies observers and cursors. It also contains the pointer conversion
//! helpers shared by the entry-point modules.

use rockbridge::ErrorKind;
use std::borrow::Cow;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::ptr;

/// Observer handle passed across the C ABI. Encodes a slot index in the low
/// 32 bits and the slot generation in the high 32 bits.
#[allow(non_camel_case_types)]
pub type rockbridge_handle_t = u64;

/// Public error kind mirroring `rockbridge::ErrorKind`.
#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum rockbridge_error_kind_t {
    /// No error.
    ROCKBRIDGE_ERROR_KIND_NONE = 0,
    /// Filesystem or host service unavailable.
    ROCKBRIDGE_ERROR_KIND_UNAVAILABLE = 1,
    /// Invalid request/argument/state for caller.
    ROCKBRIDGE_ERROR_KIND_INVALID = 2,
    /// Native cursor failure.
    ROCKBRIDGE_ERROR_KIND_ITERATOR = 3,
    /// Internal rockbridge error.
    ROCKBRIDGE_ERROR_KIND_INTERNAL = 4,
    /// Unknown error kind (forward compatibility).
    ROCKBRIDGE_ERROR_KIND_UNKNOWN = 255,
}

/// Standard result structure returned by fallible C ABI functions.
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct rockbridge_result_t {
    /// Error kind, `ROCKBRIDGE_ERROR_KIND_NONE` on success.
    pub kind: rockbridge_error_kind_t,
    /// Optional error message allocated by Rust (free with `rockbridge_result_free`).
    pub message: *mut c_char,
}

/// Releases a caller-owned context once the Rust side no longer needs it.
#[allow(non_camel_case_types)]
pub type rockbridge_context_free_fn = Option<unsafe extern "C" fn(context: *mut c_void)>;

/// Callback taking only the caller context.
#[allow(non_camel_case_types)]
pub type rockbridge_event_fn = Option<unsafe extern "C" fn(context: *mut c_void)>;

/// Callback receiving a file or directory name. `name` is not NUL-terminated
/// and is only valid for the duration of the call.
#[allow(non_camel_case_types)]
pub type rockbridge_name_fn =
    Option<unsafe extern "C" fn(context: *mut c_void, name: *const c_char, name_len: usize)>;

/// Callback receiving a source and target name.
#[allow(non_camel_case_types)]
pub type rockbridge_name_pair_fn = Option<
    unsafe extern "C" fn(
        context: *mut c_void,
        src: *const c_char,
        src_len: usize,
        target: *const c_char,
        target_len: usize,
    ),
>;

/// Writable-file observer supplied by C. Every callback is optional; a null
/// callback ignores the corresponding event.
#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy)]
pub struct rockbridge_wf_observer_t {
    /// Opaque caller context passed to every callback.
    pub context: *mut c_void,
    /// Data appended to the file. `data` is only valid for the call.
    pub append:
        Option<unsafe extern "C" fn(context: *mut c_void, data: *const u8, data_len: usize)>,
    /// File closed.
    pub close: rockbridge_event_fn,
    /// File synced.
    pub sync: rockbridge_event_fn,
    /// File fsync'd.
    pub fsync: rockbridge_event_fn,
    /// Byte range synced.
    pub range_sync: Option<unsafe extern "C" fn(context: *mut c_void, offset: i64, nbytes: i64)>,
    /// Called exactly once when the observer is destroyed.
    pub free_context: rockbridge_context_free_fn,
}

impl rockbridge_wf_observer_t {
    /// An observer that ignores every event.
    pub fn empty() -> Self {
        Self {
            context: ptr::null_mut(),
            append: None,
            close: None,
            sync: None,
            fsync: None,
            range_sync: None,
            free_context: None,
        }
    }
}

/// Environment observer supplied by C. Every callback is optional.
#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy)]
pub struct rockbridge_env_observer_t {
    /// Opaque caller context passed to every callback.
    pub context: *mut c_void,
    /// A writable file is about to be created. Fills `out_file` and returns
    /// true to observe the file; returning false leaves it unobserved. If
    /// `out_file` was filled before returning false, its `free_context` is
    /// still called once and no other callback is.
    pub new_writable_file: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            name: *const c_char,
            name_len: usize,
            out_file: *mut rockbridge_wf_observer_t,
        ) -> bool,
    >,
    /// A file is about to be deleted.
    pub delete_file: rockbridge_name_fn,
    /// A directory is about to be deleted.
    pub delete_dir: rockbridge_name_fn,
    /// A file is about to be renamed.
    pub rename_file: rockbridge_name_pair_fn,
    /// A file is about to be hard linked.
    pub link_file: rockbridge_name_pair_fn,
    /// Called exactly once when the observer is destroyed.
    pub free_context: rockbridge_context_free_fn,
}

/// Native range-scan cursor supplied by C.
///
/// All callbacks other than `next_batch` and `destroy` are required. Slices
/// returned by `key` and `value` must stay valid until the next call that moves
/// the cursor. `next` and `prev` are only called while `valid` returns true; a
/// cursor that ran off either end may stay invalid until the next seek.
#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy)]
pub struct rockbridge_raw_cursor_t {
    /// Opaque native cursor passed to every callback.
    pub context: *mut c_void,
    /// Returns true while positioned on a record.
    pub valid: Option<unsafe extern "C" fn(context: *mut c_void) -> bool>,
    /// Returns the current key and stores its length in `out_len`.
    pub key: Option<unsafe extern "C" fn(context: *mut c_void, out_len: *mut usize) -> *const u8>,
    /// Returns the current value and stores its length in `out_len`.
    pub value:
        Option<unsafe extern "C" fn(context: *mut c_void, out_len: *mut usize) -> *const u8>,
    /// Steps forward. Only called while valid.
    pub next: rockbridge_event_fn,
    /// Steps backward. Only called while valid.
    pub prev: rockbridge_event_fn,
    /// Positions at the first key at or after `key`.
    pub seek: Option<unsafe extern "C" fn(context: *mut c_void, key: *const u8, key_len: usize)>,
    /// Positions at the last key at or before `key`.
    pub seek_for_prev:
        Option<unsafe extern "C" fn(context: *mut c_void, key: *const u8, key_len: usize)>,
    /// Positions at the first key.
    pub seek_to_first: rockbridge_event_fn,
    /// Positions at the last key.
    pub seek_to_last: rockbridge_event_fn,
    /// Returns true and fills `out_message`/`out_len` if the scan failed. The
    /// message is copied before the next cursor call.
    pub status: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            out_message: *mut *const c_char,
            out_len: *mut usize,
        ) -> bool,
    >,
    /// Optional batched fetch. Packs records into `arena` and returns the bytes
    /// written; see `rockbridge::cursor::fill_batch` for the contract. Only
    /// called while valid.
    pub next_batch:
        Option<unsafe extern "C" fn(context: *mut c_void, arena: *mut u8, arena_len: usize) -> usize>,
    /// Optional destructor, called exactly once when the cursor is dropped.
    pub destroy: rockbridge_event_fn,
}

pub(crate) fn success_result() -> rockbridge_result_t {
    rockbridge_result_t {
        kind: rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_NONE,
        message: ptr::null_mut(),
    }
}

pub(crate) fn error_result(kind: rockbridge_error_kind_t, message: &str) -> rockbridge_result_t {
    rockbridge_result_t {
        kind,
        message: message_to_cstring(message).into_raw(),
    }
}

fn message_to_cstring(message: &str) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}

pub(crate) fn map_error(err: &rockbridge::Error) -> rockbridge_error_kind_t {
    match err.kind() {
        ErrorKind::Unavailable => rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_UNAVAILABLE,
        ErrorKind::Invalid => rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
        ErrorKind::Iterator => rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_ITERATOR,
        ErrorKind::Internal => rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INTERNAL,
        _ => rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_UNKNOWN,
    }
}

pub(crate) fn error_from_bridge_error(err: &rockbridge::Error) -> rockbridge_result_t {
    error_result(map_error(err), &err.to_string())
}

/// Views a pointer/length pair as bytes. A zero length yields an empty slice
/// regardless of `ptr`.
///
/// # Panics
///
/// Panics if `ptr` is null while `len` is non-zero.
pub(crate) unsafe fn bytes_from_ptr<'a>(ptr: *const u8, len: usize, field_name: &str) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    if ptr.is_null() {
        null_with_length(field_name, len);
    }
    std::slice::from_raw_parts(ptr, len)
}

/// Decodes a non-terminated name, replacing invalid UTF-8.
pub(crate) unsafe fn str_from_ptr<'a>(
    ptr: *const c_char,
    len: usize,
    field_name: &str,
) -> Cow<'a, str> {
    String::from_utf8_lossy(bytes_from_ptr(ptr as *const u8, len, field_name))
}

#[allow(clippy::panic)]
#[cold]
fn null_with_length(field_name: &str, len: usize) -> ! {
    panic!("{field_name} pointer is null but length is {len}")
}
