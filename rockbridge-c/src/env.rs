//! Hook entry points invoked by a native hooked environment.
//!
//! A native environment registers its observer once with
//! `rockbridge_env_observer_register` and then reports every filesystem
//! mutation through the `rockbridge_env_*` and `rockbridge_wf_*` functions,
//! passing the handles it was given. Hooks run synchronously on the calling
//! thread.
//!
//! Passing a handle that was never registered, was already destroyed, or
//! belongs to the other observer family aborts the process: the native object
//! graph no longer matches the registry and no recovery is possible.

use crate::ffi::{
    bytes_from_ptr, error_from_bridge_error, error_result, rockbridge_env_observer_t,
    rockbridge_error_kind_t, rockbridge_handle_t, rockbridge_result_t, str_from_ptr,
    success_result,
};
use crate::observer::CEnvObserver;
use rockbridge::config::HandleTableOptions;
use rockbridge::{Handle, ObserverRegistry};
use std::os::raw::c_char;
use std::sync::Arc;

fn registry() -> &'static ObserverRegistry {
    ObserverRegistry::global()
}

/// Sizes the process-wide observer registry.
///
/// ## Arguments
/// - `initial_capacity`: Number of handle slots allocated up front.
///
/// ## Returns
/// - `rockbridge_result_t` indicating success/failure.
///
/// ## Errors
/// - Returns `ROCKBRIDGE_ERROR_KIND_INVALID` if `initial_capacity` is zero or
///   the registry already exists. Any earlier call into this library that
///   takes a handle creates the registry with default options.
#[no_mangle]
pub extern "C" fn rockbridge_registry_init(initial_capacity: usize) -> rockbridge_result_t {
    match ObserverRegistry::init_global(&HandleTableOptions { initial_capacity }) {
        Ok(()) => success_result(),
        Err(err) => error_from_bridge_error(&err),
    }
}

/// Registers an environment observer.
///
/// ## Arguments
/// - `observer`: Callback table. Copied; the table itself need not outlive the
///   call, but its context must stay valid until `rockbridge_env_dtor`.
/// - `out_handle`: Output pointer populated with the environment handle.
///
/// ## Returns
/// - `rockbridge_result_t` indicating success/failure.
///
/// ## Errors
/// - Returns `ROCKBRIDGE_ERROR_KIND_INVALID` for null pointers.
///
/// ## Safety
/// - `observer` and `out_handle` must be valid non-null pointers.
/// - Callbacks may be invoked from any engine thread.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_observer_register(
    observer: *const rockbridge_env_observer_t,
    out_handle: *mut rockbridge_handle_t,
) -> rockbridge_result_t {
    if observer.is_null() {
        return error_result(
            rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
            "observer pointer is null",
        );
    }
    if out_handle.is_null() {
        return error_result(
            rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
            "out_handle pointer is null",
        );
    }

    let observer = Arc::new(CEnvObserver::new(&*observer));
    *out_handle = registry().register_env(observer).into_raw();
    success_result()
}

/// Reports that a writable file is about to be created and returns the handle
/// of its observer.
///
/// ## Safety
/// - `name` must point to `name_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_new_writable_file(
    env: rockbridge_handle_t,
    name: *const c_char,
    name_len: usize,
) -> rockbridge_handle_t {
    let name = str_from_ptr(name, name_len, "name");
    registry()
        .new_writable_file(Handle::from_raw(env), &name)
        .into_raw()
}

/// Reports that a file is about to be deleted.
///
/// ## Safety
/// - `name` must point to `name_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_delete_file(
    env: rockbridge_handle_t,
    name: *const c_char,
    name_len: usize,
) {
    let name = str_from_ptr(name, name_len, "name");
    registry().delete_file(Handle::from_raw(env), &name);
}

/// Reports that a directory is about to be deleted.
///
/// ## Safety
/// - `dirname` must point to `dirname_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_delete_dir(
    env: rockbridge_handle_t,
    dirname: *const c_char,
    dirname_len: usize,
) {
    let dirname = str_from_ptr(dirname, dirname_len, "dirname");
    registry().delete_dir(Handle::from_raw(env), &dirname);
}

/// Reports that `src` is about to be renamed to `target`.
///
/// ## Safety
/// - `src` and `target` must point to `src_len` and `target_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_rename_file(
    env: rockbridge_handle_t,
    src: *const c_char,
    src_len: usize,
    target: *const c_char,
    target_len: usize,
) {
    let src = str_from_ptr(src, src_len, "src");
    let target = str_from_ptr(target, target_len, "target");
    registry().rename_file(Handle::from_raw(env), &src, &target);
}

/// Reports that `src` is about to be hard linked to `target`.
///
/// ## Safety
/// - `src` and `target` must point to `src_len` and `target_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_env_link_file(
    env: rockbridge_handle_t,
    src: *const c_char,
    src_len: usize,
    target: *const c_char,
    target_len: usize,
) {
    let src = str_from_ptr(src, src_len, "src");
    let target = str_from_ptr(target, target_len, "target");
    registry().link_file(Handle::from_raw(env), &src, &target);
}

/// Destroys an environment handle and every file handle still open under it.
/// Destroying an already destroyed environment does nothing.
#[no_mangle]
pub extern "C" fn rockbridge_env_dtor(env: rockbridge_handle_t) {
    registry().destroy_env(Handle::from_raw(env));
}

/// Reports data appended to a file. `data` is only read during the call.
///
/// ## Safety
/// - `data` must point to `data_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rockbridge_wf_append(
    file: rockbridge_handle_t,
    data: *const u8,
    data_len: usize,
) {
    let data = bytes_from_ptr(data, data_len, "data");
    registry().append(Handle::from_raw(file), data);
}

/// Reports that a file was closed and releases its handle.
#[no_mangle]
pub extern "C" fn rockbridge_wf_close(file: rockbridge_handle_t) {
    registry().close(Handle::from_raw(file));
}

/// Reports that a file was synced.
#[no_mangle]
pub extern "C" fn rockbridge_wf_sync(file: rockbridge_handle_t) {
    registry().sync(Handle::from_raw(file));
}

/// Reports that a file was fsync'd.
#[no_mangle]
pub extern "C" fn rockbridge_wf_fsync(file: rockbridge_handle_t) {
    registry().fsync(Handle::from_raw(file));
}

/// Reports that a byte range of a file was synced.
#[no_mangle]
pub extern "C" fn rockbridge_wf_range_sync(file: rockbridge_handle_t, offset: i64, nbytes: i64) {
    registry().range_sync(Handle::from_raw(file), offset, nbytes);
}

/// Releases a file handle when the native file object is destroyed. Safe to
/// call after `rockbridge_wf_close`.
#[no_mangle]
pub extern "C" fn rockbridge_wf_dtor(file: rockbridge_handle_t) {
    registry().destroy_file(Handle::from_raw(file));
}

/// Returns true if `handle` refers to a live observer of either family.
#[no_mangle]
pub extern "C" fn rockbridge_handle_is_live(handle: rockbridge_handle_t) -> bool {
    registry().is_live(Handle::from_raw(handle))
}
