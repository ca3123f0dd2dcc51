#![allow(dead_code)]

use rockbridge_c::{
    rockbridge_env_observer_t, rockbridge_error_kind_t, rockbridge_result_free,
    rockbridge_result_t, rockbridge_wf_observer_t,
};
use std::ffi::{c_void, CStr};
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn assert_result_ok(result: rockbridge_result_t) {
    let message = result_message(&result);
    assert_eq!(
        result.kind,
        rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_NONE,
        "expected success result, got kind={:?}, message={:?}",
        result.kind,
        message
    );
    rockbridge_result_free(result);
}

pub(crate) fn assert_result_invalid_contains(result: rockbridge_result_t, message_substring: &str) {
    let message = result_message(&result);
    assert_eq!(
        result.kind,
        rockbridge_error_kind_t::ROCKBRIDGE_ERROR_KIND_INVALID,
        "expected invalid result, got kind={:?}, message={:?}",
        result.kind,
        message
    );
    let message = message.expect("expected error message for invalid result");
    assert!(
        message.contains(message_substring),
        "expected error message to contain {:?}, got {:?}",
        message_substring,
        message
    );
    rockbridge_result_free(result);
}

fn result_message(result: &rockbridge_result_t) -> Option<String> {
    if result.message.is_null() {
        None
    } else {
        let message = unsafe { CStr::from_ptr(result.message) };
        Some(message.to_string_lossy().into_owned())
    }
}

/// Events seen by a native observer, shared with the test body.
#[derive(Default)]
pub(crate) struct Recording {
    events: Mutex<Vec<String>>,
    freed_contexts: AtomicUsize,
}

impl Recording {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    pub(crate) fn freed_contexts(&self) -> usize {
        self.freed_contexts.load(Ordering::SeqCst)
    }

    pub(crate) fn context_freed(&self) {
        self.freed_contexts.fetch_add(1, Ordering::SeqCst);
    }

    fn push(&self, event: String) {
        self.events.lock().expect("events lock poisoned").push(event);
    }
}

struct FileContext {
    name: String,
    recording: Arc<Recording>,
}

unsafe fn text(ptr: *const c_char, len: usize) -> String {
    if len == 0 {
        return String::new();
    }
    String::from_utf8_lossy(std::slice::from_raw_parts(ptr as *const u8, len)).into_owned()
}

unsafe fn recording<'a>(context: *mut c_void) -> &'a Recording {
    &*(context as *const Recording)
}

unsafe fn file<'a>(context: *mut c_void) -> &'a FileContext {
    &*(context as *const FileContext)
}

unsafe extern "C" fn on_new_writable_file(
    context: *mut c_void,
    name: *const c_char,
    name_len: usize,
    out_file: *mut rockbridge_wf_observer_t,
) -> bool {
    let shared = ManuallyDrop::new(Arc::from_raw(context as *const Recording));
    let name = text(name, name_len);
    shared.push(format!("new {name}"));

    let file_context = Box::new(FileContext {
        name,
        recording: Arc::clone(&shared),
    });
    *out_file = rockbridge_wf_observer_t {
        context: Box::into_raw(file_context) as *mut c_void,
        append: Some(on_append),
        close: Some(on_close),
        sync: Some(on_sync),
        fsync: Some(on_fsync),
        range_sync: Some(on_range_sync),
        free_context: Some(free_file_context),
    };
    true
}

unsafe extern "C" fn on_delete_file(context: *mut c_void, name: *const c_char, name_len: usize) {
    recording(context).push(format!("delete {}", text(name, name_len)));
}

unsafe extern "C" fn on_delete_dir(context: *mut c_void, name: *const c_char, name_len: usize) {
    recording(context).push(format!("delete_dir {}", text(name, name_len)));
}

unsafe extern "C" fn on_rename_file(
    context: *mut c_void,
    src: *const c_char,
    src_len: usize,
    target: *const c_char,
    target_len: usize,
) {
    recording(context).push(format!(
        "rename {} {}",
        text(src, src_len),
        text(target, target_len)
    ));
}

unsafe extern "C" fn on_link_file(
    context: *mut c_void,
    src: *const c_char,
    src_len: usize,
    target: *const c_char,
    target_len: usize,
) {
    recording(context).push(format!(
        "link {} {}",
        text(src, src_len),
        text(target, target_len)
    ));
}

unsafe extern "C" fn free_env_context(context: *mut c_void) {
    let shared = Arc::from_raw(context as *const Recording);
    shared.freed_contexts.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn on_append(context: *mut c_void, data: *const u8, data_len: usize) {
    let file = file(context);
    let data = std::slice::from_raw_parts(data, data_len);
    file.recording.push(format!(
        "append {} {}",
        file.name,
        String::from_utf8_lossy(data)
    ));
}

unsafe extern "C" fn on_close(context: *mut c_void) {
    let file = file(context);
    file.recording.push(format!("close {}", file.name));
}

unsafe extern "C" fn on_sync(context: *mut c_void) {
    let file = file(context);
    file.recording.push(format!("sync {}", file.name));
}

unsafe extern "C" fn on_fsync(context: *mut c_void) {
    let file = file(context);
    file.recording.push(format!("fsync {}", file.name));
}

unsafe extern "C" fn on_range_sync(context: *mut c_void, offset: i64, nbytes: i64) {
    let file = file(context);
    file.recording
        .push(format!("range_sync {} {offset} {nbytes}", file.name));
}

unsafe extern "C" fn free_file_context(context: *mut c_void) {
    let file = Box::from_raw(context as *mut FileContext);
    file.recording.freed_contexts.fetch_add(1, Ordering::SeqCst);
}

/// A native observer table that records every event into `recording`.
pub(crate) fn recording_observer(recording: &Arc<Recording>) -> rockbridge_env_observer_t {
    rockbridge_env_observer_t {
        context: Arc::into_raw(Arc::clone(recording)) as *mut c_void,
        new_writable_file: Some(on_new_writable_file),
        delete_file: Some(on_delete_file),
        delete_dir: Some(on_delete_dir),
        rename_file: Some(on_rename_file),
        link_file: Some(on_link_file),
        free_context: Some(free_env_context),
    }
}
