//! Observer bridge for `rockbridge-c`.
//!
//! Adapts C callback tables into rockbridge's `EnvObserver` and
//! `WritableFileObserver` traits so native callers can register observers.

use crate::ffi::{
    rockbridge_context_free_fn, rockbridge_env_observer_t, rockbridge_event_fn,
    rockbridge_name_fn, rockbridge_name_pair_fn, rockbridge_wf_observer_t,
};
use log::debug;
use rockbridge::{EnvObserver, WritableFileObserver};
use std::ffi::c_void;
use std::os::raw::c_char;

/// Frees a caller context exactly once, when the owning observer drops.
struct CContext {
    addr: usize,
    free_context: rockbridge_context_free_fn,
}

impl CContext {
    fn new(context: *mut c_void, free_context: rockbridge_context_free_fn) -> Self {
        Self {
            addr: context as usize,
            free_context,
        }
    }

    fn ptr(&self) -> *mut c_void {
        self.addr as *mut c_void
    }
}

impl Drop for CContext {
    fn drop(&mut self) {
        if let Some(free_context) = self.free_context {
            // SAFETY: The context pointer and free callback are provided by the
            // caller and are invoked at most once when the observer drops.
            unsafe { free_context(self.ptr()) };
        }
    }
}

/// Environment observer that forwards events to C callbacks.
pub(crate) struct CEnvObserver {
    new_writable_file: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            name: *const c_char,
            name_len: usize,
            out_file: *mut rockbridge_wf_observer_t,
        ) -> bool,
    >,
    delete_file: rockbridge_name_fn,
    delete_dir: rockbridge_name_fn,
    rename_file: rockbridge_name_pair_fn,
    link_file: rockbridge_name_pair_fn,
    context: CContext,
}

impl CEnvObserver {
    pub(crate) fn new(observer: &rockbridge_env_observer_t) -> Self {
        Self {
            new_writable_file: observer.new_writable_file,
            delete_file: observer.delete_file,
            delete_dir: observer.delete_dir,
            rename_file: observer.rename_file,
            link_file: observer.link_file,
            context: CContext::new(observer.context, observer.free_context),
        }
    }

    fn forward_name(&self, callback: rockbridge_name_fn, name: &str) {
        if let Some(callback) = callback {
            // SAFETY: `name` is valid for the duration of the call and the
            // callback contract does not retain it.
            unsafe { callback(self.context.ptr(), name.as_ptr() as *const c_char, name.len()) };
        }
    }

    fn forward_name_pair(&self, callback: rockbridge_name_pair_fn, src: &str, target: &str) {
        if let Some(callback) = callback {
            // SAFETY: Both names are valid for the duration of the call.
            unsafe {
                callback(
                    self.context.ptr(),
                    src.as_ptr() as *const c_char,
                    src.len(),
                    target.as_ptr() as *const c_char,
                    target.len(),
                )
            };
        }
    }
}

impl EnvObserver for CEnvObserver {
    fn new_writable_file(&self, name: &str) -> Box<dyn WritableFileObserver> {
        let mut file = rockbridge_wf_observer_t::empty();
        let observed = match self.new_writable_file {
            // SAFETY: `name` is valid for the call and `file` is a writable,
            // initialized out parameter.
            Some(callback) => unsafe {
                callback(
                    self.context.ptr(),
                    name.as_ptr() as *const c_char,
                    name.len(),
                    &mut file,
                )
            },
            None => false,
        };
        if !observed {
            debug!("native observer declined file [name={}]", name);
            // Free any context the callback wrote before declining.
            drop(CContext::new(file.context, file.free_context));
            file = rockbridge_wf_observer_t::empty();
        }
        Box::new(CWritableFileObserver::new(&file))
    }

    fn delete_file(&self, name: &str) {
        self.forward_name(self.delete_file, name);
    }

    fn delete_dir(&self, dirname: &str) {
        self.forward_name(self.delete_dir, dirname);
    }

    fn rename_file(&self, src: &str, target: &str) {
        self.forward_name_pair(self.rename_file, src, target);
    }

    fn link_file(&self, src: &str, target: &str) {
        self.forward_name_pair(self.link_file, src, target);
    }
}

/// Writable-file observer that forwards events to C callbacks.
pub(crate) struct CWritableFileObserver {
    append: Option<unsafe extern "C" fn(context: *mut c_void, data: *const u8, data_len: usize)>,
    close: rockbridge_event_fn,
    sync: rockbridge_event_fn,
    fsync: rockbridge_event_fn,
    range_sync: Option<unsafe extern "C" fn(context: *mut c_void, offset: i64, nbytes: i64)>,
    context: CContext,
}

impl CWritableFileObserver {
    pub(crate) fn new(observer: &rockbridge_wf_observer_t) -> Self {
        Self {
            append: observer.append,
            close: observer.close,
            sync: observer.sync,
            fsync: observer.fsync,
            range_sync: observer.range_sync,
            context: CContext::new(observer.context, observer.free_context),
        }
    }

    fn forward(&self, callback: rockbridge_event_fn) {
        if let Some(callback) = callback {
            // SAFETY: The callback only receives the caller-provided context.
            unsafe { callback(self.context.ptr()) };
        }
    }
}

impl WritableFileObserver for CWritableFileObserver {
    fn append(&self, data: &[u8]) {
        if let Some(append) = self.append {
            // SAFETY: `data` is valid for the duration of the call.
            unsafe { append(self.context.ptr(), data.as_ptr(), data.len()) };
        }
    }

    fn close(&self) {
        self.forward(self.close);
    }

    fn sync(&self) {
        self.forward(self.sync);
    }

    fn fsync(&self) {
        self.forward(self.fsync);
    }

    fn range_sync(&self, offset: i64, nbytes: i64) {
        if let Some(range_sync) = self.range_sync {
            // SAFETY: The callback only receives the caller-provided context.
            unsafe { range_sync(self.context.ptr(), offset, nbytes) };
        }
    }
}
