mod cursor;
mod env;
mod ffi;
mod memory;
mod observer;

pub use ffi::{
    rockbridge_context_free_fn, rockbridge_env_observer_t, rockbridge_error_kind_t,
    rockbridge_event_fn, rockbridge_handle_t, rockbridge_name_fn, rockbridge_name_pair_fn,
    rockbridge_raw_cursor_t, rockbridge_result_t, rockbridge_wf_observer_t,
};

pub use cursor::{rockbridge_raw_cursor_fill_batch, CRawCursor};
pub use env::{
    rockbridge_env_delete_dir, rockbridge_env_delete_file, rockbridge_env_dtor,
    rockbridge_env_link_file, rockbridge_env_new_writable_file, rockbridge_env_observer_register,
    rockbridge_env_rename_file, rockbridge_handle_is_live, rockbridge_registry_init,
    rockbridge_wf_append,
    rockbridge_wf_close, rockbridge_wf_dtor, rockbridge_wf_fsync, rockbridge_wf_range_sync,
    rockbridge_wf_sync,
};
pub use memory::rockbridge_result_free;
