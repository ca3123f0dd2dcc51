mod common;

use common::{assert_result_invalid_contains, assert_result_ok, recording_observer, Recording};
use rockbridge_c::{
    rockbridge_env_delete_dir, rockbridge_env_delete_file, rockbridge_env_dtor,
    rockbridge_env_link_file, rockbridge_env_new_writable_file, rockbridge_env_observer_register,
    rockbridge_env_observer_t, rockbridge_env_rename_file, rockbridge_handle_is_live,
    rockbridge_handle_t, rockbridge_wf_append, rockbridge_wf_close, rockbridge_wf_dtor,
    rockbridge_wf_fsync, rockbridge_wf_observer_t, rockbridge_wf_range_sync, rockbridge_wf_sync,
};
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

unsafe fn register(observer: &rockbridge_env_observer_t) -> rockbridge_handle_t {
    let mut handle: rockbridge_handle_t = 0;
    assert_result_ok(rockbridge_env_observer_register(observer, &mut handle));
    handle
}

unsafe fn new_file(env: rockbridge_handle_t, name: &str) -> rockbridge_handle_t {
    rockbridge_env_new_writable_file(env, name.as_ptr() as *const c_char, name.len())
}

fn name_ptr(name: &str) -> (*const c_char, usize) {
    (name.as_ptr() as *const c_char, name.len())
}

#[test]
fn test_env_hooks_forward_all_events_in_order() {
    unsafe {
        let recording = Arc::new(Recording::default());
        let env = register(&recording_observer(&recording));

        let wal = new_file(env, "000007.log");
        let data = b"batch-1";
        rockbridge_wf_append(wal, data.as_ptr(), data.len());
        rockbridge_wf_sync(wal);
        rockbridge_wf_range_sync(wal, 0, 7);
        rockbridge_wf_fsync(wal);
        rockbridge_wf_close(wal);
        assert!(!rockbridge_handle_is_live(wal));
        // The native file destructor runs after close.
        rockbridge_wf_dtor(wal);

        let (src, src_len) = name_ptr("CURRENT.tmp");
        let (target, target_len) = name_ptr("CURRENT");
        rockbridge_env_rename_file(env, src, src_len, target, target_len);
        let (backup, backup_len) = name_ptr("backup/CURRENT");
        rockbridge_env_link_file(env, target, target_len, backup, backup_len);
        let (old, old_len) = name_ptr("000001.log");
        rockbridge_env_delete_file(env, old, old_len);
        let (dir, dir_len) = name_ptr("archive");
        rockbridge_env_delete_dir(env, dir, dir_len);

        assert_eq!(
            recording.events(),
            vec![
                "new 000007.log",
                "append 000007.log batch-1",
                "sync 000007.log",
                "range_sync 000007.log 0 7",
                "fsync 000007.log",
                "close 000007.log",
                "rename CURRENT.tmp CURRENT",
                "link CURRENT backup/CURRENT",
                "delete 000001.log",
                "delete_dir archive",
            ]
        );
        // The closed file's context was freed when its handle was released.
        assert_eq!(recording.freed_contexts(), 1);

        rockbridge_env_dtor(env);
        assert!(!rockbridge_handle_is_live(env));
        assert_eq!(recording.freed_contexts(), 2);
    }
}

#[test]
fn test_env_dtor_releases_open_files() {
    unsafe {
        let recording = Arc::new(Recording::default());
        let env = register(&recording_observer(&recording));

        let files: Vec<_> = (0..4)
            .map(|i| new_file(env, &format!("{i:06}.sst")))
            .collect();
        rockbridge_wf_close(files[0]);
        for file in &files[1..] {
            assert!(rockbridge_handle_is_live(*file));
        }

        rockbridge_env_dtor(env);
        for file in &files {
            assert!(!rockbridge_handle_is_live(*file));
        }
        // One env context and four file contexts.
        assert_eq!(recording.freed_contexts(), 5);

        // Late destructors and a repeated env destructor are no-ops.
        for file in &files {
            rockbridge_wf_dtor(*file);
        }
        rockbridge_env_dtor(env);
        assert_eq!(recording.freed_contexts(), 5);
    }
}

#[test]
fn test_observer_without_callbacks_ignores_events() {
    unsafe {
        let observer = rockbridge_env_observer_t {
            context: ptr::null_mut(),
            new_writable_file: None,
            delete_file: None,
            delete_dir: None,
            rename_file: None,
            link_file: None,
            free_context: None,
        };
        let env = register(&observer);

        let file = new_file(env, "LOG");
        assert!(rockbridge_handle_is_live(file));
        rockbridge_wf_append(file, ptr::null(), 0);
        rockbridge_wf_sync(file);
        let (name, len) = name_ptr("LOG.old");
        rockbridge_env_delete_file(env, name, len);
        rockbridge_wf_close(file);

        rockbridge_env_dtor(env);
        assert!(!rockbridge_handle_is_live(env));
    }
}

#[test]
fn test_names_are_decoded_lossily() {
    unsafe {
        let recording = Arc::new(Recording::default());
        let env = register(&recording_observer(&recording));

        let name = [b'l', b'o', b'g', 0xff];
        rockbridge_env_delete_file(env, name.as_ptr() as *const c_char, name.len());
        rockbridge_env_dtor(env);

        assert_eq!(recording.events(), vec!["delete log\u{FFFD}"]);
    }
}

#[test]
fn test_register_rejects_null_pointers() {
    unsafe {
        let recording = Arc::new(Recording::default());
        let observer = recording_observer(&recording);
        let mut handle: rockbridge_handle_t = 0;

        assert_result_invalid_contains(
            rockbridge_env_observer_register(ptr::null(), &mut handle),
            "observer pointer is null",
        );
        assert_result_invalid_contains(
            rockbridge_env_observer_register(&observer, ptr::null_mut()),
            "out_handle pointer is null",
        );

        // Neither call took ownership of the context.
        assert_eq!(Arc::strong_count(&recording), 2);
        if let Some(free_context) = observer.free_context {
            free_context(observer.context);
        }
        assert_eq!(Arc::strong_count(&recording), 1);
    }
}

unsafe extern "C" fn free_declined_file(context: *mut c_void) {
    let shared = Arc::from_raw(context as *const Recording);
    shared.context_freed();
}

/// Fills `out_file` with an owned context, then declines the file anyway.
unsafe extern "C" fn fill_then_decline(
    context: *mut c_void,
    _name: *const c_char,
    _name_len: usize,
    out_file: *mut rockbridge_wf_observer_t,
) -> bool {
    let shared = ManuallyDrop::new(Arc::from_raw(context as *const Recording));
    let mut file = rockbridge_wf_observer_t::empty();
    file.context = Arc::into_raw(Arc::clone(&shared)) as *mut c_void;
    file.free_context = Some(free_declined_file);
    *out_file = file;
    false
}

#[test]
fn test_declined_file_context_is_freed() {
    unsafe {
        let recording = Arc::new(Recording::default());
        let mut observer = recording_observer(&recording);
        observer.new_writable_file = Some(fill_then_decline);
        let env = register(&observer);

        let file = new_file(env, "IDENTITY");
        assert_eq!(recording.freed_contexts(), 1);
        assert!(rockbridge_handle_is_live(file));
        rockbridge_wf_sync(file);
        rockbridge_wf_close(file);
        assert_eq!(recording.freed_contexts(), 1);
        assert!(recording.events().is_empty());

        rockbridge_env_dtor(env);
        assert_eq!(recording.freed_contexts(), 2);
        assert_eq!(Arc::strong_count(&recording), 1);
    }
}
