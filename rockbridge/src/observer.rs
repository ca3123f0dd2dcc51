//! Observer contracts for storage-engine filesystem activity.
//!
//! Observers are invoked synchronously on whichever thread the engine uses for
//! I/O, so implementations must be `Send + Sync` and should return quickly: a
//! slow observer stalls the engine's I/O thread.

/// Observes mutating operations of a storage-engine environment.
///
/// One observer is associated with one environment for the environment's whole
/// lifetime.
pub trait EnvObserver: Send + Sync {
    /// Invoked just before a new writable file is created. Returns the observer
    /// associated with the new file.
    fn new_writable_file(&self, name: &str) -> Box<dyn WritableFileObserver>;

    /// Invoked just before `name` is deleted.
    fn delete_file(&self, name: &str);

    /// Invoked just before `dirname` is deleted.
    fn delete_dir(&self, dirname: &str);

    /// Invoked just before `src` is renamed to `target`.
    fn rename_file(&self, src: &str, target: &str);

    /// Invoked just before `src` is linked to `target`.
    fn link_file(&self, src: &str, target: &str);
}

/// Observes mutating operations of a single writable file.
pub trait WritableFileObserver: Send + Sync {
    /// Invoked when `data` has been appended to the file. `data` is owned by the
    /// engine and is only valid for the duration of the call.
    fn append(&self, data: &[u8]);

    /// Invoked when the file has been closed.
    fn close(&self);

    /// Invoked when the file has been synced.
    fn sync(&self);

    /// Invoked when the file has been fsync'd. Engines may implement fsync in
    /// terms of sync, in which case `sync` is observed as well.
    fn fsync(&self);

    /// Invoked when the byte range `[offset, offset + nbytes)` has been synced.
    fn range_sync(&self, offset: i64, nbytes: i64);
}
