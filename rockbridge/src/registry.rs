//! Observer registry and dispatcher.
//!
//! The registry parks environment and writable-file observers in a single
//! [`HandleTable`] so that native code can refer to them by handle. Dispatch
//! methods resolve a handle, then invoke the observer with the table unlocked,
//! so observers may themselves cause new registrations.
//!
//! An environment handle is the parent scope of the file handles created
//! through it. Destroying the environment releases every file handle it still
//! owns; closing or destroying a file releases only that file.
//!
//! Resolving a handle that is not registered, or that belongs to the other
//! observer family, means the native object graph and the registry have
//! desynchronized. That is not recoverable and panics.

use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::config::HandleTableOptions;
use crate::error::BridgeError;
use crate::handles::{unregistered_handle, Handle, HandleTable};
use crate::observer::{EnvObserver, WritableFileObserver};

enum Entry {
    Env {
        observer: Arc<dyn EnvObserver>,
        children: HashSet<Handle>,
    },
    File {
        observer: Arc<dyn WritableFileObserver>,
        parent: Handle,
    },
}

#[derive(Clone, Copy, Debug)]
enum ObserverKind {
    Env,
    File,
}

/// Registry of live observers, addressed by [`Handle`].
pub struct ObserverRegistry {
    table: HandleTable<Entry>,
}

static GLOBAL: OnceLock<Arc<ObserverRegistry>> = OnceLock::new();

impl ObserverRegistry {
    /// Creates an empty registry with the default table capacity.
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(),
        }
    }

    /// Creates an empty registry sized by `options`.
    pub fn with_options(options: &HandleTableOptions) -> Result<Self, crate::Error> {
        Ok(Self {
            table: HandleTable::from_options(options)?,
        })
    }

    /// The process-wide registry used by the C entry points. Created with
    /// default options on first use unless [`ObserverRegistry::init_global`]
    /// ran before.
    pub fn global() -> &'static Arc<ObserverRegistry> {
        GLOBAL.get_or_init(|| Arc::new(ObserverRegistry::new()))
    }

    /// Creates the process-wide registry sized by `options`. Fails if the
    /// options are invalid or the global registry already exists, including
    /// when an earlier [`ObserverRegistry::global`] call created it.
    pub fn init_global(options: &HandleTableOptions) -> Result<(), crate::Error> {
        let registry = Arc::new(Self::with_options(options)?);
        GLOBAL
            .set(registry)
            .map_err(|_| BridgeError::GlobalRegistryInitialized)?;
        debug!(
            "initialized global observer registry [initial_capacity={}]",
            options.initial_capacity
        );
        Ok(())
    }

    /// Registers an environment observer and returns its root handle.
    pub fn register_env(&self, observer: Arc<dyn EnvObserver>) -> Handle {
        let handle = self.table.retain(Entry::Env {
            observer,
            children: HashSet::new(),
        });
        debug!("registered env observer [handle={}]", handle);
        handle
    }

    /// Releases an environment handle along with every file handle it still
    /// owns. Destroying an already destroyed environment does nothing.
    pub fn destroy_env(&self, env: Handle) {
        let mut table = self.table.lock();
        match table.get(env) {
            Some(Entry::Env { .. }) => {}
            Some(Entry::File { .. }) => wrong_observer_kind(env, ObserverKind::Env),
            None => {
                warn!("ignoring destroy of released env [handle={}]", env);
                return;
            }
        }

        let mut released = Vec::new();
        if let Some(entry) = table.release(env) {
            if let Entry::Env { children, .. } = &entry {
                released.extend(children.iter().filter_map(|child| table.release(*child)));
                debug!(
                    "destroyed env observer [handle={}, released_files={}]",
                    env,
                    children.len()
                );
            }
            released.push(entry);
        }
        // Observers may free native state on drop; do that with the table unlocked.
        drop(table);
        drop(released);
    }

    /// Asks the environment observer for a file observer and registers it as a
    /// child of `env`.
    pub fn new_writable_file(&self, env: Handle, name: &str) -> Handle {
        trace!("dispatching new_writable_file [env={}, name={}]", env, name);
        let file_observer: Arc<dyn WritableFileObserver> =
            Arc::from(self.env_observer(env).new_writable_file(name));

        let mut table = self.table.lock();
        if !matches!(table.get(env), Some(Entry::Env { .. })) {
            unregistered_handle(env);
        }
        let file = table.retain(Entry::File {
            observer: file_observer,
            parent: env,
        });
        if let Some(Entry::Env { children, .. }) = table.get_mut(env) {
            children.insert(file);
        }
        debug!("registered file observer [env={}, file={}]", env, file);
        file
    }

    pub fn delete_file(&self, env: Handle, name: &str) {
        trace!("dispatching delete_file [env={}, name={}]", env, name);
        self.env_observer(env).delete_file(name);
    }

    pub fn delete_dir(&self, env: Handle, dirname: &str) {
        trace!("dispatching delete_dir [env={}, dirname={}]", env, dirname);
        self.env_observer(env).delete_dir(dirname);
    }

    pub fn rename_file(&self, env: Handle, src: &str, target: &str) {
        trace!(
            "dispatching rename_file [env={}, src={}, target={}]",
            env,
            src,
            target
        );
        self.env_observer(env).rename_file(src, target);
    }

    pub fn link_file(&self, env: Handle, src: &str, target: &str) {
        trace!(
            "dispatching link_file [env={}, src={}, target={}]",
            env,
            src,
            target
        );
        self.env_observer(env).link_file(src, target);
    }

    /// Forwards appended bytes. `data` is only borrowed for the call.
    pub fn append(&self, file: Handle, data: &[u8]) {
        trace!("dispatching append [file={}, len={}]", file, data.len());
        self.file_observer(file).append(data);
    }

    pub fn sync(&self, file: Handle) {
        trace!("dispatching sync [file={}]", file);
        self.file_observer(file).sync();
    }

    pub fn fsync(&self, file: Handle) {
        trace!("dispatching fsync [file={}]", file);
        self.file_observer(file).fsync();
    }

    pub fn range_sync(&self, file: Handle, offset: i64, nbytes: i64) {
        trace!(
            "dispatching range_sync [file={}, offset={}, nbytes={}]",
            file,
            offset,
            nbytes
        );
        self.file_observer(file).range_sync(offset, nbytes);
    }

    /// Forwards a close, then releases the file handle.
    pub fn close(&self, file: Handle) {
        trace!("dispatching close [file={}]", file);
        self.file_observer(file).close();
        self.destroy_file(file);
    }

    /// Releases a file handle if it is still live. Called when the native file
    /// object is destroyed, which may happen after an explicit close.
    pub fn destroy_file(&self, file: Handle) {
        let mut table = self.table.lock();
        let parent = match table.get(file) {
            Some(Entry::File { parent, .. }) => *parent,
            Some(Entry::Env { .. }) => wrong_observer_kind(file, ObserverKind::File),
            None => {
                trace!("file already released [file={}]", file);
                return;
            }
        };

        let released = table.release(file);
        if let Some(Entry::Env { children, .. }) = table.get_mut(parent) {
            children.remove(&file);
        }
        drop(table);
        drop(released);
        trace!("released file observer [env={}, file={}]", parent, file);
    }

    /// Returns true if `handle` refers to a live observer of either family.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.table.is_live(handle)
    }

    /// Number of handle slots, live or empty.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of live observers of both families.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of live file handles owned by `env`, or zero if it is not live.
    pub fn open_files(&self, env: Handle) -> usize {
        match self.table.lock().get(env) {
            Some(Entry::Env { children, .. }) => children.len(),
            _ => 0,
        }
    }

    fn env_observer(&self, handle: Handle) -> Arc<dyn EnvObserver> {
        match self.table.lock().get(handle) {
            Some(Entry::Env { observer, .. }) => observer.clone(),
            Some(Entry::File { .. }) => wrong_observer_kind(handle, ObserverKind::Env),
            None => unregistered_handle(handle),
        }
    }

    fn file_observer(&self, handle: Handle) -> Arc<dyn WritableFileObserver> {
        match self.table.lock().get(handle) {
            Some(Entry::File { observer, .. }) => observer.clone(),
            Some(Entry::Env { .. }) => wrong_observer_kind(handle, ObserverKind::File),
            None => unregistered_handle(handle),
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::panic)]
#[cold]
fn wrong_observer_kind(handle: Handle, expected: ObserverKind) -> ! {
    panic!("handle {handle} does not refer to a {expected:?} observer")
}
