//! Storage-engine environments and the hooked wrappers that report filesystem
//! mutations to an [`EnvObserver`].
//!
//! [`HookedEnv`] wraps a base [`Env`]. Environment-level operations notify the
//! observer before delegating, so the observer sees the intent even when the
//! base environment then fails. File-level operations on a
//! [`HookedWritableFile`] are delegated first and observed only when the
//! delegate succeeded, so observed appends and syncs reflect durable state.

use log::{debug, trace};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::BridgeError;
use crate::handles::Handle;
use crate::observer::EnvObserver;
use crate::registry::ObserverRegistry;

/// Filesystem operations a storage engine performs through its environment.
pub trait Env: Send + Sync {
    type File: WritableFile;

    /// Creates (or truncates) `path` and opens it for appending.
    fn new_writable_file(&self, path: &Path) -> Result<Self::File, crate::Error>;

    fn delete_file(&self, path: &Path) -> Result<(), crate::Error>;

    fn delete_dir(&self, path: &Path) -> Result<(), crate::Error>;

    fn rename_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error>;

    /// Creates `target` as a hard link to `src`.
    fn link_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error>;
}

/// An append-only file opened through an [`Env`].
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<(), crate::Error>;

    fn close(&mut self) -> Result<(), crate::Error>;

    /// Flushes file data to stable storage.
    fn sync(&mut self) -> Result<(), crate::Error>;

    /// Flushes file data and metadata to stable storage.
    fn fsync(&mut self) -> Result<(), crate::Error>;

    /// Flushes the byte range `[offset, offset + nbytes)` to stable storage.
    /// Implementations may sync more than the requested range.
    fn range_sync(&mut self, offset: i64, nbytes: i64) -> Result<(), crate::Error>;
}

/// An [`Env`] backed by the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEnv;

impl Env for DefaultEnv {
    type File = DefaultWritableFile;

    fn new_writable_file(&self, path: &Path) -> Result<Self::File, crate::Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(DefaultWritableFile {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn delete_file(&self, path: &Path) -> Result<(), crate::Error> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn delete_dir(&self, path: &Path) -> Result<(), crate::Error> {
        std::fs::remove_dir(path)?;
        Ok(())
    }

    fn rename_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error> {
        std::fs::rename(src, target)?;
        Ok(())
    }

    fn link_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error> {
        std::fs::hard_link(src, target)?;
        Ok(())
    }
}

/// A [`WritableFile`] over a [`std::fs::File`].
#[derive(Debug)]
pub struct DefaultWritableFile {
    path: PathBuf,
    file: Option<File>,
}

impl DefaultWritableFile {
    fn file(&mut self) -> Result<&mut File, crate::Error> {
        self.file
            .as_mut()
            .ok_or_else(|| BridgeError::FileClosed(self.path.display().to_string()).into())
    }
}

impl WritableFile for DefaultWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<(), crate::Error> {
        self.file()?.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), crate::Error> {
        self.file()?.flush()?;
        self.file = None;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), crate::Error> {
        self.file()?.sync_data()?;
        Ok(())
    }

    fn fsync(&mut self) -> Result<(), crate::Error> {
        self.file()?.sync_all()?;
        Ok(())
    }

    fn range_sync(&mut self, _offset: i64, _nbytes: i64) -> Result<(), crate::Error> {
        // std has no ranged sync, so flush the whole file.
        self.file()?.sync_data()?;
        Ok(())
    }
}

/// Registration of one environment observer. Shared by the hooked env and all
/// of its files; the last owner to go destroys the environment handle and any
/// file handles still registered under it.
struct EnvBinding {
    registry: Arc<ObserverRegistry>,
    handle: Handle,
}

impl Drop for EnvBinding {
    fn drop(&mut self) {
        debug!("dropping env binding [handle={}]", self.handle);
        self.registry.destroy_env(self.handle);
    }
}

/// An [`Env`] that reports mutating operations to an [`EnvObserver`].
pub struct HookedEnv<E: Env> {
    base: E,
    binding: Arc<EnvBinding>,
}

impl<E: Env> HookedEnv<E> {
    /// Wraps `base`, registering `observer` with the process-wide registry.
    pub fn new(base: E, observer: Arc<dyn EnvObserver>) -> Self {
        Self::with_registry(base, observer, ObserverRegistry::global().clone())
    }

    /// Wraps `base`, registering `observer` with `registry`.
    pub fn with_registry(
        base: E,
        observer: Arc<dyn EnvObserver>,
        registry: Arc<ObserverRegistry>,
    ) -> Self {
        let handle = registry.register_env(observer);
        Self {
            base,
            binding: Arc::new(EnvBinding { registry, handle }),
        }
    }

    /// The registry handle of this environment's observer.
    pub fn handle(&self) -> Handle {
        self.binding.handle
    }

    pub fn base(&self) -> &E {
        &self.base
    }

    fn registry(&self) -> &ObserverRegistry {
        &self.binding.registry
    }
}

impl<E: Env> Env for HookedEnv<E> {
    type File = HookedWritableFile<E::File>;

    fn new_writable_file(&self, path: &Path) -> Result<Self::File, crate::Error> {
        let name = path.to_string_lossy();
        let handle = self.registry().new_writable_file(self.handle(), &name);
        match self.base.new_writable_file(path) {
            Ok(delegate) => Ok(HookedWritableFile {
                delegate,
                open: true,
                name: name.into_owned(),
                handle,
                binding: self.binding.clone(),
            }),
            Err(err) => {
                self.registry().destroy_file(handle);
                Err(err)
            }
        }
    }

    fn delete_file(&self, path: &Path) -> Result<(), crate::Error> {
        self.registry()
            .delete_file(self.handle(), &path.to_string_lossy());
        self.base.delete_file(path)
    }

    fn delete_dir(&self, path: &Path) -> Result<(), crate::Error> {
        self.registry()
            .delete_dir(self.handle(), &path.to_string_lossy());
        self.base.delete_dir(path)
    }

    fn rename_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error> {
        self.registry().rename_file(
            self.handle(),
            &src.to_string_lossy(),
            &target.to_string_lossy(),
        );
        self.base.rename_file(src, target)
    }

    fn link_file(&self, src: &Path, target: &Path) -> Result<(), crate::Error> {
        self.registry().link_file(
            self.handle(),
            &src.to_string_lossy(),
            &target.to_string_lossy(),
        );
        self.base.link_file(src, target)
    }
}

/// A [`WritableFile`] that reports successful operations to the file observer
/// created by its [`HookedEnv`].
pub struct HookedWritableFile<F: WritableFile> {
    delegate: F,
    open: bool,
    name: String,
    handle: Handle,
    binding: Arc<EnvBinding>,
}

impl<F: WritableFile> HookedWritableFile<F> {
    /// The registry handle of this file's observer.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn check_open(&self) -> Result<(), crate::Error> {
        if !self.open {
            return Err(BridgeError::FileClosed(self.name.clone()).into());
        }
        Ok(())
    }

    fn registry(&self) -> &ObserverRegistry {
        &self.binding.registry
    }
}

impl<F: WritableFile> WritableFile for HookedWritableFile<F> {
    fn append(&mut self, data: &[u8]) -> Result<(), crate::Error> {
        self.check_open()?;
        self.delegate.append(data)?;
        self.registry().append(self.handle, data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), crate::Error> {
        self.check_open()?;
        self.delegate.close()?;
        self.open = false;
        self.registry().close(self.handle);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), crate::Error> {
        self.check_open()?;
        self.delegate.sync()?;
        self.registry().sync(self.handle);
        Ok(())
    }

    fn fsync(&mut self) -> Result<(), crate::Error> {
        self.check_open()?;
        self.delegate.fsync()?;
        self.registry().fsync(self.handle);
        Ok(())
    }

    fn range_sync(&mut self, offset: i64, nbytes: i64) -> Result<(), crate::Error> {
        self.check_open()?;
        self.delegate.range_sync(offset, nbytes)?;
        self.registry().range_sync(self.handle, offset, nbytes);
        Ok(())
    }
}

impl<F: WritableFile> Drop for HookedWritableFile<F> {
    fn drop(&mut self) {
        trace!(
            "dropping hooked file [file={}, name={}, open={}]",
            self.handle,
            self.name,
            self.open
        );
        self.registry().destroy_file(self.handle);
    }
}
