#![cfg_attr(test, allow(clippy::unwrap_used))]
#![warn(clippy::panic)]
#![cfg_attr(test, allow(clippy::panic))]
#![allow(clippy::result_large_err)]

//! Plumbing between Rust and a native storage engine.
//!
//! Native code cannot hold Rust references, so observers of the engine's
//! filesystem activity are parked in a [`HandleTable`] and addressed by
//! generational [`Handle`]s. The [`ObserverRegistry`] resolves those handles
//! and dispatches events, and [`HookedEnv`] produces the events from any
//! [`Env`]. Range scans cross the boundary in batches through
//! [`BatchedCursor`].

/// Re-export the bytes crate.
///
/// This is useful for users of the crate who want to use rockbridge
/// without having to depend on the bytes crate directly.
pub use bytes;

pub use config::Settings;
pub use cursor::{BatchedCursor, CursorStats, RawCursor};
pub use env::{DefaultEnv, Env, HookedEnv, HookedWritableFile, WritableFile};
pub use error::{Error, ErrorKind};
pub use handles::{Handle, HandleTable, HandleTableGuard};
pub use mem::{MemCursor, MemStore};
pub use observer::{EnvObserver, WritableFileObserver};
pub use registry::ObserverRegistry;

pub mod config;
pub mod cursor;
pub mod env;
pub mod handles;
pub mod mem;
pub mod observer;
pub mod registry;

mod error;
