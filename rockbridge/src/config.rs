//! Configuration options for rockbridge.
//!
//! Settings cover the two tunables of the bridge: the initial size of the
//! observer handle table and the arena bounds used by batched cursors. They
//! can be built in code, read from a file, or read from environment variables.
//!
//! # Examples
//!
//! Loading the default configuration:
//!
//! ```rust
//! use rockbridge::config::Settings;
//! let settings = Settings::default();
//! ```
//!
//! Loading `Settings` from a specific file:
//!
//! ```rust,no_run
//! use rockbridge::config::Settings;
//! let settings = Settings::from_file("rockbridge.toml").expect("failed to load settings");
//! ```
//!
//! Loading from the predefined files `Rockbridge.json`, `Rockbridge.toml`,
//! `Rockbridge.yaml` or `Rockbridge.yml`, merged with any environment variable
//! starting with `ROCKBRIDGE_`:
//!
//! ```rust
//! use rockbridge::config::Settings;
//! let settings = Settings::load().expect("failed to load settings");
//! ```
//!
//! Representing `Settings` with TOML:
//!
//! ```toml
//! [handle_table]
//! initial_capacity = 16
//!
//! [cursor]
//! min_arena_size = 4096
//! max_arena_size = 4194304
//! ```

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::BridgeError;

/// Smallest arena a batched cursor starts with.
pub const DEFAULT_MIN_ARENA_SIZE: usize = 4096;

/// Largest arena a batched cursor grows to.
pub const DEFAULT_MAX_ARENA_SIZE: usize = DEFAULT_MIN_ARENA_SIZE * 1024;

/// Number of slots a new handle table starts with.
pub const DEFAULT_HANDLE_TABLE_CAPACITY: usize = 16;

/// Top-level rockbridge settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Options for observer handle tables.
    pub handle_table: HandleTableOptions,
    /// Options for batched cursors.
    pub cursor: CursorOptions,
}

/// Options for a [`crate::handles::HandleTable`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HandleTableOptions {
    /// Number of slots allocated up front. The table doubles when full.
    pub initial_capacity: usize,
}

impl Default for HandleTableOptions {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_HANDLE_TABLE_CAPACITY,
        }
    }
}

/// Arena bounds for a [`crate::cursor::BatchedCursor`].
///
/// A cursor starts with an arena of `min_arena_size` bytes and doubles it each
/// time a batch is fully consumed, up to `max_arena_size`. Records that do not
/// fit in the arena are still returned, just without batching.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CursorOptions {
    /// Initial arena size in bytes.
    pub min_arena_size: usize,
    /// Arena size in bytes past which the arena stops growing.
    pub max_arena_size: usize,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            min_arena_size: DEFAULT_MIN_ARENA_SIZE,
            max_arena_size: DEFAULT_MAX_ARENA_SIZE,
        }
    }
}

impl CursorOptions {
    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.min_arena_size == 0
            || self.max_arena_size == 0
            || self.min_arena_size > self.max_arena_size
        {
            return Err(BridgeError::InvalidArenaSize {
                min: self.min_arena_size,
                max: self.max_arena_size,
            });
        }
        Ok(())
    }
}

impl HandleTableOptions {
    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.initial_capacity == 0 {
            return Err(BridgeError::InvalidHandleCapacity(self.initial_capacity));
        }
        Ok(())
    }
}

impl Settings {
    /// Converts the settings to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Checks that every option is usable.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.handle_table.validate()?;
        self.cursor.validate()?;
        Ok(())
    }

    /// Loads settings from a file, choosing the format by extension
    /// (`json`, `toml`, `yaml` or `yml`). Unset fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Settings, crate::Error> {
        let path = path.as_ref();
        let Some(ext) = path.extension() else {
            return Err(BridgeError::UnknownConfigurationFormat(path.into()).into());
        };

        let mut builder = Figment::from(Settings::default());
        match ext.to_str().unwrap_or_default() {
            "json" => builder = builder.merge(Json::file(path)),
            "toml" => builder = builder.merge(Toml::file(path)),
            "yaml" | "yml" => builder = builder.merge(Yaml::file(path)),
            _ => return Err(BridgeError::UnknownConfigurationFormat(path.into()).into()),
        }
        Self::extract(builder)
    }

    /// Loads settings from environment variables starting with `prefix`.
    /// Nested fields use a dot, e.g. `ROCKBRIDGE_CURSOR.MIN_ARENA_SIZE`.
    pub fn from_env(prefix: &str) -> Result<Settings, crate::Error> {
        Self::extract(Figment::from(Settings::default()).merge(Env::prefixed(prefix)))
    }

    /// Loads settings from the well-known `Rockbridge.*` files in the working
    /// directory, then applies `ROCKBRIDGE_` environment overrides.
    pub fn load() -> Result<Settings, crate::Error> {
        Self::extract(
            Figment::from(Settings::default())
                .merge(Json::file("Rockbridge.json"))
                .merge(Toml::file("Rockbridge.toml"))
                .merge(Yaml::file("Rockbridge.yaml"))
                .merge(Yaml::file("Rockbridge.yml"))
                .admerge(Env::prefixed("ROCKBRIDGE_")),
        )
    }

    fn extract(figment: Figment) -> Result<Settings, crate::Error> {
        let settings: Settings = figment
            .extract()
            .map_err(|e| BridgeError::InvalidConfigurationFormat(Box::new(e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Provider for Settings {
    fn metadata(&self) -> Metadata {
        Metadata::named("rockbridge configuration options")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}
