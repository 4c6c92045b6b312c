//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Size threshold, in bytes, at which the active log file rotates.
pub const DEFAULT_MAX_FILE_SIZE: u32 = 1_000_000_000;

/// Tunable knobs for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Active file rotates once the next append would exceed this size.
    pub max_file_size: u32,
    /// When true, every append opens/writes the active file with the
    /// synchronous-write flag so each put is durable before it returns.
    pub sync_on_put: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_file_size: DEFAULT_MAX_FILE_SIZE, sync_on_put: false }
    }
}

impl Options {
    /// Loads options by layering a TOML config file (if present) and
    /// `BITCASK_*` environment variables over the defaults.
    ///
    /// `path` is optional; a missing file is not an error.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).required(false),
            );
        }
        builder = builder.add_source(config::Environment::with_prefix("BITCASK"));
        Ok(builder.build()?.try_deserialize()?)
    }
}
