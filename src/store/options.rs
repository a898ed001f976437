use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::arrays::DEFAULT_APPEND_CHUNK_SIZE;
use crate::identity::DEFAULT_LID_PREFIX;
use crate::metrics::CacheMetrics;
use crate::types::{CacheError, Result};

/// Configuration options supplied when creating a [`super::Store`].
///
/// Can be built in code or read from TOML:
///
/// ```toml
/// lid_prefix = "@tmp:"
/// append_chunk_size = 256
/// coalesce_notifications = false
/// ```
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Prefix of generated local ids.
    pub lid_prefix: String,
    /// Maximum number of members appended per chunk during an array sync.
    pub append_chunk_size: usize,
    /// Whether notifications are buffered and dispatched once per turn.
    pub coalesce_notifications: bool,
    /// Whether the previous owner of a displaced singular inverse is corrected.
    pub repair_inverse_mismatches: bool,
    /// Optional metrics collection implementation
    #[serde(skip)]
    pub metrics: Option<Arc<dyn CacheMetrics>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self {
            lid_prefix: DEFAULT_LID_PREFIX.to_string(),
            append_chunk_size: DEFAULT_APPEND_CHUNK_SIZE,
            coalesce_notifications: true,
            repair_inverse_mismatches: true,
            metrics: None,
        }
    }

    /// Sets the local id prefix.
    pub fn lid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lid_prefix = prefix.into();
        self
    }

    /// Sets the append chunk size.
    pub fn append_chunk_size(mut self, size: usize) -> Self {
        self.append_chunk_size = size;
        self
    }

    /// Enables or disables notification coalescing.
    pub fn coalesce_notifications(mut self, enabled: bool) -> Self {
        self.coalesce_notifications = enabled;
        self
    }

    /// Enables or disables displaced inverse repair.
    pub fn repair_inverse_mismatches(mut self, enabled: bool) -> Self {
        self.repair_inverse_mismatches = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses options from a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: StoreOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| CacheError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.lid_prefix.is_empty() {
            return Err(CacheError::Config("lid_prefix must not be empty".into()));
        }
        if self.append_chunk_size == 0 {
            return Err(CacheError::Config(
                "append_chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
