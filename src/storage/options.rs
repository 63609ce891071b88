use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{Result, SombraError};

use super::metrics::StorageMetrics;
use super::region::Geometry;

/// Default name of the offset-table segment.
pub const DEFAULT_OFFSETS_SEGMENT: &str = "sombra_shm_offsets";
/// Default name of the data-heap segment.
pub const DEFAULT_DATA_SEGMENT: &str = "sombra_shm_data";
/// Default maximum number of row handles.
pub const DEFAULT_MAX_ROWS: u64 = 32 * 128 * 1024;
/// Default number of home buckets in the identifier index.
pub const DEFAULT_HASH_BUCKETS: u64 = 12289;
/// Default transaction log capacity.
pub const DEFAULT_MAX_LOG_RECORDS: usize = 1_000_000;
/// Default wait for the commit lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Configuration options supplied when initialising an [`super::Engine`].
///
/// Capacities only matter to the process that creates the segments; attaching
/// processes read them back from the data segment header.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Directory holding the shared segments.
    pub dir: PathBuf,
    /// Well-known name of the offset-table segment.
    pub offsets_segment: String,
    /// Well-known name of the data-heap segment.
    pub data_segment: String,
    /// Maximum number of row handles.
    pub max_rows: u64,
    /// Number of home buckets in the identifier index.
    pub hash_buckets: u64,
    /// Number of overflow entries shared by all bucket chains.
    pub overflow_entries: u64,
    /// Size of the data heap in 8-byte words.
    pub heap_words: u64,
    /// Maximum number of log records per transaction.
    pub max_log_records: usize,
    /// Bounded wait for the commit lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Optional metrics collection implementation.
    #[serde(skip)]
    pub metrics: Option<Arc<dyn StorageMetrics>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new(default_dir())
    }
}

impl EngineOptions {
    /// Creates options with default capacities placing segments under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            offsets_segment: DEFAULT_OFFSETS_SEGMENT.to_string(),
            data_segment: DEFAULT_DATA_SEGMENT.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            hash_buckets: DEFAULT_HASH_BUCKETS,
            overflow_entries: DEFAULT_MAX_ROWS,
            heap_words: DEFAULT_MAX_ROWS * 8,
            max_log_records: DEFAULT_MAX_LOG_RECORDS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            metrics: None,
        }
    }

    /// Parses options from a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| SombraError::Config(err.to_string()))
    }

    /// Loads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| SombraError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Sets the segment names.
    pub fn segment_names(mut self, offsets: impl Into<String>, data: impl Into<String>) -> Self {
        self.offsets_segment = offsets.into();
        self.data_segment = data.into();
        self
    }

    /// Sets the row-handle capacity; overflow entries and heap size follow it.
    pub fn max_rows(mut self, rows: u64) -> Self {
        self.max_rows = rows;
        self.overflow_entries = rows;
        self.heap_words = rows.saturating_mul(8);
        self
    }

    /// Sets the number of identifier index buckets.
    pub fn hash_buckets(mut self, buckets: u64) -> Self {
        self.hash_buckets = buckets;
        self
    }

    /// Sets the number of identifier index overflow entries.
    pub fn overflow_entries(mut self, entries: u64) -> Self {
        self.overflow_entries = entries;
        self
    }

    /// Sets the data heap size in words.
    pub fn heap_words(mut self, words: u64) -> Self {
        self.heap_words = words;
        self
    }

    /// Sets the per-transaction log capacity.
    pub fn max_log_records(mut self, records: usize) -> Self {
        self.max_log_records = records;
        self
    }

    /// Sets the commit lock wait.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Path of the offset-table segment.
    pub fn offsets_path(&self) -> PathBuf {
        self.dir.join(&self.offsets_segment)
    }

    /// Path of the data-heap segment.
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(&self.data_segment)
    }

    pub(crate) fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_rows == 0 {
            return Err(SombraError::Invalid("max_rows must be positive"));
        }
        if self.hash_buckets == 0 {
            return Err(SombraError::Invalid("hash_buckets must be positive"));
        }
        if self.heap_words == 0 {
            return Err(SombraError::Invalid("heap_words must be positive"));
        }
        if self.max_log_records == 0 {
            return Err(SombraError::Invalid("max_log_records must be positive"));
        }
        if Geometry::from_options(self).segment_words().is_none() {
            return Err(SombraError::Invalid("segment capacities overflow"));
        }
        Ok(())
    }
}

fn default_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_named_fields() -> Result<()> {
        let opts = EngineOptions::from_toml_str(
            r#"
            dir = "/tmp/graph"
            max_rows = 64
            lock_timeout_ms = 250
            "#,
        )?;
        assert_eq!(opts.dir, PathBuf::from("/tmp/graph"));
        assert_eq!(opts.max_rows, 64);
        assert_eq!(opts.lock_timeout_duration(), Duration::from_millis(250));
        assert_eq!(opts.hash_buckets, DEFAULT_HASH_BUCKETS);
        assert_eq!(opts.data_segment, DEFAULT_DATA_SEGMENT);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineOptions::from_toml_str("max_rowz = 3").err().unwrap();
        assert!(matches!(err, SombraError::Config(_)));
    }

    #[test]
    fn max_rows_scales_dependent_capacities() {
        let opts = EngineOptions::new("/tmp").max_rows(100);
        assert_eq!(opts.overflow_entries, 100);
        assert_eq!(opts.heap_words, 800);
        assert!(opts.validate().is_ok());
        assert!(EngineOptions::new("/tmp").max_rows(0).validate().is_err());
    }

    #[test]
    fn capacities_that_overflow_segment_sizes_are_invalid() {
        assert!(matches!(
            EngineOptions::new("/tmp").max_rows(1 << 62).validate(),
            Err(SombraError::Invalid(_))
        ));
        let opts = EngineOptions::from_toml_str("heap_words = 9223372036854775807").unwrap();
        assert!(matches!(opts.validate(), Err(SombraError::Invalid(_))));
    }
}
