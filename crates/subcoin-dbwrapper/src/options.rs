use std::path::{Path, PathBuf};

/// Default cache budget of a database (8 MiB).
pub const DEFAULT_CACHE_BYTES: usize = 8 << 20;

/// Smallest write buffer handed to the engine regardless of the cache budget.
const MIN_WRITE_BUFFER_SIZE: usize = 64 << 10;

/// User-controlled performance and debug options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbOptions {
    /// Compact the whole key range right after opening.
    pub force_compact: bool,
}

/// Application-specific storage settings of a [`crate::Database`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbParams {
    /// Location of the database directory.
    pub path: PathBuf,
    /// Cache budget in bytes, split between the block cache and the write buffers.
    pub cache_bytes: usize,
    /// Keep everything in memory, nothing touches `path`.
    pub memory_only: bool,
    /// Destroy any existing data before opening.
    pub wipe_data: bool,
    /// XOR the stored values with a random per-database key.
    ///
    /// When disabled, an all-zero key is used.
    pub obfuscate: bool,
    /// Passed-through options.
    pub options: DbOptions,
}

impl DbParams {
    /// Create params with default settings for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_bytes: DEFAULT_CACHE_BYTES,
            memory_only: false,
            wipe_data: false,
            obfuscate: false,
            options: DbOptions::default(),
        }
    }

    /// Create a builder for the database at `path`.
    pub fn builder(path: impl Into<PathBuf>) -> DbParamsBuilder {
        DbParamsBuilder {
            params: Self::new(path),
        }
    }

    /// Location of the database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the LRU block cache.
    pub(crate) fn block_cache_size(&self) -> usize {
        self.cache_bytes / 2
    }

    /// Size of each of the two write buffers.
    pub(crate) fn write_buffer_size(&self) -> usize {
        (self.cache_bytes / 4).max(MIN_WRITE_BUFFER_SIZE)
    }
}

/// Builder pattern for [`DbParams`].
pub struct DbParamsBuilder {
    params: DbParams,
}

impl DbParamsBuilder {
    /// Set the cache budget in bytes.
    pub fn cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.params.cache_bytes = cache_bytes;
        self
    }

    /// Keep the database in memory.
    pub fn memory_only(mut self, memory_only: bool) -> Self {
        self.params.memory_only = memory_only;
        self
    }

    /// Destroy the existing data before opening.
    pub fn wipe_data(mut self, wipe_data: bool) -> Self {
        self.params.wipe_data = wipe_data;
        self
    }

    /// Obfuscate the stored values.
    pub fn obfuscate(mut self, obfuscate: bool) -> Self {
        self.params.obfuscate = obfuscate;
        self
    }

    /// Compact the database on open.
    pub fn force_compact(mut self, force_compact: bool) -> Self {
        self.params.options.force_compact = force_compact;
        self
    }

    /// Build the final [`DbParams`].
    pub fn build(self) -> DbParams {
        self.params
    }
}

/// Database flags for the node command line.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, clap::Args)]
pub struct DatabaseParams {
    /// Database cache size in MiB.
    #[arg(long, value_name = "MiB", default_value_t = 450)]
    pub dbcache: usize,

    /// Store values without XOR obfuscation.
    ///
    /// Only takes effect when a new database is created.
    #[arg(long)]
    pub no_obfuscate: bool,

    /// Wipe the existing database and rebuild it from scratch.
    #[arg(long)]
    pub reindex: bool,

    /// Compact the database on startup.
    #[arg(long)]
    pub force_compactdb: bool,
}

#[cfg(feature = "cli")]
impl DatabaseParams {
    /// Converts the flags into [`DbParams`] for the database at `path`.
    pub fn db_params(&self, path: impl Into<PathBuf>) -> DbParams {
        DbParams::builder(path)
            .cache_bytes(self.dbcache << 20)
            .obfuscate(!self.no_obfuscate)
            .wipe_data(self.reindex)
            .force_compact(self.force_compactdb)
            .build()
    }
}
