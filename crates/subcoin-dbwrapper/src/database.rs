//! Base store on top of RocksDB with value obfuscation and batched atomic writes.

use crate::batch::Batch;
use crate::codec::{DbValue, KeyEncode, decode_value};
use crate::iterator::DbIterator;
use crate::notifications::KernelNotifications;
use crate::options::DbParams;
use crate::transaction::Changes;
use crate::view::{CommitTarget, StoreView};
use crate::{Error, Result};
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, DB, Env, Options, WriteOptions};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reserved key of the obfuscation key entry, the serialized string `"\0obfuscate_key"`.
pub const OBFUSCATE_KEY_KEY: &[u8] = b"\x0e\x00obfuscate_key";

/// Length of a newly generated obfuscation key.
pub const OBFUSCATE_KEY_NUM_BYTES: usize = 8;

/// Maximum number of files kept open by the engine.
const MAX_OPEN_FILES: i32 = 64;

/// Properties summed up by [`Database::dynamic_memory_usage`].
const MEMORY_USAGE_PROPERTIES: [&str; 3] = [
    "rocksdb.cur-size-all-mem-tables",
    "rocksdb.block-cache-usage",
    "rocksdb.estimate-table-readers-mem",
];

/// XORs `key` cyclically over `data`, starting at the first byte.
pub(crate) fn xor_in_place(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Ordered key-value store persisted by RocksDB.
///
/// Every value is XORed with a per-database obfuscation key before it hits the disk. The key
/// deters casual inspection of the files and is not an integrity or confidentiality measure.
pub struct Database {
    /// RocksDB instance.
    db: DB,
    /// Name of the database, used in logs.
    name: String,
    /// Location of the database directory.
    path: PathBuf,
    /// Whether the database lives in memory.
    is_memory: bool,
    /// Key used to obfuscate the stored values, all zeros when obfuscation is off.
    obfuscate_key: Vec<u8>,
    /// Receives fatal write failures.
    notifications: Option<Arc<KernelNotifications>>,
    // Kept alive for memory-only databases.
    _env: Option<Env>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("is_memory", &self.is_memory)
            .finish()
    }
}

impl Database {
    /// Open or create the database described by `params`.
    pub fn open(params: &DbParams) -> Result<Self> {
        Self::open_inner(params, None)
    }

    /// Open or create a database reporting fatal write failures to `notifications`.
    pub fn open_with_notifications(
        params: &DbParams,
        notifications: Arc<KernelNotifications>,
    ) -> Result<Self> {
        Self::open_inner(params, Some(notifications))
    }

    fn open_inner(
        params: &DbParams,
        notifications: Option<Arc<KernelNotifications>>,
    ) -> Result<Self> {
        let name = params
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| params.path.display().to_string());

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.set_max_open_files(MAX_OPEN_FILES);
        db_opts.set_write_buffer_size(params.write_buffer_size());
        db_opts.set_max_write_buffer_number(2);
        // Obfuscated values do not compress.
        db_opts.set_compression_type(DBCompressionType::None);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        let cache = Cache::new_lru_cache(params.block_cache_size());
        block_opts.set_block_cache(&cache);
        db_opts.set_block_based_table_factory(&block_opts);

        let env = if params.memory_only {
            let env = Env::mem_env()?;
            db_opts.set_env(&env);
            Some(env)
        } else {
            std::fs::create_dir_all(&params.path)?;
            None
        };

        if params.wipe_data {
            tracing::info!("Wiping database {name} at {}", params.path.display());
            DB::destroy(&db_opts, &params.path)?;
        }

        let db = DB::open(&db_opts, &params.path)?;

        tracing::info!(
            "Opened database {name} at {} (memory_only: {}, cache: {} MiB)",
            params.path.display(),
            params.memory_only,
            params.cache_bytes >> 20
        );

        let mut database = Self {
            db,
            name,
            path: params.path.clone(),
            is_memory: params.memory_only,
            obfuscate_key: vec![0u8; OBFUSCATE_KEY_NUM_BYTES],
            notifications,
            _env: env,
        };

        database.obfuscate_key = database.load_or_create_obfuscate_key(params.obfuscate)?;

        if params.options.force_compact {
            database.compact();
        }

        Ok(database)
    }

    /// Load the obfuscation key, or generate and persist one for a new database.
    ///
    /// A legacy database that already holds data but no key keeps the all-zero key.
    fn load_or_create_obfuscate_key(&self, obfuscate: bool) -> Result<Vec<u8>> {
        if let Some(stored) = self.db.get(OBFUSCATE_KEY_KEY)? {
            if !stored.is_empty() {
                tracing::debug!(
                    "Using obfuscation key for {}: {}",
                    self.name,
                    hex::encode(&stored)
                );
                return Ok(stored);
            }
        }

        if !self.is_empty() {
            tracing::info!(
                "Database {} has no obfuscation key, values are stored in the clear",
                self.name
            );
            return Ok(vec![0u8; OBFUSCATE_KEY_NUM_BYTES]);
        }

        let mut new_key = vec![0u8; OBFUSCATE_KEY_NUM_BYTES];
        if obfuscate {
            fastrand::Rng::new().fill(&mut new_key);
        }

        // Written in the clear: the key is still all zeros at this point.
        self.db.put(OBFUSCATE_KEY_KEY, &new_key)?;

        tracing::info!(
            "Wrote new obfuscation key for {}: {}",
            self.name,
            hex::encode(&new_key)
        );

        Ok(new_key)
    }

    /// Name of the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the filesystem path of the on-disk data, `None` for a memory-only database.
    pub fn storage_path(&self) -> Option<&Path> {
        if self.is_memory {
            None
        } else {
            Some(&self.path)
        }
    }

    /// The key values are XORed with.
    pub fn obfuscate_key(&self) -> &[u8] {
        &self.obfuscate_key
    }

    /// Read and decode the value stored under `key`.
    pub fn read<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: KeyEncode + ?Sized,
        V: DeserializeOwned,
    {
        self.read_raw(&key.key_bytes())?
            .map(|bytes| decode_value(&bytes))
            .transpose()
    }

    /// Returns the de-obfuscated bytes stored under an encoded key.
    pub fn read_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.db.get(key) {
            Ok(Some(mut value)) => {
                xor_in_place(&mut value, &self.obfuscate_key);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!("Database read failure in {}: {err}", self.name);
                Err(err.into())
            }
        }
    }

    /// Write `value` under `key` through a single-operation batch.
    ///
    /// With `sync` set the call only returns once the write is durable.
    pub fn write<K, V>(&self, key: &K, value: &V, sync: bool) -> Result<()>
    where
        K: KeyEncode + ?Sized,
        V: Serialize + ?Sized,
    {
        let mut batch = self.new_batch();
        batch.write(key, value)?;
        self.write_batch(batch, sync)
    }

    /// Returns `true` if `key` is present.
    pub fn exists<K: KeyEncode + ?Sized>(&self, key: &K) -> Result<bool> {
        self.exists_raw(&key.key_bytes())
    }

    fn exists_raw(&self, key: &[u8]) -> Result<bool> {
        match self.db.get_pinned(key) {
            Ok(value) => Ok(value.is_some()),
            Err(err) => {
                tracing::warn!("Database read failure in {}: {err}", self.name);
                Err(err.into())
            }
        }
    }

    /// Remove `key` through a single-operation batch.
    pub fn erase<K: KeyEncode + ?Sized>(&self, key: &K, sync: bool) -> Result<()> {
        let mut batch = self.new_batch();
        batch.erase(key);
        self.write_batch(batch, sync)
    }

    /// Create an empty batch for this database.
    pub fn new_batch(&self) -> Batch {
        Batch::new(self.obfuscate_key.clone())
    }

    /// Atomically apply every operation of `batch`.
    ///
    /// A failure means the on-disk state can no longer be trusted, it is reported to the
    /// attached [`KernelNotifications`] and the caller is expected to shut down.
    pub fn write_batch(&self, batch: Batch, sync: bool) -> Result<()> {
        tracing::debug!(
            "Writing batch of {} operations (~{} bytes) to {}, sync: {sync}",
            batch.len(),
            batch.size_estimate(),
            self.name
        );

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);

        if let Err(err) = self.db.write_opt(batch.into_inner(), &write_opts) {
            let message = format!("Fatal error while writing to database {}: {err}", self.name);
            match &self.notifications {
                Some(notifications) => notifications.fatal_error(message),
                None => tracing::error!("{message}"),
            }
            return Err(Error::Rocksdb(err));
        }

        Ok(())
    }

    /// Creates an iterator positioned before the first entry.
    ///
    /// The iterator reads from an implicit snapshot and does not observe later writes.
    pub fn new_iterator(&self) -> DbIterator<'_> {
        DbIterator::new(self.db.raw_iterator(), &self.obfuscate_key)
    }

    /// Returns `true` if the database holds no entries at all.
    pub fn is_empty(&self) -> bool {
        let mut iter = self.db.raw_iterator();
        iter.seek_to_first();
        !iter.valid()
    }

    /// Approximate size of the entries in `[begin, end)`.
    ///
    /// Sums the stored key and value lengths of the range as read from a snapshot.
    pub fn estimate_size<K: KeyEncode + ?Sized>(&self, begin: &K, end: &K) -> u64 {
        let begin = begin.key_bytes();
        let end = end.key_bytes();

        let mut size = 0u64;
        let mut iter = self.db.raw_iterator();
        iter.seek(&begin);
        while let Some((key, value)) = iter.item() {
            if key >= end.as_slice() {
                break;
            }
            size += (key.len() + value.len()) as u64;
            iter.next();
        }

        if let Err(err) = iter.status() {
            tracing::warn!("Size estimation of {} stopped early: {err}", self.name);
        }

        size
    }

    /// Approximate memory held by the memtables, block cache and table readers.
    pub fn dynamic_memory_usage(&self) -> usize {
        MEMORY_USAGE_PROPERTIES
            .iter()
            .map(|property| match self.db.property_int_value(*property) {
                Ok(value) => value.unwrap_or_default() as usize,
                Err(err) => {
                    tracing::debug!("Failed to query {property} of {}: {err}", self.name);
                    0
                }
            })
            .sum()
    }

    /// Compact the whole key range.
    pub fn compact(&self) {
        tracing::info!("Starting database compaction of {}", self.name);
        self.db.compact_range::<&[u8], &[u8]>(None, None);
        tracing::info!("Finished database compaction of {}", self.name);
    }
}

impl StoreView for Database {
    type Iterator<'a> = DbIterator<'a>;

    fn read_encoded<V: DbValue>(&self, key: &[u8]) -> Result<Option<V>> {
        self.read_raw(key)?
            .map(|bytes| decode_value(&bytes))
            .transpose()
    }

    fn exists_encoded(&self, key: &[u8]) -> Result<bool> {
        self.exists_raw(key)
    }

    fn new_iterator(&self) -> Self::Iterator<'_> {
        Database::new_iterator(self)
    }
}

impl CommitTarget for Database {
    fn commit_changes(&mut self, changes: Changes) -> Result<()> {
        (&*self).commit_changes_shared(changes)
    }
}

impl CommitTarget for &Database {
    fn commit_changes(&mut self, changes: Changes) -> Result<()> {
        (**self).commit_changes_shared(changes)
    }
}

impl Database {
    /// Flatten an overlay into one batch and write it atomically.
    fn commit_changes_shared(&self, changes: Changes) -> Result<()> {
        tracing::debug!(
            "Committing {} deletes and {} writes to {}",
            changes.deletes().len(),
            changes.writes().len(),
            self.name
        );

        let mut batch = self.new_batch();
        batch.commit_changes(changes)?;
        self.write_batch(batch, false)
    }
}
