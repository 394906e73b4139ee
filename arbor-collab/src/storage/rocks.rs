//! RocksDB-backed snapshot history.
//!
//! Column family `snapshots`:
//! - key: version id (8 bytes big-endian), so iteration order is version order
//! - value: LZ4-compressed bincode of [`TreeSnapshot`]
//!
//! The next version id is recovered on open from the last key, the same way
//! a sequence is recovered from a log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use arbor_core::TreeNode;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};

use super::{now_millis, SnapshotInfo, SnapshotStore, StoreError, TreeSnapshot};

const CF_SNAPSHOTS: &str = "snapshots";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every append (default: true, a commit is acknowledged only once durable)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("arbor_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Default tuning at a given path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Persistent [`SnapshotStore`].
///
/// `SingleThreaded` RocksDB handles are not `Sync`, so the handle sits
/// behind a mutex; appends are already serialized by the coordinator.
pub struct RocksSnapshotStore {
    db: Mutex<DBWithThreadMode<SingleThreaded>>,
    config: StoreConfig,
    /// Next version id to assign
    next_version: AtomicU64,
}

impl RocksSnapshotStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf = ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options(&config));
        let db =
            DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(&db_opts, &config.path, vec![cf])?;

        let next_version = Self::recover_next_version(&db);
        log::info!(
            "Opened snapshot store at {} (next version {next_version})",
            config.path.display()
        );

        Ok(Self {
            db: Mutex::new(db),
            config,
            next_version: AtomicU64::new(next_version),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are LZ4 framed already
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts
    }

    /// Last key + 1, or 1 for an empty store.
    fn recover_next_version(db: &DBWithThreadMode<SingleThreaded>) -> u64 {
        let Some(cf) = db.cf_handle(CF_SNAPSHOTS) else {
            return 1;
        };
        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => decode_key(&key).map_or(1, |v| v + 1),
            _ => 1,
        }
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DBWithThreadMode<SingleThreaded>>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))
    }

    fn cf<'a>(
        db: &'a DBWithThreadMode<SingleThreaded>,
    ) -> Result<&'a rocksdb::ColumnFamily, StoreError> {
        db.cf_handle(CF_SNAPSHOTS)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{CF_SNAPSHOTS}' not found")))
    }
}

fn encode_snapshot(snapshot: &TreeSnapshot) -> Result<Vec<u8>, StoreError> {
    let bytes = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode_snapshot(value: &[u8]) -> Result<TreeSnapshot, StoreError> {
    let bytes = lz4_flex::decompress_size_prepended(value)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (snapshot, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(snapshot)
}

fn decode_key(key: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

impl SnapshotStore for RocksSnapshotStore {
    fn append(&self, tree: &TreeNode) -> Result<TreeSnapshot, StoreError> {
        let db = self.lock()?;
        let cf = Self::cf(&db)?;

        let snapshot = TreeSnapshot {
            version_id: self.next_version.load(Ordering::SeqCst),
            tree: tree.clone(),
            created_at: now_millis(),
        };
        let value = encode_snapshot(&snapshot)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        db.put_cf_opt(cf, snapshot.version_id.to_be_bytes(), &value, &write_opts)?;

        // Only advance once the record is written
        self.next_version.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Appended snapshot v{} ({} nodes, {} bytes)",
            snapshot.version_id,
            tree.node_count(),
            value.len()
        );
        Ok(snapshot)
    }

    fn latest(&self) -> Result<Option<TreeSnapshot>, StoreError> {
        let db = self.lock()?;
        let cf = Self::cf(&db)?;
        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                decode_snapshot(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    fn get(&self, version_id: u64) -> Result<Option<TreeSnapshot>, StoreError> {
        let db = self.lock()?;
        let cf = Self::cf(&db)?;
        db.get_cf(cf, version_id.to_be_bytes())?
            .map(|value| decode_snapshot(&value))
            .transpose()
    }

    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>, StoreError> {
        let db = self.lock()?;
        let cf = Self::cf(&db)?;
        let mut out = Vec::with_capacity(limit.min(64));
        for item in db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            out.push(SnapshotInfo::from(&decode_snapshot(&value)?));
        }
        Ok(out)
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.next_version.load(Ordering::SeqCst) - 1)
    }
}
