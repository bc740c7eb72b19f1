//! # Subcoin Flat DB
//!
//! Single-file snapshots of in-memory caches (masternode lists, quorum state, governance
//! objects) that are rebuilt on demand and only need to survive restarts.
//!
//! File layout:
//!
//! ```text
//! compact-size || magic message || network magic (4 bytes) || body (bincode) || checksum
//! ```
//!
//! The trailing checksum is the double-SHA256 of everything before it.

mod error;

pub use self::error::Error;

use bitcoin::Network;
use bitcoin::hashes::{Hash, sha256d};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Flat database result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Size of the trailing double-SHA256 checksum.
const CHECKSUM_SIZE: usize = 32;

/// Object persisted by a [`FlatDb`].
///
/// The [`Display`] impl is a one-line summary used in the logs.
pub trait FlatDbObject: Serialize + DeserializeOwned + Display {
    /// Reset to an empty state.
    fn clear(&mut self);

    /// Drop entries that are no longer valid after a restart.
    fn check_and_remove(&mut self) {}
}

/// Snapshot file of a [`FlatDbObject`].
pub struct FlatDb<T> {
    path: PathBuf,
    filename: String,
    magic_message: String,
    network_magic: [u8; 4],
    _phantom: PhantomData<fn() -> T>,
}

impl<T: FlatDbObject> FlatDb<T> {
    /// Creates a handle to `data_dir/filename`.
    ///
    /// `magic_message` identifies the kind of object stored in the file, `network` the chain
    /// it belongs to.
    pub fn new(
        data_dir: impl AsRef<Path>,
        filename: impl Into<String>,
        magic_message: impl Into<String>,
        network: Network,
    ) -> Self {
        let filename = filename.into();
        Self {
            path: data_dir.as_ref().join(&filename),
            filename,
            magic_message: magic_message.into(),
            network_magic: network.magic().to_bytes(),
            _phantom: PhantomData,
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `obj` to the file, replacing any previous content.
    pub fn write(&self, obj: &T) -> Result<()> {
        let now = Instant::now();

        let mut data = bitcoin::consensus::serialize(&self.magic_message);
        data.extend_from_slice(&self.network_magic);
        bincode::serialize_into(&mut data, obj).map_err(std::io::Error::other)?;

        let checksum = sha256d::Hash::hash(&data);
        data.extend_from_slice(checksum.as_byte_array());

        let mut file = File::create(&self.path)?;
        file.write_all(&data)?;
        file.sync_all()?;

        tracing::info!(
            "Written {} to {} in {}ms: {obj}",
            self.filename,
            self.path.display(),
            now.elapsed().as_millis()
        );

        Ok(())
    }

    /// Reads and verifies the file without post-processing the decoded object.
    pub fn read(&self) -> Result<T> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::FileMissing(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let Some(data_len) = bytes.len().checked_sub(CHECKSUM_SIZE) else {
            return Err(Error::HashRead);
        };
        let (data, checksum) = bytes.split_at(data_len);

        if checksum != sha256d::Hash::hash(data).as_byte_array().as_slice() {
            return Err(Error::ChecksumMismatch);
        }

        let (magic_message, consumed) = bitcoin::consensus::deserialize_partial::<String>(data)
            .map_err(|err| Error::IncorrectFormat(err.to_string()))?;

        if magic_message != self.magic_message {
            return Err(Error::IncorrectMagicMessage {
                expected: self.magic_message.clone(),
                got: magic_message,
            });
        }

        let rest = &data[consumed..];
        if rest.len() < self.network_magic.len() {
            return Err(Error::IncorrectFormat("missing network magic".to_string()));
        }
        let (network_magic, body) = rest.split_at(self.network_magic.len());

        if network_magic != self.network_magic.as_slice() {
            let mut got = [0u8; 4];
            got.copy_from_slice(network_magic);
            return Err(Error::IncorrectNetworkMagic {
                expected: self.network_magic,
                got,
            });
        }

        bincode::deserialize(body).map_err(|err| Error::IncorrectFormat(err.to_string()))
    }

    /// Loads the object and drops its stale entries.
    pub fn load(&self) -> Result<T> {
        let now = Instant::now();

        let mut obj = self.read()?;

        tracing::info!(
            "Loaded {} in {}ms: {obj}",
            self.filename,
            now.elapsed().as_millis()
        );

        obj.check_and_remove();

        tracing::debug!("{} after check_and_remove: {obj}", self.filename);

        Ok(obj)
    }

    /// Loads the file into `obj`, recreating the file when that is safe.
    ///
    /// A missing file is recreated from `obj` as is, a file with a valid header but an
    /// unreadable body is recreated from the cleared `obj`. Every other failure is returned and
    /// leaves both `obj` and the file untouched.
    pub fn load_into(&self, obj: &mut T) -> Result<()> {
        match self.load() {
            Ok(loaded) => {
                *obj = loaded;
                Ok(())
            }
            Err(Error::FileMissing(_)) => {
                tracing::info!("Missing {}, will try to recreate", self.filename);
                self.write(obj)
            }
            Err(Error::IncorrectFormat(err)) => {
                tracing::warn!(
                    "Magic is ok but {} has invalid format ({err}), will try to recreate",
                    self.filename
                );
                obj.clear();
                self.write(obj)
            }
            Err(err) => {
                tracing::error!(
                    "Error reading {}: {err}, file format is unknown or invalid, please fix it manually",
                    self.filename
                );
                Err(err)
            }
        }
    }

    /// Loads the file, falling back to a default object under the rules of [`Self::load_into`].
    pub fn load_or_default(&self) -> Result<T>
    where
        T: Default,
    {
        let mut obj = T::default();
        self.load_into(&mut obj)?;
        Ok(obj)
    }

    /// Writes `obj` after checking that the existing file is safe to overwrite.
    ///
    /// Files of another kind or of another network are never overwritten.
    pub fn dump(&self, obj: &T) -> Result<()> {
        let now = Instant::now();

        tracing::debug!("Verifying {} format...", self.filename);
        match self.read() {
            Ok(_) => {}
            Err(Error::FileMissing(_)) => {
                tracing::info!("Missing {}, will try to recreate", self.filename);
            }
            Err(Error::IncorrectFormat(err)) => {
                tracing::warn!(
                    "Magic is ok but {} has invalid format ({err}), will try to recreate",
                    self.filename
                );
            }
            Err(err) => {
                tracing::error!(
                    "Error reading {}: {err}, file format is unknown or invalid, please fix it manually",
                    self.filename
                );
                return Err(err);
            }
        }

        self.write(obj)?;

        tracing::debug!(
            "{} dump finished in {}ms",
            self.filename,
            now.elapsed().as_millis()
        );

        Ok(())
    }
}
