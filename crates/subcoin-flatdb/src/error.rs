use std::path::PathBuf;

/// Failure categories of reading a flat database file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file does not exist yet.
    #[error("Missing file {0}")]
    FileMissing(PathBuf),

    /// The file is too short to hold the trailing checksum.
    #[error("Failed to read checksum")]
    HashRead,

    /// The checksum does not match the content.
    #[error("Checksum mismatch, data corrupted")]
    ChecksumMismatch,

    /// The file belongs to another kind of flat database.
    #[error("Invalid magic message, expected {expected:?}, got {got:?}")]
    IncorrectMagicMessage { expected: String, got: String },

    /// The file was written for a different network.
    #[error("Invalid network magic, expected {expected:02x?}, got {got:02x?}")]
    IncorrectNetworkMagic { expected: [u8; 4], got: [u8; 4] },

    /// The header is fine but the body could not be decoded.
    #[error("Invalid data format: {0}")]
    IncorrectFormat(String),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the file can simply be recreated from a fresh object.
    ///
    /// Every other error requires manual intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FileMissing(_) | Self::IncorrectFormat(_))
    }
}
