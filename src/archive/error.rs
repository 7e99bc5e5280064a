use thiserror::Error;

use crate::{block::BlockError, header::HeaderError, index::IndexError};

/// Errors raised while writing or reading an archive
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The file does not start with the archive magic bytes
    #[error("not a tachyon archive")]
    BadMagic,
    /// The archive was written by an incompatible major version
    #[error("unsupported archive version {0}.{1}.{2}")]
    UnsupportedVersion(u32, u32, u32),
    /// The footer's end-of-file marker is damaged or missing
    #[error("archive footer failed validation")]
    BadFooter,
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
