use thiserror::Error;

use crate::container::ContainerError;

/// Errors raised by the compression codecs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompressionError {
    /// MD5 of a decompressed stream does not match the stored digest
    #[error("checksum mismatch after decompressing {target} stream")]
    Integrity { target: &'static str },
    /// A stream was stamped with an encoder the reader does not support
    #[error("stream encoder {0} cannot decode this payload")]
    WrongEncoder(&'static str),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
