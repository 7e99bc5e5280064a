use thiserror::Error;

use crate::container::header::TachyonType;

/// Errors raised while assembling or decoding a data container
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContainerError {
    /// A value of one primitive family was appended to a stream carrying
    /// another
    #[error("primitive type mismatch: stream holds {held:?}, caller added {added:?}")]
    TypeMismatch { held: TachyonType, added: TachyonType },
    /// A stride addition violated a fixed-stride container
    #[error("stride mismatch: container fixed at {fixed}, caller added {added}")]
    StrideMismatch { fixed: i32, added: u32 },
    /// A signed value cannot be represented without loss at any width
    #[error("integer {0} cannot be narrowed without loss")]
    Overflow(i64),
    /// MD5 digest of an uncompressed stream does not match its header
    #[error("checksum mismatch on uncompressed {target} stream")]
    Integrity { target: &'static str },
    /// Unknown primitive type tag in a serialized header
    #[error("unknown primitive type tag {0}")]
    UnknownType(u8),
    /// Unknown encoder tag in a serialized header
    #[error("unknown encoder tag {0}")]
    UnknownEncoder(u8),
    /// Unknown encryption tag in a serialized header
    #[error("unknown encryption tag {0}")]
    UnknownEncryption(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub(crate) fn unknown_type(tag: u8) -> Self {
        Self::UnknownType(tag)
    }

    pub(crate) fn unknown_encoder(tag: u8) -> Self {
        Self::UnknownEncoder(tag)
    }

    pub(crate) fn unknown_encryption(tag: u8) -> Self {
        Self::UnknownEncryption(tag)
    }

    pub(crate) fn integrity(target: &'static str) -> Self {
        Self::Integrity { target }
    }
}
