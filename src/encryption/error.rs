use thiserror::Error;

use crate::container::ContainerError;

/// Errors raised by encryption, decryption and keychain handling
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// AES-GCM tag verification failed; the plaintext is not trustworthy
    #[error("authentication tag verification failed")]
    Auth,
    /// No keychain entry carries the container's identifier
    #[error("keychain has no entry for identifier {0:#018x}")]
    MissingKey(u64),
    /// Keychain file did not start with the expected magic bytes
    #[error("not a keychain file")]
    BadMagic,
    /// Keychain file declared an unknown key type
    #[error("unknown keychain entry type {0}")]
    UnknownKeyType(u8),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
