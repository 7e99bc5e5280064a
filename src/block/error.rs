use thiserror::Error;

use crate::{
    compression::CompressionError, container::ContainerError, encryption::CryptoError,
    genotype::GenotypeError,
};

/// Errors raised while assembling, writing or reading a variant block
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    /// Blocks never span contigs
    #[error("record on contig {found} appended to a block for contig {expected}")]
    ContigMismatch { expected: i32, found: i32 },
    /// The bytes after the footer were not the end-of-block marker
    #[error("missing end-of-block marker")]
    BadEndOfBlock,
    /// The decompressed footer does not match its stored digest
    #[error("block footer failed its integrity check")]
    FooterIntegrity,
    /// Encryption was requested without a keychain to store keys in
    #[error("encryption requested but no keychain supplied")]
    MissingKeychain,
    /// N-allelic genotype words are sized by the site's allele count, so
    /// they cannot be unpacked without the REFALT and ALLELES streams
    #[error("genotype decode needs the allele streams of this block")]
    MissingAlleleStreams,
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Genotype(#[from] GenotypeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
