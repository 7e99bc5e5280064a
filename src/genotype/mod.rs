//! Genotype codecs. Each genotyped variant is packed by one of four
//! methods, chosen assess-then-emit: diploid biallelic RLE, diploid
//! n-allelic RLE, a per-sample BCF-style fallback when runs do not pay off,
//! and an n-ploid RLE for everything that is not plain diploid.

mod decoder;
mod encoder;

pub use decoder::{GtRun, GtRunIter, GtView};
pub use encoder::{EncodedGenotypes, GenotypeEncoder, GenotypeEncoderStats};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Genotype packing method, stored in the variant controller (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum GtMethod {
    #[default]
    None = 0,
    /// Diploid biallelic run-length words
    DiploidRleBiallelic = 1,
    /// Diploid n-allelic run-length words
    DiploidRleNallelic = 2,
    /// Per-sample BCF-style words
    DiploidBcf = 3,
    /// Length-prefixed allele tuples at any ploidy
    NploidRle = 4,
}

/// Errors raised by the genotype codecs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenotypeError {
    #[error("illegal number of alleles ({0}); the format is limited to 32768")]
    TooManyAlleles(u32),
    #[error("n-ploid tuples are limited to 254 alternate alleles, got {0}")]
    TooManyAllelesNploid(u32),
    #[error("record carries {found} samples, encoder configured for {expected}")]
    SampleCountMismatch { expected: u64, found: u64 },
    #[error("run lengths sum to {found}, expected {expected} samples")]
    RunSumMismatch { expected: u64, found: u64 },
    #[error("unknown genotype method tag {0}")]
    UnknownMethod(u8),
    #[error("genotype stream ended mid-run")]
    Truncated,
}

/// Bits per allele field for the diploid biallelic method
pub(crate) fn biallelic_shift(has_missing: bool) -> u8 {
    1 + u8::from(has_missing)
}

/// Bits per allele field for the n-allelic methods:
/// `ceil(log2(n_alleles + 1 + has_missing + has_eov))`
pub(crate) fn nallelic_shift(n_alleles: u16, has_missing: bool, has_eov: bool) -> u8 {
    let states = u64::from(n_alleles) + 1 + u64::from(has_missing) + u64::from(has_eov);
    ceil_log2(states)
}

pub(crate) fn ceil_log2(value: u64) -> u8 {
    if value <= 1 {
        0
    } else {
        (64 - (value - 1).leading_zeros()) as u8
    }
}

/// BCF-style allele field width (bits) and word width (bytes) for a given
/// allele count
pub(crate) fn bcf_layout(n_alleles: u16) -> (u8, usize) {
    // Symbols run up to n_alleles + 1 in the internal alphabet
    if n_alleles + 1 < 8 {
        (3, 1)
    } else if n_alleles + 1 < 128 {
        (7, 2)
    } else {
        (15, 4)
    }
}

/// Maximum run length representable in `bits` payload bits, `None` when the
/// word has no room for a length field
pub(crate) fn run_limit(word_bytes: usize, occupied_bits: u8) -> Option<u64> {
    let total = word_bytes as i32 * 8;
    let remaining = total - i32::from(occupied_bits);
    if remaining <= 0 {
        return None;
    }
    if remaining >= 64 {
        Some(u64::MAX)
    } else {
        Some((1u64 << remaining) - 1)
    }
}
