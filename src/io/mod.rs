mod le;
mod streamable;

pub(crate) use le::{
    read_bytes_exact, read_lei32, read_lei64, read_leu16, read_leu32, read_leu64, read_leu8,
    read_string, write_string,
};
pub use streamable::Streamable;

#[allow(unused_imports)]
pub(crate) use streamable::streamable_tests;

/// 64-bit FNV-1a over a byte slice. Used for pattern identity hashing and
/// for folding random bytes into keychain identifiers; never used where a
/// cryptographic hash is required.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
