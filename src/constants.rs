/// Magic bytes opening every archive and keychain file
pub const TACHYON_MAGIC: [u8; 8] = *b"TACHYON\0";

/// Format version triple written after the magic bytes
pub const TACHYON_VERSION_MAJOR: u32 = 1;
pub const TACHYON_VERSION_MINOR: u32 = 0;
pub const TACHYON_VERSION_PATCH: u32 = 0;

/// Marker terminating every variant block
pub const BLOCK_EOF_MARKER: u64 = u64::from_le_bytes(*b"YON\x01EOF\0");

/// Marker terminating the archive, pinned at a fixed 22 bytes so the
/// archive footer can be located by seeking backwards from end-of-file
pub const FILE_EOF_MARKER: [u8; 22] = *b"~~TACHYON~END~OF~DATA~";

/// Serialized archive footer length: three u64 fields, a u16 controller
/// and the end-of-file marker
pub const ARCHIVE_FOOTER_LENGTH: u64 = 8 * 3 + 2 + FILE_EOF_MARKER.len() as u64;

/// Compression is kept only when it shrinks the payload by this fold
pub const MIN_COMPRESSION_FOLD: f64 = 1.1;

/// Default zstd level for general streams
pub const ZSTD_LEVEL_GENERAL: i32 = 20;
/// Default zstd level for float/double streams
pub const ZSTD_LEVEL_FLOAT: i32 = 3;

/// Buffers below this size skip compression outright
pub const MIN_COMPRESSION_SIZE: usize = 100;

/// Default number of quad-tree levels per contig; level `l` splits the
/// rounded contig length into `4^l` bins, leaves live at the deepest level
pub const INDEX_DEFAULT_LEVELS: u8 = 7;

/// Fixed per-block stream slots, in serialization order. The footer records
/// one offset record per slot, then one per INFO stream, then one per
/// FORMAT stream.
pub mod fixed_stream {
    pub const PPA: usize = 0;
    pub const CONTIG: usize = 1;
    pub const POSITION: usize = 2;
    pub const REFALT: usize = 3;
    pub const CONTROLLER: usize = 4;
    pub const QUALITY: usize = 5;
    pub const NAMES: usize = 6;
    pub const ALLELES: usize = 7;
    pub const ID_FILTER: usize = 8;
    pub const ID_FORMAT: usize = 9;
    pub const ID_INFO: usize = 10;
    pub const GT_SUPPORT: usize = 11;
    pub const GT_PLOIDY: usize = 12;
    pub const GT_INT8: usize = 13;
    pub const GT_INT16: usize = 14;
    pub const GT_INT32: usize = 15;
    pub const GT_INT64: usize = 16;
    pub const GT_S_INT8: usize = 17;
    pub const GT_S_INT16: usize = 18;
    pub const GT_S_INT32: usize = 19;
    pub const GT_S_INT64: usize = 20;
    pub const GT_N_INT8: usize = 21;
    pub const GT_N_INT16: usize = 22;
    pub const GT_N_INT32: usize = 23;
    pub const GT_N_INT64: usize = 24;

    /// Number of fixed stream slots in every block
    pub const N_FIXED: usize = 25;
}
