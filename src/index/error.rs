use thiserror::Error;

/// Errors raised while building or querying the variant index
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    /// A record lies beyond the declared contig length
    #[error("position {position} outside contig {contig_id} of length {length}")]
    OutOfRange {
        contig_id: i32,
        position: u64,
        length: u64,
    },
    /// `add_sorted` demands non-decreasing (contig, position) order
    #[error("index entries must arrive sorted; block {block_id} violates the order")]
    Unsorted { block_id: u32 },
    /// No contig with this identifier was registered at setup
    #[error("unknown contig id {0}")]
    UnknownContig(i32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
