use crate::{
    block::error::BlockError,
    io::{read_lei32, read_lei64, read_leu16, read_leu32, read_leu64, Streamable},
};
use bitflags::bitflags;
use std::io::{Read, Seek, Write};

bitflags! {
    /// Block-level controller bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u16 {
        /// At least one variant carries genotypes
        const HAS_GT = 1;
        /// Genotype streams are stored in permuted sample order
        const HAS_GT_PERMUTED = 1 << 1;
        /// At least one stream of the block is encrypted
        const ANY_ENCRYPTED = 1 << 2;
    }
}

/// Fixed-size header opening every variant block. `l_offset_footer` is the
/// byte distance from the end of this header to the footer preamble, which
/// equals the summed serialized size of all streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantBlockHeader {
    pub l_offset_footer: u32,
    /// Random block identifier, also the keychain identifier base
    pub block_hash: u64,
    pub controller: BlockFlags,
    pub contig_id: i32,
    /// Inclusive position range covered by the block
    pub min_position: i64,
    pub max_position: i64,
    pub n_variants: u32,
}

impl Default for VariantBlockHeader {
    fn default() -> Self {
        Self {
            l_offset_footer: 0,
            block_hash: 0,
            controller: BlockFlags::default(),
            contig_id: -1,
            min_position: i64::MAX,
            max_position: i64::MIN,
            n_variants: 0,
        }
    }
}

impl VariantBlockHeader {
    pub fn has_gt(&self) -> bool {
        self.controller.contains(BlockFlags::HAS_GT)
    }

    pub fn has_gt_permuted(&self) -> bool {
        self.controller.contains(BlockFlags::HAS_GT_PERMUTED)
    }

    pub fn any_encrypted(&self) -> bool {
        self.controller.contains(BlockFlags::ANY_ENCRYPTED)
    }
}

impl Streamable for VariantBlockHeader {
    type StreamError = BlockError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.l_offset_footer.to_le_bytes())?;
        w.write_all(&self.block_hash.to_le_bytes())?;
        w.write_all(&self.controller.bits().to_le_bytes())?;
        w.write_all(&self.contig_id.to_le_bytes())?;
        w.write_all(&self.min_position.to_le_bytes())?;
        w.write_all(&self.max_position.to_le_bytes())?;
        w.write_all(&self.n_variants.to_le_bytes())?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        Ok(Self {
            l_offset_footer: read_leu32(r)?,
            block_hash: read_leu64(r)?,
            controller: BlockFlags::from_bits_truncate(read_leu16(r)?),
            contig_id: read_lei32(r)?,
            min_position: read_lei64(r)?,
            max_position: read_lei64(r)?,
            n_variants: read_leu32(r)?,
        })
    }
}
