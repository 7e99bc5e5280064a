//! Archive assembly: `magic || version || global header || blocks || index
//! || footer`. The footer has a fixed serialized size so readers locate it
//! by seeking backwards from end-of-file; its `end_of_data` offset points
//! at the serialized index between the last block and the footer.

/// Archive error kinds
pub mod error;

pub use error::ArchiveError;

use crate::{
    block::{VariantBlock, WriteOptions},
    constants::{
        ARCHIVE_FOOTER_LENGTH, FILE_EOF_MARKER, INDEX_DEFAULT_LEVELS, TACHYON_MAGIC,
        TACHYON_VERSION_MAJOR, TACHYON_VERSION_MINOR, TACHYON_VERSION_PATCH,
    },
    encryption::Keychain,
    header::VariantHeader,
    index::{IndexEntry, VariantIndex},
    io::{read_bytes_exact, read_leu16, read_leu32, read_leu64, Streamable},
    settings::BlockSettings,
};
use bitflags::bitflags;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;

bitflags! {
    /// Archive-level controller bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ArchiveFlags: u16 {
        /// At least one block carries encrypted streams
        const ENCRYPTED = 1;
    }
}

/// Byte tallies of one stream family across the archive
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCost {
    pub n_bytes_uncompressed: u64,
    pub n_bytes_compressed: u64,
}

impl StreamCost {
    fn add(&mut self, header: &crate::container::ContainerHeader) {
        self.n_bytes_uncompressed += u64::from(header.data.u_length);
        // Encrypted streams report their ciphertext length
        self.n_bytes_compressed += if header.data.e_length > 0 {
            u64::from(header.data.e_length)
        } else {
            u64::from(header.data.c_length) + u64::from(header.stride.c_length)
        };
    }

    /// Compression fold achieved by this family
    pub fn fold(&self) -> f64 {
        if self.n_bytes_compressed == 0 {
            0.0
        } else {
            self.n_bytes_uncompressed as f64 / self.n_bytes_compressed as f64
        }
    }
}

/// Per-family compression tallies accumulated while writing an archive
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    /// One tally per fixed stream slot
    pub base: Vec<StreamCost>,
    pub info: StreamCost,
    pub format: StreamCost,
}

impl ImportStats {
    fn new() -> Self {
        Self {
            base: vec![StreamCost::default(); crate::constants::fixed_stream::N_FIXED],
            info: StreamCost::default(),
            format: StreamCost::default(),
        }
    }

    fn add_block(&mut self, block: &VariantBlock) {
        for (slot, offset) in block.footer.offsets.iter().enumerate() {
            self.base[slot].add(offset);
        }
        for offset in &block.footer.info_offsets {
            self.info.add(offset);
        }
        for offset in &block.footer.format_offsets {
            self.format.add(offset);
        }
    }
}

/// Fixed-size footer closing every archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveFooter {
    /// Byte offset where block data ends and the serialized index begins
    pub end_of_data: u64,
    pub n_blocks: u64,
    pub n_variants: u64,
    pub controller: ArchiveFlags,
}

impl ArchiveFooter {
    pub fn validate(eof: &[u8]) -> bool {
        eof == FILE_EOF_MARKER
    }
}

impl Streamable for ArchiveFooter {
    type StreamError = ArchiveError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        let start = w.stream_position()?;
        w.write_all(&self.end_of_data.to_le_bytes())?;
        w.write_all(&self.n_blocks.to_le_bytes())?;
        w.write_all(&self.n_variants.to_le_bytes())?;
        w.write_all(&self.controller.bits().to_le_bytes())?;
        w.write_all(&FILE_EOF_MARKER)?;
        debug_assert_eq!(w.stream_position()? - start, ARCHIVE_FOOTER_LENGTH);
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let end_of_data = read_leu64(r)?;
        let n_blocks = read_leu64(r)?;
        let n_variants = read_leu64(r)?;
        let controller = ArchiveFlags::from_bits_truncate(read_leu16(r)?);
        let eof = read_bytes_exact(r, FILE_EOF_MARKER.len())?;
        if !Self::validate(&eof) {
            return Err(ArchiveError::BadFooter);
        }
        Ok(Self {
            end_of_data,
            n_blocks,
            n_variants,
            controller,
        })
    }
}

/// Streaming archive writer. At most one block is open at a time; blocks
/// are emitted in finalize order and receive contiguous identifiers.
#[derive(Debug)]
pub struct ArchiveWriter<W: Write + Seek> {
    w: W,
    index: VariantIndex,
    stats: ImportStats,
    n_blocks: u64,
    n_variants: u64,
    any_encrypted: bool,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Open a new archive: magic bytes, version triple, global header
    pub fn new(w: W, header: &VariantHeader) -> Result<Self, ArchiveError> {
        Self::with_index_levels(w, header, INDEX_DEFAULT_LEVELS)
    }

    /// Open a new archive with a custom quad-tree depth
    pub fn with_index_levels(
        mut w: W,
        header: &VariantHeader,
        n_levels: u8,
    ) -> Result<Self, ArchiveError> {
        w.write_all(&TACHYON_MAGIC)?;
        w.write_all(&TACHYON_VERSION_MAJOR.to_le_bytes())?;
        w.write_all(&TACHYON_VERSION_MINOR.to_le_bytes())?;
        w.write_all(&TACHYON_VERSION_PATCH.to_le_bytes())?;
        header.write_bytes(&mut w)?;
        Ok(Self {
            w,
            index: VariantIndex::setup(&header.contigs, n_levels),
            stats: ImportStats::new(),
            n_blocks: 0,
            n_variants: 0,
            any_encrypted: false,
        })
    }

    /// Finalize and emit one block, updating the linear and quad-tree
    /// indices. Returns the identifier assigned to the block.
    pub fn write_block(
        &mut self,
        block: &mut VariantBlock,
        options: &WriteOptions,
        keychain: Option<&Keychain>,
    ) -> Result<u32, ArchiveError> {
        let block_id = self.n_blocks as u32;
        block.finalize(options, keychain)?;

        let byte_offset = self.w.stream_position()?;
        block.write(&mut self.w)?;
        let byte_offset_end = self.w.stream_position()?;

        // Quad-tree insertion per record, tracking the touched bin range
        let mut min_bin = i32::MAX;
        let mut max_bin = i32::MIN;
        for (from, to) in &block.record_spans {
            let bin = self.index.index_record(
                block.header.contig_id,
                (*from).max(0) as u64,
                (*to).max(0) as u64,
                block_id,
            )? as i32;
            min_bin = min_bin.min(bin);
            max_bin = max_bin.max(bin);
        }

        self.index.add_sorted(IndexEntry {
            block_id,
            contig_id: block.header.contig_id,
            n_variants: block.header.n_variants,
            byte_offset,
            byte_offset_end,
            min_position: block.header.min_position,
            max_position: block.header.max_position,
            min_bin: if min_bin == i32::MAX { -1 } else { min_bin },
            max_bin: if max_bin == i32::MIN { -1 } else { max_bin },
        })?;

        self.stats.add_block(block);
        self.n_blocks += 1;
        self.n_variants += u64::from(block.header.n_variants);
        self.any_encrypted |= block.header.any_encrypted();
        debug!(block_id, n_variants = block.header.n_variants, "block emitted");
        Ok(block_id)
    }

    /// Write the index and footer, consuming the writer
    pub fn finalize(mut self) -> Result<W, ArchiveError> {
        let end_of_data = self.w.stream_position()?;
        self.index.write_bytes(&mut self.w)?;

        let mut controller = ArchiveFlags::default();
        if self.any_encrypted {
            controller |= ArchiveFlags::ENCRYPTED;
        }
        let footer = ArchiveFooter {
            end_of_data,
            n_blocks: self.n_blocks,
            n_variants: self.n_variants,
            controller,
        };
        footer.write_bytes(&mut self.w)?;
        self.w.flush()?;
        Ok(self.w)
    }

    pub fn index(&self) -> &VariantIndex {
        &self.index
    }

    /// Compression tallies of everything written so far
    pub fn stats(&self) -> &ImportStats {
        &self.stats
    }
}

/// Random-access archive reader
#[derive(Debug)]
pub struct ArchiveReader<R: Read + Seek> {
    r: R,
    pub header: VariantHeader,
    pub footer: ArchiveFooter,
    pub index: VariantIndex,
    pub version: (u32, u32, u32),
    /// Offset of the first variant block
    data_start: u64,
    cursor: u64,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Open an archive: verify the magic and version, load the global
    /// header, the footer and the index, then position at the first block
    pub fn open(mut r: R) -> Result<Self, ArchiveError> {
        let magic = read_bytes_exact(&mut r, TACHYON_MAGIC.len())?;
        if magic != TACHYON_MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let version = (read_leu32(&mut r)?, read_leu32(&mut r)?, read_leu32(&mut r)?);
        if version.0 != TACHYON_VERSION_MAJOR {
            return Err(ArchiveError::UnsupportedVersion(version.0, version.1, version.2));
        }
        let header = VariantHeader::read_bytes(&mut r)?;
        let data_start = r.stream_position()?;

        // The fixed-size footer is pinned to the end of the file
        let file_length = r.seek(SeekFrom::End(0))?;
        r.seek(SeekFrom::Start(file_length - ARCHIVE_FOOTER_LENGTH))?;
        let footer = ArchiveFooter::read_bytes(&mut r)?;

        r.seek(SeekFrom::Start(footer.end_of_data))?;
        let index = VariantIndex::read_bytes(&mut r)?;

        r.seek(SeekFrom::Start(data_start))?;
        Ok(Self {
            r,
            header,
            footer,
            index,
            version,
            data_start,
            cursor: data_start,
        })
    }

    /// Stream the next block, materializing the streams selected by the
    /// settings. Returns `None` past the last block.
    pub fn next_block(
        &mut self,
        settings: &BlockSettings,
        keychain: Option<&Keychain>,
    ) -> Result<Option<VariantBlock>, ArchiveError> {
        if self.cursor >= self.footer.end_of_data {
            return Ok(None);
        }
        self.r.seek(SeekFrom::Start(self.cursor))?;
        let mut block = VariantBlock::read_header_footer(&mut self.r)?;
        let plan = settings.build_plan(&self.header, &block.header, &block.footer);
        block.read(&mut self.r, &plan, keychain)?;
        self.cursor = block.end_offset();
        Ok(Some(block))
    }

    /// Read the block described by an index entry
    pub fn read_block(
        &mut self,
        entry: &IndexEntry,
        settings: &BlockSettings,
        keychain: Option<&Keychain>,
    ) -> Result<VariantBlock, ArchiveError> {
        self.r.seek(SeekFrom::Start(entry.byte_offset))?;
        let mut block = VariantBlock::read_header_footer(&mut self.r)?;
        let plan = settings.build_plan(&self.header, &block.header, &block.footer);
        block.read(&mut self.r, &plan, keychain)?;
        Ok(block)
    }

    /// Blocks intersecting `[start, end]` on a contig, by index lookup
    pub fn find_overlap(&self, contig_id: i32, start: i64, end: i64) -> Vec<IndexEntry> {
        self.index.find_overlap(contig_id, start, end)
    }

    /// Rewind streaming to the first block
    pub fn rewind(&mut self) -> Result<(), ArchiveError> {
        self.cursor = self.data_start;
        self.r.seek(SeekFrom::Start(self.data_start))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    crate::io::streamable_tests! {
        <super::ArchiveFooter, super::ArchiveError>:
        archive_footer: {
            super::ArchiveFooter {
                end_of_data: 123_456,
                n_blocks: 7,
                n_variants: 7000,
                controller: super::ArchiveFlags::ENCRYPTED,
            }
        },
    }

    #[test]
    fn damaged_eof_marker_is_rejected() {
        let footer = ArchiveFooter::default();
        let mut bytes = Cursor::new(<Vec<u8>>::new());
        footer.write_bytes(&mut bytes).expect("serialize");
        let mut raw = bytes.into_inner();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let err = ArchiveFooter::read_bytes(&mut Cursor::new(raw)).unwrap_err();
        assert!(matches!(err, ArchiveError::BadFooter));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = ArchiveReader::open(Cursor::new(b"NOTYONXX........".to_vec())).unwrap_err();
        assert!(matches!(err, ArchiveError::BadMagic));
    }
}
