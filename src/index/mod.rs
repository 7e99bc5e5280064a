//! Variant index: a linear per-block index with per-contig roll-ups, plus
//! a per-contig quad-tree mapping position ranges to the blocks that touch
//! them. Queries union both structures and filter against the linear
//! entries' position ranges.

/// Index error kinds
pub mod error;

pub use error::IndexError;

use crate::{
    header::YonContig,
    io::{read_lei32, read_lei64, read_leu32, read_leu64, read_leu8, Streamable},
};
use std::io::{Read, Seek, Write};

/// One block in the linear index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub block_id: u32,
    pub contig_id: i32,
    pub n_variants: u32,
    /// Archive byte offset of the block header
    pub byte_offset: u64,
    /// Archive byte offset just past the end-of-block marker
    pub byte_offset_end: u64,
    pub min_position: i64,
    pub max_position: i64,
    /// Deepest quad-tree bins touched by the block's records
    pub min_bin: i32,
    pub max_bin: i32,
}

impl IndexEntry {
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.min_position <= end && start <= self.max_position
    }
}

impl Streamable for IndexEntry {
    type StreamError = IndexError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.block_id.to_le_bytes())?;
        w.write_all(&self.contig_id.to_le_bytes())?;
        w.write_all(&self.n_variants.to_le_bytes())?;
        w.write_all(&self.byte_offset.to_le_bytes())?;
        w.write_all(&self.byte_offset_end.to_le_bytes())?;
        w.write_all(&self.min_position.to_le_bytes())?;
        w.write_all(&self.max_position.to_le_bytes())?;
        w.write_all(&self.min_bin.to_le_bytes())?;
        w.write_all(&self.max_bin.to_le_bytes())?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        Ok(Self {
            block_id: read_leu32(r)?,
            contig_id: read_lei32(r)?,
            n_variants: read_leu32(r)?,
            byte_offset: read_leu64(r)?,
            byte_offset_end: read_leu64(r)?,
            min_position: read_lei64(r)?,
            max_position: read_lei64(r)?,
            min_bin: read_lei32(r)?,
            max_bin: read_lei32(r)?,
        })
    }
}

/// Aggregate of all consecutive blocks sharing a contig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContigSummary {
    pub contig_id: i32,
    pub block_id_start: u32,
    pub block_id_end: u32,
    pub n_blocks: u32,
    pub n_variants: u64,
    pub min_position: i64,
    pub max_position: i64,
}

impl Streamable for ContigSummary {
    type StreamError = IndexError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.contig_id.to_le_bytes())?;
        w.write_all(&self.block_id_start.to_le_bytes())?;
        w.write_all(&self.block_id_end.to_le_bytes())?;
        w.write_all(&self.n_blocks.to_le_bytes())?;
        w.write_all(&self.n_variants.to_le_bytes())?;
        w.write_all(&self.min_position.to_le_bytes())?;
        w.write_all(&self.max_position.to_le_bytes())?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        Ok(Self {
            contig_id: read_lei32(r)?,
            block_id_start: read_leu32(r)?,
            block_id_end: read_leu32(r)?,
            n_blocks: read_leu32(r)?,
            n_variants: read_leu64(r)?,
            min_position: read_lei64(r)?,
            max_position: read_lei64(r)?,
        })
    }
}

/// One quad-tree bin: the set of blocks contributing records to it,
/// de-duplicated against the latest insert
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexBin {
    pub bin_id: u32,
    pub n_variants: u32,
    pub blocks: Vec<u32>,
}

impl IndexBin {
    fn add(&mut self, block_id: u32) {
        if self.blocks.last() != Some(&block_id) {
            self.blocks.push(block_id);
        }
        self.n_variants += 1;
    }
}

impl Streamable for IndexBin {
    type StreamError = IndexError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.bin_id.to_le_bytes())?;
        w.write_all(&self.n_variants.to_le_bytes())?;
        w.write_all(&(self.blocks.len() as u32).to_le_bytes())?;
        for block in &self.blocks {
            w.write_all(&block.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let bin_id = read_leu32(r)?;
        let n_variants = read_leu32(r)?;
        let n_blocks = read_leu32(r)?;
        let mut blocks = Vec::with_capacity(n_blocks as usize);
        for _ in 0..n_blocks {
            blocks.push(read_leu32(r)?);
        }
        Ok(Self {
            bin_id,
            n_variants,
            blocks,
        })
    }
}

/// Flat-array offset of the first bin of level `l`: 1 + 4 + ... + 4^(l-1)
fn level_offset(level: u8) -> u64 {
    (4u64.pow(u32::from(level)) - 1) / 3
}

/// Quad-tree over one contig. Level `l` splits the rounded contig length
/// into `4^l` equal bins; a record lands at the deepest level where its
/// span stays inside one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigIndex {
    pub contig_id: i32,
    pub l_contig: u64,
    /// Contig length rounded up to a multiple of `4^n_levels`
    pub l_rounded: u64,
    pub n_levels: u8,
    bins: Vec<IndexBin>,
}

impl ContigIndex {
    pub fn new(contig_id: i32, l_contig: u64, n_levels: u8) -> Self {
        let leaf_count = 4u64.pow(u32::from(n_levels));
        let l_rounded = l_contig.div_ceil(leaf_count).max(1) * leaf_count;
        let n_bins = level_offset(n_levels + 1);
        let mut bins = vec![IndexBin::default(); n_bins as usize];
        for (bin_id, bin) in bins.iter_mut().enumerate() {
            bin.bin_id = bin_id as u32;
        }
        Self {
            contig_id,
            l_contig,
            l_rounded,
            n_levels,
            bins,
        }
    }

    fn bin_width(&self, level: u8) -> u64 {
        self.l_rounded / 4u64.pow(u32::from(level))
    }

    /// Place a record span at the deepest level where both ends share a
    /// bin, returning the flat bin id
    pub fn add(&mut self, from: u64, to: u64, block_id: u32) -> Result<u32, IndexError> {
        if to >= self.l_contig.max(1) {
            return Err(IndexError::OutOfRange {
                contig_id: self.contig_id,
                position: to,
                length: self.l_contig,
            });
        }
        for level in (0..=self.n_levels).rev() {
            let width = self.bin_width(level);
            let bin_from = from / width;
            let bin_to = to / width;
            if bin_from == bin_to {
                let flat = level_offset(level) + bin_from;
                self.bins[flat as usize].add(block_id);
                return Ok(flat as u32);
            }
        }
        unreachable!("level 0 spans the whole contig")
    }

    /// Collect block ids of every bin, at any level, whose footprint
    /// intersects `[start, end]`
    pub fn overlapping_blocks(&self, start: u64, end: u64, out: &mut Vec<u32>) {
        for level in 0..=self.n_levels {
            let width = self.bin_width(level);
            let last_bin = 4u64.pow(u32::from(level)) - 1;
            let bin_from = (start / width).min(last_bin);
            let bin_to = (end / width).min(last_bin);
            for bin in bin_from..=bin_to {
                let flat = (level_offset(level) + bin) as usize;
                out.extend_from_slice(&self.bins[flat].blocks);
            }
        }
    }

    pub fn n_records(&self) -> u64 {
        self.bins.iter().map(|bin| u64::from(bin.n_variants)).sum()
    }
}

impl Streamable for ContigIndex {
    type StreamError = IndexError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.contig_id.to_le_bytes())?;
        w.write_all(&self.l_contig.to_le_bytes())?;
        w.write_all(&self.l_rounded.to_le_bytes())?;
        w.write_all(&[self.n_levels])?;
        // Only occupied bins land on disk
        let occupied: Vec<&IndexBin> = self.bins.iter().filter(|bin| !bin.blocks.is_empty()).collect();
        w.write_all(&(occupied.len() as u32).to_le_bytes())?;
        for bin in occupied {
            bin.write_bytes(w)?;
        }
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let contig_id = read_lei32(r)?;
        let l_contig = read_leu64(r)?;
        let l_rounded = read_leu64(r)?;
        let n_levels = read_leu8(r)?;
        let mut index = Self::new(contig_id, l_contig, n_levels);
        index.l_rounded = l_rounded;
        let n_occupied = read_leu32(r)?;
        for _ in 0..n_occupied {
            let bin = IndexBin::read_bytes(r)?;
            let slot = bin.bin_id as usize;
            index.bins[slot] = bin;
        }
        Ok(index)
    }
}

/// The archive-level variant index
#[derive(Debug, Clone, Default)]
pub struct VariantIndex {
    pub linear: Vec<IndexEntry>,
    pub summaries: Vec<ContigSummary>,
    pub contigs: Vec<ContigIndex>,
}

impl VariantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a quad-tree for every contig of the global header
    pub fn setup(contigs: &[YonContig], n_levels: u8) -> Self {
        Self {
            linear: Vec::new(),
            summaries: Vec::new(),
            contigs: contigs
                .iter()
                .map(|contig| ContigIndex::new(contig.idx as i32, contig.n_bases, n_levels))
                .collect(),
        }
    }

    /// Append a block to the linear index, merging the contig roll-up.
    /// Entries must arrive in non-decreasing (contig, position) order.
    pub fn add_sorted(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        if let Some(last) = self.linear.last() {
            let unsorted = entry.contig_id < last.contig_id
                || (entry.contig_id == last.contig_id && entry.min_position < last.min_position);
            if unsorted {
                return Err(IndexError::Unsorted {
                    block_id: entry.block_id,
                });
            }
        }

        match self.summaries.last_mut() {
            Some(summary) if summary.contig_id == entry.contig_id => {
                summary.block_id_end = entry.block_id;
                summary.n_blocks += 1;
                summary.n_variants += u64::from(entry.n_variants);
                summary.min_position = summary.min_position.min(entry.min_position);
                summary.max_position = summary.max_position.max(entry.max_position);
            }
            _ => self.summaries.push(ContigSummary {
                contig_id: entry.contig_id,
                block_id_start: entry.block_id,
                block_id_end: entry.block_id,
                n_blocks: 1,
                n_variants: u64::from(entry.n_variants),
                min_position: entry.min_position,
                max_position: entry.max_position,
            }),
        }

        self.linear.push(entry);
        Ok(())
    }

    /// Insert one record span into its contig's quad-tree, returning the
    /// flat bin id
    pub fn index_record(
        &mut self,
        contig_id: i32,
        from: u64,
        to: u64,
        block_id: u32,
    ) -> Result<u32, IndexError> {
        let contig = usize::try_from(contig_id)
            .ok()
            .and_then(|idx| self.contigs.get_mut(idx))
            .ok_or(IndexError::UnknownContig(contig_id))?;
        contig.add(from, to, block_id)
    }

    /// Blocks whose position range may intersect `[start, end]` on the
    /// given contig: the union of linear and quad-tree candidates, filtered
    /// by the linear ranges and de-duplicated by block id
    pub fn find_overlap(&self, contig_id: i32, start: i64, end: i64) -> Vec<IndexEntry> {
        let mut candidates: Vec<u32> = Vec::new();
        for entry in &self.linear {
            if entry.contig_id == contig_id && entry.overlaps(start, end) {
                candidates.push(entry.block_id);
            }
        }
        if let Some(contig) = usize::try_from(contig_id)
            .ok()
            .and_then(|idx| self.contigs.get(idx))
        {
            contig.overlapping_blocks(start.max(0) as u64, end.max(0) as u64, &mut candidates);
        }
        candidates.sort_unstable();
        candidates.dedup();

        let mut out = Vec::new();
        for block_id in candidates {
            let Ok(slot) = self.linear.binary_search_by_key(&block_id, |entry| entry.block_id)
            else {
                continue;
            };
            let entry = self.linear[slot];
            if entry.contig_id == contig_id && entry.overlaps(start, end) {
                out.push(entry);
            }
        }
        out
    }

    pub fn n_blocks(&self) -> u64 {
        self.linear.len() as u64
    }

    pub fn n_variants(&self) -> u64 {
        self.linear.iter().map(|entry| u64::from(entry.n_variants)).sum()
    }
}

impl Streamable for VariantIndex {
    type StreamError = IndexError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&(self.linear.len() as u64).to_le_bytes())?;
        w.write_all(&(self.summaries.len() as u64).to_le_bytes())?;
        w.write_all(&(self.contigs.len() as u64).to_le_bytes())?;
        for entry in &self.linear {
            entry.write_bytes(w)?;
        }
        for summary in &self.summaries {
            summary.write_bytes(w)?;
        }
        for contig in &self.contigs {
            contig.write_bytes(w)?;
        }
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let n_linear = read_leu64(r)?;
        let n_summaries = read_leu64(r)?;
        let n_contigs = read_leu64(r)?;
        let mut index = Self::new();
        for _ in 0..n_linear {
            index.linear.push(IndexEntry::read_bytes(r)?);
        }
        for _ in 0..n_summaries {
            index.summaries.push(ContigSummary::read_bytes(r)?);
        }
        for _ in 0..n_contigs {
            index.contigs.push(ContigIndex::read_bytes(r)?);
        }
        Ok(index)
    }
}
