use crate::{
    constants::fixed_stream,
    container::{ContainerError, ContainerHeader},
    io::{fnv1a64, read_lei32, read_leu16, read_leu32, Streamable},
};
use std::{
    collections::HashMap,
    io::{Read, Seek, Write},
};

/// One field pattern: the exact ordered set of global identifiers present
/// on at least one variant, stored both as the id list and as a bit-vector
/// over local field indices
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatternEntry {
    /// Global identifiers, in observation order
    pub ids: Vec<i32>,
    /// One bit per local field id, `ceil(n_fields / 8)` bytes
    pub bits: Vec<u8>,
}

impl PatternEntry {
    /// Predicate for a local field id within this pattern
    pub fn contains_local(&self, local: u32) -> bool {
        let byte = (local / 8) as usize;
        byte < self.bits.len() && self.bits[byte] >> (local % 8) & 1 != 0
    }

    /// Construct the lookup bit-vector. Needs the total field count of the
    /// parent footer for the byte width and the global-to-local map for bit
    /// positions.
    pub fn build_bits(&mut self, n_fields: u32, local_map: &HashMap<i32, u32>) {
        self.bits = vec![0u8; n_fields.div_ceil(8) as usize];
        for id in &self.ids {
            if let Some(local) = local_map.get(id) {
                self.bits[(local / 8) as usize] |= 1 << (local % 8);
            }
        }
    }
}

impl Streamable for PatternEntry {
    type StreamError = ContainerError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&(self.ids.len() as u32).to_le_bytes())?;
        for id in &self.ids {
            w.write_all(&id.to_le_bytes())?;
        }
        // The bit-vector spans one bit per local field id, so its length
        // prefix must cover the same range as the u16 stream counts
        w.write_all(&(self.bits.len() as u16).to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let n_ids = read_leu32(r)?;
        let mut ids = Vec::with_capacity(n_ids as usize);
        for _ in 0..n_ids {
            ids.push(read_lei32(r)?);
        }
        let l_bytes = read_leu16(r)? as usize;
        let mut bits = vec![0u8; l_bytes];
        r.read_exact(&mut bits)?;
        Ok(Self { ids, bits })
    }
}

/// Per-block footer: the dictionaries mapping global INFO/FORMAT/FILTER
/// identifiers to block-local stream indices, the observed field patterns,
/// and one offset record per stream. Serialized compressed at the end of
/// the block.
#[derive(Debug, Clone, Default)]
pub struct VariantBlockFooter {
    /// Offset records for the fixed streams
    pub offsets: Vec<ContainerHeader>,
    /// Offset records for the INFO streams, in local order
    pub info_offsets: Vec<ContainerHeader>,
    /// Offset records for the FORMAT streams, in local order
    pub format_offsets: Vec<ContainerHeader>,
    /// Global FILTER identifiers, in local order; filters carry no data
    /// stream
    pub filter_ids: Vec<i32>,
    pub info_patterns: Vec<PatternEntry>,
    pub format_patterns: Vec<PatternEntry>,
    pub filter_patterns: Vec<PatternEntry>,

    // Assembly- and read-time lookup tables, not serialized
    info_map: HashMap<i32, u32>,
    format_map: HashMap<i32, u32>,
    filter_map: HashMap<i32, u32>,
    info_pattern_map: HashMap<u64, u32>,
    format_pattern_map: HashMap<u64, u32>,
    filter_pattern_map: HashMap<u64, u32>,
}

/// Identity hash of an ordered pattern of global ids
pub fn hash_identifiers(ids: &[i32]) -> u64 {
    let mut bytes = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    fnv1a64(&bytes)
}

impl VariantBlockFooter {
    pub fn new() -> Self {
        Self {
            offsets: vec![ContainerHeader::default(); fixed_stream::N_FIXED],
            ..Self::default()
        }
    }

    pub fn n_info_streams(&self) -> u16 {
        self.info_offsets.len() as u16
    }

    pub fn n_format_streams(&self) -> u16 {
        self.format_offsets.len() as u16
    }

    pub fn n_filter_streams(&self) -> u16 {
        self.filter_ids.len() as u16
    }

    /// Local index of a global INFO id, when present in this block
    pub fn info_local(&self, global_id: i32) -> Option<u32> {
        self.info_map.get(&global_id).copied()
    }

    pub fn format_local(&self, global_id: i32) -> Option<u32> {
        self.format_map.get(&global_id).copied()
    }

    pub fn filter_local(&self, global_id: i32) -> Option<u32> {
        self.filter_map.get(&global_id).copied()
    }

    /// Register a global INFO id, returning its local stream index
    pub fn add_info(&mut self, global_id: i32) -> u32 {
        if let Some(local) = self.info_map.get(&global_id) {
            return *local;
        }
        let local = self.info_offsets.len() as u32;
        let mut offset = ContainerHeader::default();
        offset.data.global_key = global_id;
        self.info_offsets.push(offset);
        self.info_map.insert(global_id, local);
        local
    }

    pub fn add_format(&mut self, global_id: i32) -> u32 {
        if let Some(local) = self.format_map.get(&global_id) {
            return *local;
        }
        let local = self.format_offsets.len() as u32;
        let mut offset = ContainerHeader::default();
        offset.data.global_key = global_id;
        self.format_offsets.push(offset);
        self.format_map.insert(global_id, local);
        local
    }

    pub fn add_filter(&mut self, global_id: i32) -> u32 {
        if let Some(local) = self.filter_map.get(&global_id) {
            return *local;
        }
        let local = self.filter_ids.len() as u32;
        self.filter_ids.push(global_id);
        self.filter_map.insert(global_id, local);
        local
    }

    /// De-duplicate and register an ordered INFO pattern, returning its
    /// local pattern index
    pub fn add_info_pattern(&mut self, ids: &[i32]) -> u32 {
        let hash = hash_identifiers(ids);
        if let Some(pattern) = self.info_pattern_map.get(&hash) {
            return *pattern;
        }
        let pattern = self.info_patterns.len() as u32;
        self.info_patterns.push(PatternEntry {
            ids: ids.to_vec(),
            bits: Vec::new(),
        });
        self.info_pattern_map.insert(hash, pattern);
        pattern
    }

    pub fn add_format_pattern(&mut self, ids: &[i32]) -> u32 {
        let hash = hash_identifiers(ids);
        if let Some(pattern) = self.format_pattern_map.get(&hash) {
            return *pattern;
        }
        let pattern = self.format_patterns.len() as u32;
        self.format_patterns.push(PatternEntry {
            ids: ids.to_vec(),
            bits: Vec::new(),
        });
        self.format_pattern_map.insert(hash, pattern);
        pattern
    }

    pub fn add_filter_pattern(&mut self, ids: &[i32]) -> u32 {
        let hash = hash_identifiers(ids);
        if let Some(pattern) = self.filter_pattern_map.get(&hash) {
            return *pattern;
        }
        let pattern = self.filter_patterns.len() as u32;
        self.filter_patterns.push(PatternEntry {
            ids: ids.to_vec(),
            bits: Vec::new(),
        });
        self.filter_pattern_map.insert(hash, pattern);
        pattern
    }

    /// Build the per-pattern bit-vectors; called once when the block is
    /// finished
    pub fn finalize(&mut self) {
        let n_info = self.info_offsets.len() as u32;
        let n_format = self.format_offsets.len() as u32;
        let n_filter = self.filter_ids.len() as u32;
        for pattern in &mut self.info_patterns {
            pattern.build_bits(n_info, &self.info_map);
        }
        for pattern in &mut self.format_patterns {
            pattern.build_bits(n_format, &self.format_map);
        }
        for pattern in &mut self.filter_patterns {
            pattern.build_bits(n_filter, &self.filter_map);
        }
    }

    /// Rebuild the lookup tables after deserialization
    pub fn rebuild_maps(&mut self) {
        self.info_map = self
            .info_offsets
            .iter()
            .enumerate()
            .map(|(local, offset)| (offset.data.global_key, local as u32))
            .collect();
        self.format_map = self
            .format_offsets
            .iter()
            .enumerate()
            .map(|(local, offset)| (offset.data.global_key, local as u32))
            .collect();
        self.filter_map = self
            .filter_ids
            .iter()
            .enumerate()
            .map(|(local, id)| (*id, local as u32))
            .collect();
        self.info_pattern_map = self
            .info_patterns
            .iter()
            .enumerate()
            .map(|(pattern, entry)| (hash_identifiers(&entry.ids), pattern as u32))
            .collect();
        self.format_pattern_map = self
            .format_patterns
            .iter()
            .enumerate()
            .map(|(pattern, entry)| (hash_identifiers(&entry.ids), pattern as u32))
            .collect();
        self.filter_pattern_map = self
            .filter_patterns
            .iter()
            .enumerate()
            .map(|(pattern, entry)| (hash_identifiers(&entry.ids), pattern as u32))
            .collect();
    }
}

impl Streamable for VariantBlockFooter {
    type StreamError = ContainerError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.n_info_streams().to_le_bytes())?;
        w.write_all(&self.n_format_streams().to_le_bytes())?;
        w.write_all(&self.n_filter_streams().to_le_bytes())?;
        w.write_all(&(self.info_patterns.len() as u16).to_le_bytes())?;
        w.write_all(&(self.format_patterns.len() as u16).to_le_bytes())?;
        w.write_all(&(self.filter_patterns.len() as u16).to_le_bytes())?;

        for offset in &self.offsets {
            offset.write_bytes(w)?;
        }
        for offset in &self.info_offsets {
            offset.write_bytes(w)?;
        }
        for offset in &self.format_offsets {
            offset.write_bytes(w)?;
        }
        for id in &self.filter_ids {
            w.write_all(&id.to_le_bytes())?;
        }
        for pattern in &self.info_patterns {
            pattern.write_bytes(w)?;
        }
        for pattern in &self.format_patterns {
            pattern.write_bytes(w)?;
        }
        for pattern in &self.filter_patterns {
            pattern.write_bytes(w)?;
        }
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let n_info_streams = read_leu16(r)?;
        let n_format_streams = read_leu16(r)?;
        let n_filter_streams = read_leu16(r)?;
        let n_info_patterns = read_leu16(r)?;
        let n_format_patterns = read_leu16(r)?;
        let n_filter_patterns = read_leu16(r)?;

        let mut footer = Self::new();
        for slot in 0..fixed_stream::N_FIXED {
            footer.offsets[slot] = ContainerHeader::read_bytes(r)?;
        }
        for _ in 0..n_info_streams {
            footer.info_offsets.push(ContainerHeader::read_bytes(r)?);
        }
        for _ in 0..n_format_streams {
            footer.format_offsets.push(ContainerHeader::read_bytes(r)?);
        }
        for _ in 0..n_filter_streams {
            footer.filter_ids.push(read_lei32(r)?);
        }
        for _ in 0..n_info_patterns {
            footer.info_patterns.push(PatternEntry::read_bytes(r)?);
        }
        for _ in 0..n_format_patterns {
            footer.format_patterns.push(PatternEntry::read_bytes(r)?);
        }
        for _ in 0..n_filter_patterns {
            footer.filter_patterns.push(PatternEntry::read_bytes(r)?);
        }
        footer.rebuild_maps();
        Ok(footer)
    }
}
