//! Global archive header: the schema shared by every block. Contigs, INFO,
//! FORMAT and FILTER fields are dictionary-encoded once here; blocks refer
//! to them by global index.

use crate::{
    constants::ZSTD_LEVEL_GENERAL,
    container::md5_digest,
    io::{read_bytes_exact, read_leu32, read_leu64, read_string, write_string, Streamable},
};
use std::{
    collections::HashMap,
    io::{Cursor, Read, Seek, Write},
};
use thiserror::Error;

/// Errors raised while reading or writing the global header
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HeaderError {
    #[error("global header failed its integrity check")]
    Integrity,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One reference sequence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YonContig {
    pub idx: u32,
    pub name: String,
    /// Contig length in bases
    pub n_bases: u64,
}

/// One INFO field declaration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YonInfo {
    pub idx: u32,
    pub name: String,
}

/// One FORMAT field declaration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YonFormat {
    pub idx: u32,
    pub name: String,
}

/// One FILTER declaration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YonFilter {
    pub idx: u32,
    pub name: String,
}

/// The global header. Field indices are recoded to the dense range
/// `[0, n)` at import; the maps below go from name to that global index.
#[derive(Debug, Clone, Default)]
pub struct VariantHeader {
    pub samples: Vec<String>,
    pub contigs: Vec<YonContig>,
    pub info_fields: Vec<YonInfo>,
    pub format_fields: Vec<YonFormat>,
    pub filter_fields: Vec<YonFilter>,

    contigs_map: HashMap<String, u32>,
    info_map: HashMap<String, u32>,
    format_map: HashMap<String, u32>,
    filter_map: HashMap<String, u32>,
}

impl VariantHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn add_sample(&mut self, name: &str) {
        self.samples.push(name.to_string());
    }

    pub fn add_contig(&mut self, name: &str, n_bases: u64) -> u32 {
        let idx = self.contigs.len() as u32;
        self.contigs.push(YonContig {
            idx,
            name: name.to_string(),
            n_bases,
        });
        self.contigs_map.insert(name.to_string(), idx);
        idx
    }

    pub fn add_info(&mut self, name: &str) -> u32 {
        let idx = self.info_fields.len() as u32;
        self.info_fields.push(YonInfo {
            idx,
            name: name.to_string(),
        });
        self.info_map.insert(name.to_string(), idx);
        idx
    }

    pub fn add_format(&mut self, name: &str) -> u32 {
        let idx = self.format_fields.len() as u32;
        self.format_fields.push(YonFormat {
            idx,
            name: name.to_string(),
        });
        self.format_map.insert(name.to_string(), idx);
        idx
    }

    pub fn add_filter(&mut self, name: &str) -> u32 {
        let idx = self.filter_fields.len() as u32;
        self.filter_fields.push(YonFilter {
            idx,
            name: name.to_string(),
        });
        self.filter_map.insert(name.to_string(), idx);
        idx
    }

    pub fn contig(&self, name: &str) -> Option<&YonContig> {
        self.contigs_map.get(name).map(|idx| &self.contigs[*idx as usize])
    }

    pub fn contig_by_id(&self, idx: i32) -> Option<&YonContig> {
        usize::try_from(idx).ok().and_then(|idx| self.contigs.get(idx))
    }

    pub fn info(&self, name: &str) -> Option<&YonInfo> {
        self.info_map.get(name).map(|idx| &self.info_fields[*idx as usize])
    }

    pub fn format(&self, name: &str) -> Option<&YonFormat> {
        self.format_map.get(name).map(|idx| &self.format_fields[*idx as usize])
    }

    pub fn filter(&self, name: &str) -> Option<&YonFilter> {
        self.filter_map.get(name).map(|idx| &self.filter_fields[*idx as usize])
    }

    fn rebuild_maps(&mut self) {
        self.contigs_map = self
            .contigs
            .iter()
            .map(|contig| (contig.name.clone(), contig.idx))
            .collect();
        self.info_map = self
            .info_fields
            .iter()
            .map(|field| (field.name.clone(), field.idx))
            .collect();
        self.format_map = self
            .format_fields
            .iter()
            .map(|field| (field.name.clone(), field.idx))
            .collect();
        self.filter_map = self
            .filter_fields
            .iter()
            .map(|field| (field.name.clone(), field.idx))
            .collect();
    }

    fn write_raw<W: Write>(&self, w: &mut W) -> Result<(), std::io::Error> {
        w.write_all(&(self.samples.len() as u32).to_le_bytes())?;
        w.write_all(&(self.contigs.len() as u32).to_le_bytes())?;
        w.write_all(&(self.info_fields.len() as u32).to_le_bytes())?;
        w.write_all(&(self.format_fields.len() as u32).to_le_bytes())?;
        w.write_all(&(self.filter_fields.len() as u32).to_le_bytes())?;
        for sample in &self.samples {
            write_string(w, sample)?;
        }
        for contig in &self.contigs {
            w.write_all(&contig.idx.to_le_bytes())?;
            write_string(w, &contig.name)?;
            w.write_all(&contig.n_bases.to_le_bytes())?;
        }
        for field in &self.info_fields {
            w.write_all(&field.idx.to_le_bytes())?;
            write_string(w, &field.name)?;
        }
        for field in &self.format_fields {
            w.write_all(&field.idx.to_le_bytes())?;
            write_string(w, &field.name)?;
        }
        for field in &self.filter_fields {
            w.write_all(&field.idx.to_le_bytes())?;
            write_string(w, &field.name)?;
        }
        Ok(())
    }

    fn read_raw<R: Read>(r: &mut R) -> Result<Self, std::io::Error> {
        let n_samples = read_leu32(r)?;
        let n_contigs = read_leu32(r)?;
        let n_info = read_leu32(r)?;
        let n_format = read_leu32(r)?;
        let n_filter = read_leu32(r)?;

        let mut header = Self::default();
        for _ in 0..n_samples {
            header.samples.push(read_string(r)?);
        }
        for _ in 0..n_contigs {
            header.contigs.push(YonContig {
                idx: read_leu32(r)?,
                name: read_string(r)?,
                n_bases: read_leu64(r)?,
            });
        }
        for _ in 0..n_info {
            header.info_fields.push(YonInfo {
                idx: read_leu32(r)?,
                name: read_string(r)?,
            });
        }
        for _ in 0..n_format {
            header.format_fields.push(YonFormat {
                idx: read_leu32(r)?,
                name: read_string(r)?,
            });
        }
        for _ in 0..n_filter {
            header.filter_fields.push(YonFilter {
                idx: read_leu32(r)?,
                name: read_string(r)?,
            });
        }
        header.rebuild_maps();
        Ok(header)
    }
}

impl Streamable for VariantHeader {
    type StreamError = HeaderError;

    /// On-disk form: `u32 u_length || u32 c_length || [u8;16] md5 || zstd`
    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        let mut raw = Cursor::new(<Vec<u8>>::new());
        self.write_raw(&mut raw)?;
        let raw = raw.into_inner();
        let compressed = zstd::bulk::compress(&raw, ZSTD_LEVEL_GENERAL)?;
        w.write_all(&(raw.len() as u32).to_le_bytes())?;
        w.write_all(&(compressed.len() as u32).to_le_bytes())?;
        w.write_all(&md5_digest(&raw))?;
        w.write_all(&compressed)?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let u_length = read_leu32(r)? as usize;
        let c_length = read_leu32(r)? as usize;
        let mut md5 = [0u8; 16];
        r.read_exact(&mut md5)?;
        let compressed = read_bytes_exact(r, c_length)?;
        let raw = zstd::bulk::decompress(&compressed, u_length + 64)?;
        if md5_digest(&raw) != md5 {
            return Err(HeaderError::Integrity);
        }
        Self::read_raw(&mut Cursor::new(raw)).map_err(HeaderError::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::Streamable;
    use std::io::{Cursor, Seek, SeekFrom};

    fn sample_header() -> VariantHeader {
        let mut header = VariantHeader::new();
        header.add_sample("HG00096");
        header.add_sample("HG00097");
        header.add_contig("chr20", 64_444_167);
        header.add_contig("chr21", 46_709_983);
        header.add_info("AC");
        header.add_info("DP");
        header.add_format("GT");
        header.add_format("GQ");
        header.add_filter("PASS");
        header
    }

    #[test]
    fn name_lookups_resolve_global_indices() {
        let header = sample_header();
        assert_eq!(header.contig("chr21").map(|c| c.idx), Some(1));
        assert_eq!(header.info("DP").map(|f| f.idx), Some(1));
        assert_eq!(header.format("GT").map(|f| f.idx), Some(0));
        assert_eq!(header.filter("PASS").map(|f| f.idx), Some(0));
        assert!(header.info("ZZ").is_none());
    }

    #[test]
    fn header_round_trip() -> Result<(), HeaderError> {
        let header = sample_header();
        let mut bytes = Cursor::new(<Vec<u8>>::new());
        header.write_bytes(&mut bytes)?;
        bytes.seek(SeekFrom::Start(0))?;
        let restored = VariantHeader::read_bytes(&mut bytes)?;
        assert_eq!(restored.samples, header.samples);
        assert_eq!(restored.contigs, header.contigs);
        assert_eq!(restored.info_fields, header.info_fields);
        assert_eq!(restored.contig("chr20").map(|c| c.n_bases), Some(64_444_167));
        Ok(())
    }
}
