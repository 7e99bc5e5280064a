/// Block error kinds
pub mod error;
/// Block footer: dictionaries, patterns, offsets
pub mod footer;
/// Block header and controller flags
pub mod header;
/// Reader-facing record and genotype views over a decoded block
pub mod records;

pub use error::BlockError;
pub use footer::VariantBlockFooter;
pub use header::{BlockFlags, VariantBlockHeader};

use crate::{
    compression::{
        compress_container, compress_container_with, compress_permutation, decompress_container,
        decompress_permutation,
    },
    constants::{fixed_stream, BLOCK_EOF_MARKER, ZSTD_LEVEL_GENERAL},
    container::{md5_digest, DataContainer, Encoder, Encryption, TachyonType},
    encryption::{decrypt_container, encrypt_container, Keychain},
    genotype::GenotypeEncoder,
    io::{read_bytes_exact, read_leu32, read_leu64, Streamable},
    permutation::PermutationManager,
    record::{FieldValues, VariantController, VariantRecord},
    settings::LoadPlan,
};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use tracing::warn;

/// Write-time knobs for one block
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub encryption: Encryption,
    /// Route the variant-name stream through the textual encoder
    pub textual_names: bool,
}

/// Addresses one stream of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Base(usize),
    Info(usize),
    Format(usize),
}

/// A per-container failure recorded while loading a block. Failed streams
/// stay unavailable; the rest of the block remains readable.
#[derive(Debug)]
pub struct LoadFailure {
    pub stream: StreamId,
    pub error: BlockError,
}

/// Which streams of a block have been materialized
#[derive(Debug, Clone, Default)]
pub struct LoadedStreams {
    pub base: [bool; fixed_stream::N_FIXED],
    pub info: Vec<bool>,
    pub format: Vec<bool>,
}

/// One variant block: per-field containers plus its header and footer.
/// Blocks are self-contained; everything a reader needs besides the global
/// header travels inside the block.
#[derive(Debug)]
pub struct VariantBlock {
    pub header: VariantBlockHeader,
    pub footer: VariantBlockFooter,
    /// The fixed streams, indexed by [`fixed_stream`] slots
    pub base: Vec<DataContainer>,
    pub info: Vec<DataContainer>,
    pub format: Vec<DataContainer>,
    /// Inclusive reference span of each record, for index insertion
    pub record_spans: Vec<(i64, i64)>,
    /// Per-stream failures captured during [`read`](VariantBlock::read)
    pub load_failures: Vec<LoadFailure>,
    pub loaded: LoadedStreams,

    start_compressed_data: u64,
    end_compressed_data: u64,
    end_block: u64,
}

impl Default for VariantBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantBlock {
    pub fn new() -> Self {
        let mut base = vec![DataContainer::new(); fixed_stream::N_FIXED];
        base[fixed_stream::PPA].set_type(TachyonType::UInt32);
        base[fixed_stream::REFALT].set_type(TachyonType::UInt8);
        base[fixed_stream::CONTROLLER].set_type(TachyonType::UInt16);
        base[fixed_stream::ALLELES].set_type(TachyonType::Struct);
        for (slot, ty) in [
            (fixed_stream::GT_INT8, TachyonType::UInt8),
            (fixed_stream::GT_INT16, TachyonType::UInt16),
            (fixed_stream::GT_INT32, TachyonType::UInt32),
            (fixed_stream::GT_INT64, TachyonType::UInt64),
            (fixed_stream::GT_S_INT8, TachyonType::UInt8),
            (fixed_stream::GT_S_INT16, TachyonType::UInt16),
            (fixed_stream::GT_S_INT32, TachyonType::UInt32),
            (fixed_stream::GT_S_INT64, TachyonType::UInt64),
            (fixed_stream::GT_N_INT8, TachyonType::UInt8),
            (fixed_stream::GT_N_INT16, TachyonType::UInt16),
            (fixed_stream::GT_N_INT32, TachyonType::UInt32),
            (fixed_stream::GT_N_INT64, TachyonType::UInt64),
        ] {
            base[slot].set_type(ty);
        }

        let mut header = VariantBlockHeader::default();
        header.block_hash = rand::random();

        Self {
            header,
            footer: VariantBlockFooter::new(),
            base,
            info: Vec::new(),
            format: Vec::new(),
            record_spans: Vec::new(),
            load_failures: Vec::new(),
            loaded: LoadedStreams::default(),
            start_compressed_data: 0,
            end_compressed_data: 0,
            end_block: 0,
        }
    }

    pub fn n_variants(&self) -> u32 {
        self.header.n_variants
    }

    /// Byte offset of the first stream, set by the reader
    pub fn start_offset(&self) -> u64 {
        self.start_compressed_data
    }

    /// Byte offset just past the end-of-block marker, set by the reader
    pub fn end_offset(&self) -> u64 {
        self.end_block
    }

    /// Byte offset of the footer preamble, set by the reader
    pub fn data_end_offset(&self) -> u64 {
        self.end_compressed_data
    }

    /// Append one record to the block's streams. Genotypes, when present,
    /// are packed through the supplied encoder in `ppa` storage order.
    pub fn add_record(
        &mut self,
        record: &VariantRecord,
        gt_encoder: &mut GenotypeEncoder,
        ppa: Option<&[u32]>,
    ) -> Result<(), BlockError> {
        if self.header.n_variants == 0 {
            self.header.contig_id = record.contig_id;
        } else if self.header.contig_id != record.contig_id {
            return Err(BlockError::ContigMismatch {
                expected: self.header.contig_id,
                found: record.contig_id,
            });
        }

        let mut controller = VariantController::default();
        controller.biallelic = record.is_biallelic();
        controller.all_snv = record.all_snv();
        controller.simple_snv = record.is_biallelic() && record.all_snv();

        // Position and contig
        let (span_from, span_to) = record.span();
        self.base[fixed_stream::POSITION].add(record.position as i32)?;
        self.base[fixed_stream::POSITION].increment();
        self.base[fixed_stream::CONTIG].add(record.contig_id)?;
        self.base[fixed_stream::CONTIG].increment();

        // Ref-alt data: one packed byte for simple sites, the
        // variable-length allele stream otherwise
        if record.use_packed_refalt() {
            controller.alleles_packed = true;
            self.base[fixed_stream::REFALT].add_literal_value(&[record.pack_refalt_byte()]);
            self.base[fixed_stream::REFALT].increment();
        } else {
            let alleles = &mut self.base[fixed_stream::ALLELES];
            for allele in std::iter::once(&record.reference).chain(record.alternates.iter()) {
                alleles.add_literal_value(&(allele.len() as u16).to_le_bytes());
                alleles.add_literal_bytes(allele.as_bytes());
            }
            alleles.increment();
            alleles.add_stride(u32::from(record.n_alleles()))?;
        }

        // Quality; absent values ride as NaN
        self.base[fixed_stream::QUALITY].add_f32(record.quality.unwrap_or(f32::NAN))?;
        self.base[fixed_stream::QUALITY].increment();

        // Variant name
        self.base[fixed_stream::NAMES].add_stride(record.name.len() as u32)?;
        self.base[fixed_stream::NAMES].add_string(&record.name)?;
        self.base[fixed_stream::NAMES].increment();

        // INFO fields and their pattern
        let info_ids: Vec<i32> = record.info.iter().map(|field| field.global_id as i32).collect();
        for field in &record.info {
            let local = self.footer.add_info(field.global_id as i32);
            self.ensure_info(local, field.global_id as i32);
            let container = &mut self.info[local as usize];
            Self::append_values(container, &field.values)?;
            container.add_stride(Self::element_count(&field.values))?;
            container.increment();
        }
        let info_pattern = self.footer.add_info_pattern(&info_ids);
        self.base[fixed_stream::ID_INFO].add(info_pattern as i32)?;
        self.base[fixed_stream::ID_INFO].increment();

        // FORMAT fields and their pattern
        let format_ids: Vec<i32> = record.format.iter().map(|field| field.global_id as i32).collect();
        for field in &record.format {
            let local = self.footer.add_format(field.global_id as i32);
            self.ensure_format(local, field.global_id as i32);
            let container = &mut self.format[local as usize];
            Self::append_values(container, &field.values)?;
            container.add_stride(field.per_sample)?;
            container.increment();
        }
        let format_pattern = self.footer.add_format_pattern(&format_ids);
        self.base[fixed_stream::ID_FORMAT].add(format_pattern as i32)?;
        self.base[fixed_stream::ID_FORMAT].increment();

        // FILTER membership pattern
        let filter_ids: Vec<i32> = record.filter_ids.iter().map(|id| *id as i32).collect();
        for id in &filter_ids {
            self.footer.add_filter(*id);
        }
        let filter_pattern = self.footer.add_filter_pattern(&filter_ids);
        self.base[fixed_stream::ID_FILTER].add(filter_pattern as i32)?;
        self.base[fixed_stream::ID_FILTER].increment();

        // Genotypes
        let mut ploidy = 0i32;
        if let Some(gt) = &record.genotypes {
            ploidy = i32::from(gt.ploidy);
            let identity: Vec<u32>;
            let order = match ppa {
                Some(order) => order,
                None => {
                    identity = (0..gt.n_samples() as u32).collect();
                    &identity
                }
            };
            let encoded = gt_encoder.encode(gt, record.n_alleles(), order)?;
            encoded.apply_controller(&mut controller);

            self.base[encoded.stream].add_literal_bytes(&encoded.payload);
            self.base[encoded.stream].increment();

            let support = &mut self.base[fixed_stream::GT_SUPPORT];
            support.add(encoded.support_value)?;
            support.add_stride(encoded.support_stride)?;
            support.increment();

            self.header.controller |= BlockFlags::HAS_GT;
        }
        self.base[fixed_stream::GT_PLOIDY].add(ploidy)?;
        self.base[fixed_stream::GT_PLOIDY].increment();

        // Controller goes last so the genotype bits are final
        self.base[fixed_stream::CONTROLLER].add_literal_value(&controller.to_u16().to_le_bytes());
        self.base[fixed_stream::CONTROLLER].increment();

        self.header.min_position = self.header.min_position.min(span_from);
        self.header.max_position = self.header.max_position.max(span_to);
        self.header.n_variants += 1;
        self.record_spans.push((span_from, span_to));
        Ok(())
    }

    /// Attach the block's sample permutation; storage order of the diploid
    /// genotype streams is the permuted order from here on
    pub fn set_permutation(&mut self, manager: &PermutationManager) {
        let ppa = &mut self.base[fixed_stream::PPA];
        ppa.data_uncompressed = manager.to_bytes();
        ppa.header.n_entries = manager.n_samples();
        ppa.header.n_additions = manager.n_samples();
        self.header.controller |= BlockFlags::HAS_GT_PERMUTED;
    }

    fn ensure_info(&mut self, local: u32, global_id: i32) {
        if local as usize == self.info.len() {
            let mut container = DataContainer::new();
            container.header.data.global_key = global_id;
            self.info.push(container);
        }
    }

    fn ensure_format(&mut self, local: u32, global_id: i32) {
        if local as usize == self.format.len() {
            let mut container = DataContainer::new();
            container.header.data.global_key = global_id;
            self.format.push(container);
        }
    }

    fn append_values(container: &mut DataContainer, values: &FieldValues) -> Result<(), BlockError> {
        match values {
            FieldValues::Flag => container.add(1)?,
            FieldValues::Int(values) => {
                for value in values {
                    container.add(*value)?;
                }
            }
            FieldValues::Float(values) => {
                for value in values {
                    container.add_f32(*value)?;
                }
            }
            FieldValues::Str(value) => container.add_string(value)?,
        }
        Ok(())
    }

    fn element_count(values: &FieldValues) -> u32 {
        match values {
            FieldValues::Flag => 1,
            FieldValues::Int(values) => values.len() as u32,
            FieldValues::Float(values) => values.len() as u32,
            FieldValues::Str(value) => value.len() as u32,
        }
    }

    /// Seal every container: uniformity, narrowing and checksums. The
    /// reformat flags follow the semantics of each stream.
    fn update_containers(&mut self) -> Result<(), BlockError> {
        use fixed_stream as fs;
        if self.header.has_gt_permuted() {
            self.base[fs::PPA].generate_md5();
        }
        let reformat: [(usize, bool, bool); 24] = [
            (fs::CONTIG, true, true),
            (fs::POSITION, true, true),
            (fs::REFALT, false, false),
            (fs::CONTROLLER, false, false),
            (fs::QUALITY, true, true),
            (fs::NAMES, true, true),
            (fs::ALLELES, false, false),
            (fs::ID_FILTER, true, true),
            (fs::ID_FORMAT, true, true),
            (fs::ID_INFO, true, true),
            (fs::GT_SUPPORT, true, true),
            (fs::GT_PLOIDY, true, true),
            (fs::GT_INT8, false, true),
            (fs::GT_INT16, false, true),
            (fs::GT_INT32, false, true),
            (fs::GT_INT64, false, true),
            (fs::GT_S_INT8, false, true),
            (fs::GT_S_INT16, false, true),
            (fs::GT_S_INT32, false, true),
            (fs::GT_S_INT64, false, true),
            (fs::GT_N_INT8, false, false),
            (fs::GT_N_INT16, false, false),
            (fs::GT_N_INT32, false, false),
            (fs::GT_N_INT64, false, false),
        ];
        for (slot, data, stride) in reformat {
            self.base[slot].update_container(data, stride)?;
        }
        for container in &mut self.info {
            container.update_container(true, true)?;
        }
        for container in &mut self.format {
            container.update_container(true, true)?;
        }
        Ok(())
    }

    /// Finish the block: seal containers, build pattern bit-vectors,
    /// compress, optionally encrypt, and lay out stream offsets. After this
    /// the block is immutable and ready to write.
    pub fn finalize(
        &mut self,
        options: &WriteOptions,
        keychain: Option<&Keychain>,
    ) -> Result<(), BlockError> {
        use fixed_stream as fs;
        self.update_containers()?;
        self.footer.finalize();

        // Compression
        if self.header.has_gt_permuted() {
            compress_permutation(&mut self.base[fs::PPA])?;
        }
        for slot in 1..fs::N_FIXED {
            if slot == fs::NAMES && options.textual_names {
                compress_container_with(&mut self.base[slot], Encoder::Textual)?;
            } else {
                compress_container(&mut self.base[slot])?;
            }
        }
        for container in &mut self.info {
            compress_container(container)?;
        }
        for container in &mut self.format {
            compress_container(container)?;
        }

        // Encryption; tiny structural streams stay in the clear
        if options.encryption == Encryption::AesGcm256 {
            let keychain = keychain.ok_or(BlockError::MissingKeychain)?;
            self.header.block_hash = keychain.generate_identifier();
            for slot in 1..fs::N_FIXED {
                if slot == fs::CONTROLLER || slot == fs::REFALT {
                    continue;
                }
                if self.base[slot].is_empty() {
                    continue;
                }
                encrypt_container(&mut self.base[slot], keychain)?;
            }
            for container in &mut self.info {
                encrypt_container(container, keychain)?;
            }
            for container in &mut self.format {
                encrypt_container(container, keychain)?;
            }
            self.header.controller |= BlockFlags::ANY_ENCRYPTED;
        }

        // Stream offsets relative to the compressed-data origin, computed
        // before writing so emission needs no fixup pass
        let mut cursor: u64 = 0;
        if self.header.has_gt_permuted() {
            let container = &mut self.base[fs::PPA];
            container.header.data.offset = cursor as u32;
            self.footer.offsets[fs::PPA] = container.header;
            cursor += container.object_size();
        }
        for slot in 1..fs::N_FIXED {
            let container = &mut self.base[slot];
            container.header.data.offset = cursor as u32;
            self.footer.offsets[slot] = container.header;
            cursor += container.object_size();
        }
        for (local, container) in self.info.iter_mut().enumerate() {
            container.header.data.offset = cursor as u32;
            self.footer.info_offsets[local] = container.header;
            cursor += container.object_size();
        }
        for (local, container) in self.format.iter_mut().enumerate() {
            container.header.data.offset = cursor as u32;
            self.footer.format_offsets[local] = container.header;
            cursor += container.object_size();
        }
        self.header.l_offset_footer = cursor as u32;
        Ok(())
    }

    /// Serialize the block: header, streams in fixed order, compressed
    /// footer, end-of-block marker
    pub fn write<W: Write + Seek>(&self, w: &mut W) -> Result<(), BlockError> {
        use fixed_stream as fs;
        self.header.write_bytes(w)?;
        let start = w.stream_position()?;

        if self.header.has_gt_permuted() {
            self.base[fs::PPA].write_bytes(w)?;
        }
        for slot in 1..fs::N_FIXED {
            self.base[slot].write_bytes(w)?;
        }
        for container in &self.info {
            container.write_bytes(w)?;
        }
        for container in &self.format {
            container.write_bytes(w)?;
        }
        // Every byte between block start and footer belongs to exactly one
        // stream
        debug_assert_eq!(w.stream_position()? - start, u64::from(self.header.l_offset_footer));

        // Footer rides in a small self-contained compressed envelope
        let mut raw = Cursor::new(<Vec<u8>>::new());
        self.footer.write_bytes(&mut raw)?;
        let raw = raw.into_inner();
        let compressed = zstd::bulk::compress(&raw, ZSTD_LEVEL_GENERAL)
            .map_err(crate::compression::CompressionError::from)?;
        w.write_all(&(raw.len() as u32).to_le_bytes())?;
        w.write_all(&(compressed.len() as u32).to_le_bytes())?;
        w.write_all(&md5_digest(&raw))?;
        w.write_all(&compressed)?;

        w.write_all(&BLOCK_EOF_MARKER.to_le_bytes())?;
        Ok(())
    }

    /// Read the header and footer of the block at the reader's position,
    /// leaving the reader at the start of the compressed data
    pub fn read_header_footer<R: Read + Seek>(r: &mut R) -> Result<Self, BlockError> {
        let mut block = Self::new();
        block.header = VariantBlockHeader::read_bytes(r)?;
        block.start_compressed_data = r.stream_position()?;

        // Hop over the streams to the footer preamble
        r.seek(SeekFrom::Start(
            block.start_compressed_data + u64::from(block.header.l_offset_footer),
        ))?;
        block.end_compressed_data = r.stream_position()?;

        let u_length = read_leu32(r)? as usize;
        let c_length = read_leu32(r)? as usize;
        let mut md5 = [0u8; 16];
        r.read_exact(&mut md5)?;
        let compressed = read_bytes_exact(r, c_length)?;
        let raw = zstd::bulk::decompress(&compressed, u_length + 64)
            .map_err(crate::compression::CompressionError::from)?;
        if md5_digest(&raw) != md5 {
            return Err(BlockError::FooterIntegrity);
        }
        block.footer = VariantBlockFooter::read_bytes(&mut Cursor::new(raw))?;

        if read_leu64(r)? != BLOCK_EOF_MARKER {
            return Err(BlockError::BadEndOfBlock);
        }
        block.end_block = r.stream_position()?;
        block.loaded.info = vec![false; block.footer.n_info_streams() as usize];
        block.loaded.format = vec![false; block.footer.n_format_streams() as usize];
        block.info = vec![DataContainer::new(); block.footer.n_info_streams() as usize];
        block.format = vec![DataContainer::new(); block.footer.n_format_streams() as usize];

        r.seek(SeekFrom::Start(block.start_compressed_data))?;
        Ok(block)
    }

    /// Materialize the planned streams. Integrity and authentication
    /// failures are contained per stream: the failed container is recorded
    /// in `load_failures` and the rest of the block loads on.
    pub fn read<R: Read + Seek>(
        &mut self,
        r: &mut R,
        plan: &LoadPlan,
        keychain: Option<&Keychain>,
    ) -> Result<(), BlockError> {
        use fixed_stream as fs;
        if plan.base[fs::PPA] && self.header.has_gt_permuted() {
            self.load_base(r, fs::PPA, keychain)?;
        }
        for slot in 1..fs::N_FIXED {
            if plan.base[slot] {
                self.load_base(r, slot, keychain)?;
            }
        }
        for local in &plan.info_local {
            self.load_info(r, *local as usize, keychain)?;
        }
        for local in &plan.format_local {
            self.load_format(r, *local as usize, keychain)?;
        }
        r.seek(SeekFrom::Start(self.end_block))?;
        Ok(())
    }

    fn load_base<R: Read + Seek>(
        &mut self,
        r: &mut R,
        slot: usize,
        keychain: Option<&Keychain>,
    ) -> Result<(), BlockError> {
        let offset = self.footer.offsets[slot];
        if offset.data.c_length == 0 && offset.data.e_length == 0 {
            // Nothing was stored for this stream; keep its header for the
            // type and stride metadata
            self.base[slot].header = offset;
            self.loaded.base[slot] = true;
            return Ok(());
        }
        r.seek(SeekFrom::Start(self.start_compressed_data + u64::from(offset.data.offset)))?;
        let mut container = DataContainer::read_bytes(r)?;
        match Self::process_container(&mut container, keychain, slot == fixed_stream::PPA) {
            Ok(()) => {
                self.base[slot] = container;
                self.loaded.base[slot] = true;
            }
            Err(error) => {
                warn!(slot, %error, "stream failed to load; leaving it unavailable");
                self.load_failures.push(LoadFailure {
                    stream: StreamId::Base(slot),
                    error,
                });
            }
        }
        Ok(())
    }

    fn load_info<R: Read + Seek>(
        &mut self,
        r: &mut R,
        local: usize,
        keychain: Option<&Keychain>,
    ) -> Result<(), BlockError> {
        let offset = self.footer.info_offsets[local];
        r.seek(SeekFrom::Start(self.start_compressed_data + u64::from(offset.data.offset)))?;
        let mut container = DataContainer::read_bytes(r)?;
        match Self::process_container(&mut container, keychain, false) {
            Ok(()) => {
                self.info[local] = container;
                self.loaded.info[local] = true;
            }
            Err(error) => {
                warn!(local, %error, "INFO stream failed to load");
                self.load_failures.push(LoadFailure {
                    stream: StreamId::Info(local),
                    error,
                });
            }
        }
        Ok(())
    }

    fn load_format<R: Read + Seek>(
        &mut self,
        r: &mut R,
        local: usize,
        keychain: Option<&Keychain>,
    ) -> Result<(), BlockError> {
        let offset = self.footer.format_offsets[local];
        r.seek(SeekFrom::Start(self.start_compressed_data + u64::from(offset.data.offset)))?;
        let mut container = DataContainer::read_bytes(r)?;
        match Self::process_container(&mut container, keychain, false) {
            Ok(()) => {
                self.format[local] = container;
                self.loaded.format[local] = true;
            }
            Err(error) => {
                warn!(local, %error, "FORMAT stream failed to load");
                self.load_failures.push(LoadFailure {
                    stream: StreamId::Format(local),
                    error,
                });
            }
        }
        Ok(())
    }

    fn process_container(
        container: &mut DataContainer,
        keychain: Option<&Keychain>,
        is_permutation: bool,
    ) -> Result<(), BlockError> {
        if container.is_encrypted() {
            let keychain = keychain.ok_or(BlockError::MissingKeychain)?;
            decrypt_container(container, keychain)?;
        }
        if is_permutation {
            decompress_permutation(container)?;
        } else {
            decompress_container(container)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        record::{FieldValues, GenotypeMatrix, GtAllele::*, InfoField, VariantRecord},
        settings::BlockSettings,
    };
    use std::io::Cursor;

    fn test_record(position: i64, alt: &str, gt_pairs: &[(crate::record::GtAllele, crate::record::GtAllele)]) -> VariantRecord {
        let mut alleles = Vec::new();
        for (a, b) in gt_pairs {
            alleles.push(*a);
            alleles.push(*b);
        }
        VariantRecord {
            contig_id: 0,
            position,
            name: format!("rs{position}"),
            reference: "A".into(),
            alternates: vec![alt.into()],
            quality: Some(29.5),
            filter_ids: vec![0],
            info: vec![InfoField {
                global_id: 0,
                values: FieldValues::Int(vec![position as i32]),
            }],
            format: Vec::new(),
            genotypes: Some(GenotypeMatrix::new(
                2,
                vec![true; gt_pairs.len()],
                alleles,
            )),
        }
    }

    fn build_block() -> (VariantBlock, GenotypeEncoder) {
        let mut block = VariantBlock::new();
        let mut encoder = GenotypeEncoder::new(4);
        for position in [100i64, 200, 300] {
            let record = test_record(
                position,
                "T",
                &[
                    (Allele(0), Allele(0)),
                    (Allele(0), Allele(1)),
                    (Allele(1), Allele(1)),
                    (Allele(0), Allele(0)),
                ],
            );
            block.add_record(&record, &mut encoder, None).expect("append");
        }
        (block, encoder)
    }

    fn plan_for(block: &VariantBlock) -> crate::settings::LoadPlan {
        let header = crate::header::VariantHeader::new();
        BlockSettings::new().build_plan(&header, &block.header, &block.footer)
    }

    #[test]
    fn offsets_partition_the_block() -> Result<(), BlockError> {
        let (mut block, _) = build_block();
        block.finalize(&WriteOptions::default(), None)?;

        // Every stream's offset equals the running sum of prior sizes and
        // the total equals the footer offset
        let mut cursor = 0u64;
        for slot in 1..fixed_stream::N_FIXED {
            assert_eq!(u64::from(block.footer.offsets[slot].data.offset), cursor);
            cursor += block.base[slot].object_size();
        }
        for offset in &block.footer.info_offsets {
            assert_eq!(u64::from(offset.data.offset), cursor);
            cursor += u64::from(offset.data.c_length)
                + u64::from(offset.stride.c_length)
                + crate::container::CONTAINER_HEADER_SIZE as u64;
        }
        assert_eq!(cursor, u64::from(block.header.l_offset_footer));
        Ok(())
    }

    #[test]
    fn block_round_trip() -> Result<(), BlockError> {
        let (mut block, _) = build_block();
        block.finalize(&WriteOptions::default(), None)?;
        let mut bytes = Cursor::new(<Vec<u8>>::new());
        block.write(&mut bytes)?;

        bytes.set_position(0);
        let mut restored = VariantBlock::read_header_footer(&mut bytes)?;
        assert_eq!(restored.header, block.header);
        assert_eq!(restored.footer.n_info_streams(), 1);

        let plan = plan_for(&restored);
        restored.read(&mut bytes, &plan, None)?;
        assert!(restored.load_failures.is_empty());

        let positions = restored.base[fixed_stream::POSITION].integer_values()?;
        assert_eq!(positions, vec![100, 200, 300]);
        let contigs = restored.base[fixed_stream::CONTIG].integer_values()?;
        // Contig stream is uniform; a single record survives
        assert_eq!(contigs, vec![0]);
        Ok(())
    }

    #[test]
    fn encrypted_block_requires_the_keychain() -> Result<(), BlockError> {
        let keychain = Keychain::new();
        let (mut block, _) = build_block();
        let options = WriteOptions {
            encryption: Encryption::AesGcm256,
            textual_names: false,
        };
        block.finalize(&options, Some(&keychain))?;
        assert!(block.header.any_encrypted());

        let mut bytes = Cursor::new(<Vec<u8>>::new());
        block.write(&mut bytes)?;
        bytes.set_position(0);

        let mut restored = VariantBlock::read_header_footer(&mut bytes)?;
        let plan = plan_for(&restored);
        restored.read(&mut bytes, &plan, Some(&keychain))?;
        assert!(restored.load_failures.is_empty());
        let positions = restored.base[fixed_stream::POSITION].integer_values()?;
        assert_eq!(positions, vec![100, 200, 300]);
        Ok(())
    }

    #[test]
    fn mixed_contig_records_are_rejected() {
        let (mut block, mut encoder) = build_block();
        let mut record = test_record(
            400,
            "T",
            &[
                (Allele(0), Allele(0)),
                (Allele(0), Allele(0)),
                (Allele(0), Allele(0)),
                (Allele(0), Allele(0)),
            ],
        );
        record.contig_id = 5;
        let err = block.add_record(&record, &mut encoder, None).unwrap_err();
        assert!(matches!(err, BlockError::ContigMismatch { .. }));
    }
}
