//! Record views over a decoded block. The assembler pre-computes the
//! per-variant layout of every loaded stream once; field values and
//! genotypes are then resolved lazily per view through the footer
//! dictionaries.

use crate::{
    block::{BlockError, VariantBlock},
    constants::fixed_stream,
    container::{DataContainer, TachyonType},
    genotype::{bcf_layout, biallelic_shift, nallelic_shift, GtMethod, GtView},
    header::VariantHeader,
    record::{refalt_decode, FieldValues, VariantController},
};

/// Per-record element boundaries of one field stream
#[derive(Debug, Clone)]
enum Layout {
    /// One shared record, repeated for every entry
    Uniform(usize),
    /// Fixed element count per entry
    Fixed(usize),
    /// Per-entry element counts
    Mixed(Vec<u32>),
}

impl Layout {
    /// Element range of one entry
    fn range(&self, entry: usize) -> (usize, usize) {
        match self {
            Layout::Uniform(len) => (0, *len),
            Layout::Fixed(len) => (entry * len, (entry + 1) * len),
            Layout::Mixed(strides) => {
                let start: usize = strides[..entry].iter().map(|s| *s as usize).sum();
                (start, start + strides[entry] as usize)
            }
        }
    }
}

/// One decoded INFO or FORMAT column
#[derive(Debug, Clone)]
enum DecodedStream {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Text(Vec<u8>),
}

#[derive(Debug, Clone)]
struct FieldColumn {
    data: DecodedStream,
    layout: Layout,
    /// Entry ordinal per variant; `None` when the variant's pattern does
    /// not carry this field
    entries: Vec<Option<u32>>,
}

impl FieldColumn {
    fn value(&self, variant: usize, scale: usize) -> Option<FieldValues> {
        let entry = self.entries[variant]? as usize;
        let (start, end) = self.layout.range(entry);
        let (start, end) = (start * scale, end * scale);
        Some(match &self.data {
            DecodedStream::Int(values) => FieldValues::Int(values[start..end].to_vec()),
            DecodedStream::Float(values) => FieldValues::Float(values[start..end].to_vec()),
            DecodedStream::Text(bytes) => {
                FieldValues::Str(String::from_utf8_lossy(&bytes[start..end]).into_owned())
            }
        })
    }
}

/// Genotype payload boundaries of one variant
#[derive(Debug, Clone, Copy)]
struct GtSlice {
    method: GtMethod,
    width: usize,
    shift: u8,
    add: u8,
    global_phase: bool,
    ploidy: u8,
    n_runs: u64,
    stream: usize,
    start: usize,
    end: usize,
}

/// Assembled per-variant access over one decoded block
#[derive(Debug)]
pub struct BlockRecords<'a> {
    block: &'a VariantBlock,
    n_samples: u64,
    n_variants: usize,
    contigs: Vec<i32>,
    positions: Vec<i32>,
    controllers: Vec<VariantController>,
    quality: Option<Vec<f32>>,
    names: Option<Vec<String>>,
    alleles: Option<Vec<Vec<String>>>,
    info_patterns: Option<Vec<i32>>,
    format_patterns: Option<Vec<i32>>,
    filter_patterns: Option<Vec<i32>>,
    info_columns: Vec<Option<FieldColumn>>,
    format_columns: Vec<Option<FieldColumn>>,
    gt_slices: Vec<Option<GtSlice>>,
    ppa: Option<Vec<u32>>,
}

/// Expand a stride-1 integer stream to one value per variant
fn expand_i32(container: &DataContainer, n_variants: usize) -> Result<Vec<i32>, BlockError> {
    let mut values = container.integer_values()?;
    if container.header.data.controller.uniform && values.len() == 1 {
        values = vec![values[0]; n_variants];
    }
    Ok(values)
}

fn expand_f32(container: &DataContainer, n_variants: usize) -> Result<Vec<f32>, BlockError> {
    let mut values = container.float_values()?;
    if container.header.data.controller.uniform && values.len() == 1 {
        values = vec![values[0]; n_variants];
    }
    Ok(values)
}

/// Per-entry layout of a variable-length container
fn layout_of(container: &DataContainer) -> Result<Layout, BlockError> {
    if container.header.data.controller.mixed_stride {
        Ok(Layout::Mixed(container.stride_values()?))
    } else {
        let stride = container.header.data.stride.max(0) as usize;
        if container.header.data.controller.uniform {
            Ok(Layout::Uniform(stride))
        } else {
            Ok(Layout::Fixed(stride))
        }
    }
}

impl<'a> BlockRecords<'a> {
    /// Assemble views over a block whose planned streams have been read
    pub fn new(block: &'a VariantBlock, header: &'a VariantHeader) -> Result<Self, BlockError> {
        use fixed_stream as fs;
        let n_variants = block.header.n_variants as usize;
        let n_samples = header.n_samples() as u64;

        let contigs = expand_i32(&block.base[fs::CONTIG], n_variants)?;
        let positions = expand_i32(&block.base[fs::POSITION], n_variants)?;
        let controllers: Vec<VariantController> = expand_i32(&block.base[fs::CONTROLLER], n_variants)?
            .iter()
            .map(|bits| VariantController::from_u16(*bits as u16))
            .collect();

        let quality = if block.loaded.base[fs::QUALITY] {
            Some(expand_f32(&block.base[fs::QUALITY], n_variants)?)
        } else {
            None
        };

        let names = if block.loaded.base[fs::NAMES] {
            Some(Self::decode_names(&block.base[fs::NAMES], n_variants)?)
        } else {
            None
        };

        let alleles = if block.loaded.base[fs::REFALT] && block.loaded.base[fs::ALLELES] {
            Some(Self::decode_alleles(block, &controllers)?)
        } else {
            None
        };

        let info_patterns = block.loaded.base[fs::ID_INFO]
            .then(|| expand_i32(&block.base[fs::ID_INFO], n_variants))
            .transpose()?;
        let format_patterns = block.loaded.base[fs::ID_FORMAT]
            .then(|| expand_i32(&block.base[fs::ID_FORMAT], n_variants))
            .transpose()?;
        let filter_patterns = block.loaded.base[fs::ID_FILTER]
            .then(|| expand_i32(&block.base[fs::ID_FILTER], n_variants))
            .transpose()?;

        let info_columns = Self::build_columns(
            &block.info,
            &block.loaded.info,
            info_patterns.as_deref(),
            &block.footer.info_patterns,
            n_variants,
        )?;
        let format_columns = Self::build_columns(
            &block.format,
            &block.loaded.format,
            format_patterns.as_deref(),
            &block.footer.format_patterns,
            n_variants,
        )?;

        let ppa = (block.loaded.base[fs::PPA] && block.header.has_gt_permuted()).then(|| {
            block.base[fs::PPA]
                .data_uncompressed
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()
        });

        let gt_slices =
            Self::build_gt_slices(block, &controllers, alleles.as_deref(), n_variants)?;

        Ok(Self {
            block,
            n_samples,
            n_variants,
            contigs,
            positions,
            controllers,
            quality,
            names,
            alleles,
            info_patterns,
            format_patterns,
            filter_patterns,
            info_columns,
            format_columns,
            gt_slices,
            ppa,
        })
    }

    fn decode_names(container: &DataContainer, n_variants: usize) -> Result<Vec<String>, BlockError> {
        let layout = layout_of(container)?;
        let bytes = &container.data_uncompressed;
        let mut names = Vec::with_capacity(n_variants);
        for variant in 0..n_variants {
            let (start, end) = layout.range(variant);
            if end > bytes.len() {
                names.push(String::new());
                continue;
            }
            names.push(String::from_utf8_lossy(&bytes[start..end]).into_owned());
        }
        Ok(names)
    }

    /// Resolve each variant's alleles from either the packed REF/ALT byte
    /// or the variable-length allele stream
    fn decode_alleles(
        block: &VariantBlock,
        controllers: &[VariantController],
    ) -> Result<Vec<Vec<String>>, BlockError> {
        use fixed_stream as fs;
        let refalt = &block.base[fs::REFALT];
        let refalt_bytes = &refalt.data_uncompressed;
        let alleles = &block.base[fs::ALLELES];
        let allele_bytes = &alleles.data_uncompressed;
        let counts = if alleles.header.data.controller.mixed_stride {
            Some(alleles.stride_values()?)
        } else {
            None
        };
        let fixed_count = alleles.header.data.stride.max(0) as usize;

        let mut out = Vec::with_capacity(controllers.len());
        let mut packed_cursor = 0usize;
        let mut struct_entry = 0usize;
        let mut byte_cursor = 0usize;
        for controller in controllers {
            if controller.alleles_packed {
                // Uniform packed streams keep a single byte
                let byte = if refalt.header.data.controller.uniform {
                    refalt_bytes.first().copied().unwrap_or(0)
                } else {
                    refalt_bytes.get(packed_cursor).copied().unwrap_or(0)
                };
                packed_cursor += 1;
                out.push(vec![
                    refalt_decode(byte >> 4).to_string(),
                    refalt_decode(byte & 0xf).to_string(),
                ]);
            } else {
                let n_alleles = match &counts {
                    Some(counts) => counts.get(struct_entry).copied().unwrap_or(0) as usize,
                    None => fixed_count,
                };
                let mut variant_alleles = Vec::with_capacity(n_alleles);
                for _ in 0..n_alleles {
                    if byte_cursor + 2 > allele_bytes.len() {
                        break;
                    }
                    let length =
                        u16::from_le_bytes([allele_bytes[byte_cursor], allele_bytes[byte_cursor + 1]])
                            as usize;
                    byte_cursor += 2;
                    let end = (byte_cursor + length).min(allele_bytes.len());
                    variant_alleles
                        .push(String::from_utf8_lossy(&allele_bytes[byte_cursor..end]).into_owned());
                    byte_cursor = end;
                }
                struct_entry += 1;
                out.push(variant_alleles);
            }
        }
        Ok(out)
    }

    fn build_columns(
        containers: &[DataContainer],
        loaded: &[bool],
        patterns: Option<&[i32]>,
        pattern_table: &[crate::block::footer::PatternEntry],
        n_variants: usize,
    ) -> Result<Vec<Option<FieldColumn>>, BlockError> {
        let mut columns: Vec<Option<FieldColumn>> = Vec::with_capacity(containers.len());
        for (local, container) in containers.iter().enumerate() {
            if !loaded.get(local).copied().unwrap_or(false) {
                columns.push(None);
                continue;
            }
            let Some(patterns) = patterns else {
                columns.push(None);
                continue;
            };

            // Entry ordinal of this field for each variant that carries it
            let mut entries = Vec::with_capacity(n_variants);
            let mut next_entry = 0u32;
            for pattern in patterns.iter().take(n_variants) {
                let carried = usize::try_from(*pattern)
                    .ok()
                    .and_then(|p| pattern_table.get(p))
                    .map(|entry| entry.contains_local(local as u32))
                    .unwrap_or(false);
                if carried {
                    entries.push(Some(next_entry));
                    next_entry += 1;
                } else {
                    entries.push(None);
                }
            }

            let data = match container.header.data.controller.ty {
                TachyonType::Float32 => DecodedStream::Float(container.float_values()?),
                TachyonType::Char => DecodedStream::Text(container.data_uncompressed.clone()),
                _ => DecodedStream::Int(container.integer_values()?),
            };
            columns.push(Some(FieldColumn {
                data,
                layout: layout_of(container)?,
                entries,
            }));
        }
        Ok(columns)
    }

    /// Walk the controllers once, attributing genotype payload bytes to
    /// variants. Every byte of every genotype stream belongs to exactly one
    /// variant.
    fn build_gt_slices(
        block: &VariantBlock,
        controllers: &[VariantController],
        alleles: Option<&[Vec<String>]>,
        n_variants: usize,
    ) -> Result<Vec<Option<GtSlice>>, BlockError> {
        use fixed_stream as fs;
        if !block.loaded.base[fs::GT_SUPPORT] || block.base[fs::GT_SUPPORT].is_empty() {
            return Ok(vec![None; n_variants]);
        }
        let support = expand_i32(&block.base[fs::GT_SUPPORT], n_variants)?;
        let ploidies = expand_i32(&block.base[fs::GT_PLOIDY], n_variants)?;

        let mut cursors = [0usize; fixed_stream::N_FIXED];
        let mut slices = Vec::with_capacity(n_variants);
        let mut gt_ordinal = 0usize;
        for (variant, controller) in controllers.iter().enumerate().take(n_variants) {
            if !controller.gt_available {
                slices.push(None);
                continue;
            }
            let method = GtMethod::try_from(controller.gt_compression_type)
                .map_err(|_| crate::genotype::GenotypeError::UnknownMethod(controller.gt_compression_type))?;
            let width = 1usize << controller.gt_primitive_type;
            let family = match method {
                GtMethod::DiploidRleBiallelic => fs::GT_INT8,
                GtMethod::DiploidRleNallelic | GtMethod::DiploidBcf => fs::GT_S_INT8,
                GtMethod::NploidRle => fs::GT_N_INT8,
                GtMethod::None => {
                    slices.push(None);
                    continue;
                }
            };
            let stream = family + controller.gt_primitive_type as usize;
            let ploidy = ploidies.get(variant).copied().unwrap_or(2).max(0) as u8;
            let n_units = support.get(gt_ordinal).copied().unwrap_or(0).max(0) as u64;
            gt_ordinal += 1;

            // The allele-field width of the n-allelic methods comes from
            // the site's allele count; without the allele table those
            // payloads cannot be unpacked
            let n_alleles = match alleles.and_then(|table| table.get(variant)) {
                Some(list) => list.len() as u16,
                None => match method {
                    GtMethod::DiploidRleNallelic | GtMethod::DiploidBcf => {
                        return Err(BlockError::MissingAlleleStreams)
                    }
                    _ => 2,
                },
            };
            let (shift, n_runs, bytes) = match method {
                GtMethod::DiploidRleBiallelic => (
                    biallelic_shift(controller.gt_has_missing),
                    n_units,
                    n_units as usize * width,
                ),
                GtMethod::DiploidRleNallelic => (
                    nallelic_shift(n_alleles, controller.gt_has_missing, false),
                    n_units,
                    n_units as usize * width,
                ),
                GtMethod::DiploidBcf => {
                    (bcf_layout(n_alleles).0, n_units, n_units as usize * width)
                }
                GtMethod::NploidRle => (0, n_units, n_units as usize * (width + ploidy as usize)),
                GtMethod::None => unreachable!(),
            };

            let start = cursors[stream];
            cursors[stream] += bytes;
            slices.push(Some(GtSlice {
                method,
                width,
                shift,
                add: u8::from(controller.gt_has_mixed_phasing),
                global_phase: controller.gt_phase_uniform,
                ploidy,
                n_runs,
                stream,
                start,
                end: start + bytes,
            }));
        }
        Ok(slices)
    }

    pub fn len(&self) -> usize {
        self.n_variants
    }

    pub fn is_empty(&self) -> bool {
        self.n_variants == 0
    }

    pub fn view(&self, index: usize) -> RecordView<'_> {
        RecordView {
            records: self,
            index,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordView<'_>> {
        (0..self.n_variants).map(|index| self.view(index))
    }
}

/// Lazy view of one variant, resolving fields through the block footer
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    records: &'a BlockRecords<'a>,
    index: usize,
}

impl<'a> RecordView<'a> {
    pub fn contig_id(&self) -> i32 {
        self.records.contigs[self.index]
    }

    pub fn position(&self) -> i64 {
        i64::from(self.records.positions[self.index])
    }

    pub fn controller(&self) -> VariantController {
        self.records.controllers[self.index]
    }

    pub fn name(&self) -> Option<&str> {
        self.records
            .names
            .as_ref()
            .map(|names| names[self.index].as_str())
    }

    /// Quality, with the NaN missing-marker folded back to `None`
    pub fn quality(&self) -> Option<f32> {
        let quality = (*self.records.quality.as_ref()?)[self.index];
        if quality.is_nan() {
            None
        } else {
            Some(quality)
        }
    }

    /// All alleles of this site, REF first
    pub fn alleles(&self) -> Option<&[String]> {
        self.records
            .alleles
            .as_ref()
            .map(|table| table[self.index].as_slice())
    }

    /// Global FILTER ids attached to this variant
    pub fn filter_ids(&self) -> Option<&[i32]> {
        let pattern = (*self.records.filter_patterns.as_ref()?)[self.index];
        let entry = self
            .records
            .block
            .footer
            .filter_patterns
            .get(usize::try_from(pattern).ok()?)?;
        Some(&entry.ids)
    }

    /// Global INFO ids attached to this variant
    pub fn info_ids(&self) -> Option<&[i32]> {
        let pattern = (*self.records.info_patterns.as_ref()?)[self.index];
        let entry = self
            .records
            .block
            .footer
            .info_patterns
            .get(usize::try_from(pattern).ok()?)?;
        Some(&entry.ids)
    }

    /// One INFO field by global id, when present on this variant and
    /// loaded
    pub fn info_value(&self, global_id: u32) -> Option<FieldValues> {
        let local = self.records.block.footer.info_local(global_id as i32)?;
        let column = self.records.info_columns.get(local as usize)?.as_ref()?;
        column.value(self.index, 1)
    }

    /// One FORMAT field by global id; values are flattened over samples
    pub fn format_value(&self, global_id: u32) -> Option<FieldValues> {
        let local = self.records.block.footer.format_local(global_id as i32)?;
        let column = self.records.format_columns.get(local as usize)?.as_ref()?;
        column.value(self.index, self.records.n_samples as usize)
    }

    /// Genotype view of this variant, when genotypes were stored and
    /// loaded
    pub fn gt(&self) -> Option<GtView<'a>> {
        let slice = self.records.gt_slices[self.index]?;
        let stream = &self.records.block.base[slice.stream];
        let data = stream.data_uncompressed.get(slice.start..slice.end)?;
        Some(GtView {
            method: slice.method,
            width: slice.width,
            shift: slice.shift,
            add: slice.add,
            global_phase: slice.global_phase,
            ploidy: slice.ploidy,
            n_samples: self.records.n_samples,
            n_runs: slice.n_runs,
            data,
            ppa: self.records.ppa.as_deref(),
        })
    }
}
