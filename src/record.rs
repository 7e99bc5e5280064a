use crate::container::{EOV_INT, MISSING_INT};

/// One allele slot of one sample. `Eov` pads samples whose true ploidy is
/// below the record ploidy (end-of-vector).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtAllele {
    Missing,
    Eov,
    Allele(u16),
}

impl GtAllele {
    /// Internal alphabet: 0 missing, 1 EOV, 2 REF, 3 first ALT, ...
    pub fn symbol(&self) -> u64 {
        match self {
            GtAllele::Missing => 0,
            GtAllele::Eov => 1,
            GtAllele::Allele(idx) => u64::from(*idx) + 2,
        }
    }

    /// Inverse of [`symbol`](GtAllele::symbol)
    pub fn from_symbol(symbol: u64) -> Self {
        match symbol {
            0 => GtAllele::Missing,
            1 => GtAllele::Eov,
            idx => GtAllele::Allele((idx - 2) as u16),
        }
    }
}

/// Genotypes of one variant: an `n_samples × ploidy` matrix of allele codes
/// plus one phase flag per sample
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenotypeMatrix {
    pub ploidy: u8,
    /// One phase flag per sample
    pub phased: Vec<bool>,
    /// Row-major `n_samples * ploidy` allele codes
    pub alleles: Vec<GtAllele>,
}

impl GenotypeMatrix {
    pub fn new(ploidy: u8, phased: Vec<bool>, alleles: Vec<GtAllele>) -> Self {
        assert_eq!(alleles.len() % ploidy.max(1) as usize, 0);
        Self {
            ploidy,
            phased,
            alleles,
        }
    }

    pub fn n_samples(&self) -> usize {
        if self.ploidy == 0 {
            0
        } else {
            self.alleles.len() / self.ploidy as usize
        }
    }

    /// The two allele codes of a diploid sample
    pub fn diploid(&self, sample: usize) -> (GtAllele, GtAllele) {
        (self.alleles[sample * 2], self.alleles[sample * 2 + 1])
    }

    /// The allele codes of one sample at any ploidy
    pub fn sample(&self, sample: usize) -> &[GtAllele] {
        let m = self.ploidy as usize;
        &self.alleles[sample * m..(sample + 1) * m]
    }

    pub fn has_missing(&self) -> bool {
        self.alleles.iter().any(|a| *a == GtAllele::Missing)
    }

    pub fn has_eov(&self) -> bool {
        self.alleles.iter().any(|a| *a == GtAllele::Eov)
    }

    /// True when samples disagree on phasing
    pub fn mixed_phasing(&self) -> bool {
        self.phased.windows(2).any(|pair| pair[0] != pair[1])
    }

    /// The shared phase flag; meaningful only when phasing is not mixed
    pub fn global_phase(&self) -> bool {
        self.phased.first().copied().unwrap_or(false)
    }
}

/// Per-variant controller bits, 16 per record:
/// | gt_available:1 | gt_has_missing:1 | gt_phase_uniform:1 |
/// | gt_has_mixed_phasing:1 | gt_compression_type:4 | gt_primitive_type:2 |
/// | gt_mixed_ploidy:1 | biallelic:1 | simple_snv:1 | diploid:1 |
/// | alleles_packed:1 | all_snv:1 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariantController {
    pub gt_available: bool,
    pub gt_has_missing: bool,
    /// The shared phase value when phasing is not mixed
    pub gt_phase_uniform: bool,
    pub gt_has_mixed_phasing: bool,
    /// Genotype codec tag; see the genotype method enum
    pub gt_compression_type: u8,
    /// Genotype word width: log2 of the byte count
    pub gt_primitive_type: u8,
    pub gt_mixed_ploidy: bool,
    pub biallelic: bool,
    pub simple_snv: bool,
    pub diploid: bool,
    pub alleles_packed: bool,
    pub all_snv: bool,
}

impl VariantController {
    pub fn to_u16(self) -> u16 {
        u16::from(self.gt_available)
            | u16::from(self.gt_has_missing) << 1
            | u16::from(self.gt_phase_uniform) << 2
            | u16::from(self.gt_has_mixed_phasing) << 3
            | u16::from(self.gt_compression_type & 0xf) << 4
            | u16::from(self.gt_primitive_type & 0x3) << 8
            | u16::from(self.gt_mixed_ploidy) << 10
            | u16::from(self.biallelic) << 11
            | u16::from(self.simple_snv) << 12
            | u16::from(self.diploid) << 13
            | u16::from(self.alleles_packed) << 14
            | u16::from(self.all_snv) << 15
    }

    pub fn from_u16(value: u16) -> Self {
        Self {
            gt_available: value & 1 != 0,
            gt_has_missing: value >> 1 & 1 != 0,
            gt_phase_uniform: value >> 2 & 1 != 0,
            gt_has_mixed_phasing: value >> 3 & 1 != 0,
            gt_compression_type: (value >> 4 & 0xf) as u8,
            gt_primitive_type: (value >> 8 & 0x3) as u8,
            gt_mixed_ploidy: value >> 10 & 1 != 0,
            biallelic: value >> 11 & 1 != 0,
            simple_snv: value >> 12 & 1 != 0,
            diploid: value >> 13 & 1 != 0,
            alleles_packed: value >> 14 & 1 != 0,
            all_snv: value >> 15 & 1 != 0,
        }
    }
}

/// Typed values of one INFO or FORMAT field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    /// Presence-only INFO flag
    Flag,
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(String),
}

/// One INFO field of one variant
#[derive(Debug, Clone, PartialEq)]
pub struct InfoField {
    pub global_id: u32,
    pub values: FieldValues,
}

/// One FORMAT field of one variant: values for all samples, flattened
#[derive(Debug, Clone, PartialEq)]
pub struct FormatField {
    pub global_id: u32,
    /// Element count per sample
    pub per_sample: u32,
    /// `n_samples * per_sample` values
    pub values: FieldValues,
}

/// One variant record as delivered by the importer. Field identifiers are
/// the global indices of the archive header dictionaries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantRecord {
    pub contig_id: i32,
    pub position: i64,
    pub name: String,
    pub reference: String,
    pub alternates: Vec<String>,
    pub quality: Option<f32>,
    pub filter_ids: Vec<u32>,
    pub info: Vec<InfoField>,
    pub format: Vec<FormatField>,
    pub genotypes: Option<GenotypeMatrix>,
}

impl VariantRecord {
    /// Allele count including REF
    pub fn n_alleles(&self) -> u16 {
        1 + self.alternates.len() as u16
    }

    pub fn is_biallelic(&self) -> bool {
        self.n_alleles() == 2
    }

    /// Inclusive reference span of this record
    pub fn span(&self) -> (i64, i64) {
        (
            self.position,
            self.position + self.reference.len().saturating_sub(1) as i64,
        )
    }

    pub fn all_snv(&self) -> bool {
        self.reference.len() == 1 && self.alternates.iter().all(|alt| alt.len() == 1)
    }

    /// A site whose REF and single ALT both come from the packed alphabet
    /// stores both alleles in one byte
    pub fn use_packed_refalt(&self) -> bool {
        if self.alternates.len() > 1 {
            return false;
        }
        if refalt_code(&self.reference).is_none() {
            return false;
        }
        match self.alternates.first() {
            Some(alt) => refalt_code(alt).is_some(),
            None => true,
        }
    }

    /// Pack REF and ALT into one byte: REF nibble high, ALT nibble low
    pub fn pack_refalt_byte(&self) -> u8 {
        let reference = refalt_code(&self.reference).unwrap_or(REFALT_UNKNOWN);
        let alternate = self
            .alternates
            .first()
            .and_then(|alt| refalt_code(alt))
            .unwrap_or(REFALT_UNKNOWN);
        reference << 4 | alternate
    }

    /// Expand integer values with MISSING/EOV sentinels for container
    /// storage
    pub fn expand_sentinel(value: Option<i32>) -> i32 {
        value.unwrap_or(MISSING_INT)
    }

    pub fn eov_sentinel() -> i32 {
        EOV_INT
    }
}

pub const REFALT_A: u8 = 0;
pub const REFALT_T: u8 = 1;
pub const REFALT_G: u8 = 2;
pub const REFALT_C: u8 = 3;
pub const REFALT_UNKNOWN: u8 = 4;
pub const REFALT_NON_REF: u8 = 5;

/// Nibble code of a packable allele, `None` when the allele needs the
/// variable-length stream
pub fn refalt_code(allele: &str) -> Option<u8> {
    match allele {
        "A" => Some(REFALT_A),
        "T" => Some(REFALT_T),
        "G" => Some(REFALT_G),
        "C" => Some(REFALT_C),
        "." | "X" => Some(REFALT_UNKNOWN),
        "<NON_REF>" => Some(REFALT_NON_REF),
        _ => None,
    }
}

/// String form of a packed allele nibble
pub fn refalt_decode(code: u8) -> &'static str {
    match code {
        REFALT_A => "A",
        REFALT_T => "T",
        REFALT_G => "G",
        REFALT_C => "C",
        REFALT_NON_REF => "<NON_REF>",
        _ => ".",
    }
}
