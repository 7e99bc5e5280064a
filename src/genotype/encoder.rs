use crate::{
    constants::fixed_stream,
    genotype::{bcf_layout, biallelic_shift, nallelic_shift, run_limit, GenotypeError, GtMethod},
    record::{GenotypeMatrix, GtAllele, VariantController},
};

const WORD_BYTES: [usize; 4] = [1, 2, 4, 8];

/// Outcome of assessing one RLE candidate
#[derive(Debug, Clone, Copy)]
struct RleCost {
    width_log2: u8,
    n_runs: u64,
    limit: u64,
}

/// Usage tallies per method and word width
#[derive(Debug, Clone, Copy, Default)]
pub struct GenotypeEncoderStats {
    pub rle_counts: [u64; 4],
    pub rle_simple_counts: [u64; 4],
    pub bcf_counts: [u64; 4],
    pub nploid_counts: [u64; 4],
}

impl GenotypeEncoderStats {
    pub fn total(&self) -> u64 {
        self.rle_counts.iter().sum::<u64>()
            + self.rle_simple_counts.iter().sum::<u64>()
            + self.bcf_counts.iter().sum::<u64>()
            + self.nploid_counts.iter().sum::<u64>()
    }
}

/// Product of encoding one variant's genotypes: the packed payload, its
/// destination stream, and the support-stream bookkeeping the decoder needs
#[derive(Debug, Clone)]
pub struct EncodedGenotypes {
    pub method: GtMethod,
    /// log2 of the RLE word byte width
    pub width_log2: u8,
    /// Fixed-stream slot the payload appends to
    pub stream: usize,
    pub payload: Vec<u8>,
    pub n_runs: u64,
    /// Value for the GT_SUPPORT stream: run count, or word count for the
    /// BCF-style fallback
    pub support_value: i32,
    /// Stride for the GT_SUPPORT stream acts as the method discriminant
    pub support_stride: u32,
    pub has_missing: bool,
    pub has_eov: bool,
    pub mixed_phasing: bool,
    pub global_phase: bool,
    pub diploid: bool,
    pub biallelic: bool,
}

impl EncodedGenotypes {
    /// Fold this encoding into the variant's controller bits
    pub fn apply_controller(&self, controller: &mut VariantController) {
        controller.gt_available = true;
        controller.gt_has_missing = self.has_missing;
        controller.gt_phase_uniform = !self.mixed_phasing && self.global_phase;
        controller.gt_has_mixed_phasing = self.mixed_phasing;
        controller.gt_compression_type = u8::from(self.method);
        controller.gt_primitive_type = self.width_log2;
        controller.gt_mixed_ploidy = self.has_eov;
        controller.diploid = self.diploid;
        controller.biallelic = self.biallelic;
    }
}

/// Chooses and runs the genotype codec for each variant of a block
#[derive(Debug, Default)]
pub struct GenotypeEncoder {
    n_samples: u64,
    stats: GenotypeEncoderStats,
}

impl GenotypeEncoder {
    pub fn new(n_samples: u64) -> Self {
        Self {
            n_samples,
            stats: GenotypeEncoderStats::default(),
        }
    }

    pub fn stats(&self) -> &GenotypeEncoderStats {
        &self.stats
    }

    /// Assess and encode one variant's genotypes in permuted sample order.
    /// `ppa` maps storage rank to original sample index; n-ploid payloads
    /// are stored unpermuted.
    pub fn encode(
        &mut self,
        gt: &GenotypeMatrix,
        n_alleles: u16,
        ppa: &[u32],
    ) -> Result<EncodedGenotypes, GenotypeError> {
        if u32::from(n_alleles) + 1 >= 32768 {
            return Err(GenotypeError::TooManyAlleles(u32::from(n_alleles) + 1));
        }
        let n = gt.n_samples() as u64;
        if n != self.n_samples {
            return Err(GenotypeError::SampleCountMismatch {
                expected: self.n_samples,
                found: n,
            });
        }
        assert!(n > 0, "genotype records require at least one sample");

        let has_missing = gt.has_missing();
        let has_eov = gt.has_eov();
        let mixed = gt.mixed_phasing();
        let diploid = gt.ploidy == 2;
        let biallelic = n_alleles == 2;

        if diploid && !has_eov && biallelic {
            self.encode_diploid_biallelic(gt, ppa, has_missing, mixed)
        } else if diploid && !has_eov {
            self.encode_diploid_nallelic(gt, n_alleles, ppa, has_missing, mixed)
        } else {
            self.encode_nploid(gt, n_alleles, has_missing, has_eov, mixed)
        }
    }

    /// Diploid biallelic sites use the cheap packed alphabet
    /// REF = 0, ALT = 1, MISSING = 2
    fn encode_diploid_biallelic(
        &mut self,
        gt: &GenotypeMatrix,
        ppa: &[u32],
        has_missing: bool,
        mixed: bool,
    ) -> Result<EncodedGenotypes, GenotypeError> {
        let shift = biallelic_shift(has_missing);
        let add = u8::from(mixed);
        let packed = pack_diploid(gt, ppa, shift, add, biallelic_symbol);

        let occupied = 2 * shift + add;
        let cost = assess_rle(&packed, occupied, 0)
            .ok_or(GenotypeError::TooManyAlleles(u32::from(occupied)))?;
        let width = WORD_BYTES[cost.width_log2 as usize];
        let (payload, n_runs) = encode_rle(&packed, width, occupied, cost.limit);
        debug_assert_eq!(n_runs, cost.n_runs);

        self.stats.rle_counts[cost.width_log2 as usize] += 1;
        Ok(EncodedGenotypes {
            method: GtMethod::DiploidRleBiallelic,
            width_log2: cost.width_log2,
            stream: fixed_stream::GT_INT8 + cost.width_log2 as usize,
            payload,
            n_runs,
            support_value: n_runs as i32,
            support_stride: 1,
            has_missing,
            has_eov: false,
            mixed_phasing: mixed,
            global_phase: gt.global_phase(),
            diploid: true,
            biallelic: true,
        })
    }

    /// Diploid n-allelic sites over the internal alphabet: run-length
    /// packed, with a per-sample BCF-style fallback when runs do not pay
    fn encode_diploid_nallelic(
        &mut self,
        gt: &GenotypeMatrix,
        n_alleles: u16,
        ppa: &[u32],
        has_missing: bool,
        mixed: bool,
    ) -> Result<EncodedGenotypes, GenotypeError> {
        let shift = nallelic_shift(n_alleles, has_missing, false);
        let add = u8::from(mixed);
        let packed = pack_diploid(gt, ppa, shift, add, |allele| allele.symbol());

        let occupied = 2 * shift + add;
        let rle = assess_rle(&packed, occupied, 0);
        let (bcf_shift, bcf_width) = bcf_layout(n_alleles);
        let bcf_cost = self.n_samples * bcf_width as u64;

        if let Some(cost) = rle {
            let width = WORD_BYTES[cost.width_log2 as usize];
            // Per-sample words take over only when runs are strictly more
            // expensive
            if width as u64 * cost.n_runs <= bcf_cost {
                let (payload, n_runs) = encode_rle(&packed, width, occupied, cost.limit);
                debug_assert_eq!(n_runs, cost.n_runs);
                self.stats.rle_simple_counts[cost.width_log2 as usize] += 1;
                return Ok(EncodedGenotypes {
                    method: GtMethod::DiploidRleNallelic,
                    width_log2: cost.width_log2,
                    stream: fixed_stream::GT_S_INT8 + cost.width_log2 as usize,
                    payload,
                    n_runs,
                    support_value: n_runs as i32,
                    support_stride: 2,
                    has_missing,
                    has_eov: false,
                    mixed_phasing: mixed,
                    global_phase: gt.global_phase(),
                    diploid: true,
                    biallelic: false,
                });
            }
        }

        // BCF-style is cheaper: one word per sample
        let mut payload = Vec::with_capacity(self.n_samples as usize * bcf_width);
        for rank in 0..self.n_samples as usize {
            let sample = ppa[rank] as usize;
            let (a, b) = gt.diploid(sample);
            let word = b.symbol() << (bcf_shift + 1)
                | a.symbol() << 1
                | u64::from(gt.phased[sample]);
            payload.extend_from_slice(&word.to_le_bytes()[..bcf_width]);
        }
        let width_log2 = bcf_width.trailing_zeros() as u8;
        self.stats.bcf_counts[width_log2 as usize] += 1;
        Ok(EncodedGenotypes {
            method: GtMethod::DiploidBcf,
            width_log2,
            stream: fixed_stream::GT_S_INT8 + width_log2 as usize,
            payload,
            n_runs: self.n_samples,
            support_value: self.n_samples as i32,
            support_stride: 3,
            has_missing,
            has_eov: false,
            mixed_phasing: mixed,
            global_phase: gt.global_phase(),
            diploid: true,
            biallelic: n_alleles == 2,
        })
    }

    /// Any ploidy, and diploid records padded with end-of-vector
    /// markers. Runs carry a length word followed by one symbol byte per
    /// allele slot.
    fn encode_nploid(
        &mut self,
        gt: &GenotypeMatrix,
        n_alleles: u16,
        has_missing: bool,
        has_eov: bool,
        mixed: bool,
    ) -> Result<EncodedGenotypes, GenotypeError> {
        if u32::from(n_alleles) + 1 > u32::from(u8::MAX) {
            return Err(GenotypeError::TooManyAllelesNploid(u32::from(n_alleles) + 1));
        }
        let m = gt.ploidy as usize;
        let n = gt.n_samples();

        // Sample tuples in storage order; the permutation never applies to
        // n-ploid payloads
        let tuples: Vec<&[GtAllele]> = (0..n).map(|sample| gt.sample(sample)).collect();

        // Assess run counts per candidate length-word width
        let mut best: Option<(usize, u64, u64)> = None;
        for (width_log2, width) in WORD_BYTES.iter().enumerate() {
            let limit = run_limit(*width, 0).unwrap_or(u64::MAX);
            let runs = count_tuple_runs(&tuples, limit);
            let cost = runs * (*width as u64 + m as u64);
            if best.map(|(_, _, best_cost)| cost < best_cost).unwrap_or(true) {
                best = Some((width_log2, limit, cost));
            }
        }
        let (width_log2, limit, _) = best.expect("four candidate widths");
        let width = WORD_BYTES[width_log2];

        // Emit runs
        let mut payload = Vec::new();
        let mut n_runs = 0u64;
        let mut sum = 0u64;
        let mut current = 0usize;
        let mut length = 1u64;
        for next in 1..n {
            if tuples[next] != tuples[current] || length == limit {
                emit_nploid_run(&mut payload, length, tuples[current], width);
                sum += length;
                n_runs += 1;
                length = 0;
                current = next;
            }
            length += 1;
        }
        emit_nploid_run(&mut payload, length, tuples[current], width);
        sum += length;
        n_runs += 1;
        debug_assert_eq!(sum, n as u64);

        self.stats.nploid_counts[width_log2] += 1;
        Ok(EncodedGenotypes {
            method: GtMethod::NploidRle,
            width_log2: width_log2 as u8,
            stream: fixed_stream::GT_N_INT8 + width_log2,
            payload,
            n_runs,
            support_value: n_runs as i32,
            support_stride: 4,
            has_missing,
            has_eov,
            mixed_phasing: mixed,
            global_phase: gt.global_phase(),
            diploid: gt.ploidy == 2,
            biallelic: n_alleles == 2,
        })
    }
}

/// Packed symbol of one biallelic allele: REF = 0, ALT = 1, MISSING = 2
fn biallelic_symbol(allele: GtAllele) -> u64 {
    match allele {
        GtAllele::Allele(0) => 0,
        GtAllele::Allele(_) => 1,
        GtAllele::Missing => 2,
        GtAllele::Eov => unreachable!("EOV records are routed to the n-ploid codec"),
    }
}

/// Pack diploid samples, in permuted order, into comparable words:
/// `allele_a | allele_b | phase?`
fn pack_diploid(
    gt: &GenotypeMatrix,
    ppa: &[u32],
    shift: u8,
    add: u8,
    symbol: impl Fn(GtAllele) -> u64,
) -> Vec<u64> {
    let mut packed = Vec::with_capacity(gt.n_samples());
    for rank in 0..gt.n_samples() {
        let sample = ppa[rank] as usize;
        let (a, b) = gt.diploid(sample);
        let phase = u64::from(gt.phased[sample]) & u64::from(add);
        packed.push(symbol(a) << (shift + add) | symbol(b) << add | phase);
    }
    packed
}

/// Count runs for each candidate word width in one pass and pick the width
/// minimizing `runs * sizeof(word)`. Length fields shrink by the occupied
/// allele/phase bits plus one reserved bit when EOV states are present.
fn assess_rle(packed: &[u64], occupied: u8, reserved: u8) -> Option<RleCost> {
    let mut runs = [0u64; 4];
    let mut lengths = [1u64; 4];
    let mut limits = [None; 4];
    for (k, width) in WORD_BYTES.iter().enumerate() {
        limits[k] = run_limit(*width, occupied + reserved);
    }

    for i in 1..packed.len() {
        let transition = packed[i] != packed[i - 1];
        for k in 0..4 {
            let Some(limit) = limits[k] else { continue };
            if transition {
                runs[k] += 1;
                lengths[k] = 0;
            }
            if lengths[k] == limit {
                runs[k] += 1;
                lengths[k] = 0;
            }
            lengths[k] += 1;
        }
    }
    for k in 0..4 {
        if limits[k].is_some() {
            runs[k] += 1;
        }
    }

    // Determine best action
    let mut best: Option<RleCost> = None;
    for (k, width) in WORD_BYTES.iter().enumerate() {
        let Some(limit) = limits[k] else { continue };
        let cost = runs[k] * *width as u64;
        if best
            .map(|chosen| cost < runs[chosen.width_log2 as usize] * WORD_BYTES[chosen.width_log2 as usize] as u64)
            .unwrap_or(true)
        {
            best = Some(RleCost {
                width_log2: k as u8,
                n_runs: runs[k],
                limit,
            });
        }
    }
    best
}

/// Emit run-length words: `[length | packed]` with the length in the high
/// bits
fn encode_rle(packed: &[u64], width: usize, occupied: u8, limit: u64) -> (Vec<u8>, u64) {
    let mut out = Vec::with_capacity(packed.len());
    let mut n_runs = 0u64;
    let mut sum = 0u64;
    let mut current = packed[0];
    let mut length: u64 = 1;

    for &next in &packed[1..] {
        if next != current || length == limit {
            let word = length << occupied | current;
            debug_assert_eq!(word >> occupied, length);
            out.extend_from_slice(&word.to_le_bytes()[..width]);
            sum += length;
            n_runs += 1;
            length = 0;
            current = next;
        }
        length += 1;
    }
    // Last run
    let word = length << occupied | current;
    debug_assert_eq!(word >> occupied, length);
    out.extend_from_slice(&word.to_le_bytes()[..width]);
    sum += length;
    n_runs += 1;
    debug_assert_eq!(sum, packed.len() as u64);

    (out, n_runs)
}

fn count_tuple_runs(tuples: &[&[GtAllele]], limit: u64) -> u64 {
    if tuples.is_empty() {
        return 0;
    }
    let mut runs = 0u64;
    let mut length = 1u64;
    for i in 1..tuples.len() {
        if tuples[i] != tuples[i - 1] {
            runs += 1;
            length = 0;
        }
        if length == limit {
            runs += 1;
            length = 0;
        }
        length += 1;
    }
    runs + 1
}

fn emit_nploid_run(out: &mut Vec<u8>, length: u64, tuple: &[GtAllele], width: usize) {
    out.extend_from_slice(&length.to_le_bytes()[..width]);
    for allele in tuple {
        out.push(allele.symbol() as u8);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::GtAllele::*;

    fn diploid(pairs: &[(GtAllele, GtAllele)], phased: bool) -> GenotypeMatrix {
        let mut alleles = Vec::new();
        for (a, b) in pairs {
            alleles.push(*a);
            alleles.push(*b);
        }
        GenotypeMatrix::new(2, vec![phased; pairs.len()], alleles)
    }

    fn identity(n: u32) -> Vec<u32> {
        (0..n).collect()
    }

    #[test]
    fn biallelic_site_uses_method_one() -> Result<(), GenotypeError> {
        // Scenario: 0|0, 0|1, 1|1, .|. after permutation [0, 2, 1, 3]
        let gt = diploid(
            &[
                (Allele(0), Allele(0)),
                (Allele(0), Allele(1)),
                (Allele(1), Allele(1)),
                (Missing, Missing),
            ],
            true,
        );
        let mut encoder = GenotypeEncoder::new(4);
        let encoded = encoder.encode(&gt, 2, &[0, 2, 1, 3])?;
        assert_eq!(encoded.method, GtMethod::DiploidRleBiallelic);
        assert_eq!(encoded.width_log2, 0);
        assert_eq!(encoded.stream, fixed_stream::GT_INT8);
        // Every genotype differs from its neighbor in storage order
        assert_eq!(encoded.n_runs, 4);
        assert_eq!(encoded.payload.len(), 4);
        assert_eq!(encoded.support_stride, 1);
        assert_eq!(encoder.stats().rle_counts[0], 1);
        Ok(())
    }

    #[test]
    fn long_runs_collapse() -> Result<(), GenotypeError> {
        let mut pairs = vec![(Allele(0), Allele(0)); 1000];
        pairs.extend(vec![(Allele(1), Allele(1)); 1000]);
        let gt = diploid(&pairs, true);
        let mut encoder = GenotypeEncoder::new(2000);
        let encoded = encoder.encode(&gt, 2, &identity(2000))?;
        assert_eq!(encoded.method, GtMethod::DiploidRleBiallelic);
        // Two runs; u16 words hold lengths up to 16383 at shift 1
        assert_eq!(encoded.n_runs, 2);
        assert_eq!(encoded.width_log2, 1);
        Ok(())
    }

    #[test]
    fn run_limit_forces_breaks() -> Result<(), GenotypeError> {
        // 100 identical unphased genotypes, no missing: u8 words hold runs
        // of at most 63, so one byte-width run must split
        let pairs = vec![(Allele(0), Allele(0)); 100];
        let gt = diploid(&pairs, false);
        let mut encoder = GenotypeEncoder::new(100);
        let encoded = encoder.encode(&gt, 2, &identity(100))?;
        assert_eq!(encoded.method, GtMethod::DiploidRleBiallelic);
        // u8: 2 runs * 1 byte beats u16: 1 run * 2 bytes is a tie; the
        // narrower width wins ties
        assert_eq!(encoded.width_log2, 0);
        assert_eq!(encoded.n_runs, 2);
        Ok(())
    }

    #[test]
    fn triallelic_site_uses_method_two() -> Result<(), GenotypeError> {
        // Scenario: 0/1, 1/2, 0/2, ./2, 2/2 unphased
        let gt = diploid(
            &[
                (Allele(0), Allele(1)),
                (Allele(1), Allele(2)),
                (Allele(0), Allele(2)),
                (Missing, Allele(2)),
                (Allele(2), Allele(2)),
            ],
            false,
        );
        let mut encoder = GenotypeEncoder::new(5);
        let encoded = encoder.encode(&gt, 3, &identity(5))?;
        assert_eq!(encoded.method, GtMethod::DiploidRleNallelic);
        assert_eq!(encoded.support_stride, 2);
        // shift = ceil(log2(3 + 1 + 1)) = 3 bits per allele
        assert_eq!(nallelic_shift(3, true, false), 3);
        Ok(())
    }

    #[test]
    fn scattered_nallelic_site_stays_run_length_on_cost_tie() -> Result<(), GenotypeError> {
        // Every sample distinct: RLE degenerates to one run per sample,
        // tying the per-sample cost. Ties keep the run-length form.
        let pairs: Vec<(GtAllele, GtAllele)> = (0..64u16)
            .map(|i| (Allele(i % 5), Allele((i + 1) % 5)))
            .collect();
        let gt = diploid(&pairs, false);
        let mut encoder = GenotypeEncoder::new(64);
        let encoded = encoder.encode(&gt, 5, &identity(64))?;
        assert_eq!(encoded.method, GtMethod::DiploidRleNallelic);
        assert_eq!(encoded.n_runs, 64);
        assert_eq!(encoded.payload.len(), 64);
        Ok(())
    }

    #[test]
    fn eov_padding_routes_to_nploid() -> Result<(), GenotypeError> {
        // Scenario: haploid calls padded to ploidy 2 with EOV
        let gt = diploid(
            &[(Allele(0), Eov), (Allele(1), Eov), (Missing, Eov)],
            false,
        );
        let mut encoder = GenotypeEncoder::new(3);
        let encoded = encoder.encode(&gt, 2, &identity(3))?;
        assert_eq!(encoded.method, GtMethod::NploidRle);
        assert_eq!(encoded.support_stride, 4);
        // Three runs of [len:1][a][EOV=1]: one length byte + two symbols
        assert_eq!(encoded.n_runs, 3);
        assert_eq!(encoded.payload.len(), 3 * (1 + 2));
        assert_eq!(encoded.payload[2], 1);
        assert!(encoded.has_eov);
        Ok(())
    }

    #[test]
    fn triploid_records_use_nploid() -> Result<(), GenotypeError> {
        let alleles = vec![
            Allele(0), Allele(0), Allele(1),
            Allele(0), Allele(0), Allele(1),
            Allele(1), Allele(1), Allele(1),
        ];
        let gt = GenotypeMatrix::new(3, vec![false; 3], alleles);
        let mut encoder = GenotypeEncoder::new(3);
        let encoded = encoder.encode(&gt, 2, &identity(3))?;
        assert_eq!(encoded.method, GtMethod::NploidRle);
        // Runs: two samples share a tuple, one differs
        assert_eq!(encoded.n_runs, 2);
        Ok(())
    }

    #[test]
    fn allele_count_is_bounded() {
        let gt = diploid(&[(Allele(0), Allele(1))], false);
        let mut encoder = GenotypeEncoder::new(1);
        let err = encoder.encode(&gt, 32767, &identity(1)).unwrap_err();
        assert!(matches!(err, GenotypeError::TooManyAlleles(_)));
    }
}
