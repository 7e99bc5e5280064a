use crate::{
    genotype::{GenotypeError, GtMethod},
    record::GtAllele,
};

/// One decoded genotype run: `length` consecutive samples, in storage
/// order, sharing the same allele tuple and phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtRun {
    pub length: u64,
    pub alleles: Vec<GtAllele>,
    pub phase: bool,
}

/// Lazy view over one variant's packed genotypes.
///
/// The view exposes storage order. When a permutation is attached, the
/// sample at storage rank `i` is the original sample `ppa[i]`; the PPA is
/// valid for storage order only and is never applied to n-ploid payloads,
/// whose runs are stored in original sample order.
#[derive(Debug, Clone, Copy)]
pub struct GtView<'a> {
    pub method: GtMethod,
    /// RLE word width in bytes
    pub width: usize,
    /// Bits per allele field
    pub shift: u8,
    /// 1 when a per-run phase bit is present
    pub add: u8,
    /// Phase applied to every sample when no per-run bit is stored
    pub global_phase: bool,
    pub ploidy: u8,
    pub n_samples: u64,
    pub n_runs: u64,
    /// Packed words of this variant only
    pub data: &'a [u8],
    /// Storage rank -> original sample index
    pub ppa: Option<&'a [u32]>,
}

impl<'a> GtView<'a> {
    /// Iterate over runs lazily; materialization is the caller's choice
    pub fn iter_runs(&self) -> GtRunIter<'a> {
        GtRunIter {
            view: *self,
            cursor: 0,
            runs_left: self.n_runs,
        }
    }

    /// Expand to one `(alleles, phase)` tuple per sample, indexed by
    /// original sample order
    pub fn materialize(&self) -> Result<Vec<(Vec<GtAllele>, bool)>, GenotypeError> {
        let n = self.n_samples as usize;
        let mut out = vec![(Vec::new(), false); n];
        let mut rank = 0usize;
        for run in self.iter_runs() {
            let run = run?;
            for _ in 0..run.length {
                if rank >= n {
                    return Err(GenotypeError::RunSumMismatch {
                        expected: self.n_samples,
                        found: rank as u64 + 1,
                    });
                }
                let sample = self.original_index(rank);
                out[sample] = (run.alleles.clone(), run.phase);
                rank += 1;
            }
        }
        if rank as u64 != self.n_samples {
            return Err(GenotypeError::RunSumMismatch {
                expected: self.n_samples,
                found: rank as u64,
            });
        }
        Ok(out)
    }

    /// Genotype of one sample by original index
    pub fn materialize_sample(
        &self,
        sample: usize,
    ) -> Result<(Vec<GtAllele>, bool), GenotypeError> {
        let target = self.storage_rank(sample) as u64;
        let mut consumed = 0u64;
        for run in self.iter_runs() {
            let run = run?;
            if target < consumed + run.length {
                return Ok((run.alleles, run.phase));
            }
            consumed += run.length;
        }
        Err(GenotypeError::RunSumMismatch {
            expected: self.n_samples,
            found: consumed,
        })
    }

    fn original_index(&self, rank: usize) -> usize {
        match (self.method, self.ppa) {
            (GtMethod::NploidRle, _) | (_, None) => rank,
            (_, Some(ppa)) => ppa[rank] as usize,
        }
    }

    fn storage_rank(&self, sample: usize) -> usize {
        match (self.method, self.ppa) {
            (GtMethod::NploidRle, _) | (_, None) => sample,
            (_, Some(ppa)) => ppa
                .iter()
                .position(|original| *original as usize == sample)
                .unwrap_or(sample),
        }
    }
}

/// Iterator over the runs of one packed genotype payload
#[derive(Debug)]
pub struct GtRunIter<'a> {
    view: GtView<'a>,
    cursor: usize,
    runs_left: u64,
}

impl<'a> GtRunIter<'a> {
    fn read_word(&mut self) -> Result<u64, GenotypeError> {
        let width = self.view.width;
        if self.cursor + width > self.view.data.len() {
            return Err(GenotypeError::Truncated);
        }
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&self.view.data[self.cursor..self.cursor + width]);
        self.cursor += width;
        Ok(u64::from_le_bytes(buf))
    }

    fn next_run(&mut self) -> Result<GtRun, GenotypeError> {
        let shift = self.view.shift;
        let add = self.view.add;
        let mask = (1u64 << shift) - 1;
        match self.view.method {
            GtMethod::DiploidRleBiallelic => {
                let word = self.read_word()?;
                let length = word >> (2 * shift + add);
                let a = word >> (shift + add) & mask;
                let b = word >> add & mask;
                let phase = if add == 1 {
                    word & 1 != 0
                } else {
                    self.view.global_phase
                };
                Ok(GtRun {
                    length,
                    alleles: vec![biallelic_allele(a), biallelic_allele(b)],
                    phase,
                })
            }
            GtMethod::DiploidRleNallelic => {
                let word = self.read_word()?;
                let length = word >> (2 * shift + add);
                let a = word >> (shift + add) & mask;
                let b = word >> add & mask;
                let phase = if add == 1 {
                    word & 1 != 0
                } else {
                    self.view.global_phase
                };
                Ok(GtRun {
                    length,
                    alleles: vec![GtAllele::from_symbol(a), GtAllele::from_symbol(b)],
                    phase,
                })
            }
            GtMethod::DiploidBcf => {
                // One word per sample: | allele_b | allele_a | phase |
                let word = self.read_word()?;
                let a = word >> 1 & mask;
                let b = word >> (shift + 1) & mask;
                Ok(GtRun {
                    length: 1,
                    alleles: vec![GtAllele::from_symbol(a), GtAllele::from_symbol(b)],
                    phase: word & 1 != 0,
                })
            }
            GtMethod::NploidRle => {
                let length = self.read_word()?;
                let m = self.view.ploidy as usize;
                if self.cursor + m > self.view.data.len() {
                    return Err(GenotypeError::Truncated);
                }
                let alleles = self.view.data[self.cursor..self.cursor + m]
                    .iter()
                    .map(|symbol| GtAllele::from_symbol(u64::from(*symbol)))
                    .collect();
                self.cursor += m;
                Ok(GtRun {
                    length,
                    alleles,
                    phase: self.view.global_phase,
                })
            }
            GtMethod::None => Err(GenotypeError::UnknownMethod(0)),
        }
    }
}

impl<'a> Iterator for GtRunIter<'a> {
    type Item = Result<GtRun, GenotypeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.runs_left == 0 {
            return None;
        }
        self.runs_left -= 1;
        Some(self.next_run())
    }
}

fn biallelic_allele(symbol: u64) -> GtAllele {
    match symbol {
        0 => GtAllele::Allele(0),
        1 => GtAllele::Allele(1),
        _ => GtAllele::Missing,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        genotype::{bcf_layout, biallelic_shift, nallelic_shift, GenotypeEncoder},
        record::{GenotypeMatrix, GtAllele::*},
    };

    fn diploid(pairs: &[(GtAllele, GtAllele)], phased: &[bool]) -> GenotypeMatrix {
        let mut alleles = Vec::new();
        for (a, b) in pairs {
            alleles.push(*a);
            alleles.push(*b);
        }
        GenotypeMatrix::new(2, phased.to_vec(), alleles)
    }

    fn view_for<'a>(
        encoded: &'a crate::genotype::EncodedGenotypes,
        gt: &GenotypeMatrix,
        n_alleles: u16,
        ppa: Option<&'a [u32]>,
    ) -> GtView<'a> {
        let shift = match encoded.method {
            GtMethod::DiploidRleBiallelic => biallelic_shift(encoded.has_missing),
            GtMethod::DiploidBcf => bcf_layout(n_alleles).0,
            _ => nallelic_shift(n_alleles, encoded.has_missing, false),
        };
        GtView {
            method: encoded.method,
            width: 1 << encoded.width_log2,
            shift,
            add: u8::from(encoded.mixed_phasing),
            global_phase: encoded.global_phase,
            ploidy: gt.ploidy,
            n_samples: gt.n_samples() as u64,
            n_runs: encoded.n_runs,
            data: &encoded.payload,
            ppa,
        }
    }

    #[test]
    fn biallelic_round_trip_through_permutation() -> anyhow::Result<()> {
        // 0|0, 0|1, 1|1, .|. permuted to [0, 2, 1, 3]
        let gt = diploid(
            &[
                (Allele(0), Allele(0)),
                (Allele(0), Allele(1)),
                (Allele(1), Allele(1)),
                (Missing, Missing),
            ],
            &[true; 4],
        );
        let ppa = [0u32, 2, 1, 3];
        let mut encoder = GenotypeEncoder::new(4);
        let encoded = encoder.encode(&gt, 2, &ppa)?;

        let view = view_for(&encoded, &gt, 2, Some(&ppa));
        let lengths: Vec<u64> = view
            .iter_runs()
            .map(|run| run.map(|r| r.length))
            .collect::<Result<_, _>>()?;
        assert_eq!(lengths.iter().sum::<u64>(), 4);

        // Applying the inverse permutation restores original sample order
        let materialized = view.materialize()?;
        for sample in 0..4 {
            let (alleles, phase) = &materialized[sample];
            assert_eq!(alleles.as_slice(), gt.sample(sample));
            assert!(*phase);
        }
        Ok(())
    }

    #[test]
    fn nallelic_round_trip_recovers_alphabet() -> anyhow::Result<()> {
        let gt = diploid(
            &[
                (Allele(0), Allele(1)),
                (Allele(1), Allele(2)),
                (Allele(0), Allele(2)),
                (Missing, Allele(2)),
                (Allele(2), Allele(2)),
            ],
            &[false; 5],
        );
        let ppa: Vec<u32> = (0..5).collect();
        let mut encoder = GenotypeEncoder::new(5);
        let encoded = encoder.encode(&gt, 3, &ppa)?;
        assert_eq!(encoded.method, GtMethod::DiploidRleNallelic);

        let view = view_for(&encoded, &gt, 3, Some(&ppa));
        let materialized = view.materialize()?;
        for sample in 0..5 {
            assert_eq!(materialized[sample].0.as_slice(), gt.sample(sample));
        }
        Ok(())
    }

    #[test]
    fn mixed_phasing_keeps_per_sample_phase() -> anyhow::Result<()> {
        let gt = diploid(
            &[
                (Allele(0), Allele(1)),
                (Allele(0), Allele(1)),
                (Allele(0), Allele(1)),
            ],
            &[true, false, true],
        );
        let ppa: Vec<u32> = (0..3).collect();
        let mut encoder = GenotypeEncoder::new(3);
        let encoded = encoder.encode(&gt, 2, &ppa)?;
        assert!(encoded.mixed_phasing);

        let view = view_for(&encoded, &gt, 2, Some(&ppa));
        let materialized = view.materialize()?;
        assert_eq!(materialized[0].1, true);
        assert_eq!(materialized[1].1, false);
        assert_eq!(materialized[2].1, true);
        Ok(())
    }

    #[test]
    fn nploid_round_trip_with_eov() -> anyhow::Result<()> {
        // Haploid calls padded to ploidy 2 with EOV in the second slot
        let gt = diploid(
            &[(Allele(0), Eov), (Allele(1), Eov), (Missing, Eov)],
            &[false; 3],
        );
        let ppa: Vec<u32> = (0..3).collect();
        let mut encoder = GenotypeEncoder::new(3);
        let encoded = encoder.encode(&gt, 2, &ppa)?;
        assert_eq!(encoded.method, GtMethod::NploidRle);

        let view = view_for(&encoded, &gt, 2, Some(&ppa));
        let materialized = view.materialize()?;
        for sample in 0..3 {
            assert_eq!(materialized[sample].0.as_slice(), gt.sample(sample));
            assert_eq!(materialized[sample].0[1], Eov);
        }
        Ok(())
    }

    #[test]
    fn bcf_style_words_decode() -> Result<(), GenotypeError> {
        // Hand-packed BCF-style payload: two samples of | b | a | phase | at
        // 3-bit fields. Symbols: (REF, ALT1) phased and (ALT1, ALT1)
        // unphased.
        let word_a: u8 = 3 << 4 | 2 << 1 | 1;
        let word_b: u8 = 3 << 4 | 3 << 1;
        let payload = [word_a, word_b];
        let view = GtView {
            method: GtMethod::DiploidBcf,
            width: 1,
            shift: 3,
            add: 0,
            global_phase: false,
            ploidy: 2,
            n_samples: 2,
            n_runs: 2,
            data: &payload,
            ppa: None,
        };
        let materialized = view.materialize()?;
        assert_eq!(materialized[0].0, vec![Allele(0), Allele(1)]);
        assert!(materialized[0].1);
        assert_eq!(materialized[1].0, vec![Allele(1), Allele(1)]);
        assert!(!materialized[1].1);
        Ok(())
    }

    #[test]
    fn sample_lookup_matches_full_materialization() -> anyhow::Result<()> {
        let gt = diploid(
            &[
                (Allele(1), Allele(1)),
                (Allele(0), Allele(0)),
                (Allele(0), Allele(1)),
            ],
            &[true; 3],
        );
        let ppa = [1u32, 2, 0];
        let mut encoder = GenotypeEncoder::new(3);
        let encoded = encoder.encode(&gt, 2, &ppa)?;
        let view = view_for(&encoded, &gt, 2, Some(&ppa));
        let all = view.materialize()?;
        for sample in 0..3 {
            assert_eq!(view.materialize_sample(sample)?, all[sample]);
        }
        Ok(())
    }

    #[test]
    fn truncated_payload_is_detected() {
        let view = GtView {
            method: GtMethod::DiploidRleBiallelic,
            width: 2,
            shift: 1,
            add: 0,
            global_phase: false,
            ploidy: 2,
            n_samples: 4,
            n_runs: 2,
            data: &[0xff],
            ppa: None,
        };
        let err = view.materialize().unwrap_err();
        assert!(matches!(err, GenotypeError::Truncated));
    }
}
