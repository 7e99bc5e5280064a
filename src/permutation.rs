//! Sample permutation. A per-block radix sort over diploid biallelic
//! genotypes reorders samples so identical genotypes cluster, turning long
//! haplotype runs into cheap RLE words. The resulting permutation array
//! (PPA) maps storage rank to original sample index and ships in its own
//! block stream.

use crate::record::{GenotypeMatrix, GtAllele};

/// Number of radix states: two alleles over {ref, alt, missing}
const N_BINS: usize = 9;

/// Bin order for the packed two-allele code. Codes are laid out so that
/// identical genotypes cluster and adjacent bins differ by a single bit:
/// 0/0, 1/1, 1/0, 0/1, 0/., 1/., ./0, ./1, ./.
fn radix_bin(packed: u8) -> usize {
    match packed {
        0 => 0,
        5 => 1,
        4 => 2,
        1 => 3,
        2 => 4,
        6 => 5,
        8 => 6,
        9 => 7,
        10 => 8,
        _ => unreachable!("two 2-bit allele codes"),
    }
}

/// Two-bit code of one allele in the radix alphabet
fn radix_code(allele: GtAllele) -> u8 {
    match allele {
        GtAllele::Allele(0) => 0,
        GtAllele::Allele(_) => 1,
        GtAllele::Missing => 2,
        GtAllele::Eov => unreachable!("EOV sites do not qualify for the radix"),
    }
}

/// Builds and owns the per-block sample permutation
#[derive(Debug, Clone)]
pub struct PermutationManager {
    n_samples: u32,
    /// Storage rank -> original sample index
    ppa: Vec<u32>,
    /// Per-bin scratch, reused across records
    bins: Vec<Vec<u32>>,
    /// Number of records folded into the permutation so far
    n_updates: u64,
}

impl PermutationManager {
    pub fn new(n_samples: u32) -> Self {
        Self {
            n_samples,
            ppa: (0..n_samples).collect(),
            bins: vec![Vec::with_capacity(n_samples as usize); N_BINS],
            n_updates: 0,
        }
    }

    pub fn n_samples(&self) -> u32 {
        self.n_samples
    }

    /// Number of records that qualified and reordered the permutation
    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    pub fn ppa(&self) -> &[u32] {
        &self.ppa
    }

    /// Restart from the identity permutation for the next block
    pub fn reset(&mut self) {
        self.ppa.clear();
        self.ppa.extend(0..self.n_samples);
        self.n_updates = 0;
    }

    /// True when a record participates in the radix: diploid, biallelic,
    /// and free of end-of-vector padding
    pub fn qualifies(gt: &GenotypeMatrix, n_alleles: u16) -> bool {
        gt.ploidy == 2 && n_alleles == 2 && !gt.has_eov()
    }

    /// Fold one qualifying record into the permutation. Phasing is ignored
    /// at this stage. Non-qualifying records must be skipped by the caller
    /// and leave the order untouched.
    pub fn update(&mut self, gt: &GenotypeMatrix) {
        debug_assert_eq!(gt.n_samples() as u32, self.n_samples);

        // Stable pass: place each sample, in current storage order, into
        // the bin of its packed genotype
        for rank in 0..self.n_samples as usize {
            let sample = self.ppa[rank] as usize;
            let (a, b) = gt.diploid(sample);
            let packed = radix_code(a) << 2 | radix_code(b);
            self.bins[radix_bin(packed)].push(sample as u32);
        }

        // Concatenate bins back into the permutation
        let mut cursor = 0;
        for bin in &mut self.bins {
            self.ppa[cursor..cursor + bin.len()].copy_from_slice(bin);
            cursor += bin.len();
            bin.clear();
        }
        debug_assert_eq!(cursor, self.n_samples as usize);

        self.n_updates += 1;
    }

    /// PPA as little-endian bytes for the block's permutation stream
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.ppa.len() * 4);
        for rank in &self.ppa {
            bytes.extend_from_slice(&rank.to_le_bytes());
        }
        bytes
    }

    /// Rebuild a permutation from its stream bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let ppa: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self {
            n_samples: ppa.len() as u32,
            ppa,
            bins: vec![Vec::new(); N_BINS],
            n_updates: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{GenotypeMatrix, GtAllele::*};

    fn diploid(pairs: &[(crate::record::GtAllele, crate::record::GtAllele)]) -> GenotypeMatrix {
        let mut alleles = Vec::new();
        for (a, b) in pairs {
            alleles.push(*a);
            alleles.push(*b);
        }
        GenotypeMatrix::new(2, vec![true; pairs.len()], alleles)
    }

    #[test]
    fn radix_orders_identical_genotypes_together() {
        // Samples: 0|0, 0|1, 1|1, .|.
        let gt = diploid(&[
            (Allele(0), Allele(0)),
            (Allele(0), Allele(1)),
            (Allele(1), Allele(1)),
            (Missing, Missing),
        ]);
        let mut manager = PermutationManager::new(4);
        assert!(PermutationManager::qualifies(&gt, 2));
        manager.update(&gt);
        // Bin order: 0/0 first, then 1/1, then 0/1, then ./.
        assert_eq!(manager.ppa(), &[0, 2, 1, 3]);
        assert_eq!(manager.n_updates(), 1);
    }

    #[test]
    fn repeated_updates_cluster_shared_haplotypes() {
        // Two records; samples 0 and 3 share genotypes at both sites
        let first = diploid(&[
            (Allele(0), Allele(0)),
            (Allele(1), Allele(1)),
            (Allele(0), Allele(1)),
            (Allele(0), Allele(0)),
        ]);
        let second = diploid(&[
            (Allele(0), Allele(0)),
            (Allele(0), Allele(0)),
            (Allele(1), Allele(1)),
            (Allele(0), Allele(0)),
        ]);
        let mut manager = PermutationManager::new(4);
        manager.update(&first);
        manager.update(&second);
        let ppa = manager.ppa();
        let pos_of = |sample: u32| ppa.iter().position(|s| *s == sample).unwrap();
        // Samples 0 and 3 end up adjacent
        assert_eq!((pos_of(0) as i64 - pos_of(3) as i64).abs(), 1);
    }

    #[test]
    fn eov_sites_do_not_qualify() {
        let gt = diploid(&[(Allele(0), Eov), (Allele(1), Eov)]);
        assert!(!PermutationManager::qualifies(&gt, 2));
        let triallelic = diploid(&[(Allele(0), Allele(2)), (Allele(1), Allele(1))]);
        assert!(!PermutationManager::qualifies(&triallelic, 3));
    }

    #[test]
    fn bytes_round_trip() {
        let mut manager = PermutationManager::new(8);
        let gt = diploid(&[
            (Allele(1), Allele(1)),
            (Allele(0), Allele(0)),
            (Allele(1), Allele(1)),
            (Allele(0), Allele(0)),
            (Allele(0), Allele(1)),
            (Allele(0), Allele(0)),
            (Missing, Missing),
            (Allele(1), Allele(1)),
        ]);
        manager.update(&gt);
        let restored = PermutationManager::from_bytes(&manager.to_bytes());
        assert_eq!(restored.ppa(), manager.ppa());
    }
}
