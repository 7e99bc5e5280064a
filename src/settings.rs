//! Block load settings and the read-time load planner. Planning intersects
//! the caller's field selections with a block footer's local dictionaries;
//! it never modifies the block.

use crate::{
    block::{footer::VariantBlockFooter, header::VariantBlockHeader},
    constants::fixed_stream,
    header::VariantHeader,
};

/// What to materialize when reading a block
#[derive(Debug, Clone)]
pub struct BlockSettings {
    /// Core site streams: contig, position, alleles, quality, names,
    /// controller, pattern ids
    pub load_core: bool,
    pub load_all_info: bool,
    pub load_all_format: bool,
    pub load_genotypes: bool,
    pub load_permutation: bool,
    /// Global INFO ids requested explicitly
    pub info_ids: Vec<u32>,
    /// Global FORMAT ids requested explicitly
    pub format_ids: Vec<u32>,
    /// INFO field names resolved through the global header at plan time
    pub info_names: Vec<String>,
    /// FORMAT field names resolved through the global header at plan time
    pub format_names: Vec<String>,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSettings {
    /// Load everything
    pub fn new() -> Self {
        Self {
            load_core: true,
            load_all_info: true,
            load_all_format: true,
            load_genotypes: true,
            load_permutation: true,
            info_ids: Vec::new(),
            format_ids: Vec::new(),
            info_names: Vec::new(),
            format_names: Vec::new(),
        }
    }

    /// Load only what is needed to locate variants: contig, position and
    /// controller streams
    pub fn minimum() -> Self {
        Self {
            load_core: false,
            load_all_info: false,
            load_all_format: false,
            load_genotypes: false,
            load_permutation: false,
            info_ids: Vec::new(),
            format_ids: Vec::new(),
            info_names: Vec::new(),
            format_names: Vec::new(),
        }
    }

    pub fn with_genotypes(mut self, yes: bool) -> Self {
        self.load_genotypes = yes;
        if !yes {
            self.load_permutation = false;
        }
        self
    }

    pub fn with_all_info(mut self, yes: bool) -> Self {
        self.load_all_info = yes;
        self
    }

    pub fn with_all_format(mut self, yes: bool) -> Self {
        self.load_all_format = yes;
        self
    }

    /// Request one INFO field by global id
    pub fn with_info_id(mut self, global_id: u32) -> Self {
        self.load_all_info = false;
        self.info_ids.push(global_id);
        self
    }

    /// Request one INFO field by name
    pub fn with_info_name(mut self, name: &str) -> Self {
        self.load_all_info = false;
        self.info_names.push(name.to_string());
        self
    }

    pub fn with_format_id(mut self, global_id: u32) -> Self {
        self.load_all_format = false;
        self.format_ids.push(global_id);
        self
    }

    pub fn with_format_name(mut self, name: &str) -> Self {
        self.load_all_format = false;
        self.format_names.push(name.to_string());
        self
    }
}

/// Concrete per-block load plan: which fixed streams to materialize and
/// which local INFO/FORMAT streams the selections intersect
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    pub base: [bool; fixed_stream::N_FIXED],
    /// Local INFO stream indices to load, ascending by global id
    pub info_local: Vec<u32>,
    /// Local FORMAT stream indices to load, ascending by global id
    pub format_local: Vec<u32>,
    /// For each INFO pattern of the block, the loaded local ids within it
    pub info_patterns_local: Vec<Vec<u32>>,
    /// For each FORMAT pattern of the block, the loaded local ids within it
    pub format_patterns_local: Vec<Vec<u32>>,
}

impl BlockSettings {
    /// Intersect these settings with one block's dictionaries
    pub fn build_plan(
        &self,
        header: &VariantHeader,
        block_header: &VariantBlockHeader,
        footer: &VariantBlockFooter,
    ) -> LoadPlan {
        let mut plan = LoadPlan::default();

        // Locating variants always needs these three
        plan.base[fixed_stream::CONTIG] = true;
        plan.base[fixed_stream::POSITION] = true;
        plan.base[fixed_stream::CONTROLLER] = true;

        if self.load_core {
            plan.base[fixed_stream::REFALT] = true;
            plan.base[fixed_stream::QUALITY] = true;
            plan.base[fixed_stream::NAMES] = true;
            plan.base[fixed_stream::ALLELES] = true;
            plan.base[fixed_stream::ID_FILTER] = true;
            plan.base[fixed_stream::ID_FORMAT] = true;
            plan.base[fixed_stream::ID_INFO] = true;
        }

        if self.load_genotypes && block_header.has_gt() {
            plan.base[fixed_stream::GT_SUPPORT] = true;
            plan.base[fixed_stream::GT_PLOIDY] = true;
            for slot in fixed_stream::GT_INT8..=fixed_stream::GT_N_INT64 {
                plan.base[slot] = true;
            }
            // Unpacking n-allelic genotype words needs each site's allele
            // count, so the allele streams ride along even without the core
            plan.base[fixed_stream::REFALT] = true;
            plan.base[fixed_stream::ALLELES] = true;
            if self.load_permutation && block_header.has_gt_permuted() {
                plan.base[fixed_stream::PPA] = true;
            }
        }

        // Resolve requested INFO fields to local stream indices
        let mut info_globals: Vec<u32> = if self.load_all_info {
            footer
                .info_offsets
                .iter()
                .filter_map(|offset| u32::try_from(offset.data.global_key).ok())
                .collect()
        } else {
            let mut globals = self.info_ids.clone();
            for name in &self.info_names {
                if let Some(field) = header.info(name) {
                    globals.push(field.idx);
                }
            }
            globals
        };
        info_globals.sort_unstable();
        info_globals.dedup();
        for global in info_globals {
            if let Some(local) = footer.info_local(global as i32) {
                plan.info_local.push(local);
            }
        }

        let mut format_globals: Vec<u32> = if self.load_all_format {
            footer
                .format_offsets
                .iter()
                .filter_map(|offset| u32::try_from(offset.data.global_key).ok())
                .collect()
        } else {
            let mut globals = self.format_ids.clone();
            for name in &self.format_names {
                if let Some(field) = header.format(name) {
                    globals.push(field.idx);
                }
            }
            globals
        };
        format_globals.sort_unstable();
        format_globals.dedup();
        for global in format_globals {
            if let Some(local) = footer.format_local(global as i32) {
                plan.format_local.push(local);
            }
        }

        if !plan.info_local.is_empty() {
            plan.base[fixed_stream::ID_INFO] = true;
        }
        if !plan.format_local.is_empty() {
            plan.base[fixed_stream::ID_FORMAT] = true;
        }

        // Project the loaded ids into every observed pattern so the record
        // assembler can map values back to per-variant columns
        for pattern in &footer.info_patterns {
            let loaded = plan
                .info_local
                .iter()
                .copied()
                .filter(|local| pattern.contains_local(*local))
                .collect();
            plan.info_patterns_local.push(loaded);
        }
        for pattern in &footer.format_patterns {
            let loaded = plan
                .format_local
                .iter()
                .copied()
                .filter(|local| pattern.contains_local(*local))
                .collect();
            plan.format_patterns_local.push(loaded);
        }

        plan
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::header::BlockFlags;

    fn fixture() -> (VariantHeader, VariantBlockHeader, VariantBlockFooter) {
        let mut header = VariantHeader::new();
        header.add_contig("chr1", 1000);
        header.add_info("AC");
        header.add_info("DP");
        header.add_info("MQ");
        header.add_format("GT");
        header.add_format("GQ");

        let mut block_header = VariantBlockHeader::default();
        block_header.controller = BlockFlags::HAS_GT | BlockFlags::HAS_GT_PERMUTED;

        // The block carries DP (global 1) and MQ (global 2), but not AC
        let mut footer = VariantBlockFooter::new();
        footer.add_info(2);
        footer.add_info(1);
        footer.add_format(0);
        footer.add_info_pattern(&[2, 1]);
        footer.add_info_pattern(&[1]);
        footer.add_format_pattern(&[0]);
        footer.finalize();
        (header, block_header, footer)
    }

    #[test]
    fn selections_intersect_block_dictionaries() {
        let (header, block_header, footer) = fixture();
        let settings = BlockSettings::minimum()
            .with_info_name("DP")
            .with_info_name("AC");
        let plan = settings.build_plan(&header, &block_header, &footer);
        // AC is absent from the block; DP resolves to local stream 1
        assert_eq!(plan.info_local, vec![1]);
        // Both patterns contain DP
        assert_eq!(plan.info_patterns_local, vec![vec![1], vec![1]]);
        assert!(plan.base[fixed_stream::ID_INFO]);
        assert!(!plan.base[fixed_stream::GT_SUPPORT]);
    }

    #[test]
    fn all_info_loads_in_global_id_order() {
        let (header, block_header, footer) = fixture();
        let plan = BlockSettings::new().build_plan(&header, &block_header, &footer);
        // Globals 1 and 2 ascending map to locals 1 and 0
        assert_eq!(plan.info_local, vec![1, 0]);
        assert_eq!(plan.format_local, vec![0]);
        assert!(plan.base[fixed_stream::PPA]);
        assert!(plan.base[fixed_stream::GT_INT8]);
    }

    #[test]
    fn minimum_keeps_location_streams_only() {
        let (header, block_header, footer) = fixture();
        let plan = BlockSettings::minimum().build_plan(&header, &block_header, &footer);
        assert!(plan.base[fixed_stream::CONTIG]);
        assert!(plan.base[fixed_stream::POSITION]);
        assert!(plan.base[fixed_stream::CONTROLLER]);
        assert!(!plan.base[fixed_stream::QUALITY]);
        assert!(!plan.base[fixed_stream::REFALT]);
        assert!(plan.info_local.is_empty());
    }

    #[test]
    fn genotypes_pull_in_the_allele_streams() {
        let (header, block_header, footer) = fixture();
        let settings = BlockSettings::minimum().with_genotypes(true);
        let plan = settings.build_plan(&header, &block_header, &footer);
        assert!(plan.base[fixed_stream::GT_SUPPORT]);
        assert!(plan.base[fixed_stream::REFALT]);
        assert!(plan.base[fixed_stream::ALLELES]);
        assert!(!plan.base[fixed_stream::QUALITY]);
    }
}
