//! The default pool set and flux-indicator configuration.
//!
//! Pool names and ordering follow the CBM-CFS3 convention: softwood and
//! hardwood biomass components, the dead-organic-matter pools, the
//! atmospheric sinks and the harvested-product sink, with the reserved
//! constant-1.0 Input pool first.

use taiga_core::errors::CoreResult;
use taiga_core::pools::{FluxIndicatorDefinition, Pools, INPUT_POOL};

/// Op process ids used for flux attribution.
pub mod process {
    /// Growth, turnover and overmature decline.
    pub const GROWTH: u16 = 1;
    /// DOM decay and slow mixing.
    pub const DECAY: u16 = 2;
    /// Disturbance events.
    pub const DISTURBANCE: u16 = 3;
}

/// The default pool names, in id order.
pub const DEFAULT_POOLS: [&str; 27] = [
    INPUT_POOL,
    "SoftwoodMerch",
    "SoftwoodFoliage",
    "SoftwoodOther",
    "SoftwoodCoarseRoots",
    "SoftwoodFineRoots",
    "HardwoodMerch",
    "HardwoodFoliage",
    "HardwoodOther",
    "HardwoodCoarseRoots",
    "HardwoodFineRoots",
    "AboveGroundVeryFastSoil",
    "BelowGroundVeryFastSoil",
    "AboveGroundFastSoil",
    "BelowGroundFastSoil",
    "MediumSoil",
    "AboveGroundSlowSoil",
    "BelowGroundSlowSoil",
    "SoftwoodStemSnag",
    "SoftwoodBranchSnag",
    "HardwoodStemSnag",
    "HardwoodBranchSnag",
    "CO2",
    "CH4",
    "CO",
    "NO2",
    "Products",
];

pub fn default_pools() -> CoreResult<Pools> {
    Pools::from_names(DEFAULT_POOLS)
}

/// Resolved indices of the default pools, looked up once at model
/// initialization so the assembly layer never hashes names in a loop.
#[derive(Debug, Clone)]
pub struct PoolIdx {
    pub input: usize,
    pub sw_merch: usize,
    pub sw_foliage: usize,
    pub sw_other: usize,
    pub sw_coarse: usize,
    pub sw_fine: usize,
    pub hw_merch: usize,
    pub hw_foliage: usize,
    pub hw_other: usize,
    pub hw_coarse: usize,
    pub hw_fine: usize,
    pub ag_very_fast: usize,
    pub bg_very_fast: usize,
    pub ag_fast: usize,
    pub bg_fast: usize,
    pub medium: usize,
    pub ag_slow: usize,
    pub bg_slow: usize,
    pub sw_stem_snag: usize,
    pub sw_branch_snag: usize,
    pub hw_stem_snag: usize,
    pub hw_branch_snag: usize,
    pub co2: usize,
    pub ch4: usize,
    pub co: usize,
    pub no2: usize,
    pub products: usize,
}

impl PoolIdx {
    pub fn resolve(pools: &Pools) -> CoreResult<Self> {
        Ok(Self {
            input: pools.input_index(),
            sw_merch: pools.index_of("SoftwoodMerch")?,
            sw_foliage: pools.index_of("SoftwoodFoliage")?,
            sw_other: pools.index_of("SoftwoodOther")?,
            sw_coarse: pools.index_of("SoftwoodCoarseRoots")?,
            sw_fine: pools.index_of("SoftwoodFineRoots")?,
            hw_merch: pools.index_of("HardwoodMerch")?,
            hw_foliage: pools.index_of("HardwoodFoliage")?,
            hw_other: pools.index_of("HardwoodOther")?,
            hw_coarse: pools.index_of("HardwoodCoarseRoots")?,
            hw_fine: pools.index_of("HardwoodFineRoots")?,
            ag_very_fast: pools.index_of("AboveGroundVeryFastSoil")?,
            bg_very_fast: pools.index_of("BelowGroundVeryFastSoil")?,
            ag_fast: pools.index_of("AboveGroundFastSoil")?,
            bg_fast: pools.index_of("BelowGroundFastSoil")?,
            medium: pools.index_of("MediumSoil")?,
            ag_slow: pools.index_of("AboveGroundSlowSoil")?,
            bg_slow: pools.index_of("BelowGroundSlowSoil")?,
            sw_stem_snag: pools.index_of("SoftwoodStemSnag")?,
            sw_branch_snag: pools.index_of("SoftwoodBranchSnag")?,
            hw_stem_snag: pools.index_of("HardwoodStemSnag")?,
            hw_branch_snag: pools.index_of("HardwoodBranchSnag")?,
            co2: pools.index_of("CO2")?,
            ch4: pools.index_of("CH4")?,
            co: pools.index_of("CO")?,
            no2: pools.index_of("NO2")?,
            products: pools.index_of("Products")?,
        })
    }

    /// Live biomass pools, softwood then hardwood.
    pub fn biomass(&self) -> [usize; 10] {
        [
            self.sw_merch,
            self.sw_foliage,
            self.sw_other,
            self.sw_coarse,
            self.sw_fine,
            self.hw_merch,
            self.hw_foliage,
            self.hw_other,
            self.hw_coarse,
            self.hw_fine,
        ]
    }

    /// Dead organic matter pools, soil then snags.
    pub fn dom(&self) -> [usize; 11] {
        [
            self.ag_very_fast,
            self.bg_very_fast,
            self.ag_fast,
            self.bg_fast,
            self.medium,
            self.ag_slow,
            self.bg_slow,
            self.sw_stem_snag,
            self.sw_branch_snag,
            self.hw_stem_snag,
            self.hw_branch_snag,
        ]
    }

    pub fn atmosphere(&self) -> [usize; 4] {
        [self.co2, self.ch4, self.co, self.no2]
    }
}

fn bio_dom() -> Vec<&'static str> {
    let mut pools = vec![
        "SoftwoodMerch",
        "SoftwoodFoliage",
        "SoftwoodOther",
        "SoftwoodCoarseRoots",
        "SoftwoodFineRoots",
        "HardwoodMerch",
        "HardwoodFoliage",
        "HardwoodOther",
        "HardwoodCoarseRoots",
        "HardwoodFineRoots",
    ];
    pools.extend(DOM_POOLS);
    pools
}

const DOM_POOLS: [&str; 11] = [
    "AboveGroundVeryFastSoil",
    "BelowGroundVeryFastSoil",
    "AboveGroundFastSoil",
    "BelowGroundFastSoil",
    "MediumSoil",
    "AboveGroundSlowSoil",
    "BelowGroundSlowSoil",
    "SoftwoodStemSnag",
    "SoftwoodBranchSnag",
    "HardwoodStemSnag",
    "HardwoodBranchSnag",
];

/// The default flux indicator configuration.
///
/// Growth indicators capture Input-sourced biomass production, turnover
/// indicators capture litterfall into DOM, and the disturbance indicators
/// break production and emissions out the way the CBM-CFS3 flux tables do.
pub fn default_flux_indicators() -> Vec<FluxIndicatorDefinition> {
    vec![
        FluxIndicatorDefinition::new(
            "DeltaBiomassAG",
            process::GROWTH,
            vec![INPUT_POOL],
            vec![
                "SoftwoodMerch",
                "SoftwoodFoliage",
                "SoftwoodOther",
                "HardwoodMerch",
                "HardwoodFoliage",
                "HardwoodOther",
            ],
        ),
        FluxIndicatorDefinition::new(
            "DeltaBiomassBG",
            process::GROWTH,
            vec![INPUT_POOL],
            vec![
                "SoftwoodCoarseRoots",
                "SoftwoodFineRoots",
                "HardwoodCoarseRoots",
                "HardwoodFineRoots",
            ],
        ),
        FluxIndicatorDefinition::new(
            "TurnoverMerchLitterInput",
            process::GROWTH,
            vec!["SoftwoodMerch", "HardwoodMerch"],
            vec!["SoftwoodStemSnag", "HardwoodStemSnag"],
        ),
        FluxIndicatorDefinition::new(
            "TurnoverFolLitterInput",
            process::GROWTH,
            vec!["SoftwoodFoliage", "HardwoodFoliage"],
            vec!["AboveGroundVeryFastSoil"],
        ),
        FluxIndicatorDefinition::new(
            "TurnoverOthLitterInput",
            process::GROWTH,
            vec!["SoftwoodOther", "HardwoodOther"],
            vec![
                "SoftwoodBranchSnag",
                "HardwoodBranchSnag",
                "AboveGroundFastSoil",
            ],
        ),
        FluxIndicatorDefinition::new(
            "TurnoverCoarseLitterInput",
            process::GROWTH,
            vec!["SoftwoodCoarseRoots", "HardwoodCoarseRoots"],
            vec!["AboveGroundFastSoil", "BelowGroundFastSoil"],
        ),
        FluxIndicatorDefinition::new(
            "TurnoverFineLitterInput",
            process::GROWTH,
            vec!["SoftwoodFineRoots", "HardwoodFineRoots"],
            vec!["AboveGroundVeryFastSoil", "BelowGroundVeryFastSoil"],
        ),
        FluxIndicatorDefinition::new(
            "DecayDOMCO2Emission",
            process::DECAY,
            DOM_POOLS.to_vec(),
            vec!["CO2"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceCO2Production",
            process::DISTURBANCE,
            bio_dom(),
            vec!["CO2"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceCH4Production",
            process::DISTURBANCE,
            bio_dom(),
            vec!["CH4"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceCOProduction",
            process::DISTURBANCE,
            bio_dom(),
            vec!["CO"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceSoftProduction",
            process::DISTURBANCE,
            vec![
                "SoftwoodMerch",
                "SoftwoodFoliage",
                "SoftwoodOther",
                "SoftwoodCoarseRoots",
                "SoftwoodFineRoots",
            ],
            vec!["Products"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceHardProduction",
            process::DISTURBANCE,
            vec![
                "HardwoodMerch",
                "HardwoodFoliage",
                "HardwoodOther",
                "HardwoodCoarseRoots",
                "HardwoodFineRoots",
            ],
            vec!["Products"],
        ),
        FluxIndicatorDefinition::new(
            "DisturbanceDOMProduction",
            process::DISTURBANCE,
            DOM_POOLS.to_vec(),
            vec!["Products"],
        ),
    ]
}
