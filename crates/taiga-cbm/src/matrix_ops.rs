//! Matrix-op assembly.
//!
//! Builds the named operations the spinup and step drivers compose:
//! growth and overmature decline (per stand), biomass and snag turnover
//! (per spatial unit), DOM and slow decay (per stand, temperature driven),
//! slow mixing (broadcast) and disturbance (per disturbance matrix).
//! Operations whose matrices are stable across steps are cached and only
//! their stand selectors are recomputed.

use crate::growth::{prepare_growth_info, AgIncrements, GrowthInfo};
use crate::model::CbmModel;
use crate::parameters::{DecayParameter, ForestType};
use crate::pools::{process, PoolIdx};
use ndarray::ArrayView2;
use taiga_core::errors::CoreResult;
use taiga_core::matrix::MatrixBase;
use taiga_core::ops::{CoordColumn, Operation};
use taiga_core::opspec::{ColumnSource, OpSpec};
use taiga_core::storage::{Series, VariableTable};

/// Assembles and caches the named matrix operations.
pub struct MatrixOps<'m> {
    model: &'m CbmModel,
    biomass_turnover: Option<(OpSpec, VariableTable, Operation)>,
    snag_turnover: Option<(OpSpec, VariableTable, Operation)>,
    slow_mixing: Option<Operation>,
    disturbance: Option<Operation>,
}

impl<'m> MatrixOps<'m> {
    pub fn new(model: &'m CbmModel) -> Self {
        Self {
            model,
            biomass_turnover: None,
            snag_turnover: None,
            slow_mixing: None,
            disturbance: None,
        }
    }

    /// Growth and overmature decline for the current pools and increments.
    ///
    /// Both operations hold one matrix per stand: growth routes the gross
    /// additions out of Input, decline transfers negative net increments
    /// from biomass into snags and soil.
    pub fn growth_and_decline(
        &self,
        pools: ArrayView2<'_, f64>,
        spatial_unit: &[i32],
        species: &[i32],
        increments: &AgIncrements,
        multiplier: Option<&[f64]>,
        gate: Option<&[bool]>,
    ) -> CoreResult<(Operation, Operation)> {
        let info = prepare_growth_info(
            self.model,
            pools,
            spatial_unit,
            species,
            increments,
            multiplier,
            gate,
        )?;
        let growth = self.growth_op(&info)?;
        let decline = self.decline_op(&info)?;
        Ok((growth, decline))
    }

    fn split_by_side(info: &GrowthInfo, values: &[f64], softwood: bool) -> Vec<f64> {
        values
            .iter()
            .zip(&info.forest_type)
            .map(|(&v, &ft)| {
                if (ft == ForestType::Softwood) == softwood {
                    v
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn growth_op(&self, info: &GrowthInfo) -> CoreResult<Operation> {
        let idx = self.model.pool_idx();
        let n = info.merch_add.len();
        let mut columns = Vec::with_capacity(10);
        for (pool, values, softwood) in [
            (idx.sw_merch, &info.merch_add, true),
            (idx.sw_foliage, &info.foliage_add, true),
            (idx.sw_other, &info.other_add, true),
            (idx.sw_coarse, &info.coarse_add, true),
            (idx.sw_fine, &info.fine_add, true),
            (idx.hw_merch, &info.merch_add, false),
            (idx.hw_foliage, &info.foliage_add, false),
            (idx.hw_other, &info.other_add, false),
            (idx.hw_coarse, &info.coarse_add, false),
            (idx.hw_fine, &info.fine_add, false),
        ] {
            columns.push(CoordColumn::per_matrix(
                idx.input,
                pool,
                Self::split_by_side(info, values, softwood),
            ));
        }
        Operation::from_coordinates(
            self.model.definition().n_pools(),
            MatrixBase::Identity,
            &columns,
            (0..n as u32).collect(),
            process::GROWTH,
            Some(idx.input),
        )
    }

    fn decline_op(&self, info: &GrowthInfo) -> CoreResult<Operation> {
        let idx = self.model.pool_idx();
        let n = info.merch_add.len();
        let mut columns = Vec::with_capacity(26);
        for softwood in [true, false] {
            let (merch, foliage, other, coarse, fine, stem_snag, branch_snag) = if softwood {
                (
                    idx.sw_merch,
                    idx.sw_foliage,
                    idx.sw_other,
                    idx.sw_coarse,
                    idx.sw_fine,
                    idx.sw_stem_snag,
                    idx.sw_branch_snag,
                )
            } else {
                (
                    idx.hw_merch,
                    idx.hw_foliage,
                    idx.hw_other,
                    idx.hw_coarse,
                    idx.hw_fine,
                    idx.hw_stem_snag,
                    idx.hw_branch_snag,
                )
            };
            let side = |v: &Vec<f64>| Self::split_by_side(info, v, softwood);
            let merch_out = side(&info.merch_to_stem_snag);
            let other_snag = side(&info.other_to_branch_snag);
            let other_fast = side(&info.other_to_ag_fast);
            let foliage_out = side(&info.foliage_to_ag_very_fast);
            let coarse_ag = side(&info.coarse_to_ag_fast);
            let coarse_bg = side(&info.coarse_to_bg_fast);
            let fine_ag = side(&info.fine_to_ag_very_fast);
            let fine_bg = side(&info.fine_to_bg_very_fast);

            let retained =
                |out: &[f64]| out.iter().map(|o| (1.0 - o).max(0.0)).collect::<Vec<_>>();
            let summed: Vec<f64> = other_snag
                .iter()
                .zip(&other_fast)
                .map(|(a, b)| a + b)
                .collect();
            let coarse_sum: Vec<f64> =
                coarse_ag.iter().zip(&coarse_bg).map(|(a, b)| a + b).collect();
            let fine_sum: Vec<f64> =
                fine_ag.iter().zip(&fine_bg).map(|(a, b)| a + b).collect();

            columns.push(CoordColumn::per_matrix(merch, merch, retained(&merch_out)));
            columns.push(CoordColumn::per_matrix(merch, stem_snag, merch_out));
            columns.push(CoordColumn::per_matrix(other, other, retained(&summed)));
            columns.push(CoordColumn::per_matrix(other, branch_snag, other_snag));
            columns.push(CoordColumn::per_matrix(other, idx.ag_fast, other_fast));
            columns.push(CoordColumn::per_matrix(
                foliage,
                foliage,
                retained(&foliage_out),
            ));
            columns.push(CoordColumn::per_matrix(
                foliage,
                idx.ag_very_fast,
                foliage_out,
            ));
            columns.push(CoordColumn::per_matrix(coarse, coarse, retained(&coarse_sum)));
            columns.push(CoordColumn::per_matrix(coarse, idx.ag_fast, coarse_ag));
            columns.push(CoordColumn::per_matrix(coarse, idx.bg_fast, coarse_bg));
            columns.push(CoordColumn::per_matrix(fine, fine, retained(&fine_sum)));
            columns.push(CoordColumn::per_matrix(fine, idx.ag_very_fast, fine_ag));
            columns.push(CoordColumn::per_matrix(fine, idx.bg_very_fast, fine_bg));
        }
        Operation::from_coordinates(
            self.model.definition().n_pools(),
            MatrixBase::Identity,
            &columns,
            (0..n as u32).collect(),
            process::GROWTH,
            Some(idx.input),
        )
    }

    fn turnover_tables(&self) -> CoreResult<(VariableTable, VariableTable)> {
        let spatial_units = self.model.index().turnover_spatial_units();
        let mut biomass: Vec<Series> = Vec::new();
        let mut snag: Vec<Series> = Vec::new();
        let key: Vec<i32> = spatial_units.to_vec();
        biomass.push(Series::i32("[inventory.spatial_unit]", key.clone()));
        snag.push(Series::i32("[inventory.spatial_unit]", key));

        let mut push = |columns: &mut Vec<Series>, name: String, values: Vec<f64>| {
            columns.push(Series::f64(name, values));
        };
        for forest_type in [ForestType::Softwood, ForestType::Hardwood] {
            let prefix = match forest_type {
                ForestType::Softwood => "Softwood",
                ForestType::Hardwood => "Hardwood",
            };
            let rows: Vec<&crate::parameters::TurnoverParameter> = spatial_units
                .iter()
                .map(|&spu| self.model.turnover_parameter(spu, forest_type))
                .collect::<CoreResult<_>>()?;
            let col = |f: &dyn Fn(&crate::parameters::TurnoverParameter) -> f64| {
                rows.iter().map(|r| f(r)).collect::<Vec<f64>>()
            };

            push(
                &mut biomass,
                format!("{prefix}Merch.{prefix}Merch"),
                col(&|r| 1.0 - r.stem_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}Merch.{prefix}StemSnag"),
                col(&|r| r.stem_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}Foliage.{prefix}Foliage"),
                col(&|r| 1.0 - r.foliage_fall),
            );
            push(
                &mut biomass,
                format!("{prefix}Foliage.AboveGroundVeryFastSoil"),
                col(&|r| r.foliage_fall),
            );
            push(
                &mut biomass,
                format!("{prefix}Other.{prefix}Other"),
                col(&|r| 1.0 - r.branch_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}Other.{prefix}BranchSnag"),
                col(&|r| r.branch_snag_split * r.branch_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}Other.AboveGroundFastSoil"),
                col(&|r| (1.0 - r.branch_snag_split) * r.branch_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}CoarseRoots.{prefix}CoarseRoots"),
                col(&|r| 1.0 - r.coarse_root_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}CoarseRoots.AboveGroundFastSoil"),
                col(&|r| r.coarse_root_ag_split * r.coarse_root_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}CoarseRoots.BelowGroundFastSoil"),
                col(&|r| (1.0 - r.coarse_root_ag_split) * r.coarse_root_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}FineRoots.{prefix}FineRoots"),
                col(&|r| 1.0 - r.fine_root_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}FineRoots.AboveGroundVeryFastSoil"),
                col(&|r| r.fine_root_ag_split * r.fine_root_turnover),
            );
            push(
                &mut biomass,
                format!("{prefix}FineRoots.BelowGroundVeryFastSoil"),
                col(&|r| (1.0 - r.fine_root_ag_split) * r.fine_root_turnover),
            );

            push(
                &mut snag,
                format!("{prefix}StemSnag.{prefix}StemSnag"),
                col(&|r| 1.0 - r.stem_snag_fall),
            );
            push(
                &mut snag,
                format!("{prefix}StemSnag.MediumSoil"),
                col(&|r| r.stem_snag_fall),
            );
            push(
                &mut snag,
                format!("{prefix}BranchSnag.{prefix}BranchSnag"),
                col(&|r| 1.0 - r.branch_snag_fall),
            );
            push(
                &mut snag,
                format!("{prefix}BranchSnag.AboveGroundFastSoil"),
                col(&|r| r.branch_snag_fall),
            );
        }
        Ok((VariableTable::new(biomass)?, VariableTable::new(snag)?))
    }

    /// Biomass turnover, one matrix per spatial unit.
    pub fn biomass_turnover(
        &mut self,
        source: &dyn ColumnSource,
        n_stands: usize,
    ) -> CoreResult<Operation> {
        if self.biomass_turnover.is_none() {
            let (biomass_table, _) = self.turnover_tables()?;
            let spec = OpSpec::parse(
                "biomass_turnover",
                process::GROWTH,
                &biomass_table
                    .column_names()
                    .map(String::from)
                    .collect::<Vec<_>>(),
                self.model.definition().pools(),
            )?;
            let op = spec.build(
                &biomass_table,
                source,
                n_stands,
                MatrixBase::Identity,
                self.model.definition().pools(),
            )?;
            self.biomass_turnover = Some((spec, biomass_table, op));
        }
        let (spec, table, op) = self.biomass_turnover.as_mut().unwrap();
        op.update_index(spec.merge_index(table, source, n_stands)?)?;
        Ok(op.clone())
    }

    /// Snag turnover, one matrix per spatial unit.
    pub fn snag_turnover(
        &mut self,
        source: &dyn ColumnSource,
        n_stands: usize,
    ) -> CoreResult<Operation> {
        if self.snag_turnover.is_none() {
            let (_, snag_table) = self.turnover_tables()?;
            let spec = OpSpec::parse(
                "snag_turnover",
                process::GROWTH,
                &snag_table
                    .column_names()
                    .map(String::from)
                    .collect::<Vec<_>>(),
                self.model.definition().pools(),
            )?;
            let op = spec.build(
                &snag_table,
                source,
                n_stands,
                MatrixBase::Identity,
                self.model.definition().pools(),
            )?;
            self.snag_turnover = Some((spec, snag_table, op));
        }
        let (spec, table, op) = self.snag_turnover.as_mut().unwrap();
        op.update_index(spec.merge_index(table, source, n_stands)?)?;
        Ok(op.clone())
    }

    fn decay_columns(
        columns: &mut Vec<CoordColumn>,
        pool: usize,
        receiver: usize,
        co2: usize,
        parameter: &DecayParameter,
        temperature: &[f64],
    ) {
        let rates: Vec<f64> = temperature.iter().map(|&t| parameter.decay_rate(t)).collect();
        columns.push(CoordColumn::per_matrix(
            pool,
            pool,
            rates.iter().map(|r| 1.0 - r).collect(),
        ));
        columns.push(CoordColumn::per_matrix(
            pool,
            receiver,
            rates
                .iter()
                .map(|r| r * (1.0 - parameter.prop_to_atmosphere))
                .collect(),
        ));
        columns.push(CoordColumn::per_matrix(
            pool,
            co2,
            rates
                .iter()
                .map(|r| r * parameter.prop_to_atmosphere)
                .collect(),
        ));
    }

    /// DOM decay, one matrix per stand from its mean annual temperature.
    /// Very fast, fast, medium and snag pools decay toward the slow pools,
    /// emitting their atmospheric share to CO2.
    pub fn dom_decay(&self, mean_annual_temperature: &[f64]) -> CoreResult<Operation> {
        let idx = self.model.pool_idx();
        let decay = &self.model.parameters().decay;
        let n = mean_annual_temperature.len();
        let mut columns = Vec::with_capacity(27);
        let plan: [(usize, usize, &DecayParameter); 9] = [
            (idx.ag_very_fast, idx.ag_slow, &decay.ag_very_fast),
            (idx.bg_very_fast, idx.bg_slow, &decay.bg_very_fast),
            (idx.ag_fast, idx.ag_slow, &decay.ag_fast),
            (idx.bg_fast, idx.bg_slow, &decay.bg_fast),
            (idx.medium, idx.ag_slow, &decay.medium),
            (idx.sw_stem_snag, idx.ag_slow, &decay.stem_snag),
            (idx.sw_branch_snag, idx.ag_slow, &decay.branch_snag),
            (idx.hw_stem_snag, idx.ag_slow, &decay.stem_snag),
            (idx.hw_branch_snag, idx.ag_slow, &decay.branch_snag),
        ];
        for (pool, receiver, parameter) in plan {
            Self::decay_columns(
                &mut columns,
                pool,
                receiver,
                idx.co2,
                parameter,
                mean_annual_temperature,
            );
        }
        Operation::from_coordinates(
            self.model.definition().n_pools(),
            MatrixBase::Identity,
            &columns,
            (0..n as u32).collect(),
            process::DECAY,
            Some(idx.input),
        )
    }

    /// Slow-pool decay straight to CO2, one matrix per stand.
    pub fn slow_decay(&self, mean_annual_temperature: &[f64]) -> CoreResult<Operation> {
        let idx = self.model.pool_idx();
        let decay = &self.model.parameters().decay;
        let n = mean_annual_temperature.len();
        let mut columns = Vec::with_capacity(4);
        for (pool, parameter) in [
            (idx.ag_slow, &decay.ag_slow),
            (idx.bg_slow, &decay.bg_slow),
        ] {
            let rates: Vec<f64> = mean_annual_temperature
                .iter()
                .map(|&t| parameter.decay_rate(t))
                .collect();
            columns.push(CoordColumn::per_matrix(
                pool,
                pool,
                rates.iter().map(|r| 1.0 - r).collect(),
            ));
            columns.push(CoordColumn::per_matrix(
                pool,
                idx.co2,
                rates
                    .iter()
                    .map(|r| r * parameter.prop_to_atmosphere)
                    .collect(),
            ));
        }
        Operation::from_coordinates(
            self.model.definition().n_pools(),
            MatrixBase::Identity,
            &columns,
            (0..n as u32).collect(),
            process::DECAY,
            Some(idx.input),
        )
    }

    /// Transfer from above-ground slow to below-ground slow at the constant
    /// mixing rate; a single matrix broadcast to all stands.
    pub fn slow_mixing(&mut self, n_stands: usize) -> CoreResult<Operation> {
        if self.slow_mixing.is_none() {
            let idx = self.model.pool_idx();
            let rate = self.model.parameters().slow_mixing_rate;
            self.slow_mixing = Some(Operation::from_coordinates(
                self.model.definition().n_pools(),
                MatrixBase::Identity,
                &[
                    CoordColumn::scalar(idx.ag_slow, idx.bg_slow, rate),
                    CoordColumn::scalar(idx.ag_slow, idx.ag_slow, 1.0 - rate),
                ],
                vec![0; n_stands],
                process::DECAY,
                Some(idx.input),
            )?);
        }
        let op = self.slow_mixing.as_mut().unwrap();
        op.update_index(vec![0; n_stands])?;
        Ok(op.clone())
    }

    /// Disturbance for the given per-stand disturbance types. Type 0 (and
    /// below) selects the identity matrix.
    pub fn disturbance(
        &mut self,
        disturbance_type: &[i32],
        spatial_unit: &[i32],
        land_class: Option<&[i32]>,
    ) -> CoreResult<Operation> {
        if self.disturbance.is_none() {
            self.disturbance = Some(Operation::from_matrix_list(
                self.model.definition().n_pools(),
                MatrixBase::Identity,
                self.model.index().disturbance_slots(),
                vec![0; disturbance_type.len()],
                process::DISTURBANCE,
                Some(self.model.pool_idx().input),
            )?);
        }
        let index = self.disturbance_index(disturbance_type, spatial_unit, land_class)?;
        let op = self.disturbance.as_mut().unwrap();
        op.update_index(index)?;
        Ok(op.clone())
    }

    fn disturbance_index(
        &self,
        disturbance_type: &[i32],
        spatial_unit: &[i32],
        land_class: Option<&[i32]>,
    ) -> CoreResult<Vec<u32>> {
        let mut index = Vec::with_capacity(disturbance_type.len());
        for i in 0..disturbance_type.len() {
            let land_class = land_class.map_or(0, |l| l[i]);
            index.push(self.model.index().disturbance_slot(
                disturbance_type[i],
                spatial_unit[i],
                land_class,
            )?);
        }
        Ok(index)
    }

    /// Pool index shortcuts for drivers.
    pub fn pool_idx(&self) -> &PoolIdx {
        self.model.pool_idx()
    }
}
