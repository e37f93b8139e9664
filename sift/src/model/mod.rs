//! Fixel model: per-fixel track density accounting and the cost function.
//!
//! The model owns the fixel arena and every streamline's contribution list.
//! Global sums over the processing mask are kept incrementally so that the
//! cost, its derivative with respect to `mu` and the exact cost change of
//! removing one streamline are all available without touching every fixel:
//!
//! ```text
//! C(mu) = Σ w (mu·TD − FOD)² = mu²·A − 2·mu·B + F
//! A = Σ w TD²    B = Σ w TD·FOD    F = Σ w FOD²
//! ```
//!
//! `Model` is not `Clone`. The sifter owns it and lends it read-only to the
//! gradient workers.

use std::io::{self, Write};

use rayon::prelude::*;

use crate::config::ModelConfig;
use crate::error::{DegenerateStateError, Error, InitializationError};
use crate::fixel_map::FixelMap;
use crate::mapping::{TrackContribution, TrackMapper};
use crate::tractogram::Streamline;
use crate::volume::FixelVolume;

#[cfg(test)]
mod tests;

/// Frozen per-iteration view of the global cost state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSnapshot {
    pub mu: f64,
    pub cost: f64,
    /// dC/dmu at `mu`.
    pub roc_cost: f64,
}

#[derive(Debug)]
enum TrackSlot {
    Live(TrackContribution),
    /// Crosses no fixel: excluded from accounting, never removed.
    Unmapped,
    Removed,
}

#[derive(Debug)]
pub struct Model {
    map: FixelMap,
    proc_mask: Vec<bool>,
    tracks: Vec<TrackSlot>,
    fod_sum: f64,
    td_sum: f64,
    td_sq_sum: f64,
    td_fod_sum: f64,
    fod_sq_sum: f64,
    num_tracks: usize,
    num_removable: usize,
}

impl Model {
    /// Build the fixel index, map every streamline and accumulate track density.
    pub fn initialize(
        volume: &FixelVolume,
        streamlines: &[Streamline],
        config: &ModelConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mask_table = volume.mask_table();
        if mask_table.len() != volume.voxel_count() {
            return Err(InitializationError::VoxelCountMismatch {
                what: "mask",
                expected: volume.voxel_count(),
                actual: mask_table.len(),
            }
            .into());
        }
        if streamlines.len() > u32::MAX as usize {
            return Err(InitializationError::IndexOverflow {
                count: streamlines.len(),
            }
            .into());
        }

        let mut map = FixelMap::from_volume(volume)?;
        let mapper = TrackMapper::new(map.voxel_size(), config.step_ratio);

        let mapped: Vec<Result<TrackContribution, InitializationError>> = streamlines
            .par_iter()
            .enumerate()
            .map(|(index, streamline)| {
                if !streamline.is_finite() {
                    return Err(InitializationError::NonFiniteVertex { index });
                }
                Ok(mapper.map(&map, streamline))
            })
            .collect();

        let mut tracks = Vec::with_capacity(mapped.len());
        let mut unmapped = 0usize;
        for (index, result) in mapped.into_iter().enumerate() {
            let contribution = result?;
            if contribution.is_empty() {
                if !config.allow_unmapped_tracks {
                    return Err(InitializationError::UnmappedStreamline { index }.into());
                }
                unmapped += 1;
                tracks.push(TrackSlot::Unmapped);
                continue;
            }
            let fixels = map.fixels_mut();
            for entry in contribution.entries() {
                fixels[entry.fixel as usize].td += entry.length as f64;
            }
            tracks.push(TrackSlot::Live(contribution));
        }
        if unmapped > 0 {
            tracing::warn!(
                unmapped,
                total = streamlines.len(),
                "Streamlines crossing no fixel are kept but cannot be removed"
            );
        }

        let proc_mask: Vec<bool> = map
            .fixels()
            .iter()
            .map(|fixel| {
                mask_table[volume.linear_index(fixel.voxel)]
                    && fixel.weight > 0.0
                    && fixel.fod >= config.min_fod as f64
                    && (!config.remove_untracked || fixel.td > 0.0)
            })
            .collect();

        let mut num_removable = 0;
        for slot in &mut tracks {
            if let TrackSlot::Live(contribution) = slot {
                let total: f64 = contribution
                    .entries()
                    .iter()
                    .filter(|e| proc_mask[e.fixel as usize])
                    .map(|e| map.fixel(e.fixel).weight * e.length as f64)
                    .sum();
                contribution.set_total_contribution(total);
                num_removable += 1;
            }
        }

        let mut model = Self {
            map,
            proc_mask,
            num_tracks: tracks.len(),
            tracks,
            fod_sum: 0.0,
            td_sum: 0.0,
            td_sq_sum: 0.0,
            td_fod_sum: 0.0,
            fod_sq_sum: 0.0,
            num_removable,
        };
        model.recompute_sums();

        tracing::info!(
            fixels = model.map.len(),
            masked_fixels = model.proc_mask_size(),
            streamlines = model.num_tracks,
            unmapped,
            fod_sum = model.fod_sum,
            td_sum = model.td_sum,
            "Model initialized"
        );

        Ok(model)
    }

    /// Full recomputation of every global sum from the fixel accumulators.
    fn recompute_sums(&mut self) {
        let (mut fod_sum, mut td_sum, mut td_sq, mut td_fod, mut fod_sq) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (fixel, _) in self
            .map
            .fixels()
            .iter()
            .zip(&self.proc_mask)
            .filter(|(_, m)| **m)
        {
            let w = fixel.weight;
            fod_sum += w * fixel.fod;
            td_sum += w * fixel.td;
            td_sq += w * fixel.td * fixel.td;
            td_fod += w * fixel.td * fixel.fod;
            fod_sq += w * fixel.fod * fixel.fod;
        }
        self.fod_sum = fod_sum;
        self.td_sum = td_sum;
        self.td_sq_sum = td_sq;
        self.td_fod_sum = td_fod;
        self.fod_sq_sum = fod_sq;
    }

    /// Remove one live streamline, subtracting exactly its contributions.
    pub fn remove(&mut self, index: usize) -> Result<(), Error> {
        let slot = self
            .tracks
            .get_mut(index)
            .ok_or(DegenerateStateError::NotRemovable { index })?;
        let contribution = match std::mem::replace(slot, TrackSlot::Removed) {
            TrackSlot::Live(contribution) => contribution,
            other => {
                *slot = other;
                return Err(DegenerateStateError::NotRemovable { index }.into());
            }
        };

        let fixels = self.map.fixels_mut();
        for entry in contribution.entries() {
            let f = entry.fixel as usize;
            let length = entry.length as f64;
            let fixel = &mut fixels[f];
            let td_before = fixel.td;
            fixel.td -= length;
            if self.proc_mask[f] {
                let w = fixel.weight;
                self.td_sum -= w * length;
                self.td_sq_sum += w * (fixel.td * fixel.td - td_before * td_before);
                self.td_fod_sum -= w * length * fixel.fod;
            }
        }
        self.num_tracks -= 1;
        self.num_removable -= 1;
        Ok(())
    }

    /// `FOD_sum / TD_sum` over the processing mask.
    pub fn current_mu(&self) -> Result<f64, Error> {
        if self.td_sum > 0.0 {
            Ok(self.fod_sum / self.td_sum)
        } else {
            Err(DegenerateStateError::ZeroTrackDensity.into())
        }
    }

    #[inline]
    fn cost_at(&self, mu: f64) -> f64 {
        (mu * mu * self.td_sq_sum - 2.0 * mu * self.td_fod_sum + self.fod_sq_sum).max(0.0)
    }

    #[inline]
    fn roc_at(&self, mu: f64) -> f64 {
        2.0 * (mu * self.td_sq_sum - self.td_fod_sum)
    }

    /// Cost at the current `mu`.
    pub fn calc_cost_function(&self) -> Result<f64, Error> {
        Ok(self.cost_at(self.current_mu()?))
    }

    /// Rate of change of the cost with respect to `mu`, at the current `mu`.
    pub fn calc_roc_cost_function(&self) -> Result<f64, Error> {
        Ok(self.roc_at(self.current_mu()?))
    }

    pub fn snapshot(&self) -> Result<CostSnapshot, Error> {
        let mu = self.current_mu()?;
        Ok(CostSnapshot {
            mu,
            cost: self.cost_at(mu),
            roc_cost: self.roc_at(mu),
        })
    }

    /// Exact change in cost if streamline `index` were removed, evaluated from
    /// its contribution list only. `mu` and `roc_cost` must describe the
    /// current state. Negative means removal helps.
    ///
    /// Returns `+inf` for streamlines that cannot or must not be removed:
    /// removed or unmapped tracks, tracks touching no processing-mask fixel,
    /// and the track whose removal would leave no density at all.
    pub fn calc_gradient(&self, index: usize, mu: f64, roc_cost: f64) -> f64 {
        let Some(TrackSlot::Live(contribution)) = self.tracks.get(index) else {
            return f64::INFINITY;
        };
        let removed_td = contribution.total_contribution();
        if removed_td <= 0.0 {
            return f64::INFINITY;
        }
        let td_sum_after = self.td_sum - removed_td;
        if td_sum_after <= 0.0 {
            return f64::INFINITY;
        }

        let mu_after = self.fod_sum / td_sum_after;
        let delta_mu = mu_after - mu;
        // Global term: the whole mask rescaled to the new mu (exact, C is quadratic in mu).
        let mut gradient = roc_cost * delta_mu + self.td_sq_sum * delta_mu * delta_mu;

        let fixels = self.map.fixels();
        for entry in contribution.entries() {
            let f = entry.fixel as usize;
            if !self.proc_mask[f] {
                continue;
            }
            let fixel = &fixels[f];
            let before = mu_after * fixel.td - fixel.fod;
            let after = before - mu_after * entry.length as f64;
            gradient += fixel.weight * (after * after - before * before);
        }
        gradient
    }

    // ========== Accessors ==========

    pub fn fixel_map(&self) -> &FixelMap {
        &self.map
    }

    pub fn fod_sum(&self) -> f64 {
        self.fod_sum
    }

    pub fn td_sum(&self) -> f64 {
        self.td_sum
    }

    /// Live streamlines, removable or not.
    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    /// Live streamlines that map onto at least one fixel.
    pub fn num_removable(&self) -> usize {
        self.num_removable
    }

    /// Size of the original streamline index space.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_removable(&self, index: usize) -> bool {
        matches!(self.tracks.get(index), Some(TrackSlot::Live(_)))
    }

    pub fn is_removed(&self, index: usize) -> bool {
        matches!(self.tracks.get(index), Some(TrackSlot::Removed))
    }

    pub fn is_unmapped(&self, index: usize) -> bool {
        matches!(self.tracks.get(index), Some(TrackSlot::Unmapped))
    }

    /// Contribution list of a live streamline.
    pub fn contribution(&self, index: usize) -> Option<&TrackContribution> {
        match self.tracks.get(index) {
            Some(TrackSlot::Live(contribution)) => Some(contribution),
            _ => None,
        }
    }

    pub fn in_proc_mask(&self, fixel: u32) -> bool {
        self.proc_mask[fixel as usize]
    }

    pub fn proc_mask_size(&self) -> usize {
        self.proc_mask.iter().filter(|&&m| m).count()
    }

    /// Per-fixel CSV dump: id, voxel, target, density, scaled density, mask flag.
    pub fn output_fixel_stats<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mu = self.current_mu().unwrap_or(0.0);
        writeln!(writer, "fixel,x,y,z,fod,td,scaled_td,in_mask")?;
        for (id, (fixel, &in_mask)) in self.map.fixels().iter().zip(&self.proc_mask).enumerate() {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{}",
                id,
                fixel.voxel[0],
                fixel.voxel[1],
                fixel.voxel[2],
                fixel.fod,
                fixel.td,
                fixel.scaled_td(mu),
                u8::from(in_mask)
            )?;
        }
        writer.flush()
    }
}
