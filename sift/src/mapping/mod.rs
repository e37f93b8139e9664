//! Length-weighted mapping of streamlines onto fixels.
//!
//! Each polyline segment is split into sub-steps no longer than
//! `voxel_size * step_ratio`. Every sub-step is attributed, by its midpoint,
//! to a voxel and, by the segment tangent, to the best-aligned fixel of that
//! voxel. Segments are first clipped to the volume's bounding box, so path
//! outside the volume costs nothing. Sub-steps in voxels without fixels are
//! dropped.

use glam::{DVec3, Vec3};

use crate::fixel_map::FixelMap;
use crate::tractogram::Streamline;


/// Path length of one streamline within one fixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackFixel {
    pub fixel: u32,
    pub length: f32,
}

/// Precomputed fixel contributions of one streamline, sorted by fixel id
/// with one entry per fixel.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackContribution {
    entries: Vec<TrackFixel>,
    total_length: f32,
    total_contribution: f64,
}

impl TrackContribution {
    /// Merge raw (possibly repeated, unsorted) entries into a contribution.
    pub fn from_entries(mut raw: Vec<TrackFixel>) -> Self {
        raw.sort_unstable_by_key(|e| e.fixel);
        let mut entries: Vec<TrackFixel> = Vec::with_capacity(raw.len());
        for entry in raw {
            match entries.last_mut() {
                Some(last) if last.fixel == entry.fixel => last.length += entry.length,
                _ => entries.push(entry),
            }
        }
        let total_length = entries.iter().map(|e| e.length).sum();
        Self {
            entries,
            total_length,
            total_contribution: 0.0,
        }
    }

    pub fn entries(&self) -> &[TrackFixel] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length summed over every mapped fixel.
    pub fn total_length(&self) -> f32 {
        self.total_length
    }

    /// Weighted length over processing-mask fixels only: the amount this
    /// track adds to the model's TD sum.
    pub fn total_contribution(&self) -> f64 {
        self.total_contribution
    }

    pub(crate) fn set_total_contribution(&mut self, value: f64) {
        self.total_contribution = value;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackMapper {
    step: f32,
}

impl TrackMapper {
    pub fn new(voxel_size: f32, step_ratio: f32) -> Self {
        Self {
            step: voxel_size * step_ratio,
        }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn map(&self, map: &FixelMap, streamline: &Streamline) -> TrackContribution {
        let dims = map.dims();
        let upper = Vec3::new(dims[0] as f32, dims[1] as f32, dims[2] as f32) * map.voxel_size();

        let mut raw = Vec::new();
        for pair in streamline.vertices.windows(2) {
            let Some((start, end)) = clip_segment(pair[0], pair[1], upper) else {
                continue;
            };
            let delta = end - start;
            let length = delta.length();
            if length <= 0.0 {
                continue;
            }
            let dir = delta / length;
            let steps = (length / self.step).ceil().max(1.0) as usize;
            let step_length = length / steps as f32;

            for k in 0..steps {
                let midpoint = start + dir * ((k as f32 + 0.5) * step_length);
                if let Some(fixel) = self.fixel_at(map, midpoint, dir) {
                    raw.push(TrackFixel {
                        fixel,
                        length: step_length,
                    });
                }
            }
        }
        TrackContribution::from_entries(raw)
    }

    #[inline]
    fn fixel_at(&self, map: &FixelMap, point: Vec3, dir: Vec3) -> Option<u32> {
        let voxel = map.voxel_at(point)?;
        map.dir2fixel(voxel, dir)
    }
}

/// Part of the segment `start..end` inside the box `[0, upper]`, by slab
/// intersection. Computed in f64 so far-away vertices neither overflow nor
/// lose the in-volume part to rounding.
fn clip_segment(start: Vec3, end: Vec3, upper: Vec3) -> Option<(Vec3, Vec3)> {
    let origin = start.as_dvec3();
    let delta: DVec3 = end.as_dvec3() - origin;
    let upper = upper.as_dvec3();

    let (mut t_enter, mut t_exit) = (0.0f64, 1.0f64);
    for axis in 0..3 {
        if delta[axis] == 0.0 {
            if origin[axis] < 0.0 || origin[axis] > upper[axis] {
                return None;
            }
            continue;
        }
        let t_low = -origin[axis] / delta[axis];
        let t_high = (upper[axis] - origin[axis]) / delta[axis];
        t_enter = t_enter.max(t_low.min(t_high));
        t_exit = t_exit.min(t_low.max(t_high));
    }
    if t_enter >= t_exit {
        return None;
    }
    Some((
        (origin + delta * t_enter).as_vec3(),
        (origin + delta * t_exit).as_vec3(),
    ))
}
