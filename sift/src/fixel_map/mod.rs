//! Spatial index from voxels to their fixels.
//!
//! Fixels live in one flat arena; each voxel owns a contiguous id range. The
//! arena is built once from a [`FixelVolume`] and never reshaped afterwards:
//! only the per-fixel track density accumulators change.

use std::ops::Range;

use glam::Vec3;

use crate::error::InitializationError;
use crate::volume::FixelVolume;


/// One fibre orientation element within one voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixel {
    /// Target amplitude (FOD integral), fixed after load.
    pub fod: f64,
    /// Accumulated streamline length over all live tracks.
    pub td: f64,
    /// Unit orientation.
    pub dir: Vec3,
    /// Partial-volume weight applied to both sides of the cost.
    pub weight: f64,
    pub voxel: [usize; 3],
}

impl Fixel {
    /// Density scaled into FOD units.
    #[inline]
    pub fn scaled_td(&self, mu: f64) -> f64 {
        self.td * mu
    }

    /// Weighted squared discrepancy at the given `mu`.
    #[inline]
    pub fn cost(&self, mu: f64) -> f64 {
        let diff = self.scaled_td(mu) - self.fod;
        self.weight * diff * diff
    }
}

/// Read-only view of the fixels owned by one voxel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelAccessor {
    pub voxel: [usize; 3],
    range: Range<u32>,
}

impl VoxelAccessor {
    pub fn fixel_ids(&self) -> Range<u32> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct MapVoxel {
    first: u32,
    count: u32,
}

#[derive(Debug)]
pub struct FixelMap {
    dims: [usize; 3],
    voxel_size: f32,
    voxels: Vec<Option<MapVoxel>>,
    fixels: Vec<Fixel>,
}

impl FixelMap {
    /// Build the arena from the volume's lobes. Every accumulator starts at zero.
    pub fn from_volume(volume: &FixelVolume) -> Result<Self, InitializationError> {
        let dims = volume.dims();
        if dims.contains(&0) {
            return Err(InitializationError::EmptyVolume { dims });
        }
        let voxel_size = volume.voxel_size();
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(InitializationError::InvalidVoxelSize { voxel_size });
        }
        let lobe_table = volume.lobe_table();
        if lobe_table.len() != volume.voxel_count() {
            return Err(InitializationError::VoxelCountMismatch {
                what: "lobe table",
                expected: volume.voxel_count(),
                actual: lobe_table.len(),
            });
        }
        let total: usize = lobe_table.iter().map(Vec::len).sum();
        if total > u32::MAX as usize {
            return Err(InitializationError::IndexOverflow { count: total });
        }

        let mut voxels = Vec::with_capacity(lobe_table.len());
        let mut fixels = Vec::with_capacity(total);
        for (index, lobes) in lobe_table.iter().enumerate() {
            if lobes.is_empty() {
                voxels.push(None);
                continue;
            }
            let voxel = volume.voxel_from_index(index);
            let first = fixels.len() as u32;
            for lobe in lobes {
                if !(lobe.amplitude.is_finite() && lobe.amplitude >= 0.0) {
                    return Err(InitializationError::InvalidAmplitude {
                        voxel,
                        amplitude: lobe.amplitude,
                    });
                }
                let dir = lobe.dir.normalize_or_zero();
                if dir == Vec3::ZERO {
                    return Err(InitializationError::InvalidDirection { voxel });
                }
                fixels.push(Fixel {
                    fod: lobe.amplitude as f64,
                    td: 0.0,
                    dir,
                    weight: lobe.weight.clamp(0.0, 1.0) as f64,
                    voxel,
                });
            }
            voxels.push(Some(MapVoxel {
                first,
                count: lobes.len() as u32,
            }));
        }

        Ok(Self {
            dims,
            voxel_size,
            voxels,
            fixels,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.fixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixels.is_empty()
    }

    pub fn fixels(&self) -> &[Fixel] {
        &self.fixels
    }

    pub fn fixel(&self, id: u32) -> &Fixel {
        &self.fixels[id as usize]
    }

    pub(crate) fn fixels_mut(&mut self) -> &mut [Fixel] {
        &mut self.fixels
    }

    /// Voxel containing a world-space point, if inside the volume.
    pub fn voxel_at(&self, point: Vec3) -> Option<[usize; 3]> {
        let scaled = point / self.voxel_size;
        if scaled.min_element() < 0.0 || !scaled.is_finite() {
            return None;
        }
        let voxel = [
            scaled.x.floor() as usize,
            scaled.y.floor() as usize,
            scaled.z.floor() as usize,
        ];
        (voxel[0] < self.dims[0] && voxel[1] < self.dims[1] && voxel[2] < self.dims[2])
            .then_some(voxel)
    }

    /// Fixels of a voxel; `None` outside the volume or for voxels without fixels.
    pub fn accessor(&self, voxel: [usize; 3]) -> Option<VoxelAccessor> {
        if voxel[0] >= self.dims[0] || voxel[1] >= self.dims[1] || voxel[2] >= self.dims[2] {
            return None;
        }
        let index = voxel[0] + self.dims[0] * (voxel[1] + self.dims[1] * voxel[2]);
        self.voxels[index].map(|v| VoxelAccessor {
            voxel,
            range: v.first..v.first + v.count,
        })
    }

    /// Fixel in `voxel` best aligned with `dir` (sign-insensitive).
    /// Ties go to the lowest fixel id.
    pub fn dir2fixel(&self, voxel: [usize; 3], dir: Vec3) -> Option<u32> {
        let accessor = self.accessor(voxel)?;
        let mut best: Option<(u32, f32)> = None;
        for id in accessor.fixel_ids() {
            let alignment = self.fixels[id as usize].dir.dot(dir).abs();
            if best.is_none_or(|(_, b)| alignment > b) {
                best = Some((id, alignment));
            }
        }
        best.map(|(id, _)| id)
    }
}
