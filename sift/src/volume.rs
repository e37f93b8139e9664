//! In-memory fixel volume consumed once at model initialization.
//!
//! Loaders (image formats, FOD segmentation) live outside this crate and fill a
//! [`FixelVolume`] with one lobe per fixel. Voxels are laid out x-fastest.

use glam::Vec3;

/// One FOD lobe within a voxel: the raw material of a fixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lobe {
    /// Integrated FOD amplitude (fibre density) of the lobe.
    pub amplitude: f32,
    /// Peak orientation. Need not be normalized.
    pub dir: Vec3,
    /// Partial-volume weight in [0, 1]. Zero-weight fixels are excluded from processing.
    pub weight: f32,
}

impl Lobe {
    pub fn new(amplitude: f32, dir: Vec3) -> Self {
        Self {
            amplitude,
            dir,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// Per-voxel lobe lists plus the spatial processing mask.
#[derive(Debug, Clone)]
pub struct FixelVolume {
    dims: [usize; 3],
    voxel_size: f32,
    lobes: Vec<Vec<Lobe>>,
    mask: Vec<bool>,
}

impl FixelVolume {
    /// Create an empty volume with every voxel inside the processing mask.
    pub fn new(dims: [usize; 3], voxel_size: f32) -> Self {
        let count = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            voxel_size,
            lobes: vec![Vec::new(); count],
            mask: vec![true; count],
        }
    }

    /// Assemble a volume from pre-built tables. Consistency is checked when the
    /// fixel map is built, not here.
    pub fn from_parts(
        dims: [usize; 3],
        voxel_size: f32,
        lobes: Vec<Vec<Lobe>>,
        mask: Vec<bool>,
    ) -> Self {
        Self {
            dims,
            voxel_size,
            lobes,
            mask,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn contains(&self, voxel: [usize; 3]) -> bool {
        voxel[0] < self.dims[0] && voxel[1] < self.dims[1] && voxel[2] < self.dims[2]
    }

    #[inline]
    pub fn linear_index(&self, voxel: [usize; 3]) -> usize {
        voxel[0] + self.dims[0] * (voxel[1] + self.dims[1] * voxel[2])
    }

    #[inline]
    pub fn voxel_from_index(&self, index: usize) -> [usize; 3] {
        let x = index % self.dims[0];
        let rest = index / self.dims[0];
        [x, rest % self.dims[1], rest / self.dims[1]]
    }

    /// # Panics
    ///
    /// Panics if `voxel` lies outside the volume.
    pub fn push_lobe(&mut self, voxel: [usize; 3], lobe: Lobe) {
        assert!(self.contains(voxel), "Voxel {voxel:?} outside volume");
        let index = self.linear_index(voxel);
        self.lobes[index].push(lobe);
    }

    /// # Panics
    ///
    /// Panics if `voxel` lies outside the volume.
    pub fn set_mask(&mut self, voxel: [usize; 3], included: bool) {
        assert!(self.contains(voxel), "Voxel {voxel:?} outside volume");
        let index = self.linear_index(voxel);
        self.mask[index] = included;
    }

    pub(crate) fn lobe_table(&self) -> &[Vec<Lobe>] {
        &self.lobes
    }

    pub(crate) fn mask_table(&self) -> &[bool] {
        &self.mask
    }
}
