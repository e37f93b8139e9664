//! Streamline records and the output sink for surviving streamlines.

use std::io;

use glam::Vec3;

/// Ordered vertex sequence of one reconstructed fibre pathway, in scanner
/// millimetres with the volume's first voxel corner at the origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Streamline {
    pub vertices: Vec<Vec3>,
}

impl Streamline {
    pub fn new(vertices: Vec<Vec3>) -> Self {
        Self { vertices }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Total polyline length.
    pub fn length(&self) -> f32 {
        self.vertices
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum()
    }

    pub fn is_finite(&self) -> bool {
        self.vertices.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<Vec3>> for Streamline {
    fn from(vertices: Vec<Vec3>) -> Self {
        Self::new(vertices)
    }
}

/// Destination for the streamlines that survive filtering.
///
/// Streamlines are written in ascending original index order.
pub trait StreamlineSink {
    fn write_streamline(&mut self, index: usize, streamline: &Streamline) -> io::Result<()>;
}

impl StreamlineSink for Vec<Streamline> {
    fn write_streamline(&mut self, _index: usize, streamline: &Streamline) -> io::Result<()> {
        self.push(streamline.clone());
        Ok(())
    }
}
