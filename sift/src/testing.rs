//! Testing utilities: tracing setup and synthetic fixel volumes / tractograms.

#![allow(dead_code)]

use glam::Vec3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::tractogram::Streamline;
use crate::volume::{FixelVolume, Lobe};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Straight streamline along x at y = z = 0.5.
pub fn x_track(x0: f32, x1: f32) -> Streamline {
    Streamline::new(vec![Vec3::new(x0, 0.5, 0.5), Vec3::new(x1, 0.5, 0.5)])
}

/// Straight streamline along y at x = z = 0.5.
pub fn y_track(y0: f32, y1: f32) -> Streamline {
    Streamline::new(vec![Vec3::new(0.5, y0, 0.5), Vec3::new(0.5, y1, 0.5)])
}

/// One 1 mm voxel with an x fixel (id 0) and a y fixel (id 1).
pub fn crossing_voxel(fod_x: f32, fod_y: f32) -> FixelVolume {
    let mut volume = FixelVolume::new([1, 1, 1], 1.0);
    volume.push_lobe([0, 0, 0], Lobe::new(fod_x, Vec3::X));
    volume.push_lobe([0, 0, 0], Lobe::new(fod_y, Vec3::Y));
    volume
}

/// Both fixels have FOD 1. Track densities: x fixel 2.5 (tracks 0, 1: length 1;
/// track 2: length 0.5), y fixel 1 (track 3).
///
/// Initially mu = 4/7 and cost = 18/49. Removal gradients:
/// tracks 0 and 1: 0.08 - 18/49, track 2: 2/9 - 18/49, track 3: 2 - 18/49.
/// Greedy order: track 0 (tie with 1, lower index), then track 2 (cost 0.08 -> 0),
/// after which every removal raises the cost.
pub fn hand_scenario() -> (FixelVolume, Vec<Streamline>) {
    let volume = crossing_voxel(1.0, 1.0);
    let tracks = vec![
        x_track(0.0, 1.0),
        x_track(0.0, 1.0),
        x_track(0.25, 0.75),
        y_track(0.0, 1.0),
    ];
    (volume, tracks)
}

/// Random volume with 1–3 axis-aligned fixels per voxel and random-walk streamlines.
pub fn random_tractogram(seed: u64, dims: [usize; 3], num_tracks: usize) -> (FixelVolume, Vec<Streamline>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let axes = [Vec3::X, Vec3::Y, Vec3::Z];

    let mut volume = FixelVolume::new(dims, 1.0);
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let count = rng.random_range(1..=3usize);
                for axis in axes.iter().take(count) {
                    let amplitude = rng.random_range(0.2f32..2.0);
                    volume.push_lobe([x, y, z], Lobe::new(amplitude, *axis));
                }
            }
        }
    }

    let extent = Vec3::new(dims[0] as f32, dims[1] as f32, dims[2] as f32);
    let tracks = (0..num_tracks)
        .map(|_| {
            let mut point = Vec3::new(
                rng.random_range(0.05..extent.x - 0.05),
                rng.random_range(0.05..extent.y - 0.05),
                rng.random_range(0.05..extent.z - 0.05),
            );
            let mut dir = axes[rng.random_range(0..3usize)];
            let mut vertices = vec![point];
            for _ in 0..rng.random_range(2..16usize) {
                let jitter = Vec3::new(
                    rng.random_range(-0.3f32..0.3),
                    rng.random_range(-0.3f32..0.3),
                    rng.random_range(-0.3f32..0.3),
                );
                dir = (dir + jitter).normalize_or(dir);
                let next = point + dir * 0.4;
                if next.min_element() <= 0.0 || (extent - next).min_element() <= 0.0 {
                    break;
                }
                point = next;
                vertices.push(point);
            }
            Streamline::new(vertices)
        })
        .collect();

    (volume, tracks)
}
