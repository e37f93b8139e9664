use glam::Vec3;

use super::*;
use crate::testing::{crossing_voxel, hand_scenario, random_tractogram, x_track, y_track};
use crate::volume::Lobe;

const TOL: f64 = 1e-5;

fn build(volume: &FixelVolume, tracks: &[Streamline]) -> Model {
    Model::initialize(volume, tracks, &ModelConfig::default()).unwrap()
}

/// Sum of live contributions, recomputed from the contribution lists.
fn td_sum_from_tracks(model: &Model) -> f64 {
    (0..model.track_count())
        .filter_map(|i| model.contribution(i))
        .map(|c| c.total_contribution())
        .sum()
}

/// Weighted TD sum recomputed from the fixel accumulators over the mask.
fn td_sum_from_fixels(model: &Model) -> f64 {
    model
        .fixel_map()
        .fixels()
        .iter()
        .enumerate()
        .filter(|(id, _)| model.in_proc_mask(*id as u32))
        .map(|(_, f)| f.weight * f.td)
        .sum()
}

#[test]
fn test_hand_scenario_initial_state() {
    let (volume, tracks) = hand_scenario();
    let model = build(&volume, &tracks);

    assert_eq!(model.num_tracks(), 4);
    assert_eq!(model.num_removable(), 4);
    assert!((model.fod_sum() - 2.0).abs() < TOL);
    assert!((model.td_sum() - 3.5).abs() < TOL);
    assert!((model.current_mu().unwrap() - 4.0 / 7.0).abs() < TOL);
    assert!((model.calc_cost_function().unwrap() - 18.0 / 49.0).abs() < TOL);

    let map = model.fixel_map();
    assert!((map.fixel(0).td - 2.5).abs() < TOL);
    assert!((map.fixel(1).td - 1.0).abs() < TOL);
}

#[test]
fn test_hand_scenario_gradients() {
    let (volume, tracks) = hand_scenario();
    let model = build(&volume, &tracks);
    let snapshot = model.snapshot().unwrap();

    let gradient = |i| model.calc_gradient(i, snapshot.mu, snapshot.roc_cost);
    let initial = 18.0 / 49.0;
    assert!((gradient(0) - (0.08 - initial)).abs() < TOL);
    assert!((gradient(1) - (0.08 - initial)).abs() < TOL);
    assert_eq!(gradient(0), gradient(1));
    assert!((gradient(2) - (2.0 / 9.0 - initial)).abs() < TOL);
    assert!((gradient(3) - (2.0 - initial)).abs() < TOL);
}

#[test]
fn test_roc_cost_matches_finite_difference() {
    let (volume, tracks) = random_tractogram(7, [3, 3, 3], 200);
    let model = build(&volume, &tracks);
    let mu = model.current_mu().unwrap();
    let h = 1e-6 * mu;

    let fixels = model.fixel_map().fixels();
    let cost = |m: f64| -> f64 {
        fixels
            .iter()
            .enumerate()
            .filter(|(id, _)| model.in_proc_mask(*id as u32))
            .map(|(_, f)| f.cost(m))
            .sum()
    };
    let numeric = (cost(mu + h) - cost(mu - h)) / (2.0 * h);
    let analytic = model.calc_roc_cost_function().unwrap();
    assert!(
        (numeric - analytic).abs() < 1e-4 * analytic.abs().max(1.0),
        "numeric {numeric} vs analytic {analytic}"
    );
    assert!((cost(mu) - model.calc_cost_function().unwrap()).abs() < 1e-8 * cost(mu).max(1.0));
}

#[test]
fn test_gradient_predicts_actual_cost_change() {
    let (volume, tracks) = random_tractogram(11, [4, 4, 3], 300);
    let mut model = build(&volume, &tracks);

    for index in (0..model.track_count()).step_by(7) {
        if !model.is_removable(index) {
            continue;
        }
        let before = model.snapshot().unwrap();
        let predicted = model.calc_gradient(index, before.mu, before.roc_cost);
        if !predicted.is_finite() {
            continue;
        }
        model.remove(index).unwrap();
        let after = model.calc_cost_function().unwrap();
        let actual = after - before.cost;
        assert!(
            (predicted - actual).abs() < 1e-6 * before.cost.max(1.0),
            "track {index}: predicted {predicted}, actual {actual}"
        );
    }
}

#[test]
fn test_incremental_td_sum_matches_recomputation() {
    let (volume, tracks) = random_tractogram(3, [4, 4, 4], 500);
    let mut model = build(&volume, &tracks);
    assert!((model.td_sum() - td_sum_from_tracks(&model)).abs() < 1e-6 * model.td_sum());

    let mut removed = 0;
    for index in (0..model.track_count()).rev().step_by(3) {
        if model.is_removable(index) {
            model.remove(index).unwrap();
            removed += 1;
        }
    }
    assert!(removed > 100);

    let expected = td_sum_from_tracks(&model);
    assert!((model.td_sum() - expected).abs() < 1e-6 * expected);
    assert!((model.td_sum() - td_sum_from_fixels(&model)).abs() < 1e-6 * expected);

    let (td_sq, td_fod) = (model.td_sq_sum, model.td_fod_sum);
    model.recompute_sums();
    assert!((td_sq - model.td_sq_sum).abs() < 1e-6 * model.td_sq_sum);
    assert!((td_fod - model.td_fod_sum).abs() < 1e-6 * model.td_fod_sum);
}

#[test]
fn test_remove_updates_counts_and_flags() {
    let (volume, tracks) = hand_scenario();
    let mut model = build(&volume, &tracks);

    model.remove(2).unwrap();
    assert_eq!(model.num_tracks(), 3);
    assert_eq!(model.num_removable(), 3);
    assert!(model.is_removed(2));
    assert!(!model.is_removable(2));
    assert!(model.contribution(2).is_none());
    assert!((model.fixel_map().fixel(0).td - 2.0).abs() < TOL);
    assert!((model.td_sum() - 3.0).abs() < TOL);
}

#[test]
fn test_remove_twice_is_rejected() {
    let (volume, tracks) = hand_scenario();
    let mut model = build(&volume, &tracks);

    model.remove(1).unwrap();
    let err = model.remove(1).unwrap_err();
    assert!(matches!(
        err,
        Error::DegenerateState(DegenerateStateError::NotRemovable { index: 1 })
    ));
    assert_eq!(model.num_tracks(), 3);
    assert!(model.remove(99).is_err());
}

#[test]
fn test_removed_track_has_infinite_gradient() {
    let (volume, tracks) = hand_scenario();
    let mut model = build(&volume, &tracks);
    model.remove(0).unwrap();
    let snapshot = model.snapshot().unwrap();
    assert_eq!(model.calc_gradient(0, snapshot.mu, snapshot.roc_cost), f64::INFINITY);
}

#[test]
fn test_unmapped_tracks_are_kept_and_not_removable() {
    let volume = crossing_voxel(1.0, 1.0);
    let tracks = vec![x_track(0.0, 1.0), x_track(3.0, 4.0)];
    let mut model = build(&volume, &tracks);

    assert_eq!(model.num_tracks(), 2);
    assert_eq!(model.num_removable(), 1);
    assert!(model.is_unmapped(1));
    assert!(model.remove(1).is_err());
    assert!(model.is_unmapped(1));
}

#[test]
fn test_unmapped_tracks_rejected_when_disallowed() {
    let volume = crossing_voxel(1.0, 1.0);
    let tracks = vec![x_track(0.0, 1.0), x_track(3.0, 4.0)];
    let config = ModelConfig {
        allow_unmapped_tracks: false,
        ..Default::default()
    };
    let err = Model::initialize(&volume, &tracks, &config).unwrap_err();
    assert!(matches!(
        err,
        Error::Initialization(InitializationError::UnmappedStreamline { index: 1 })
    ));
}

#[test]
fn test_non_finite_vertex_rejected() {
    let volume = crossing_voxel(1.0, 1.0);
    let tracks = vec![
        x_track(0.0, 1.0),
        Streamline::new(vec![Vec3::splat(0.5), Vec3::new(f32::INFINITY, 0.5, 0.5)]),
    ];
    let err = Model::initialize(&volume, &tracks, &ModelConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Initialization(InitializationError::NonFiniteVertex { index: 1 })
    ));
}

#[test]
fn test_mask_length_mismatch_rejected() {
    let volume = FixelVolume::from_parts([2, 1, 1], 1.0, vec![Vec::new(); 2], vec![true]);
    let err = Model::initialize(&volume, &[], &ModelConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Initialization(InitializationError::VoxelCountMismatch { what: "mask", .. })
    ));
}

#[test]
fn test_masked_out_fixels_do_not_count() {
    let mut volume = FixelVolume::new([2, 1, 1], 1.0);
    volume.push_lobe([0, 0, 0], Lobe::new(1.0, Vec3::X));
    volume.push_lobe([1, 0, 0], Lobe::new(5.0, Vec3::X));
    volume.set_mask([1, 0, 0], false);
    let tracks = vec![x_track(0.0, 1.0), x_track(1.0, 2.0), x_track(1.0, 2.0)];
    let model = build(&volume, &tracks);

    assert_eq!(model.proc_mask_size(), 1);
    assert!((model.fod_sum() - 1.0).abs() < TOL);
    assert!((model.td_sum() - 1.0).abs() < TOL);
    assert_eq!(model.contribution(1).unwrap().total_contribution(), 0.0);
    assert!(model.is_removable(1));

    let snapshot = model.snapshot().unwrap();
    assert_eq!(model.calc_gradient(1, snapshot.mu, snapshot.roc_cost), f64::INFINITY);
    // The only masked density would vanish.
    assert_eq!(model.calc_gradient(0, snapshot.mu, snapshot.roc_cost), f64::INFINITY);
}

#[test]
fn test_zero_track_density_is_degenerate() {
    let mut volume = crossing_voxel(1.0, 1.0);
    volume.set_mask([0, 0, 0], false);
    let model = build(&volume, &[x_track(0.0, 1.0)]);

    assert!(matches!(
        model.current_mu(),
        Err(Error::DegenerateState(DegenerateStateError::ZeroTrackDensity))
    ));
    assert!(model.snapshot().is_err());
}

#[test]
fn test_remove_untracked_shrinks_mask() {
    let volume = crossing_voxel(1.0, 3.0);
    let tracks = vec![x_track(0.0, 1.0)];

    let all = build(&volume, &tracks);
    assert_eq!(all.proc_mask_size(), 2);
    assert!((all.fod_sum() - 4.0).abs() < TOL);

    let config = ModelConfig {
        remove_untracked: true,
        ..Default::default()
    };
    let tracked = Model::initialize(&volume, &tracks, &config).unwrap();
    assert_eq!(tracked.proc_mask_size(), 1);
    assert!((tracked.fod_sum() - 1.0).abs() < TOL);
    assert!((tracked.current_mu().unwrap() - 1.0).abs() < TOL);
}

#[test]
fn test_min_fod_excludes_small_fixels() {
    let volume = crossing_voxel(1.0, 0.05);
    let config = ModelConfig {
        min_fod: 0.1,
        ..Default::default()
    };
    let model = Model::initialize(&volume, &[x_track(0.0, 1.0)], &config).unwrap();
    assert!(model.in_proc_mask(0));
    assert!(!model.in_proc_mask(1));
}

#[test]
fn test_fixel_weight_scales_sums() {
    let mut volume = FixelVolume::new([1, 1, 1], 1.0);
    volume.push_lobe([0, 0, 0], Lobe::new(2.0, Vec3::X).with_weight(0.5));
    let model = build(&volume, &[x_track(0.0, 1.0), y_track(0.0, 1.0)]);

    // The y track still maps onto the only fixel in the voxel.
    assert!((model.fod_sum() - 1.0).abs() < TOL);
    assert!((model.td_sum() - 1.0).abs() < TOL);
    assert!((model.contribution(0).unwrap().total_contribution() - 0.5).abs() < TOL);
}

#[test]
fn test_output_fixel_stats() {
    let (volume, tracks) = hand_scenario();
    let model = build(&volume, &tracks);
    let mut buffer = Vec::new();
    model.output_fixel_stats(&mut buffer).unwrap();

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "fixel,x,y,z,fod,td,scaled_td,in_mask");
    assert!(lines[1].starts_with("0,0,0,0,1,"));
    assert!(lines[2].ends_with(",1"));
}
