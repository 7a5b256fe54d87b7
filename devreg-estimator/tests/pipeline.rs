mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use devreg_brief::{filter_matches, match_descriptors};
use devreg_core::DepthImage;
use devreg_estimator::{
    build_correspondences, status, DepthResolver, DeviceEstimator, DeviceImageFrame, EstimatorConfig,
    FixedCameraFrame, PersistentEstimatorState, Pose, Rejection, UpdateOutcome,
};

const T0: Duration = Duration::from_secs(100);

fn estimator(config: EstimatorConfig) -> DeviceEstimator {
    DeviceEstimator::new("phone", config, Arc::new(setup())).unwrap()
}

fn run(est: &mut DeviceEstimator, scene: &Scene) -> UpdateOutcome {
    est.update_with_fixed_features(&scene.device_frame(), &scene.fixed, &scene.fixed_features, scene.device.timestamp)
}

#[test]
fn test_zero_noise_scene_is_accepted() {
    let pose = fixed_from_device(20.0);
    let scene = scene(&pose, 40, T0);
    let mut est = estimator(EstimatorConfig::default());

    let outcome = run(&mut est, &scene);
    assert_eq!(outcome.code(), status::ACCEPTED, "{:?}", outcome);
    let reg = outcome.registration().unwrap();

    assert_eq!(reg.inliers, 40);
    assert_eq!(reg.correspondences, 40);
    assert!(reg.reprojection_error < 1e-3, "{}", reg.reprojection_error);
    assert!((reg.orientation_deviation_deg - 20.0).abs() < 1e-3);
    assert_pose_close(&reg.device_from_fixed, &scene.device_from_fixed, 1e-4);
    assert_pose_close(&reg.fixed_from_device, &pose, 1e-4);
    assert_pose_close(&reg.world_from_device, &world_from_camera().compose(&pose), 1e-4);
    // The first smoothed sample is the measurement itself
    assert_eq!(reg.smoothed, Some(reg.world_from_tracking_origin));

    let state = est.state();
    assert!(state.has_estimate());
    assert_eq!(state.last_inliers(), 40);
    assert_eq!(state.last_transform(), Some(&reg.world_from_tracking_origin));
    assert_eq!(state.last_timestamp(), Some(T0));
}

#[test]
fn test_three_matches_are_insufficient() {
    let scene = scene(&fixed_from_device(10.0), 3, T0);
    let mut est = estimator(EstimatorConfig::default());

    let outcome = run(&mut est, &scene);
    assert_eq!(outcome.code(), status::INSUFFICIENT_MATCHES);
    assert_eq!(
        outcome,
        UpdateOutcome::Rejected(Rejection::InsufficientMatches { found: 3, required: 4 })
    );
    assert_eq!(est.state(), &PersistentEstimatorState::default());
}

#[test]
fn test_rejection_keeps_previous_estimate() {
    let mut est = estimator(EstimatorConfig::default());
    assert!(run(&mut est, &scene(&fixed_from_device(15.0), 32, T0)).is_accepted());
    let before = est.state().clone();

    let later = T0 + Duration::from_millis(200);
    let outcome = run(&mut est, &scene(&fixed_from_device(15.0), 3, later));
    assert_eq!(outcome.code(), status::INSUFFICIENT_MATCHES);
    assert_eq!(est.state(), &before);
}

#[test]
fn test_orientation_gate_rejects_60_degrees() {
    let scene = scene(&fixed_from_device(60.0), 40, T0);
    let mut est = estimator(EstimatorConfig::default());

    let outcome = run(&mut est, &scene);
    assert_eq!(outcome.code(), status::ORIENTATION_EXCEEDED, "{:?}", outcome);
    match outcome {
        UpdateOutcome::Rejected(Rejection::OrientationExceeded { angle_deg, threshold_deg }) => {
            assert!((angle_deg - 60.0).abs() < 1e-3);
            assert_eq!(threshold_deg, 45.0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!est.state().has_estimate());
}

#[test]
fn test_reprojection_gate() {
    let mut scene = scene(&fixed_from_device(20.0), 40, T0);
    for (j, kp) in scene.device.keypoints.iter_mut().enumerate() {
        kp.x += if j % 2 == 0 { 0.5 } else { -0.5 };
    }
    let config = EstimatorConfig {
        reprojection_error_discard_threshold: 0.01,
        ..EstimatorConfig::default()
    };
    let mut est = estimator(config);
    let outcome = run(&mut est, &scene);
    assert_eq!(outcome.code(), status::REPROJECTION_EXCEEDED, "{:?}", outcome);
    assert!(!est.state().has_estimate());
}

#[test]
fn test_height_gate() {
    let pose = fixed_from_device(20.0);
    let height = world_from_camera().compose(&pose).translation.z;
    let config = EstimatorConfig {
        max_pose_height: Some(height - 0.1),
        ..EstimatorConfig::default()
    };
    let mut est = estimator(config);
    let outcome = run(&mut est, &scene(&pose, 40, T0));
    assert_eq!(outcome.code(), status::HEIGHT_OUT_OF_RANGE, "{:?}", outcome);
}

#[test]
fn test_stale_device_frame_is_dropped() {
    let scene = scene(&fixed_from_device(20.0), 40, T0);
    let mut est = estimator(EstimatorConfig::default());
    let outcome = est.update_with_fixed_features(
        &scene.device_frame(),
        &scene.fixed,
        &scene.fixed_features,
        T0 + Duration::from_secs(6),
    );
    assert_eq!(outcome.code(), status::STALE_FRAME);
}

#[test]
fn test_repeated_updates_are_seeded_and_smoothed() {
    let pose = fixed_from_device(20.0);
    let mut est = estimator(EstimatorConfig::default());
    for k in 0..5u64 {
        let scene = scene(&pose, 40, T0 + Duration::from_millis(100 * k));
        let outcome = run(&mut est, &scene);
        let reg = outcome.registration().unwrap();
        assert_pose_close(&reg.device_from_fixed, &scene.device_from_fixed, 1e-4);
        let smoothed = reg.smoothed.unwrap();
        assert!((smoothed.translation - reg.world_from_tracking_origin.translation).norm() < 1e-3);
    }
    assert!(est.smoothed_pose().is_ok());
}

#[test]
fn test_pipeline_is_deterministic() {
    let scene = scene(&fixed_from_device(25.0), 40, T0);
    let mut a = estimator(EstimatorConfig::default());
    let mut b = estimator(EstimatorConfig::default());
    assert_eq!(run(&mut a, &scene), run(&mut b, &scene));
    assert_eq!(a.state(), b.state());
}

#[test]
fn test_zero_depth_repaired_from_neighbour() {
    let pose = fixed_from_device(20.0);
    let scene = scene(&pose, 40, T0);

    // Keypoint 10 sits at (220, 150); move its depth 5 px to the right
    let (width, height) = scene.fixed.depth().dimensions();
    let mut raw = scene.fixed.depth().as_raw().to_vec();
    let value = raw[150 * width + 220];
    assert_eq!(value, 1870);
    raw[150 * width + 220] = 0;
    raw[150 * width + 225] = value;
    let fixed = FixedCameraFrame::new(
        scene.fixed.image().clone(),
        DepthImage::from_millimetres(width, height, raw).unwrap(),
        T0,
    )
    .unwrap();

    let device = scene.device_frame();
    let matches = filter_matches(
        &match_descriptors(device.features().descriptors(), scene.fixed_features.descriptors()),
        25,
    );
    let corr = build_correspondences(
        &matches,
        device.features().keypoints(),
        scene.fixed_features.keypoints(),
        fixed.depth(),
        &FIXED_K,
        &DepthResolver::default(),
    )
    .unwrap();
    let idx = corr.matches.iter().position(|m| m.train_idx == 10).unwrap();
    assert!((corr.points[idx].z - 1.870).abs() < 1e-9);
    assert!(fixed.depth().as_raw()[150 * width + 220] == 0);

    let mut est = estimator(EstimatorConfig::default());
    let outcome = est.update_with_fixed_features(&device, &fixed, &scene.fixed_features, T0);
    let reg = outcome.registration().unwrap();
    assert_eq!(reg.inliers, 40);
    assert_pose_close(&reg.device_from_fixed, &scene.device_from_fixed, 1e-4);
}

#[test]
fn test_raw_image_path_recovers_identity() {
    let image = textured_image(WIDTH, HEIGHT);
    let depth = DepthImage::from_millimetres(WIDTH, HEIGHT, vec![2000; WIDTH * HEIGHT]).unwrap();
    let fixed = FixedCameraFrame::new(image.clone(), depth, T0).unwrap();
    let mut est = estimator(EstimatorConfig::default());

    let frame = DeviceImageFrame {
        image,
        intrinsics: FIXED_K,
        pose: Pose::identity(),
        timestamp: T0,
    };
    let outcome = est.update_with_image(frame, &fixed, T0);
    assert_eq!(outcome.code(), status::ACCEPTED, "{:?}", outcome);
    let reg = outcome.registration().unwrap();
    assert!(reg.inliers >= 20, "{}", reg.inliers);
    assert_pose_close(&reg.device_from_fixed, &Pose::identity(), 1e-6);
    assert!(reg.orientation_deviation_deg < 1e-4);
}
