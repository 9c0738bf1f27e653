//! Camera call ordering against the in-memory TSI SDK.

use ndarray::Array1;
use pzp_core::sdk;
use pzp_core::{Piece, PuzzleContext};
use pzp_driver_thorlabs::camera::{SharedTlc, GLOBAL_KEY};
use pzp_driver_thorlabs::mock::{CameraCall, MockTlcCamera, MockTlcSdk};
use pzp_driver_thorlabs::{Camera, CameraVariant};
use serde_json::json;
use std::sync::Arc;

async fn opened(ctx: &PuzzleContext, sdk_: &Arc<MockTlcSdk>) -> (Camera, Arc<MockTlcCamera>) {
    let camera = Camera::new(
        ctx.clone(),
        sdk::fixed(sdk_.clone() as SharedTlc),
        CameraVariant::Preview,
    );
    camera.setup().await.unwrap();
    camera.serial().set_cached("08153".into()).unwrap();
    camera.connected().set(true).await.unwrap();
    let handle = sdk_.camera().unwrap();
    (camera, handle)
}

#[tokio::test]
async fn test_image_arms_and_triggers() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, handle) = opened(&PuzzleContext::new(false), &sdk_).await;

    let image = camera.image().get_value().await.unwrap();
    assert_eq!(image.dim(), (6, 8));
    // frames come out mirrored left to right
    assert_eq!(image[[0, 0]], 7.0);
    assert_eq!(image[[0, 7]], 0.0);
    assert!(camera.armed().value());
    assert_eq!(
        handle.calls(),
        vec![
            CameraCall::FramesPerTrigger(1),
            CameraCall::Arm(2),
            CameraCall::Trigger,
        ]
    );
}

#[tokio::test]
async fn test_roi_disarms_first() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, handle) = opened(&PuzzleContext::new(false), &sdk_).await;
    camera.image().get_value().await.unwrap();

    let roi = camera.roi().set(Array1::from(vec![2, 2, 5, 4])).await.unwrap();
    assert_eq!(roi.to_vec(), vec![2, 2, 5, 4]);
    assert!(!camera.armed().value());
    let calls = handle.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(tail, &[CameraCall::Disarm, CameraCall::SetRoi([2, 2, 5, 4])]);

    let image = camera.image().get_value().await.unwrap();
    assert_eq!(image.dim(), (3, 4));
}

#[tokio::test]
async fn test_unlimited_triggers_once() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, handle) = opened(&PuzzleContext::new(false), &sdk_).await;
    camera.unlimited().set(true).await.unwrap();

    camera.image().get_value().await.unwrap();
    // no second trigger is issued, so no second frame arrives
    let err = camera.image().get_value().await.unwrap_err();
    assert!(err.to_string().starts_with("Acquisition did not complete"));
    let triggers = handle
        .calls()
        .into_iter()
        .filter(|c| *c == CameraCall::Trigger)
        .count();
    assert_eq!(triggers, 1);
    assert!(handle.calls().contains(&CameraCall::FramesPerTrigger(0)));
}

#[tokio::test]
async fn test_background_subtraction() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, _handle) = opened(&PuzzleContext::new(false), &sdk_).await;

    camera.actions().run("Take background", json!(null)).await.unwrap();
    camera.sub_background().set(true).await.unwrap();
    let image = camera.image().get_value().await.unwrap();
    assert!(image.iter().all(|v| *v == 0.0));

    camera.roi().set(Array1::from(vec![0, 0, 3, 3])).await.unwrap();
    let err = camera.image().get_value().await.unwrap_err();
    assert!(err.is_precondition(), "{err}");
}

#[tokio::test]
async fn test_set_roi_action_clamps_to_image() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, _handle) = opened(&PuzzleContext::new(false), &sdk_).await;
    camera.image().get_value().await.unwrap();

    let roi = camera
        .actions()
        .run("Set ROI", json!({"x": -1.0, "y": 1.0, "width": 20.0, "height": 2.0}))
        .await
        .unwrap();
    assert_eq!(roi, json!([0, 1, 7, 2]));
}

#[tokio::test]
async fn test_last_camera_disposes_sdk() {
    let ctx = PuzzleContext::new(false);
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (first, first_handle) = opened(&ctx, &sdk_).await;
    let (second, second_handle) = opened(&ctx, &sdk_).await;
    assert_eq!(ctx.globals().users(GLOBAL_KEY), 2);

    first.handle_close().await.unwrap();
    assert!(first_handle.is_disposed());
    assert!(!sdk_.is_disposed());
    assert!(ctx.globals().contains(GLOBAL_KEY));

    second.handle_close().await.unwrap();
    assert!(second_handle.is_disposed());
    assert!(sdk_.is_disposed());
    assert!(!ctx.globals().contains(GLOBAL_KEY));
}

#[tokio::test]
async fn test_save_image_writes_png() {
    let sdk_ = Arc::new(MockTlcSdk::new());
    let (camera, _handle) = opened(&PuzzleContext::new(false), &sdk_).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.png");
    camera
        .actions()
        .run("Save image", json!({"filename": path}))
        .await
        .unwrap();
    let saved = image::open(&path).unwrap().to_luma8();
    assert_eq!(saved.dimensions(), (8, 6));
}
