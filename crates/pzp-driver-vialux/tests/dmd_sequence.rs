//! DMD call ordering against the in-memory ALP library.

use ndarray::{Array2, Array3};
use pzp_core::sdk;
use pzp_core::{Piece, Puzzle};
use pzp_driver_vialux::dmd::{ProjectionMode, SharedAlp, TriggerEdge};
use pzp_driver_vialux::mock::{AlpCall, MockAlp};
use pzp_driver_vialux::{Dmd, DmdMode};
use serde_json::{json, Value};
use std::sync::Arc;

async fn connected(mode: DmdMode) -> (Puzzle, Arc<Dmd>, Arc<MockAlp>) {
    let alp = Arc::new(MockAlp::new(4, 2));
    let mut puzzle = Puzzle::new(false);
    let dmd = Arc::new(Dmd::new(
        puzzle.context(),
        sdk::fixed(alp.clone() as SharedAlp),
        mode,
    ));
    puzzle
        .add_piece("dmd", dmd.clone() as Arc<dyn Piece>)
        .await
        .unwrap();
    dmd.connected().set(true).await.unwrap();
    (puzzle, dmd, alp)
}

#[tokio::test]
async fn test_connect_allocates_and_blanks() {
    let (_puzzle, dmd, alp) = connected(DmdMode::Basic).await;
    assert_eq!(dmd.size(), (4, 2));
    assert_eq!(
        alp.calls(),
        vec![
            AlpCall::Initialize("4.3".into()),
            AlpCall::SeqAlloc(1, 1, 1),
            AlpCall::Halt,
            AlpCall::SeqPut(1, 8),
            AlpCall::Run(1, true),
        ]
    );
    assert_eq!(dmd.image().value(), Array2::<u8>::zeros((2, 4)));
}

#[tokio::test]
async fn test_image_is_uploaded_row_major() {
    let (_puzzle, dmd, alp) = connected(DmdMode::Basic).await;
    let image = Array2::from_shape_fn((2, 4), |(r, c)| (r * 4 + c) as u8);
    dmd.image().set(image).await.unwrap();
    assert_eq!(alp.uploaded(1), Some((0..8).collect()));

    dmd.actions().run("White", Value::Null).await.unwrap();
    assert_eq!(alp.uploaded(1), Some(vec![255; 8]));
}

#[tokio::test]
async fn test_image_shape_is_checked() {
    let (_puzzle, dmd, _alp) = connected(DmdMode::Basic).await;
    assert!(dmd.image().set(Array2::zeros((4, 2))).await.is_err());
    assert_eq!(dmd.image().value(), Array2::<u8>::zeros((2, 4)));
}

#[tokio::test]
async fn test_sequence_requires_n_images() {
    let (_puzzle, dmd, _alp) = connected(DmdMode::Advanced).await;
    let err = dmd
        .actions()
        .run("Run Sequence", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please set the n_images param.");
    assert!(err.is_precondition());
    assert!(dmd.illumination_time().unwrap().set(2000).await.is_err());
}

#[tokio::test]
async fn test_sequence_upload_and_run() {
    let (_puzzle, dmd, alp) = connected(DmdMode::Advanced).await;
    dmd.n_images().unwrap().set(3).await.unwrap();
    assert_eq!(dmd.preview_i().unwrap().metadata().max_value, Some(2.0));

    let calls = alp.calls();
    assert_eq!(
        calls[calls.len() - 3..],
        [
            AlpCall::SeqAlloc(3, 1, 2),
            AlpCall::SetTiming(1, 10_000),
            AlpCall::SetTiming(2, 10_000),
        ]
    );

    let images = Array3::from_elem((3, 2, 4), 1u8);
    dmd.image_sequence().unwrap().set(images).await.unwrap();
    assert_eq!(alp.uploaded(2), Some(vec![1; 24]));

    dmd.actions()
        .run("Run Sequence", json!({ "loop": true }))
        .await
        .unwrap();
    assert_eq!(alp.calls().last(), Some(&AlpCall::Run(2, true)));

    dmd.n_images().unwrap().set(2).await.unwrap();
    assert!(alp.calls().contains(&AlpCall::FreeSeq(2)));
    assert_eq!(alp.allocated(), vec![1, 3]);
}

#[tokio::test]
async fn test_slave_mode_sets_trigger_edge() {
    let (_puzzle, dmd, alp) = connected(DmdMode::Advanced).await;
    dmd.slave().unwrap().set(true).await.unwrap();
    dmd.slave().unwrap().set(false).await.unwrap();
    let calls = alp.calls();
    assert_eq!(
        calls[calls.len() - 3..],
        [
            AlpCall::ProjectionMode(ProjectionMode::Slave),
            AlpCall::TriggerEdge(TriggerEdge::Rising),
            AlpCall::ProjectionMode(ProjectionMode::Master),
        ]
    );
}

#[tokio::test]
async fn test_disconnect_frees_everything() {
    let (_puzzle, dmd, alp) = connected(DmdMode::Advanced).await;
    dmd.n_images().unwrap().set(2).await.unwrap();
    dmd.connected().set(false).await.unwrap();
    let calls = alp.calls();
    assert_eq!(
        calls[calls.len() - 4..],
        [
            AlpCall::Halt,
            AlpCall::FreeSeq(2),
            AlpCall::FreeSeq(1),
            AlpCall::Free,
        ]
    );
    assert!(alp.allocated().is_empty());

    dmd.handle_close().await.unwrap();
    assert_eq!(alp.calls().len(), calls.len());
}
