//! LightField sequencing against the in-memory automation.

use ndarray::Array1;
use pzp_core::sdk;
use pzp_core::{Piece, Puzzle};
use pzp_driver_princeton::lightfield::{Automation, Setting, SettingValue, SharedAutomation};
use pzp_driver_princeton::mock::{ExperimentCall, MockLightField};
use pzp_driver_princeton::LightField;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

async fn launched(
    output: &Path,
    background: Option<&Path>,
) -> (Puzzle, Arc<LightField>, Arc<MockLightField>) {
    let automation = Arc::new(MockLightField::new(output));
    let mut puzzle = Puzzle::new(false);
    let piece = Arc::new(LightField::new(
        puzzle.context(),
        sdk::fixed(automation.clone() as SharedAutomation),
        background.map(Path::to_path_buf),
    ));
    puzzle
        .add_piece("spec", piece.clone() as Arc<dyn Piece>)
        .await
        .unwrap();
    piece.actions().run("Launch", Value::Null).await.unwrap();
    (puzzle, piece, automation)
}

#[tokio::test]
async fn test_integration_stops_and_selects_background() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("500.spe"), b"").unwrap();
    let (_puzzle, piece, automation) = launched(dir.path(), Some(dir.path())).await;

    assert_eq!(piece.integration().set(500).await.unwrap(), 500);
    let background = dir.path().join("500.spe").to_string_lossy().into_owned();
    assert_eq!(
        automation.experiment().calls(),
        vec![
            ExperimentCall::Stop,
            ExperimentCall::Set(Setting::ExposureTime, SettingValue::Int(500)),
            ExperimentCall::Set(Setting::BackgroundReferenceFile, SettingValue::Text(background)),
            ExperimentCall::Stop,
            ExperimentCall::Get(Setting::ExposureTime),
        ]
    );
}

#[tokio::test]
async fn test_missing_background_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_puzzle, piece, _automation) = launched(dir.path(), Some(dir.path())).await;
    let err = piece.integration().set(750).await.unwrap_err();
    assert_eq!(err.to_string(), "A background file doesn't exist");
    assert_eq!(piece.integration().value(), 300);
}

#[tokio::test]
async fn test_settings_wait_for_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (_puzzle, piece, automation) = launched(dir.path(), None).await;
    automation.experiment().run_after_stop(3);
    assert_eq!(piece.center().set(880).await.unwrap(), 880);
    assert_eq!(automation.experiment().pending_polls(), 0);
    assert_eq!(piece.roi().get_value().await.unwrap(), 1);
}

#[tokio::test]
async fn test_values_are_binned() {
    let dir = tempfile::tempdir().unwrap();
    let (_puzzle, piece, _automation) = launched(dir.path(), None).await;
    assert_eq!(piece.wls().value().len(), 200);

    let values = piece.values().get_value().await.unwrap();
    assert_eq!(values.dim(), (4, 100));
    let wls = piece.wls().value();
    assert_eq!(wls.len(), 100);
    assert_eq!(wls[0], 500.5);
    assert_eq!(wls[1], 501.5);
    assert_eq!(piece.saturated().get_value().await.unwrap(), 0);
}

#[tokio::test]
async fn test_acquire_saves_and_loads() {
    let dir = tempfile::tempdir().unwrap();
    let (_puzzle, piece, automation) = launched(dir.path(), None).await;
    piece
        .filename()
        .set("C:/data/{spec:center}_scan".into())
        .await
        .unwrap();

    let saved = piece.actions().run("Acquire", Value::Null).await.unwrap();
    let expected = dir.path().join("875_scan.spe");
    assert_eq!(saved, Value::String(expected.to_string_lossy().into_owned()));
    assert!(automation.experiment().calls().contains(&ExperimentCall::Set(
        Setting::BaseFileName,
        SettingValue::Text("875_scan".into())
    )));
    assert_eq!(automation.loaded(), vec![expected]);
    assert_eq!(automation.experiment().pending_polls(), 0);
    assert_eq!(piece.counts().value(), 70.0);
    assert_eq!(piece.values().value().dim(), (1, 10));
    assert_eq!(piece.wls().value(), Array1::range(0.0, 10.0, 1.0));
}

#[tokio::test]
async fn test_close_warns_while_window_open() {
    let dir = tempfile::tempdir().unwrap();
    let (_puzzle, piece, automation) = launched(dir.path(), None).await;
    assert!(automation.window_open());
    piece.handle_close().await.unwrap();
}
