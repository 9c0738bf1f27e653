//! Building puzzles from configuration with simulated backends.

use pzp_hardware::{build_puzzle, registry, PuzzleConfig};
use serde_json::{json, Value};

fn config(text: &str) -> PuzzleConfig {
    toml::from_str(text).unwrap()
}

#[tokio::test]
async fn test_debug_puzzle_builds_without_hardware() {
    let config = config(
        r#"
        debug = true

        [[pieces]]
        name = "laser"
        kind = "lightcon.pharos"

        [[pieces]]
        name = "spec"
        kind = "princeton.lightfield"

        [[pieces]]
        name = "slm"
        kind = "holoeye.slm"
        defaults = { wavelength = 780.0 }
        "#,
    );
    let mut puzzle = build_puzzle(&config, &registry()).await.unwrap();
    assert_eq!(puzzle.names(), vec!["laser", "spec", "slm"]);
    assert_eq!(
        puzzle.param("slm:wavelength").unwrap().value_json().unwrap(),
        json!(780.0)
    );
    assert_eq!(puzzle.format("{spec:filename}_{slm:wavelength}"), "jdr_780.0");
    puzzle.close().await.unwrap();
}

#[tokio::test]
async fn test_simulated_stage_moves() {
    let config = config(
        r#"
        [[pieces]]
        name = "stage"
        kind = "thorlabs.apt_stage"
        settings = { simulate = true, serial = "27000001" }
        "#,
    );
    let mut puzzle = build_puzzle(&config, &registry()).await.unwrap();
    let connected = puzzle.param("stage:connected").unwrap();
    assert_eq!(connected.set_json(json!(true)).await.unwrap(), json!(true));

    let pos = puzzle.param("stage:pos").unwrap();
    assert_eq!(pos.set_json(json!(12.5)).await.unwrap(), json!(12.5));
    assert_eq!(
        puzzle.run_action("stage", "Home", Value::Null).await.unwrap(),
        json!(0.0)
    );
    puzzle.close().await.unwrap();
}

#[tokio::test]
async fn test_simulated_dmd_sequence() {
    let config = config(
        r#"
        [[pieces]]
        name = "dmd"
        kind = "vialux.dmd_advanced"
        settings = { simulate = true, simulated_size = [4, 2] }
        defaults = { illumination_time = 5000 }
        "#,
    );
    let mut puzzle = build_puzzle(&config, &registry()).await.unwrap();
    assert_eq!(
        puzzle.param("dmd:illumination_time").unwrap().value_json().unwrap(),
        json!(5000)
    );

    puzzle
        .param("dmd:connected")
        .unwrap()
        .set_json(json!(true))
        .await
        .unwrap();
    let err = puzzle
        .run_action("dmd", "Run Sequence", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please set the n_images param.");

    puzzle
        .param("dmd:n_images")
        .unwrap()
        .set_json(json!(2))
        .await
        .unwrap();
    puzzle
        .run_action("dmd", "Run Sequence", json!({ "loop": false }))
        .await
        .unwrap();
    puzzle.close().await.unwrap();
}

#[tokio::test]
async fn test_simulated_spectrometer_reads() {
    let config = config(
        r#"
        [[pieces]]
        name = "spectrometer"
        kind = "oceanoptics.spectrometer"
        settings = { simulate = true, device = "<SeaBreezeDevice USB2000PLUS:FLMS12345>" }
        "#,
    );
    let mut puzzle = build_puzzle(&config, &registry()).await.unwrap();
    puzzle
        .param("spectrometer:connected")
        .unwrap()
        .set_json(json!(true))
        .await
        .unwrap();
    let values = puzzle
        .param("spectrometer:values")
        .unwrap()
        .get_json()
        .await
        .unwrap();
    assert_eq!(values["data"].as_array().map(Vec::len), Some(16));
    puzzle.close().await.unwrap();
}

#[tokio::test]
async fn test_bad_settings_name_the_piece() {
    let config = config(
        r#"
        debug = true

        [[pieces]]
        name = "shutter"
        kind = "thorlabs.sc10"
        settings = { baud = 115200 }
        "#,
    );
    let err = build_puzzle(&config, &registry()).await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to build piece 'shutter'");
    assert!(format!("{err:#}").contains("Invalid settings for thorlabs.sc10"));
}

#[tokio::test]
async fn test_unknown_kind() {
    let config = config(
        r#"
        [[pieces]]
        name = "laser"
        kind = "acme.laser"
        "#,
    );
    let err = build_puzzle(&config, &registry()).await.unwrap_err();
    assert!(format!("{err:#}").contains("Unknown piece kind 'acme.laser'"));
}
