//! SLM against the in-memory HEDS SDK.

use ndarray::Array2;
use pzp_core::sdk;
use pzp_core::{Piece, PuzzleContext};
use pzp_driver_holoeye::mock::{MockHeds, SlmCall};
use pzp_driver_holoeye::slm::{SharedHeds, BLANK_SHAPE};
use pzp_driver_holoeye::Slm;
use std::sync::Arc;

async fn connected(heds: &Arc<MockHeds>) -> Slm {
    let slm = Slm::new(PuzzleContext::new(false), sdk::fixed(heds.clone() as SharedHeds));
    slm.setup().await.unwrap();
    slm.connected().set(true).await.unwrap();
    slm
}

#[tokio::test]
async fn test_connect_initialises_sdk() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    assert_eq!(heds.calls(), vec![SlmCall::Init(4, 1), SlmCall::Open]);
    assert_eq!(slm.image().value().dim(), BLANK_SHAPE);
}

#[tokio::test]
async fn test_image_is_loaded_then_shown() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    slm.image().set(Array2::zeros((4, 6))).await.unwrap();
    slm.image().set(Array2::ones((4, 6))).await.unwrap();
    assert_eq!(
        heds.calls()[2..],
        [
            SlmCall::LoadPhase(4, 6),
            SlmCall::Show(1),
            SlmCall::LoadPhase(4, 6),
            SlmCall::Show(2),
        ]
    );
    assert_eq!(slm.image().value(), Array2::<f64>::ones((4, 6)));
}

#[tokio::test]
async fn test_error_codes_use_sdk_text() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    heds.fail_show_with(7);
    let err = slm.image().set(Array2::ones((2, 2))).await.unwrap_err();
    assert_eq!(err.to_string(), "SLM error: HEDS error 7");
    assert_eq!(slm.image().value().dim(), BLANK_SHAPE);
}

#[tokio::test]
async fn test_wavelength_reads_back() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    assert_eq!(slm.wavelength().get_value().await.unwrap(), 532.0);
    assert_eq!(slm.wavelength().set(633.0).await.unwrap(), 633.0);
    assert!(heds.calls().contains(&SlmCall::SetWavelength(633.0)));
}

#[tokio::test]
async fn test_correction_file() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_string_lossy().into_owned();

    assert_eq!(slm.correction_file().set(path.clone()).await.unwrap(), path);
    assert_eq!(
        slm.correction_file().set("missing.h5".into()).await.unwrap(),
        ""
    );
    let calls = heds.calls();
    assert_eq!(
        calls[calls.len() - 2..],
        [
            SlmCall::LoadCompensation(file.path().to_path_buf()),
            SlmCall::ClearCompensation,
        ]
    );
}

#[tokio::test]
async fn test_disconnect_closes_sdk() {
    let heds = Arc::new(MockHeds::new());
    let slm = connected(&heds).await;
    slm.connected().set(false).await.unwrap();
    assert_eq!(heds.calls().last(), Some(&SlmCall::Close));
    let err = slm.wavelength().set(1.0).await.unwrap_err();
    assert_eq!(err.to_string(), "SLM not connected");
    slm.handle_close().await.unwrap();
    assert_eq!(
        heds.calls().iter().filter(|c| **c == SlmCall::Close).count(),
        1
    );
}
