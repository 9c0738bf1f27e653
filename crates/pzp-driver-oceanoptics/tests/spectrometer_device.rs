//! Spectrometer against the in-memory SeaBreeze.

use pzp_core::factory::{BuildContext, PieceFactory};
use pzp_core::sdk;
use pzp_core::{Piece, Puzzle};
use pzp_driver_oceanoptics::mock::{MockSeaBreeze, PIXELS};
use pzp_driver_oceanoptics::spectrometer::SharedSeaBreeze;
use pzp_driver_oceanoptics::{Spectrometer, SpectrometerFactory};
use std::sync::Arc;

fn piece(puzzle: &Puzzle, library: Arc<MockSeaBreeze>) -> Arc<Spectrometer> {
    Arc::new(Spectrometer::new(
        puzzle.context(),
        sdk::fixed(library as SharedSeaBreeze),
    ))
}

#[tokio::test]
async fn test_lists_and_opens_by_serial() {
    let library = Arc::new(MockSeaBreeze::new([
        ("USB2000PLUS", "FLMS12345"),
        ("HR4000", "HR4C0001"),
    ]));
    let puzzle = Puzzle::new(false);
    let spec = piece(&puzzle, library.clone());

    let options = spec.spectrometer().refresh_options().await.unwrap();
    assert_eq!(
        options,
        vec![
            "<SeaBreezeDevice USB2000PLUS:FLMS12345>",
            "<SeaBreezeDevice HR4000:HR4C0001>"
        ]
    );
    spec.spectrometer().set(options[1].clone()).await.unwrap();
    spec.connected().set(true).await.unwrap();
    assert_eq!(library.opened()[0].serial(), "HR4C0001");
}

#[tokio::test]
async fn test_values_update_wavelengths() {
    let library = Arc::new(MockSeaBreeze::default());
    let puzzle = Puzzle::new(false);
    let spec = piece(&puzzle, library);
    spec.spectrometer()
        .set("<SeaBreezeDevice USB2000PLUS:FLMS12345>".into())
        .await
        .unwrap();
    spec.connected().set(true).await.unwrap();

    let values = spec.values().get_value().await.unwrap();
    assert_eq!(values.len(), PIXELS);
    assert_eq!(values[PIXELS / 2], 1000.0);
    let wls = spec.wls().value();
    assert_eq!(wls.len(), PIXELS);
    assert_eq!(wls[1], 425.0);
}

#[tokio::test]
async fn test_unknown_serial_stays_disconnected() {
    let library = Arc::new(MockSeaBreeze::default());
    let puzzle = Puzzle::new(false);
    let spec = piece(&puzzle, library.clone());
    spec.spectrometer()
        .set("<SeaBreezeDevice USB2000PLUS:NOPE>".into())
        .await
        .unwrap();
    assert!(spec.connected().set(true).await.is_err());
    assert!(!spec.connected().value());
    assert!(library.opened().is_empty());
}

#[tokio::test]
async fn test_close_releases_device() {
    let library = Arc::new(MockSeaBreeze::default());
    let puzzle = Puzzle::new(false);
    let spec = piece(&puzzle, library.clone());
    spec.spectrometer()
        .set("<SeaBreezeDevice USB2000PLUS:FLMS12345>".into())
        .await
        .unwrap();
    spec.connected().set(true).await.unwrap();
    spec.handle_close().await.unwrap();
    assert!(library.opened()[0].is_closed());
    assert!(spec.values().get_value().await.is_err());
}

#[tokio::test]
async fn test_factory_simulate() {
    let settings = toml::Value::Table(toml::toml! {
        simulate = true
        device = "<SeaBreezeDevice USB2000PLUS:FLMS12345>"
    });
    let ctx = BuildContext::new(Puzzle::new(false).context());
    let piece = SpectrometerFactory.build(ctx, settings).await.unwrap();
    assert_eq!(piece.kind(), "oceanoptics.spectrometer");
    assert_eq!(
        piece.params().names(),
        vec!["spectrometer", "connected", "wls", "values"]
    );
}
