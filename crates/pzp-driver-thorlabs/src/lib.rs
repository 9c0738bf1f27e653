//! Thorlabs Pieces.
//!
//! - [`Sc10`]: SC10 shutter controller over a serial port
//! - [`AptStage`], [`AptPiezo`]: APT motor and piezo controllers
//! - [`Powermeter`]: PM100-family meters through TLPM
//! - [`Camera`]: TSI scientific cameras with image preview
//!
//! The SDK-backed Pieces talk to their SDK through the traits in
//! [`apt`], [`powermeter`] and [`camera`]. [`mock`] provides in-memory
//! implementations, selected with `simulate = true`.

pub mod apt;
mod apt_piezo;
mod apt_stage;
pub mod camera;
mod factory;
pub mod mock;
pub mod powermeter;
mod sc10;

pub use apt_piezo::{AptPiezo, PiezoLayout};
pub use apt_stage::AptStage;
pub use camera::{Camera, CameraVariant};
pub use factory::{
    AptPiezoFactory, AptPiezoSettings, AptStageFactory, AptStageSettings, CameraFactory,
    CameraSettings, ChannelSetting, PowermeterFactory, PowermeterSettings,
};
pub use powermeter::Powermeter;
pub use sc10::{Sc10, Sc10Factory, SerialPieceSettings};

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Sc10Factory>());
    std::hint::black_box(std::any::TypeId::of::<AptStageFactory>());
    std::hint::black_box(std::any::TypeId::of::<AptPiezoFactory>());
    std::hint::black_box(std::any::TypeId::of::<PowermeterFactory>());
    std::hint::black_box(std::any::TypeId::of::<CameraFactory>());
}
