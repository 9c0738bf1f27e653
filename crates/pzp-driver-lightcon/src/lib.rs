//! Light Conversion Pieces.
//!
//! - [`Pharos`]: femtosecond laser (output, pulse picker divider, standby)
//! - [`Topas`]: OPA wavelength and shutter
//!
//! Both talk to a REST API through [`pzp_core::http::HttpBase`].
//!
//! ```rust,ignore
//! use pzp_driver_lightcon::{PharosFactory, TopasFactory};
//!
//! registry.register(PharosFactory);
//! registry.register(TopasFactory);
//! ```

mod pharos;
mod topas;

pub use pharos::{HttpPieceSettings, Pharos, PharosFactory};
pub use topas::{Topas, TopasFactory};

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<PharosFactory>());
    std::hint::black_box(std::any::TypeId::of::<TopasFactory>());
}
