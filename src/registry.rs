//! Every Piece kind this workspace ships.

use pzp_core::PieceRegistry;
use pzp_driver_holoeye::SlmFactory;
use pzp_driver_lightcon::{PharosFactory, TopasFactory};
use pzp_driver_oceanoptics::SpectrometerFactory;
use pzp_driver_princeton::LightFieldFactory;
use pzp_driver_thorlabs::{
    AptPiezoFactory, AptStageFactory, CameraFactory, PowermeterFactory, Sc10Factory,
};
use pzp_driver_vialux::DmdFactory;

/// Registry with all vendor factories.
pub fn registry() -> PieceRegistry {
    pzp_driver_lightcon::link();
    pzp_driver_thorlabs::link();
    pzp_driver_princeton::link();
    pzp_driver_holoeye::link();
    pzp_driver_vialux::link();
    pzp_driver_oceanoptics::link();

    let mut registry = PieceRegistry::new();
    registry.register(PharosFactory);
    registry.register(TopasFactory);
    registry.register(Sc10Factory);
    registry.register(AptStageFactory);
    registry.register(AptPiezoFactory);
    registry.register(PowermeterFactory);
    registry.register(CameraFactory);
    registry.register(LightFieldFactory);
    registry.register(SlmFactory);
    registry.register(DmdFactory::BASIC);
    registry.register(DmdFactory::ADVANCED);
    registry.register(SpectrometerFactory);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_kinds_registered() {
        let kinds: Vec<_> = registry().kinds().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                "holoeye.slm",
                "lightcon.pharos",
                "lightcon.topas",
                "oceanoptics.spectrometer",
                "princeton.lightfield",
                "thorlabs.apt_piezo",
                "thorlabs.apt_stage",
                "thorlabs.camera",
                "thorlabs.powermeter",
                "thorlabs.sc10",
                "vialux.dmd",
                "vialux.dmd_advanced",
            ]
        );
    }

    #[test]
    fn test_unknown_kind() {
        let err = registry().get("acme.laser").err().unwrap();
        assert_eq!(err.to_string(), "Unknown piece kind 'acme.laser'");
    }
}
