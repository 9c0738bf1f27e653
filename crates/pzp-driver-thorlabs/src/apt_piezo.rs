//! APT piezo inertia actuator controllers.
//!
//! Each axis is an integer spinbox bound to a controller channel. Reads and
//! moves select the channel first.

use crate::apt::{AptBase, AptDevice, SharedApt};
use async_trait::async_trait;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{param, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult, PuzzleContext};
use serde::Deserialize;

/// Channel layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiezoLayout {
    /// `x` on channel 0, `y` on channel 1 (one mirror).
    #[default]
    Single,
    /// `x1`, `y1`, `x2`, `y2` on channels 0 to 3 (two mirrors).
    Double,
}

impl PiezoLayout {
    /// (name, channel) pairs.
    pub fn channels(self) -> Vec<(String, i64)> {
        let names: &[&str] = match self {
            Self::Single => &["x", "y"],
            Self::Double => &["x1", "y1", "x2", "y2"],
        };
        names
            .iter()
            .zip(0..)
            .map(|(name, i)| (name.to_string(), i))
            .collect()
    }
}

/// APT piezo Piece.
pub struct AptPiezo {
    base: AptBase,
    channels: Vec<Parameter<i64>>,
    params: ParameterSet,
    actions: ActionSet,
}

fn apt_error(apt: &SharedApt, what: &str, code: i32) -> PieceError {
    PieceError::hardware(format!("{what}: {}", apt.error_text(code)))
}

async fn select_channel(apt: &SharedApt, serial: i64, channel: i64) -> PieceResult<()> {
    let code = {
        let apt = apt.clone();
        run_blocking(move || Ok(apt.pz_set_channel(serial, channel))).await?
    };
    if code != 0 {
        return Err(apt_error(apt, "Failed to select channel", code));
    }
    Ok(())
}

impl AptPiezo {
    /// Piece with one of the stock layouts.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedApt>, layout: PiezoLayout) -> Self {
        Self::with_channels(ctx, loader, layout.channels())
    }

    /// Piece with custom (name, channel) axes.
    pub fn with_channels(
        ctx: PuzzleContext,
        loader: SdkLoader<SharedApt>,
        channels: Vec<(String, i64)>,
    ) -> Self {
        let base = AptBase::new(ctx, loader, AptDevice::Piezo);
        let mut params = ParameterSet::new();
        base.register_params(&mut params);

        let channels: Vec<_> = channels
            .into_iter()
            .map(|(name, channel)| {
                let param = make_channel(&base, name, channel);
                params.register(param.clone());
                param
            })
            .collect();

        let mut actions = ActionSet::new();
        base.register_actions(&mut actions);

        Self {
            base,
            channels,
            params,
            actions,
        }
    }

    /// Shared APT parameters.
    pub fn base(&self) -> &AptBase {
        &self.base
    }

    /// Axis parameter by name.
    pub fn channel(&self, name: &str) -> Option<&Parameter<i64>> {
        self.channels.iter().find(|p| p.name() == name)
    }
}

fn make_channel(base: &AptBase, name: String, channel: i64) -> Parameter<i64> {
    let debug = base.debug();
    let axis = param::spinbox(name, 0i64);

    let (base_, cached) = (base.clone(), axis.clone());
    axis.set_setter(move |value: i64| {
        let (base, cached) = (base_.clone(), cached.clone());
        async move {
            base.ensure()?;
            if debug {
                return Ok(Some(value));
            }
            // APT crashes when asked to move to where it already is
            if cached.value() == value {
                return Ok(Some(value));
            }
            let (apt, serial) = (base.library()?, base.piezo()?);
            select_channel(&apt, serial, channel).await?;
            let code = {
                let apt = apt.clone();
                run_blocking(move || Ok(apt.pz_move_absolute_steps(serial, value, true))).await?
            };
            if code != 0 {
                return Err(apt_error(&apt, "Failed to move the piezo", code));
            }
            Ok(None)
        }
    });

    let (base_, cached) = (base.clone(), axis.clone());
    axis.set_getter(move || {
        let (base, cached) = (base_.clone(), cached.clone());
        async move {
            base.ensure()?;
            if debug {
                return Ok(cached.value());
            }
            let (apt, serial) = (base.library()?, base.piezo()?);
            select_channel(&apt, serial, channel).await?;
            let position = {
                let apt = apt.clone();
                run_blocking(move || Ok(apt.pz_get_position_steps(serial))).await?
            };
            position.map_err(|code| apt_error(&apt, "Failed to get the piezo value", code))
        }
    });
    axis
}

#[async_trait]
impl Piece for AptPiezo {
    fn kind(&self) -> &'static str {
        "thorlabs.apt_piezo"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        self.base.ensure_apt().map(|_| ())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        self.base.cleanup();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockApt, PiezoCall};
    use pzp_core::sdk;
    use std::sync::Arc;

    async fn connected(apt: &Arc<MockApt>, layout: PiezoLayout) -> AptPiezo {
        let piezo = AptPiezo::new(
            PuzzleContext::new(false),
            sdk::fixed(apt.clone() as SharedApt),
            layout,
        );
        piezo.base().serial().set_cached("97000001".into()).unwrap();
        piezo.base().connected().set(true).await.unwrap();
        piezo
    }

    #[test]
    fn test_layouts() {
        let double = AptPiezo::new(
            PuzzleContext::new(true),
            sdk::unavailable("APT", None),
            PiezoLayout::Double,
        );
        assert_eq!(
            double.params().names(),
            vec!["serial", "connected", "x1", "y1", "x2", "y2"]
        );
        assert_eq!(
            PiezoLayout::Single.channels(),
            vec![("x".to_string(), 0), ("y".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_move_selects_channel_first() {
        let apt = Arc::new(MockApt::new());
        let piezo = connected(&apt, PiezoLayout::Single).await;
        assert_eq!(piezo.channel("y").unwrap().set(150).await.unwrap(), 150);
        assert_eq!(
            apt.piezo_calls(),
            vec![
                PiezoCall::Init(97000001),
                PiezoCall::SetChannel(97000001, 1),
                PiezoCall::Move(97000001, 150),
                PiezoCall::SetChannel(97000001, 1),
                PiezoCall::GetPosition(97000001),
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_value_skips_hardware() {
        let apt = Arc::new(MockApt::new());
        let piezo = connected(&apt, PiezoLayout::Single).await;
        piezo.channel("x").unwrap().set(0).await.unwrap();
        assert_eq!(apt.piezo_calls(), vec![PiezoCall::Init(97000001)]);
    }

    #[tokio::test]
    async fn test_error_codes_are_reported() {
        let apt = Arc::new(MockApt::new());
        let piezo = connected(&apt, PiezoLayout::Single).await;
        apt.fail_piezo_with(10004);
        let err = piezo.channel("x").unwrap().set(5).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to select channel: APT error 10004");

        let apt = Arc::new(MockApt::new());
        apt.fail_piezo_with(10002);
        let piezo = AptPiezo::new(
            PuzzleContext::new(false),
            sdk::fixed(apt.clone() as SharedApt),
            PiezoLayout::Single,
        );
        piezo.base().serial().set_cached("97000001".into()).unwrap();
        let err = piezo.base().connected().set(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to connect to piezo: APT error 10002");
    }
}
