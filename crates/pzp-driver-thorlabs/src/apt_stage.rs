//! APT motorised stage.

use crate::apt::{AptBase, AptDevice, SharedApt};
use async_trait::async_trait;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceResult, PuzzleContext};
use serde_json::Value;

/// APT stage Piece.
pub struct AptStage {
    base: AptBase,
    pos: Parameter<f64>,
    params: ParameterSet,
    actions: ActionSet,
}

impl AptStage {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedApt>) -> Self {
        let base = AptBase::new(ctx, loader, AptDevice::Stage);
        let debug = base.debug();

        let pos = param::spinbox("pos", 0.0);
        let base_ = base.clone();
        pos.set_setter(move |value: f64| {
            let base = base_.clone();
            async move {
                base.ensure()?;
                if debug {
                    return Ok(Some(value));
                }
                let motor = base.motor()?;
                run_blocking(move || motor.move_to(value, true)).await?;
                Ok(None)
            }
        });
        let (base_, cached) = (base.clone(), pos.clone());
        pos.set_getter(move || {
            let (base, cached) = (base_.clone(), cached.clone());
            async move {
                base.ensure()?;
                if debug {
                    return Ok(cached.value());
                }
                let motor = base.motor()?;
                run_blocking(move || motor.position()).await
            }
        });

        let mut params = ParameterSet::new();
        base.register_params(&mut params);
        params.register(pos.clone());

        let mut actions = ActionSet::new();
        base.register_actions(&mut actions);
        let (base_, home_pos) = (base.clone(), pos.clone());
        actions.register(Action::new("Home", move |_| {
            let (base, pos) = (base_.clone(), home_pos.clone());
            async move {
                base.ensure()?;
                if debug {
                    pos.set_cached(0.0)?;
                    return Ok(Value::from(0.0));
                }
                let motor = base.motor()?;
                run_blocking(move || motor.move_home(true)).await?;
                Ok(Value::from(pos.get_value().await?))
            }
        }));
        let base_ = base.clone();
        actions.register(Action::new("Identify", move |_| {
            let base = base_.clone();
            async move {
                base.ensure()?;
                if debug {
                    return Ok(Value::Null);
                }
                let motor = base.motor()?;
                run_blocking(move || motor.identify()).await?;
                Ok(Value::Null)
            }
        }));

        Self {
            base,
            pos,
            params,
            actions,
        }
    }

    /// Shared APT parameters.
    pub fn base(&self) -> &AptBase {
        &self.base
    }

    /// `pos` spinbox.
    pub fn pos(&self) -> &Parameter<f64> {
        &self.pos
    }
}

#[async_trait]
impl Piece for AptStage {
    fn kind(&self) -> &'static str {
        "thorlabs.apt_stage"
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
    use crate::mock::MockApt;
    use pzp_core::sdk;
    use std::sync::Arc;

    async fn connected_stage(apt: &Arc<MockApt>) -> AptStage {
        let stage = AptStage::new(PuzzleContext::new(false), sdk::fixed(apt.clone() as SharedApt));
        stage.base().serial().set_cached("83000001".into()).unwrap();
        stage.base().connected().set(true).await.unwrap();
        stage
    }

    #[tokio::test]
    async fn test_move_reads_back_position() {
        let apt = Arc::new(MockApt::new());
        let stage = connected_stage(&apt).await;
        assert_eq!(stage.pos().set(12.5).await.unwrap(), 12.5);
        assert_eq!(apt.motor(83000001).unwrap().moves(), vec![12.5]);
    }

    #[tokio::test]
    async fn test_home_rereads_position() {
        let apt = Arc::new(MockApt::new());
        let stage = connected_stage(&apt).await;
        stage.pos().set(3.0).await.unwrap();
        let result = stage.actions().run("Home", Value::Null).await.unwrap();
        assert_eq!(result, Value::from(0.0));
        assert_eq!(stage.pos().value(), 0.0);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let apt = Arc::new(MockApt::new());
        let stage = AptStage::new(PuzzleContext::new(false), sdk::fixed(apt as SharedApt));
        let err = stage.pos().set(1.0).await.unwrap_err();
        assert_eq!(err.to_string(), "Motor not connected");
    }

    #[tokio::test]
    async fn test_debug_home_zeroes_pos() {
        let stage = AptStage::new(PuzzleContext::new(true), sdk::unavailable("APT", None));
        stage.pos().set(4.0).await.unwrap();
        assert_eq!(stage.pos().get_value().await.unwrap(), 4.0);
        stage.actions().run("Home", Value::Null).await.unwrap();
        assert_eq!(stage.pos().value(), 0.0);
        assert_eq!(
            stage.actions().names(),
            vec!["Cleanup", "Home", "Identify"]
        );
    }
}
