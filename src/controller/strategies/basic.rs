//! Basic deployment strategy
//!
//! Applies the manifests exactly as given and waits for them to settle.
//! No variants, no traffic shaping, nothing to promote or reject.

use super::{apply_and_record, check_stability, DeploymentStrategyHandler, RolloutOutcome, StrategyError};
use crate::config::Action;
use crate::controller::Context;
use crate::resource::Resource;
use async_trait::async_trait;
use tracing::info;

pub struct BasicStrategyHandler;

const NAME: &str = "basic";

#[async_trait]
impl DeploymentStrategyHandler for BasicStrategyHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn deploy(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        info!(strategy = NAME, manifests = manifests.len(), "Deploying manifests");

        let mut outcome = RolloutOutcome::default();
        apply_and_record(ctx, manifests, &mut outcome, NAME).await?;
        check_stability(ctx, manifests).await?;
        Ok(outcome)
    }

    async fn promote(
        &self,
        _manifests: &[Resource],
        _ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        Err(StrategyError::UnsupportedAction {
            strategy: NAME,
            action: Action::Promote,
        })
    }

    async fn reject(
        &self,
        _manifests: &[Resource],
        _ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        Err(StrategyError::UnsupportedAction {
            strategy: NAME,
            action: Action::Reject,
        })
    }

    fn supports_promotion(&self) -> bool {
        false
    }
}
