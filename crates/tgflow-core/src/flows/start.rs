use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    context::ExecutionContext,
    handler::{Action, Flow},
    hooks::Hooks,
    identity::IdentityBackend,
    update::InboundUpdate,
    Result,
};

/// `/start`: greets authenticated users unless a start override is configured.
pub struct Start {
    hooks: Arc<Hooks>,
    backend: Arc<dyn IdentityBackend>,
}

impl Start {
    pub fn new(hooks: Arc<Hooks>, backend: Arc<dyn IdentityBackend>) -> Self {
        Self { hooks, backend }
    }
}

#[async_trait]
impl Action for Start {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        if let Some(custom) = self.hooks.start_handler() {
            return custom.call(update, ctx).await;
        }

        // Guests and anonymous users get nothing; the gate already spoke to them.
        let Some(account) = ctx.principal().account().cloned() else {
            return Ok(Flow::Continue);
        };

        let first_name = match self.backend.lookup_by_name_or_email(account.as_str()).await {
            Ok(Some(identity)) if !identity.first_name.trim().is_empty() => identity.first_name,
            Ok(_) => account.to_string(),
            Err(e) => {
                warn!(account = %account, error = %e, "account lookup failed");
                account.to_string()
            }
        };

        ctx.reply("Welcome!").await?;
        ctx.reply(&format!("You are logged in as: {first_name}"))
            .await?;
        Ok(Flow::Continue)
    }
}
