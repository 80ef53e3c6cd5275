//! Externally configured extension points.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::ExecutionContext,
    handler::{Action, Flow},
    update::InboundUpdate,
    Result,
};

/// Pre- or post-processor run by the dispatch loop around the registry.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow>;
}

/// Replacement for the built-in authentication prompt.
///
/// Returning `Ok(None)` passes to the next override (and finally to the
/// built-in login/signup choice).
#[async_trait]
pub trait AuthOverride: Send + Sync {
    async fn authenticate(
        &self,
        update: &InboundUpdate,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Flow>>;
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub pre: Vec<Arc<dyn Processor>>,
    pub post: Vec<Arc<dyn Processor>>,
    /// `/start` replacements; the last one registered is used.
    pub start_overrides: Vec<Arc<dyn Action>>,
    /// Tried in reverse registration order; first `Some` wins.
    pub auth_overrides: Vec<Arc<dyn AuthOverride>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_process(mut self, p: Arc<dyn Processor>) -> Self {
        self.pre.push(p);
        self
    }

    pub fn post_process(mut self, p: Arc<dyn Processor>) -> Self {
        self.post.push(p);
        self
    }

    pub fn start_override(mut self, a: Arc<dyn Action>) -> Self {
        self.start_overrides.push(a);
        self
    }

    pub fn auth_override(mut self, a: Arc<dyn AuthOverride>) -> Self {
        self.auth_overrides.push(a);
        self
    }

    pub(crate) fn start_handler(&self) -> Option<Arc<dyn Action>> {
        self.start_overrides.last().cloned()
    }

    /// Consult auth overrides, newest first.
    pub(crate) async fn try_auth_overrides(
        &self,
        update: &InboundUpdate,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Flow>> {
        for hook in self.auth_overrides.iter().rev() {
            if let Some(flow) = hook.authenticate(update, ctx).await? {
                return Ok(Some(flow));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, text_update};

    struct Fixed(Option<Flow>, &'static str);

    #[async_trait]
    impl AuthOverride for Fixed {
        async fn authenticate(
            &self,
            _update: &InboundUpdate,
            ctx: &mut ExecutionContext,
        ) -> Result<Option<Flow>> {
            ctx.reply(self.1).await?;
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn auth_overrides_run_newest_first_until_one_answers() {
        let h = harness();
        let hooks = Hooks::new()
            .auth_override(Arc::new(Fixed(Some(Flow::stop()), "first")))
            .auth_override(Arc::new(Fixed(Some(Flow::Continue), "second")))
            .auth_override(Arc::new(Fixed(None, "third")));

        let upd = text_update(1, 1, "hi");
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        let flow = hooks.try_auth_overrides(&upd, &mut ctx).await.unwrap();
        assert_eq!(flow, Some(Flow::Continue));
        assert_eq!(h.messenger.texts(), vec!["third", "second"]);
    }

    #[tokio::test]
    async fn no_overrides_means_none() {
        let h = harness();
        let upd = text_update(1, 1, "hi");
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        assert_eq!(Hooks::new().try_auth_overrides(&upd, &mut ctx).await.unwrap(), None);
    }
}
