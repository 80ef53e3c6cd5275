use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{LOGIN_CALLBACK, SIGNUP_CALLBACK};
use crate::{
    context::{ExecutionContext, Principal},
    handler::{Action, Flow},
    hooks::Hooks,
    messaging::types::{InlineButton, InlineKeyboard, ReplyMarkup},
    update::InboundUpdate,
    Result,
};

pub const AUTH_PROMPT: &str = "Hi, please authenticate first before you continue";

/// Resolves the acting principal, or stops the update and offers login/signup.
pub struct AuthGate {
    hooks: Arc<Hooks>,
}

impl AuthGate {
    pub fn new(hooks: Arc<Hooks>) -> Self {
        Self { hooks }
    }
}

#[async_trait]
impl Action for AuthGate {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        // Nobody to authenticate (channel posts and the like).
        let Some(user) = ctx.messaging_user(update).await? else {
            debug!(update_id = update.id.0, "update without sender stopped at gate");
            return Ok(Flow::stop());
        };

        if let Some(account) = user.account {
            ctx.set_principal(Principal::Account(account));
            return Ok(Flow::Continue);
        }
        if user.is_guest {
            ctx.set_principal(Principal::Guest);
            return Ok(Flow::Continue);
        }

        if let Some(flow) = self.hooks.try_auth_overrides(update, ctx).await? {
            return Ok(flow);
        }

        ctx.answer_callback(update, None).await;
        ctx.reply_with(AUTH_PROMPT, choice_keyboard()).await?;
        Ok(Flow::end_conversation())
    }
}

fn choice_keyboard() -> ReplyMarkup {
    ReplyMarkup::Inline(InlineKeyboard::single_row(vec![
        InlineButton::new("Login", LOGIN_CALLBACK),
        InlineButton::new("Signup", SIGNUP_CALLBACK),
    ]))
}
