use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{entering_signup_details, login::EMAIL_PATTERN};
use crate::{
    collector::{self, FieldSet, FieldSpec},
    context::ExecutionContext,
    handler::{Action, Flow},
    identity::{IdentityBackend, NewAccount},
    update::InboundUpdate,
    Result,
};

pub const SIGNUP_DETAILS: &str = "signup_details";

pub struct Signup {
    backend: Arc<dyn IdentityBackend>,
    fields: FieldSet,
}

impl Signup {
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Result<Self> {
        let fields = FieldSet::new(vec![
            FieldSpec::string("first_name", "First Name"),
            FieldSpec::string("last_name", "Last Name"),
            FieldSpec::regex("email", "Email", EMAIL_PATTERN)?,
            FieldSpec::secret("pwd", "Password"),
        ])?;
        Ok(Self { backend, fields })
    }
}

#[async_trait]
impl Action for Signup {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        if update.callback.is_some() {
            ctx.answer_callback(update, None).await;
            collector::reset(SIGNUP_DETAILS, ctx);
        }

        let details = collector::collect(SIGNUP_DETAILS, &self.fields, update, ctx).await?;
        if !details.is_complete() {
            return Ok(Flow::stop_in(entering_signup_details()));
        }

        let account = NewAccount {
            first_name: details.text("first_name").unwrap_or_default().to_string(),
            last_name: details.text("last_name").unwrap_or_default().to_string(),
            email: details.text("email").unwrap_or_default().to_string(),
            password: details.text("pwd").unwrap_or_default().to_string(),
        };

        match self.backend.create_account(&account).await {
            Ok(identity) => {
                ctx.link_account(update, &identity.name).await?;
                info!(account = %identity.name, "account created via signup");
                ctx.reply(&format!(
                    "You have successfully signed up as: {}",
                    identity.name
                ))
                .await?;
            }
            Err(e) => {
                warn!(error = %e, "signup failed");
                ctx.reply("Sorry, we could not create your account. Please try again later")
                    .await?;
            }
        }
        Ok(Flow::end_conversation())
    }
}
