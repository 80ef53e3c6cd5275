use async_trait::async_trait;
use tracing::info;

use super::entering_login_credentials;
use crate::{
    collector::{self, FieldSet, FieldSpec},
    context::ExecutionContext,
    handler::{Action, Flow},
    identity::CredentialVerifier,
    update::InboundUpdate,
    Result,
};

pub const LOGIN_DETAILS: &str = "login_details";
pub const EMAIL_PATTERN: &str = r"^.+@.+\..+$";

pub struct Login {
    verifier: CredentialVerifier,
    fields: FieldSet,
}

impl Login {
    pub fn new(verifier: CredentialVerifier) -> Result<Self> {
        let fields = FieldSet::new(vec![
            FieldSpec::regex("email", "Email", EMAIL_PATTERN)?,
            FieldSpec::secret("pwd", "Password"),
        ])?;
        Ok(Self { verifier, fields })
    }
}

#[async_trait]
impl Action for Login {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        if update.callback.is_some() {
            // Entry tap: start over even if an earlier attempt was abandoned.
            ctx.answer_callback(update, None).await;
            collector::reset(LOGIN_DETAILS, ctx);
        }

        let details = collector::collect(LOGIN_DETAILS, &self.fields, update, ctx).await?;
        if !details.is_complete() {
            return Ok(Flow::stop_in(entering_login_credentials()));
        }

        let login = details.text("email").unwrap_or_default();
        let password = details.text("pwd").unwrap_or_default();

        match self.verifier.verify(login, password).await {
            Some(identity) => {
                ctx.link_account(update, &identity.name).await?;
                info!(account = %identity.name, "messaging user linked");
                ctx.reply(&format!(
                    "You have successfully logged in as: {}",
                    identity.name
                ))
                .await?;
                Ok(Flow::end_conversation())
            }
            None => {
                ctx.record_login_rejected();
                ctx.reply("You have entered invalid credentials. Please try again")
                    .await?;
                // The completed collection is gone from scratch; this asks for the email again.
                collector::collect(LOGIN_DETAILS, &self.fields, update, ctx).await?;
                Ok(Flow::stop_in(entering_login_credentials()))
            }
        }
    }
}
