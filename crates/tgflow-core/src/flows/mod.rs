//! Built-in conversation flows: the authentication gate, login, signup and
//! the `/start` greeting.
//!
//! The gate and both conversations live in [`AUTH_GROUP`] so they run before
//! any feature handler. Inside that group the conversation handlers are
//! registered first: a user mid-conversation (or tapping an entry button)
//! is routed into the flow, everyone else reaches the gate.

use std::sync::Arc;

use crate::{
    handler::Handler,
    hooks::Hooks,
    identity::CredentialVerifier,
    registry::{HandlerRegistry, AUTH_GROUP, DEFAULT_GROUP},
    session::ConversationState,
    Result,
};

pub mod auth;
pub mod login;
pub mod signup;
pub mod start;

/// Callback payload of the gate's "Login" button.
pub const LOGIN_CALLBACK: &str = "auth:login";
/// Callback payload of the gate's "Signup" button.
pub const SIGNUP_CALLBACK: &str = "auth:signup";

pub const ENTERING_LOGIN_CREDENTIALS: &str = "ENTERING_LOGIN_CREDENTIALS";
pub const ENTERING_SIGNUP_DETAILS: &str = "ENTERING_SIGNUP_DETAILS";

pub fn entering_login_credentials() -> ConversationState {
    ConversationState::new(ENTERING_LOGIN_CREDENTIALS)
}

pub fn entering_signup_details() -> ConversationState {
    ConversationState::new(ENTERING_SIGNUP_DETAILS)
}

/// Collaborators shared by the built-in flows.
#[derive(Clone)]
pub struct FlowDeps {
    pub verifier: CredentialVerifier,
    pub hooks: Arc<Hooks>,
}

/// Register every built-in flow.
pub fn install(registry: &mut HandlerRegistry, deps: &FlowDeps) -> Result<()> {
    let login = Arc::new(login::Login::new(deps.verifier.clone())?);
    let signup = Arc::new(signup::Signup::new(deps.verifier.backend())?);

    registry.register(
        Handler::callback("login:enter", &format!("^{LOGIN_CALLBACK}$"), login.clone())?,
        AUTH_GROUP,
    )?;
    registry.register(
        Handler::callback("signup:enter", &format!("^{SIGNUP_CALLBACK}$"), signup.clone())?,
        AUTH_GROUP,
    )?;
    registry.register(
        Handler::in_state("login:collect", entering_login_credentials(), login),
        AUTH_GROUP,
    )?;
    registry.register(
        Handler::in_state("signup:collect", entering_signup_details(), signup),
        AUTH_GROUP,
    )?;
    registry.register(
        Handler::any("auth:gate", Arc::new(auth::AuthGate::new(deps.hooks.clone()))),
        AUTH_GROUP,
    )?;
    registry.register(
        Handler::command(
            "start",
            Arc::new(start::Start::new(
                deps.hooks.clone(),
                deps.verifier.backend(),
            )),
        ),
        DEFAULT_GROUP,
    )?;
    Ok(())
}
