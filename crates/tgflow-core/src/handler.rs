//! Handlers: a match predicate plus an action.
//!
//! Handlers are stateless configuration. Everything per-invocation lives in
//! the [`ExecutionContext`] (and the session scratch map behind it).

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use regex::Regex;

use crate::{
    context::ExecutionContext, errors::Error, session::ConversationState, update::InboundUpdate,
    Result,
};

/// What the user's conversation should look like after a pipeline stop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resume {
    /// Match the user's next update against this state.
    Enter(ConversationState),
    /// Back to "no active conversation".
    End,
}

/// Outcome of a handler action or processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Carry on with the next group.
    Continue,
    /// Run no further handlers for this update; optionally move the conversation.
    Stop(Option<Resume>),
}

impl Flow {
    pub fn stop() -> Self {
        Flow::Stop(None)
    }

    pub fn stop_in(state: ConversationState) -> Self {
        Flow::Stop(Some(Resume::Enter(state)))
    }

    pub fn end_conversation() -> Self {
        Flow::Stop(Some(Resume::End))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Flow::Stop(_))
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow>;
}

/// Predicate half of a handler.
#[derive(Clone)]
pub enum Matcher {
    /// Every update.
    Any,
    /// Every update carrying a message (text or not).
    Message,
    /// `/name` commands (case-insensitive, `@bot` suffix ignored).
    Command(String),
    /// Non-command text, optionally constrained by a pattern.
    Text(Option<Regex>),
    /// Callback payloads matching the pattern.
    Callback(Regex),
    /// `inner`, but only while the user's conversation is in one of `states`.
    State {
        states: Vec<ConversationState>,
        inner: Box<Matcher>,
    },
}

impl Matcher {
    pub fn matches(&self, update: &InboundUpdate, conversation: Option<&ConversationState>) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Message => update.message.is_some(),
            Matcher::Command(name) => update
                .command()
                .map(|(cmd, _)| cmd == *name)
                .unwrap_or(false),
            Matcher::Text(pattern) => match update.text() {
                Some(text) if !text.starts_with('/') => {
                    pattern.as_ref().map(|p| p.is_match(text)).unwrap_or(true)
                }
                _ => false,
            },
            Matcher::Callback(pattern) => update
                .callback_data()
                .map(|data| pattern.is_match(data))
                .unwrap_or(false),
            Matcher::State { states, inner } => {
                conversation.is_some_and(|c| states.contains(c))
                    && inner.matches(update, conversation)
            }
        }
    }

    pub fn is_state_bound(&self) -> bool {
        matches!(self, Matcher::State { .. })
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Any => f.write_str("Any"),
            Matcher::Message => f.write_str("Message"),
            Matcher::Command(name) => write!(f, "Command(/{name})"),
            Matcher::Text(p) => write!(f, "Text({:?})", p.as_ref().map(|r| r.as_str())),
            Matcher::Callback(p) => write!(f, "Callback({})", p.as_str()),
            Matcher::State { states, inner } => {
                write!(f, "State({states:?}, {inner:?})")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    /// On the consumer loop, in arrival order.
    #[default]
    Inline,
    /// On the worker pool, in its own execution scope.
    Detached,
}

#[derive(Clone)]
pub struct Handler {
    name: String,
    matcher: Matcher,
    action: Arc<dyn Action>,
    mode: RunMode,
}

impl Handler {
    pub fn new(name: impl Into<String>, matcher: Matcher, action: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            matcher,
            action,
            mode: RunMode::Inline,
        }
    }

    pub fn any(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self::new(name, Matcher::Any, action)
    }

    pub fn command(command: &str, action: Arc<dyn Action>) -> Self {
        let command = command.trim_start_matches('/').to_lowercase();
        Self::new(
            format!("/{command}"),
            Matcher::Command(command),
            action,
        )
    }

    pub fn text(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self::new(name, Matcher::Text(None), action)
    }

    pub fn text_matching(
        name: impl Into<String>,
        pattern: &str,
        action: Arc<dyn Action>,
    ) -> Result<Self> {
        let name = name.into();
        let re = compile(&name, pattern)?;
        Ok(Self::new(name, Matcher::Text(Some(re)), action))
    }

    pub fn callback(
        name: impl Into<String>,
        pattern: &str,
        action: Arc<dyn Action>,
    ) -> Result<Self> {
        let name = name.into();
        let re = compile(&name, pattern)?;
        Ok(Self::new(name, Matcher::Callback(re), action))
    }

    /// Any message from a user whose conversation is in `state`.
    pub fn in_state(
        name: impl Into<String>,
        state: ConversationState,
        action: Arc<dyn Action>,
    ) -> Self {
        Self::new(
            name,
            Matcher::State {
                states: vec![state],
                inner: Box::new(Matcher::Message),
            },
            action,
        )
    }

    pub fn detached(mut self) -> Self {
        self.mode = RunMode::Detached;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn action(&self) -> Arc<dyn Action> {
        self.action.clone()
    }

    pub fn check(&self, update: &InboundUpdate, ctx: &ExecutionContext) -> bool {
        self.matcher.matches(update, ctx.conversation())
    }

    /// Registration-time validation.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidHandler {
                name: self.name.clone(),
                reason: "handler name is empty".to_string(),
            });
        }
        if let Matcher::Command(cmd) = &self.matcher {
            if cmd.is_empty() || cmd.contains(char::is_whitespace) {
                return Err(Error::InvalidHandler {
                    name: self.name.clone(),
                    reason: format!("invalid command name {cmd:?}"),
                });
            }
        }
        if let Matcher::State { states, .. } = &self.matcher {
            if states.is_empty() {
                return Err(Error::InvalidHandler {
                    name: self.name.clone(),
                    reason: "state-bound handler without states".to_string(),
                });
            }
        }
        // Conversation turns must be processed in arrival order.
        if self.mode == RunMode::Detached && self.matcher.is_state_bound() {
            return Err(Error::InvalidHandler {
                name: self.name.clone(),
                reason: "conversation-state handlers cannot run detached".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("mode", &self.mode)
            .finish()
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidHandler {
        name: name.to_string(),
        reason: format!("invalid pattern: {e}"),
    })
}
