//! Per-update execution scope.
//!
//! [`ContextManager::open`] starts a unit-of-work and loads the sender's
//! session; [`ContextManager::close`] writes the session back and commits.
//! Nothing here is global: every handler receives the context explicitly.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{
    domain::{AccountId, BotId, ChatId, MessageRef, SessionKey},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{OutgoingDocument, ReplyMarkup},
    },
    session::{ConversationState, SessionStore, UserSession},
    store::{MessagingUser, Store, UnitOfWork},
    update::InboundUpdate,
    Result,
};

/// The acting identity for an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Principal {
    /// Not (yet) resolved, or resolved to nobody.
    #[default]
    Anonymous,
    /// Explicitly allowed to proceed without a linked account.
    Guest,
    Account(AccountId),
}

impl Principal {
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            Principal::Account(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Account(_))
    }
}

/// Side effects accumulated while processing one update.
#[derive(Clone, Debug, Default)]
pub struct SideEffects {
    pub sent: Vec<MessageRef>,
    pub fired: Vec<String>,
    /// Account the sender was linked to during this update.
    pub linked: Option<AccountId>,
    /// Submitted credentials were rejected during this update.
    pub login_rejected: bool,
}

pub struct ExecutionContext {
    bot: BotId,
    chat_id: ChatId,
    key: Option<SessionKey>,
    incoming: Option<MessageRef>,
    uow: Box<dyn UnitOfWork>,
    messenger: Arc<dyn MessagingPort>,
    principal: Principal,
    messaging_user: Option<MessagingUser>,
    session: UserSession,
    effects: SideEffects,
    redacted: bool,
}

impl ExecutionContext {
    pub fn bot(&self) -> &BotId {
        &self.bot
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn uow(&mut self) -> &mut dyn UnitOfWork {
        self.uow.as_mut()
    }

    pub fn messenger(&self) -> Arc<dyn MessagingPort> {
        self.messenger.clone()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = principal;
    }

    pub fn effects(&self) -> &SideEffects {
        &self.effects
    }

    pub(crate) fn record_fired(&mut self, handler: &str) {
        self.effects.fired.push(handler.to_string());
    }

    /// The sender's messaging-user record, created on first sight.
    pub async fn messaging_user(&mut self, update: &InboundUpdate) -> Result<Option<MessagingUser>> {
        if self.messaging_user.is_none() {
            if let Some(sender) = &update.sender {
                self.messaging_user = Some(self.uow.ensure_user(sender).await?);
            }
        }
        Ok(self.messaging_user.clone())
    }

    /// Link the sender to `account` and act as that account from now on.
    pub async fn link_account(&mut self, update: &InboundUpdate, account: &AccountId) -> Result<()> {
        let user = update
            .user_id()
            .ok_or_else(|| Error::Store("cannot link an update without a sender".to_string()))?;
        self.uow.link_account(user, account).await?;
        if let Some(u) = self.messaging_user.as_mut() {
            u.account = Some(account.clone());
        }
        self.principal = Principal::Account(account.clone());
        self.effects.linked = Some(account.clone());
        Ok(())
    }

    pub fn record_login_rejected(&mut self) {
        self.effects.login_rejected = true;
    }

    // ============== Conversation + scratch ==============

    pub fn conversation(&self) -> Option<&ConversationState> {
        self.session.conversation.as_ref()
    }

    pub fn set_conversation(&mut self, state: Option<ConversationState>) {
        self.session.conversation = state;
    }

    pub fn scratch_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.session
            .scratch
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Error::from)
    }

    pub fn scratch_put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let v = serde_json::to_value(value)?;
        self.session.scratch.insert(key.to_string(), v);
        Ok(())
    }

    pub fn scratch_remove(&mut self, key: &str) {
        self.session.scratch.remove(key);
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    // ============== Outgoing ==============

    pub async fn reply(&mut self, text: &str) -> Result<MessageRef> {
        self.send(text, None).await
    }

    pub async fn reply_with(&mut self, text: &str, markup: ReplyMarkup) -> Result<MessageRef> {
        self.send(text, Some(markup)).await
    }

    async fn send(&mut self, text: &str, markup: Option<ReplyMarkup>) -> Result<MessageRef> {
        let msg = self.messenger.send_text(self.chat_id, text, markup).await?;
        self.effects.sent.push(msg);
        Ok(msg)
    }

    pub async fn send_document(&mut self, doc: OutgoingDocument) -> Result<MessageRef> {
        let msg = self.messenger.send_document(self.chat_id, doc).await?;
        self.effects.sent.push(msg);
        Ok(msg)
    }

    /// Acknowledge a callback query (best-effort).
    pub async fn answer_callback(&self, update: &InboundUpdate, text: Option<&str>) {
        let Some(cb) = &update.callback else {
            return;
        };
        if let Err(e) = self.messenger.answer_callback_query(&cb.id, text).await {
            warn!(error = %e, "failed to answer callback query");
        }
    }

    /// Mask the incoming message in the message log and delete it client-side.
    ///
    /// Idempotent; deletion failures are logged only.
    pub async fn redact_incoming(&mut self) -> Result<()> {
        if self.redacted {
            return Ok(());
        }
        let Some(msg) = self.incoming else {
            return Ok(());
        };
        self.uow.redact_incoming(msg).await?;
        self.redacted = true;

        if self.messenger.capabilities().supports_delete {
            if let Err(e) = self.messenger.delete_message(msg).await {
                warn!(chat_id = msg.chat_id.0, error = %e, "failed to delete secret message");
            }
        }
        Ok(())
    }

    pub fn is_redacted(&self) -> bool {
        self.redacted
    }
}

/// Opens and closes per-update execution scopes.
#[derive(Clone)]
pub struct ContextManager {
    bot: BotId,
    store: Arc<dyn Store>,
    sessions: Arc<dyn SessionStore>,
    messenger: Arc<dyn MessagingPort>,
}

impl ContextManager {
    pub fn new(
        bot: BotId,
        store: Arc<dyn Store>,
        sessions: Arc<dyn SessionStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            bot,
            store,
            sessions,
            messenger,
        }
    }

    pub fn bot(&self) -> &BotId {
        &self.bot
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn messenger(&self) -> Arc<dyn MessagingPort> {
        self.messenger.clone()
    }

    pub async fn open(&self, update: &InboundUpdate) -> Result<ExecutionContext> {
        let key = update.session_key(&self.bot);
        let session = match &key {
            Some(k) => self.sessions.load(k).await?,
            None => UserSession::default(),
        };
        let uow = self.store.begin().await?;

        Ok(ExecutionContext {
            bot: self.bot.clone(),
            chat_id: update.chat.id,
            key,
            incoming: update.message_ref(),
            uow,
            messenger: self.messenger.clone(),
            principal: Principal::Anonymous,
            messaging_user: None,
            session,
            effects: SideEffects::default(),
            redacted: false,
        })
    }

    /// Persist the session and commit the unit-of-work.
    ///
    /// Both steps are always attempted; the first failure is returned.
    pub async fn close(&self, ctx: ExecutionContext) -> Result<SideEffects> {
        self.finish(ctx, true).await
    }

    /// Commit the unit-of-work without writing the session back.
    ///
    /// For scopes running beside the consumer loop: the session they loaded
    /// is a snapshot, and only the loop may move a user's conversation.
    pub async fn close_detached(&self, ctx: ExecutionContext) -> Result<SideEffects> {
        self.finish(ctx, false).await
    }

    async fn finish(&self, ctx: ExecutionContext, save_session: bool) -> Result<SideEffects> {
        let ExecutionContext {
            key,
            uow,
            session,
            effects,
            ..
        } = ctx;

        let saved = match &key {
            Some(k) if save_session => self.sessions.save(k, &session).await,
            _ => Ok(()),
        };
        let committed = uow.commit().await;
        debug!(
            sent = effects.sent.len(),
            fired = effects.fired.len(),
            save_session,
            "execution context closed"
        );

        saved?;
        committed?;
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, text_update};

    #[tokio::test]
    async fn scratch_and_conversation_survive_close_and_reopen() {
        let h = harness();
        let upd = text_update(1, 1, "hi");

        let mut ctx = h.contexts.open(&upd).await.unwrap();
        ctx.scratch_put("flow", &vec![1, 2, 3]).unwrap();
        ctx.set_conversation(Some(ConversationState::new("waiting")));
        h.contexts.close(ctx).await.unwrap();

        let ctx = h.contexts.open(&upd).await.unwrap();
        assert_eq!(ctx.scratch_get::<Vec<i32>>("flow").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(ctx.conversation().map(|s| s.as_str()), Some("waiting"));
        assert_eq!(ctx.principal(), &Principal::Anonymous);
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_user() {
        let h = harness();
        let mut ctx = h.contexts.open(&text_update(1, 1, "a")).await.unwrap();
        ctx.scratch_put("k", &"alice").unwrap();
        h.contexts.close(ctx).await.unwrap();

        let ctx = h.contexts.open(&text_update(2, 2, "b")).await.unwrap();
        assert_eq!(ctx.scratch_get::<String>("k").unwrap(), None);
    }

    #[tokio::test]
    async fn replies_are_tracked_as_side_effects() {
        let h = harness();
        let mut ctx = h.contexts.open(&text_update(1, 1, "a")).await.unwrap();
        ctx.reply("one").await.unwrap();
        ctx.reply("two").await.unwrap();
        let effects = h.contexts.close(ctx).await.unwrap();
        assert_eq!(effects.sent.len(), 2);
        assert_eq!(h.messenger.texts(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn redaction_is_idempotent_and_deletes_once() {
        let h = harness();
        let upd = text_update(1, 1, "hunter2");
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        ctx.redact_incoming().await.unwrap();
        ctx.redact_incoming().await.unwrap();
        assert!(ctx.is_redacted());
        h.contexts.close(ctx).await.unwrap();
        assert_eq!(h.messenger.deleted().len(), 1);
    }

    #[tokio::test]
    async fn detached_close_commits_but_leaves_the_session_alone() {
        let h = harness();
        let upd = text_update(3, 3, "hi");

        let mut ctx = h.contexts.open(&upd).await.unwrap();
        ctx.set_conversation(Some(ConversationState::new("waiting")));
        h.contexts.close(ctx).await.unwrap();

        let mut detached = h.contexts.open(&upd).await.unwrap();
        detached.messaging_user(&upd).await.unwrap();
        detached.set_conversation(None);
        h.contexts.close_detached(detached).await.unwrap();

        let ctx = h.contexts.open(&upd).await.unwrap();
        assert_eq!(ctx.conversation().map(|s| s.as_str()), Some("waiting"));
        assert!(h.store.user(crate::domain::UserId(3)).await.is_some());
    }
}
