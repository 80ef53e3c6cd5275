//! Persistence ports.
//!
//! The backing store is an external collaborator. The pipeline only needs a
//! per-update unit-of-work (opened and committed by the context lifecycle) and
//! an append-only log for outgoing messages. [`memory::MemoryStore`] is the
//! in-process implementation used by default and in tests.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AccountId, BotId, ChatId, MessageId, MessageRef, UserId},
    messaging::types::OutgoingRecord,
    update::{Chat, ChatKind, Sender},
    Result,
};

pub mod memory;

/// What a redacted message's content is replaced with.
pub const MASK: &str = "*****";

/// A messaging-platform user known to the bot, optionally linked to an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingUser {
    pub user_id: UserId,
    pub username: Option<String>,
    pub full_name: String,
    pub account: Option<AccountId>,
    /// Allowed to use the bot without linking an account.
    pub is_guest: bool,
}

impl MessagingUser {
    pub fn from_sender(sender: &Sender) -> Self {
        Self {
            user_id: sender.id,
            username: sender.username.clone(),
            full_name: sender.full_name(),
            account: None,
            is_guest: false,
        }
    }
}

/// A chat the bot has seen, with the participants observed so far.
///
/// The Bot API cannot list members up front, so participants are added as
/// their messages arrive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub bots: BTreeSet<BotId>,
    pub users: BTreeSet<UserId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingRecord {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from_user: Option<UserId>,
    pub content: Option<String>,
    pub masked: bool,
}

impl IncomingRecord {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

/// Opens one unit-of-work per update.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// Exclusively owned by one update's execution context.
///
/// Dropping it without [`UnitOfWork::commit`] discards every write.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Get-or-create the messaging user for `sender`.
    async fn ensure_user(&mut self, sender: &Sender) -> Result<MessagingUser>;

    async fn find_user(&mut self, user: UserId) -> Result<Option<MessagingUser>>;

    async fn find_user_by_account(&mut self, account: &AccountId)
        -> Result<Option<MessagingUser>>;

    async fn link_account(&mut self, user: UserId, account: &AccountId) -> Result<()>;

    async fn set_guest(&mut self, user: UserId, is_guest: bool) -> Result<()>;

    /// Get-or-create the chat and add `bot` / `user` as participants.
    async fn ensure_chat(&mut self, chat: &Chat, bot: &BotId, user: Option<UserId>)
        -> Result<ChatRecord>;

    async fn record_incoming(&mut self, rec: IncomingRecord) -> Result<()>;

    /// Replace a recorded incoming message's content with [`MASK`].
    ///
    /// Returns whether a record was found. Idempotent.
    async fn redact_incoming(&mut self, msg: MessageRef) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Append-only log of outgoing messages, shared across updates.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn record_outgoing(&self, bot: &BotId, rec: OutgoingRecord) -> Result<()>;
}
