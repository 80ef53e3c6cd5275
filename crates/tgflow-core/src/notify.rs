//! Sending outside the update pipeline (scheduled jobs, backend events).

use std::sync::Arc;

use tracing::debug;

use crate::{
    domain::{AccountId, ChatId, MessageRef, UserId},
    errors::Error,
    messaging::{port::MessagingPort, types::OutgoingDocument},
    store::Store,
    Result,
};

/// Who to notify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// The messaging user linked to this account.
    Account(AccountId),
    User(UserId),
}

/// Sends to users by account or messaging id.
///
/// Give it the audited messenger so these sends land in the message log too.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self { store, messenger }
    }

    pub async fn send_message(&self, to: &Recipient, text: &str) -> Result<MessageRef> {
        let chat = self.resolve(to).await?;
        self.messenger.send_text(chat, text, None).await
    }

    pub async fn send_document(&self, to: &Recipient, doc: OutgoingDocument) -> Result<MessageRef> {
        let chat = self.resolve(to).await?;
        self.messenger.send_document(chat, doc).await
    }

    /// Private chat with the user (Telegram uses the user id as chat id).
    async fn resolve(&self, to: &Recipient) -> Result<ChatId> {
        let mut uow = self.store.begin().await?;
        let user = match to {
            Recipient::Account(account) => uow.find_user_by_account(account).await?,
            Recipient::User(user) => uow.find_user(*user).await?,
        };
        let user = user.ok_or_else(|| Error::Store(format!("no messaging user for {to:?}")))?;
        debug!(user_id = user.user_id.0, "notification recipient resolved");
        Ok(ChatId(user.user_id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messaging::audited::AuditedMessenger,
        domain::BotId,
        store::memory::MemoryStore,
        test_support::{sender, RecordingMessenger},
    };

    async fn setup() -> (Notifier, Arc<RecordingMessenger>, MemoryStore) {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.ensure_user(&sender(21, "erin")).await.unwrap();
        uow.link_account(UserId(21), &AccountId::new("erin@example.com"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let raw = Arc::new(RecordingMessenger::default());
        let audited = Arc::new(AuditedMessenger::new(
            raw.clone(),
            BotId::new("bot"),
            Arc::new(store.clone()),
        ));
        (Notifier::new(Arc::new(store.clone()), audited), raw, store)
    }

    #[tokio::test]
    async fn sends_to_the_user_linked_to_an_account() {
        let (notifier, raw, store) = setup().await;
        let msg = notifier
            .send_message(&Recipient::Account(AccountId::new("erin@example.com")), "ping")
            .await
            .unwrap();
        assert_eq!(msg.chat_id, ChatId(21));
        assert_eq!(raw.texts(), vec!["ping"]);
        assert_eq!(store.outgoing_messages().await[0].content, "ping");
    }

    #[tokio::test]
    async fn documents_are_logged_by_file_name() {
        let (notifier, _raw, store) = setup().await;
        notifier
            .send_document(
                &Recipient::User(UserId(21)),
                OutgoingDocument {
                    file_name: "report.pdf".into(),
                    bytes: vec![1, 2, 3],
                    caption: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.outgoing_messages().await[0].content,
            "Sent file: report.pdf"
        );
    }

    #[tokio::test]
    async fn unknown_recipients_are_an_error() {
        let (notifier, raw, _store) = setup().await;
        let err = notifier
            .send_message(&Recipient::Account(AccountId::new("nobody")), "ping")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(raw.texts().is_empty());
    }
}
