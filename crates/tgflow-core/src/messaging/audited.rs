use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    domain::{BotId, ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutgoingDocument, OutgoingRecord, ReplyMarkup},
    },
    store::MessageLog,
    Result,
};

/// MessagingPort decorator that records every successful outgoing send.
///
/// Text sends are recorded verbatim; documents as `Sent file: <name>`. A failure
/// to record is logged and never fails the send itself.
pub struct AuditedMessenger {
    inner: Arc<dyn MessagingPort>,
    bot: BotId,
    log: Arc<dyn MessageLog>,
}

impl AuditedMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, bot: BotId, log: Arc<dyn MessageLog>) -> Self {
        Self { inner, bot, log }
    }

    async fn record(&self, rec: OutgoingRecord) {
        if let Err(e) = self.log.record_outgoing(&self.bot, rec).await {
            warn!(bot = %self.bot, error = %e, "failed to record outgoing message");
        }
    }
}

#[async_trait]
impl MessagingPort for AuditedMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef> {
        let msg = self.inner.send_text(chat_id, text, markup).await?;
        self.record(OutgoingRecord::text(msg, text)).await;
        Ok(msg)
    }

    async fn send_document(&self, chat_id: ChatId, doc: OutgoingDocument) -> Result<MessageRef> {
        let file_name = doc.file_name.clone();
        let msg = self.inner.send_document(chat_id, doc).await?;
        self.record(OutgoingRecord::document(msg, &file_name)).await;
        Ok(msg)
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.inner.delete_message(msg).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.inner.answer_callback_query(callback_id, text).await
    }
}
