//! Pre-processor that keeps the message log current.

use async_trait::async_trait;

use crate::{
    context::ExecutionContext,
    handler::Flow,
    hooks::Processor,
    store::IncomingRecord,
    update::InboundUpdate,
    Result,
};

/// Registers the sender and chat (with newly seen participants) and records
/// the incoming message in the update's unit-of-work.
///
/// Runs before the handlers so that a later redaction can mask the record
/// before anything is committed.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageLogger;

#[async_trait]
impl Processor for MessageLogger {
    fn name(&self) -> &str {
        "message_log"
    }

    async fn process(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        let Some(user) = ctx.messaging_user(update).await? else {
            return Ok(Flow::Continue);
        };

        let bot = ctx.bot().clone();
        ctx.uow()
            .ensure_chat(&update.chat, &bot, Some(user.user_id))
            .await?;

        if let (Some(msg), Some(msg_ref)) = (&update.message, update.message_ref()) {
            ctx.uow()
                .record_incoming(IncomingRecord {
                    chat_id: msg_ref.chat_id,
                    message_id: msg_ref.message_id,
                    from_user: Some(user.user_id),
                    content: msg.text.clone(),
                    masked: false,
                })
                .await?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, UserId},
        test_support::{callback_update, harness, text_update},
    };

    #[tokio::test]
    async fn records_user_chat_and_message() {
        let h = harness();
        let upd = text_update(8, 80, "hello");
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        assert_eq!(
            MessageLogger.process(&upd, &mut ctx).await.unwrap(),
            Flow::Continue
        );
        h.contexts.close(ctx).await.unwrap();

        assert!(h.store.user(UserId(8)).await.is_some());
        let chat = h.store.chat(ChatId(80)).await.unwrap();
        assert!(chat.users.contains(&UserId(8)));
        assert_eq!(chat.bots.len(), 1);
        let log = h.store.incoming_messages().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn callbacks_register_the_user_but_record_no_message() {
        let h = harness();
        let upd = callback_update(9, 90, "auth:login");
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        MessageLogger.process(&upd, &mut ctx).await.unwrap();
        h.contexts.close(ctx).await.unwrap();

        assert!(h.store.user(UserId(9)).await.is_some());
        assert!(h.store.incoming_messages().await.is_empty());
    }

    #[tokio::test]
    async fn senderless_updates_are_skipped() {
        let h = harness();
        let mut upd = text_update(1, 10, "post");
        upd.sender = None;
        let mut ctx = h.contexts.open(&upd).await.unwrap();
        MessageLogger.process(&upd, &mut ctx).await.unwrap();
        h.contexts.close(ctx).await.unwrap();
        assert!(h.store.chat(ChatId(10)).await.is_none());
    }
}
