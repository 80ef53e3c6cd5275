//! teloxide types -> `tgflow-core` update model.

use teloxide::types::{
    CallbackQuery as TgCallbackQuery, Chat as TgChat, Message, Update, UpdateKind, User,
};

use tgflow_core::{
    domain::{ChatId, MessageId, MessageRef, UpdateId, UserId},
    update::{CallbackQuery, Chat, ChatKind, IncomingMessage, InboundUpdate, Sender},
};

/// Convert an update the pipeline cares about.
///
/// Messages, channel posts and callback queries are converted; everything
/// else (edits, polls, member changes) is `None`.
pub fn inbound(update: &Update) -> Option<InboundUpdate> {
    let id = UpdateId(i64::from(update.id));
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => Some(from_message(id, msg)),
        UpdateKind::CallbackQuery(q) => Some(from_callback(id, q)),
        _ => None,
    }
}

pub fn from_message(id: UpdateId, msg: &Message) -> InboundUpdate {
    InboundUpdate {
        id,
        chat: chat(&msg.chat),
        sender: msg.from().map(sender),
        message: Some(IncomingMessage {
            id: MessageId(msg.id.0),
            text: msg.text().or_else(|| msg.caption()).map(str::to_string),
            document_name: msg.document().and_then(|d| d.file_name.clone()),
        }),
        callback: None,
    }
}

pub fn from_callback(id: UpdateId, q: &TgCallbackQuery) -> InboundUpdate {
    let origin = q.message.as_ref();
    // Without the originating message, answer in the private chat.
    let chat = origin.map(|m| chat(&m.chat)).unwrap_or_else(|| Chat {
        id: ChatId(user_id(&q.from).0),
        kind: ChatKind::Private,
        title: None,
    });

    InboundUpdate {
        id,
        chat,
        sender: Some(sender(&q.from)),
        message: None,
        callback: Some(CallbackQuery {
            id: q.id.clone(),
            data: q.data.clone().unwrap_or_default(),
            message: origin.map(|m| MessageRef {
                chat_id: ChatId(m.chat.id.0),
                message_id: MessageId(m.id.0),
            }),
        }),
    }
}

fn chat(c: &TgChat) -> Chat {
    let kind = if c.is_private() {
        ChatKind::Private
    } else if c.is_channel() {
        ChatKind::Channel
    } else if c.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Group
    };
    Chat {
        id: ChatId(c.id.0),
        kind,
        title: c.title().map(str::to_string),
    }
}

fn user_id(u: &User) -> UserId {
    UserId(u.id.0 as i64)
}

fn sender(u: &User) -> Sender {
    Sender {
        id: user_id(u),
        first_name: u.first_name.clone(),
        last_name: u.last_name.clone(),
        username: u.username.clone(),
    }
}
