use crate::domain::{ChatId, MessageId, MessageRef};

/// Inline keyboard (buttons under a message that produce callback queries).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    /// All buttons on a single row.
    pub fn single_row(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }
}

/// Custom reply keyboard: tapping a button sends its label as a text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
    pub one_time: bool,
}

impl ReplyKeyboard {
    /// One row of options that hides itself after a tap.
    pub fn one_time(options: &[String]) -> Self {
        Self {
            rows: vec![options.to_vec()],
            one_time: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyMarkup {
    Inline(InlineKeyboard),
    Keyboard(ReplyKeyboard),
    RemoveKeyboard,
}

/// Outgoing file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_delete: bool,
    pub supports_inline_keyboards: bool,
    pub supports_documents: bool,
    pub max_message_len: usize,
}

/// What the audit interceptor records for each successful send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub content: String,
}

impl OutgoingRecord {
    pub fn text(msg: MessageRef, text: &str) -> Self {
        Self {
            chat_id: msg.chat_id,
            message_id: msg.message_id,
            content: text.to_string(),
        }
    }

    pub fn document(msg: MessageRef, file_name: &str) -> Self {
        Self {
            chat_id: msg.chat_id,
            message_id: msg.message_id,
            content: format!("Sent file: {file_name}"),
        }
    }
}
