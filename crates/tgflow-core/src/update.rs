//! Cross-messenger inbound update model.
//!
//! Telegram-specific conversion lives in the Telegram adapter; everything in
//! the pipeline sees only these types. Updates are immutable once received.

use std::fmt;

use crate::domain::{BotId, ChatId, MessageId, MessageRef, SessionKey, UpdateId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Sender {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.trim().is_empty() => {
                format!("{} {}", self.first_name, last).trim().to_string()
            }
            _ => self.first_name.trim().to_string(),
        }
    }
}

/// Message body. `Debug` never prints the raw text (it may be a password).
#[derive(Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub text: Option<String>,
    pub document_name: Option<String>,
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("id", &self.id)
            .field("text_len", &self.text.as_ref().map(|t| t.chars().count()))
            .field("document_name", &self.document_name)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// One event delivered by the messaging transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundUpdate {
    pub id: UpdateId,
    pub chat: Chat,
    pub sender: Option<Sender>,
    pub message: Option<IncomingMessage>,
    pub callback: Option<CallbackQuery>,
}

impl InboundUpdate {
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.text.as_deref())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.sender.as_ref().map(|s| s.id)
    }

    pub fn message_ref(&self) -> Option<MessageRef> {
        self.message.as_ref().map(|m| MessageRef {
            chat_id: self.chat.id,
            message_id: m.id,
        })
    }

    pub fn callback_data(&self) -> Option<&str> {
        self.callback.as_ref().map(|c| c.data.as_str())
    }

    /// `Some((name, args))` when the text is a `/command`.
    pub fn command(&self) -> Option<(String, String)> {
        let text = self.text()?;
        if !text.starts_with('/') {
            return None;
        }
        Some(parse_command(text))
    }

    pub fn session_key(&self, bot: &BotId) -> Option<SessionKey> {
        self.user_id()
            .map(|user| SessionKey::new(bot.clone(), self.chat.id, user))
    }
}

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{callback_update, text_update};

    #[test]
    fn parses_commands_with_bot_suffix() {
        let upd = text_update(1, 10, "/Start@my_bot hello there");
        assert_eq!(
            upd.command(),
            Some(("start".to_string(), "hello there".to_string()))
        );
        assert_eq!(text_update(1, 10, "start").command(), None);
    }

    #[test]
    fn debug_output_hides_message_text() {
        let upd = text_update(1, 10, "hunter2");
        let dbg = format!("{upd:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("text_len: Some(7)"));
    }

    #[test]
    fn session_key_requires_sender() {
        let bot = BotId::new("b");
        let mut upd = callback_update(3, 30, "x");
        assert_eq!(
            upd.session_key(&bot),
            Some(SessionKey::new(bot.clone(), ChatId(30), UserId(3)))
        );
        upd.sender = None;
        assert_eq!(upd.session_key(&bot), None);
    }

    #[test]
    fn full_name_skips_missing_last_name() {
        let mut s = Sender {
            id: UserId(1),
            first_name: "Alice".into(),
            last_name: None,
            username: None,
        };
        assert_eq!(s.full_name(), "Alice");
        s.last_name = Some("Liddell".into());
        assert_eq!(s.full_name(), "Alice Liddell");
    }
}
