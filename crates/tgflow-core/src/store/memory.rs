use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    domain::{AccountId, BotId, ChatId, MessageRef, UserId},
    messaging::types::OutgoingRecord,
    store::{
        ChatRecord, IncomingRecord, MessageLog, MessagingUser, Store, UnitOfWork, MASK,
    },
    update::{Chat, Sender},
    Result,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, MessagingUser>,
    chats: HashMap<ChatId, ChatRecord>,
    incoming: Vec<IncomingRecord>,
    outgoing: Vec<(BotId, OutgoingRecord)>,
}

/// In-process store. Units of work buffer their writes and apply them on commit.
///
/// With a users file, messaging users (account links and guest flags) are
/// reloaded at startup and rewritten on every commit that touches them.
/// Chats and the message log stay in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    users_file: Option<Arc<PathBuf>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_users_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users: HashMap<UserId, MessagingUser> = load_users_file(&path)
            .await?
            .into_iter()
            .map(|u| (u.user_id, u))
            .collect();
        info!(path = %path.display(), users = users.len(), "messaging users loaded");
        Ok(Self {
            state: Arc::new(Mutex::new(MemoryState {
                users,
                ..Default::default()
            })),
            users_file: Some(Arc::new(path)),
        })
    }

    pub async fn user(&self, user: UserId) -> Option<MessagingUser> {
        self.state.lock().await.users.get(&user).cloned()
    }

    pub async fn chat(&self, chat: ChatId) -> Option<ChatRecord> {
        self.state.lock().await.chats.get(&chat).cloned()
    }

    pub async fn incoming_messages(&self) -> Vec<IncomingRecord> {
        self.state.lock().await.incoming.clone()
    }

    pub async fn outgoing_messages(&self) -> Vec<OutgoingRecord> {
        self.state
            .lock()
            .await
            .outgoing
            .iter()
            .map(|(_, rec)| rec.clone())
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            state: self.state.clone(),
            users_file: self.users_file.clone(),
            users: HashMap::new(),
            chats: HashMap::new(),
            incoming: Vec::new(),
            redactions: Vec::new(),
        }))
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    async fn record_outgoing(&self, bot: &BotId, rec: OutgoingRecord) -> Result<()> {
        self.state.lock().await.outgoing.push((bot.clone(), rec));
        Ok(())
    }
}

struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    users_file: Option<Arc<PathBuf>>,
    users: HashMap<UserId, MessagingUser>,
    chats: HashMap<ChatId, ChatRecord>,
    incoming: Vec<IncomingRecord>,
    redactions: Vec<MessageRef>,
}

impl MemoryUnitOfWork {
    async fn load_user(&self, user: UserId) -> Option<MessagingUser> {
        if let Some(u) = self.users.get(&user) {
            return Some(u.clone());
        }
        self.state.lock().await.users.get(&user).cloned()
    }

    async fn load_chat(&self, chat: ChatId) -> Option<ChatRecord> {
        if let Some(c) = self.chats.get(&chat) {
            return Some(c.clone());
        }
        self.state.lock().await.chats.get(&chat).cloned()
    }

    fn placeholder(user: UserId) -> MessagingUser {
        MessagingUser {
            user_id: user,
            username: None,
            full_name: String::new(),
            account: None,
            is_guest: false,
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn ensure_user(&mut self, sender: &Sender) -> Result<MessagingUser> {
        let user = match self.load_user(sender.id).await {
            Some(mut existing) => {
                // Placeholders created by `set_guest` get their names on first sight.
                if existing.full_name.is_empty() {
                    existing.full_name = sender.full_name();
                    existing.username = sender.username.clone();
                    self.users.insert(sender.id, existing.clone());
                }
                existing
            }
            None => {
                let created = MessagingUser::from_sender(sender);
                self.users.insert(sender.id, created.clone());
                created
            }
        };
        Ok(user)
    }

    async fn find_user(&mut self, user: UserId) -> Result<Option<MessagingUser>> {
        Ok(self.load_user(user).await)
    }

    async fn find_user_by_account(
        &mut self,
        account: &AccountId,
    ) -> Result<Option<MessagingUser>> {
        if let Some(u) = self
            .users
            .values()
            .find(|u| u.account.as_ref() == Some(account))
        {
            return Ok(Some(u.clone()));
        }
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| !self.users.contains_key(&u.user_id))
            .find(|u| u.account.as_ref() == Some(account))
            .cloned())
    }

    async fn link_account(&mut self, user: UserId, account: &AccountId) -> Result<()> {
        let mut record = self
            .load_user(user)
            .await
            .unwrap_or_else(|| Self::placeholder(user));
        record.account = Some(account.clone());
        self.users.insert(user, record);
        Ok(())
    }

    async fn set_guest(&mut self, user: UserId, is_guest: bool) -> Result<()> {
        let mut record = self
            .load_user(user)
            .await
            .unwrap_or_else(|| Self::placeholder(user));
        record.is_guest = is_guest;
        self.users.insert(user, record);
        Ok(())
    }

    async fn ensure_chat(
        &mut self,
        chat: &Chat,
        bot: &BotId,
        user: Option<UserId>,
    ) -> Result<ChatRecord> {
        let mut record = self.load_chat(chat.id).await.unwrap_or_else(|| ChatRecord {
            chat_id: chat.id,
            kind: chat.kind,
            title: chat.title.clone(),
            bots: BTreeSet::new(),
            users: BTreeSet::new(),
        });
        let mut changed = record.bots.insert(bot.clone());
        if let Some(user) = user {
            changed |= record.users.insert(user);
        }
        if changed || !self.chats.contains_key(&chat.id) {
            self.chats.insert(chat.id, record.clone());
        }
        Ok(record)
    }

    async fn record_incoming(&mut self, rec: IncomingRecord) -> Result<()> {
        self.incoming.push(rec);
        Ok(())
    }

    async fn redact_incoming(&mut self, msg: MessageRef) -> Result<bool> {
        let mut found = false;
        for rec in self.incoming.iter_mut().filter(|r| r.message_ref() == msg) {
            rec.content = Some(MASK.to_string());
            rec.masked = true;
            found = true;
        }
        if !found {
            found = self
                .state
                .lock()
                .await
                .incoming
                .iter()
                .any(|r| r.message_ref() == msg);
            if found {
                self.redactions.push(msg);
            }
        }
        Ok(found)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.lock().await;
        let users_changed = !this.users.is_empty();
        state.users.extend(this.users);
        state.chats.extend(this.chats);
        state.incoming.extend(this.incoming);
        for msg in this.redactions {
            for rec in state.incoming.iter_mut().filter(|r| r.message_ref() == msg) {
                rec.content = Some(MASK.to_string());
                rec.masked = true;
            }
        }
        if let Some(path) = this.users_file.as_deref().filter(|_| users_changed) {
            save_users_file(path, &state.users).await?;
        }
        Ok(())
    }
}

async fn load_users_file(path: &Path) -> Result<Vec<MessagingUser>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let txt = tokio::fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

async fn save_users_file(path: &Path, users: &HashMap<UserId, MessagingUser>) -> Result<()> {
    let mut all: Vec<&MessagingUser> = users.values().collect();
    all.sort_by_key(|u| u.user_id);
    let txt = serde_json::to_string_pretty(&all)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
