//! Durable per-user session storage.
//!
//! The only state that outlives an update: the user's active conversation
//! state and their scratch map (in-flight field collections, flow data).
//! Addressed by `(bot, chat, user)`; last writer wins.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::SessionKey, Result};

/// A named point in a per-user dialogue.
///
/// "No active conversation" is represented by the absence of a state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationState(String);

impl ConversationState {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scratch: BTreeMap<String, serde_json::Value>,
}

impl UserSession {
    pub fn is_empty(&self) -> bool {
        self.conversation.is_none() && self.scratch.is_empty()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Missing sessions load as [`UserSession::default`].
    async fn load(&self, key: &SessionKey) -> Result<UserSession>;

    async fn save(&self, key: &SessionKey, session: &UserSession) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, UserSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<UserSession> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, key: &SessionKey, session: &UserSession) -> Result<()> {
        let mut map = self.sessions.lock().await;
        if session.is_empty() {
            map.remove(key);
        } else {
            map.insert(key.clone(), session.clone());
        }
        Ok(())
    }
}

/// Sessions persisted as one JSON object keyed by `bot:chat:user`.
///
/// The file is read once and rewritten on every save.
pub struct JsonFileSessionStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, UserSession>>>,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<UserSession> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(load_session_file(&self.path).await?);
        }
        let map = cache.get_or_insert_with(BTreeMap::new);
        Ok(map.get(&key.to_string()).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &SessionKey, session: &UserSession) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(load_session_file(&self.path).await?);
        }
        let map = cache.get_or_insert_with(BTreeMap::new);
        if session.is_empty() {
            map.remove(&key.to_string());
        } else {
            map.insert(key.to_string(), session.clone());
        }
        save_session_file(&self.path, map).await
    }
}

async fn load_session_file(path: &Path) -> Result<BTreeMap<String, UserSession>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(BTreeMap::new());
    }
    let txt = tokio::fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

async fn save_session_file(path: &Path, data: &BTreeMap<String, UserSession>) -> Result<()> {
    let txt = serde_json::to_string(data)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BotId, ChatId, UserId};

    fn key(user: i64) -> SessionKey {
        SessionKey::new(BotId::new("bot"), ChatId(user), UserId(user))
    }

    fn session_in(state: &str) -> UserSession {
        let mut s = UserSession {
            conversation: Some(ConversationState::new(state)),
            ..Default::default()
        };
        s.scratch
            .insert("k".to_string(), serde_json::json!({ "v": 1 }));
        s
    }

    #[tokio::test]
    async fn memory_store_isolates_keys() {
        let store = MemorySessionStore::new();
        store.save(&key(1), &session_in("a")).await.unwrap();
        assert_eq!(store.load(&key(1)).await.unwrap(), session_in("a"));
        assert_eq!(store.load(&key(2)).await.unwrap(), UserSession::default());
    }

    #[tokio::test]
    async fn json_file_store_round_trips_through_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = JsonFileSessionStore::new(&path);
        store.save(&key(1), &session_in("login")).await.unwrap();
        store.save(&key(2), &session_in("signup")).await.unwrap();
        store.save(&key(2), &UserSession::default()).await.unwrap();

        let reopened = JsonFileSessionStore::new(&path);
        assert_eq!(reopened.load(&key(1)).await.unwrap(), session_in("login"));
        assert!(reopened.load(&key(2)).await.unwrap().is_empty());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("bot:1:1"));
        assert!(!raw.contains("bot:2:2"));
    }

    #[tokio::test]
    async fn json_file_store_treats_missing_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::new(dir.path().join("absent.json"));
        assert!(store.load(&key(1)).await.unwrap().is_empty());
    }
}
