//! In-crate fakes and builders for unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    context::{ContextManager, ExecutionContext},
    domain::{BotId, ChatId, MessageId, MessageRef, UpdateId, UserId},
    errors::Error,
    handler::{Action, Flow},
    hooks::Processor,
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutgoingDocument, ReplyMarkup},
    },
    session::MemorySessionStore,
    store::memory::MemoryStore,
    update::{CallbackQuery, Chat, ChatKind, IncomingMessage, InboundUpdate, Sender},
    Result,
};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed) as i64
}

pub fn sender(id: i64, username: &str) -> Sender {
    Sender {
        id: UserId(id),
        first_name: username.to_string(),
        last_name: None,
        username: Some(username.to_string()),
    }
}

pub fn private_chat(id: i64) -> Chat {
    Chat {
        id: ChatId(id),
        kind: ChatKind::Private,
        title: None,
    }
}

pub fn text_update(user: i64, chat: i64, text: &str) -> InboundUpdate {
    let id = next_id();
    InboundUpdate {
        id: UpdateId(id),
        chat: private_chat(chat),
        sender: Some(sender(user, &format!("user{user}"))),
        message: Some(IncomingMessage {
            id: MessageId(id as i32),
            text: Some(text.to_string()),
            document_name: None,
        }),
        callback: None,
    }
}

pub fn callback_update(user: i64, chat: i64, data: &str) -> InboundUpdate {
    let id = next_id();
    InboundUpdate {
        id: UpdateId(id),
        chat: private_chat(chat),
        sender: Some(sender(user, &format!("user{user}"))),
        message: None,
        callback: Some(CallbackQuery {
            id: format!("cb-{id}"),
            data: data.to_string(),
            message: None,
        }),
    }
}

#[derive(Clone, Debug)]
pub struct SentText {
    pub chat_id: ChatId,
    pub text: String,
    pub markup: Option<ReplyMarkup>,
}

/// `MessagingPort` that remembers everything and can be told to fail.
pub struct RecordingMessenger {
    fail: bool,
    next_message: AtomicUsize,
    sent: Mutex<Vec<SentText>>,
    documents: Mutex<Vec<(ChatId, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    answered: Mutex<Vec<String>>,
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self {
            fail: false,
            next_message: AtomicUsize::new(10_000),
            sent: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            answered: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingMessenger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn texts_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.chat_id == ChatId(chat))
            .map(|s| s.text)
            .collect()
    }

    pub fn last_markup(&self) -> Option<ReplyMarkup> {
        self.sent().last().and_then(|s| s.markup.clone())
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    fn message_ref(&self, chat_id: ChatId) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(self.next_message.fetch_add(1, Ordering::Relaxed) as i32),
        }
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_delete: true,
            supports_inline_keyboards: true,
            supports_documents: true,
            max_message_len: 4096,
        }
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef> {
        if self.fail {
            return Err(Error::External("send failed".to_string()));
        }
        self.sent.lock().unwrap().push(SentText {
            chat_id,
            text: text.to_string(),
            markup,
        });
        Ok(self.message_ref(chat_id))
    }

    async fn send_document(&self, chat_id: ChatId, doc: OutgoingDocument) -> Result<MessageRef> {
        if self.fail {
            return Err(Error::External("send failed".to_string()));
        }
        self.documents.lock().unwrap().push((chat_id, doc.file_name));
        Ok(self.message_ref(chat_id))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        if self.fail {
            return Err(Error::External("delete failed".to_string()));
        }
        self.deleted.lock().unwrap().push(msg);
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub contexts: ContextManager,
    pub messenger: Arc<RecordingMessenger>,
    pub store: MemoryStore,
    pub sessions: Arc<MemorySessionStore>,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let sessions = Arc::new(MemorySessionStore::new());
    let messenger = Arc::new(RecordingMessenger::default());
    let contexts = ContextManager::new(
        BotId::new("test_bot"),
        Arc::new(store.clone()),
        sessions.clone(),
        messenger.clone(),
    );
    Harness {
        contexts,
        messenger,
        store,
        sessions,
    }
}

pub struct NoopAction;

#[async_trait]
impl Action for NoopAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        Ok(Flow::Continue)
    }
}

/// Returns a fixed flow.
pub struct FlowAction(Flow);

impl FlowAction {
    pub fn new(flow: Flow) -> Arc<Self> {
        Arc::new(Self(flow))
    }
}

#[async_trait]
impl Action for FlowAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        Ok(self.0.clone())
    }
}

/// Counts invocations and returns a fixed flow.
pub struct CountingAction {
    flow: Flow,
    calls: AtomicUsize,
}

impl CountingAction {
    pub fn new(flow: Flow) -> Arc<Self> {
        Arc::new(Self {
            flow,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.flow.clone())
    }
}

/// Sleeps, then counts the call.
pub struct SlowAction {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowAction {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for SlowAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        tokio::time::sleep(self.delay).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Continue)
    }
}

/// Creates the sender's messaging user so tests can observe commits.
pub struct TouchingAction;

impl TouchingAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Action for TouchingAction {
    async fn call(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> Result<Flow> {
        ctx.messaging_user(update).await?;
        Ok(Flow::Continue)
    }
}

pub struct FailingAction;

#[async_trait]
impl Action for FailingAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        Err(Error::External("boom".to_string()))
    }
}

pub struct PanickingAction;

#[async_trait]
impl Action for PanickingAction {
    async fn call(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        panic!("handler panicked on purpose")
    }
}

pub struct CountingProcessor {
    flow: Flow,
    calls: AtomicUsize,
}

impl CountingProcessor {
    pub fn new(flow: Flow) -> Arc<Self> {
        Arc::new(Self {
            flow,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for CountingProcessor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn process(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.flow.clone())
    }
}

pub struct FailingProcessor;

#[async_trait]
impl Processor for FailingProcessor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _update: &InboundUpdate, _ctx: &mut ExecutionContext) -> Result<Flow> {
        Err(Error::Store("processor failed".to_string()))
    }
}
