use std::sync::Arc;

use anyhow::Context;
use teloxide::Bot;
use tracing::{error, info};

use tgflow_core::{
    audit::AuditLogger,
    config::Config,
    context::ContextManager,
    dispatch::{DispatchControl, Dispatcher},
    domain::{BotId, UserId},
    flows::{self, FlowDeps},
    hooks::Hooks,
    identity::{CredentialVerifier, IdentityBackend, MemoryIdentityBackend},
    message_log::MessageLogger,
    messaging::{audited::AuditedMessenger, port::MessagingPort},
    registry::{HandlerRegistry, WorkerPool},
    session::{JsonFileSessionStore, MemorySessionStore, SessionStore},
    store::{memory::MemoryStore, Store},
};
use tgflow_frappe::{FrappeClient, FrappeLdap};
use tgflow_telegram::{transport, TelegramMessenger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgflow_core::logging::init("tgflow")?;

    let cfg = Config::load()?;
    let bot_id = BotId::new(cfg.bot_name.clone());
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let store = match &cfg.store_file {
        Some(path) => MemoryStore::with_users_file(path).await?,
        None => MemoryStore::new(),
    };
    mark_guests(&store, &cfg.guest_users).await?;

    let sessions: Arc<dyn SessionStore> = match &cfg.session_file {
        Some(path) => Arc::new(JsonFileSessionStore::new(path)),
        None => Arc::new(MemorySessionStore::new()),
    };
    let messenger: Arc<dyn MessagingPort> = Arc::new(AuditedMessenger::new(
        Arc::new(TelegramMessenger::new(bot.clone())),
        bot_id.clone(),
        Arc::new(store.clone()),
    ));
    let contexts = ContextManager::new(bot_id, Arc::new(store), sessions, messenger);

    let verifier = match &cfg.frappe {
        Some(frappe) => {
            let client = FrappeClient::new(frappe)?;
            info!(url = %frappe.url, ldap = frappe.ldap_enabled, "using frappe identity backend");
            CredentialVerifier::new(Arc::new(client.clone()))
                .with_directory(Arc::new(FrappeLdap::new(client, frappe.ldap_enabled)))
        }
        None => {
            info!("FRAPPE_URL not set; accounts are kept in memory");
            let backend: Arc<dyn IdentityBackend> = Arc::new(MemoryIdentityBackend::new());
            CredentialVerifier::new(backend)
        }
    };

    let hooks = Arc::new(Hooks::new().pre_process(Arc::new(MessageLogger)));
    let mut registry = HandlerRegistry::new()
        .with_pool(WorkerPool::new(cfg.dispatch.workers, contexts.clone()));
    flows::install(
        &mut registry,
        &FlowDeps {
            verifier,
            hooks: hooks.clone(),
        },
    )?;

    let mut dispatcher = Dispatcher::new(
        contexts,
        Arc::new(registry),
        hooks,
        cfg.dispatch.clone(),
    );
    if let Some(path) = &cfg.audit_log_path {
        dispatcher = dispatcher.with_audit(AuditLogger::new(path, cfg.audit_log_json));
    }

    let control = DispatchControl::new();
    let (tx, rx) = dispatcher.channel();

    let polling = {
        let control = control.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::run_polling(bot, tx, control.stop_token()).await {
                error!(error = ?e, "telegram transport failed");
                control.signal_exception();
            }
        })
    };

    {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; shutting down");
                control.stop();
            }
        });
    }

    dispatcher.run(rx, &control).await;
    control.stop();
    polling.await.context("telegram transport task")?;
    Ok(())
}

async fn mark_guests(store: &MemoryStore, guests: &[i64]) -> anyhow::Result<()> {
    if guests.is_empty() {
        return Ok(());
    }
    let mut uow = store.begin().await?;
    for id in guests {
        uow.set_guest(UserId(*id), true).await?;
    }
    uow.commit().await?;
    info!(count = guests.len(), "guest users marked");
    Ok(())
}
