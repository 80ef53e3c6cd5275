//! The update dispatch loop.
//!
//! One consumer drains a bounded queue. Each update gets a fresh execution
//! scope; pre-processors, the handler registry and post-processors run with
//! panics caught, and the scope is closed on every exit path.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::DispatchConfig,
    context::{ContextManager, ExecutionContext, SideEffects},
    errors::Error,
    handler::Flow,
    hooks::{Hooks, Processor},
    registry::{apply_resume, HandlerRegistry, Outcome},
    update::InboundUpdate,
    Result,
};

/// Chat reply for any unexpected failure. Details only go to the log.
pub const FAILURE_REPLY: &str = "Sorry, something went wrong. Please try again.";

/// Stop and exception signals observed by [`Dispatcher::run`].
#[derive(Clone, Debug, Default)]
pub struct DispatchControl {
    stop: CancellationToken,
    exception: CancellationToken,
}

impl DispatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the update in flight, then exit.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Something outside the loop failed; exit before taking another update.
    pub fn signal_exception(&self) {
        self.exception.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.exception.is_cancelled()
    }
}

/// What happened to one update.
#[derive(Clone, Debug, Default)]
pub struct Report {
    pub outcome: Outcome,
    pub effects: SideEffects,
    /// A processor or handler failed, or the pipeline panicked.
    pub failed: bool,
}

struct Pipeline {
    registry: Arc<HandlerRegistry>,
    hooks: Arc<Hooks>,
}

struct PipelineResult {
    outcome: Outcome,
    errors: Vec<(String, Error)>,
}

impl Pipeline {
    async fn run(&self, update: &InboundUpdate, ctx: &mut ExecutionContext) -> PipelineResult {
        let mut errors = Vec::new();
        let mut outcome = Outcome::default();

        let halted = run_processors(&self.hooks.pre, update, ctx, &mut errors).await;
        if !halted {
            match self.registry.process(update, ctx).await {
                Ok(o) => outcome = o,
                Err(e) => {
                    error!(update_id = update.id.0, error = ?e, "handler failed");
                    if let Err(send_err) = ctx.reply(FAILURE_REPLY).await {
                        warn!(error = %send_err, "failed to send failure reply");
                    }
                    errors.push(("handler".to_string(), e));
                }
            }
        }
        run_processors(&self.hooks.post, update, ctx, &mut errors).await;

        PipelineResult { outcome, errors }
    }
}

/// Returns whether a processor requested pipeline-stop.
async fn run_processors(
    processors: &[Arc<dyn Processor>],
    update: &InboundUpdate,
    ctx: &mut ExecutionContext,
    errors: &mut Vec<(String, Error)>,
) -> bool {
    for p in processors {
        match p.process(update, ctx).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop(resume)) => {
                debug!(processor = p.name(), "processor stopped the pipeline");
                apply_resume(ctx, resume);
                return true;
            }
            Err(e) => {
                error!(processor = p.name(), update_id = update.id.0, error = ?e, "processor failed");
                errors.push((p.name().to_string(), e));
            }
        }
    }
    false
}

pub struct Dispatcher {
    contexts: ContextManager,
    pipeline: Pipeline,
    audit: Option<AuditLogger>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        contexts: ContextManager,
        registry: Arc<HandlerRegistry>,
        hooks: Arc<Hooks>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            contexts,
            pipeline: Pipeline { registry, hooks },
            audit: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The bounded queue the transport feeds.
    pub fn channel(&self) -> (mpsc::Sender<InboundUpdate>, mpsc::Receiver<InboundUpdate>) {
        mpsc::channel(self.config.queue_capacity.max(1))
    }

    /// Consume updates until stopped, signalled, or the queue closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundUpdate>, control: &DispatchControl) {
        info!(
            bot = %self.contexts.bot(),
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "dispatch loop started"
        );

        loop {
            if control.exception.is_cancelled() {
                warn!("exception signalled; dispatch loop exiting");
                break;
            }
            if control.stop.is_cancelled() {
                info!("stop requested; dispatch loop exiting");
                break;
            }

            match tokio::time::timeout(self.config.poll_timeout, rx.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    info!("update queue closed; dispatch loop exiting");
                    break;
                }
                Ok(Some(update)) => {
                    self.process_one(update).await;
                }
            }
        }

        if let Some(pool) = self.pipeline.registry.pool() {
            pool.shutdown().await;
        }
    }

    /// Run the full pipeline for one update. Never fails; failures are logged.
    pub async fn process_one(&self, update: InboundUpdate) -> Report {
        let started = Instant::now();
        let update_id = update.id.0;
        let chat_id = update.chat.id.0;
        let user_id = update.user_id().map(|u| u.0);
        debug!(
            update_id,
            chat_id,
            user_id,
            has_text = update.text().is_some(),
            has_callback = update.callback.is_some(),
            "processing update"
        );

        let mut ctx = match self.contexts.open(&update).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(update_id, error = ?e, "failed to open execution context");
                self.audit_error(update_id, chat_id, user_id, &e.to_string(), "open");
                return Report {
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let mut panicked = false;
        let result = match AssertUnwindSafe(self.pipeline.run(&update, &mut ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(update_id, panic = %msg, "update pipeline panicked");
                self.audit_error(update_id, chat_id, user_id, &msg, "panic");
                panicked = true;
                PipelineResult {
                    outcome: Outcome::default(),
                    errors: Vec::new(),
                }
            }
        };

        let mut failed = panicked || !result.errors.is_empty();
        for (origin, e) in &result.errors {
            self.audit_error(update_id, chat_id, user_id, &e.to_string(), origin);
        }

        let effects = match self.contexts.close(ctx).await {
            Ok(effects) => effects,
            Err(e) => {
                error!(update_id, error = ?e, "failed to close execution context");
                self.audit_error(update_id, chat_id, user_id, &e.to_string(), "close");
                failed = true;
                SideEffects::default()
            }
        };

        let elapsed = started.elapsed();
        debug!(
            update_id,
            handled = result.outcome.handled,
            stopped = result.outcome.stopped,
            fired = ?effects.fired,
            elapsed_ms = elapsed.as_millis() as u64,
            "update processed"
        );
        self.audit_update(update_id, chat_id, user_id, &result.outcome, &effects, elapsed);

        Report {
            outcome: result.outcome,
            effects,
            failed,
        }
    }

    fn audit_update(
        &self,
        update_id: i64,
        chat_id: i64,
        user_id: Option<i64>,
        outcome: &Outcome,
        effects: &SideEffects,
        elapsed: Duration,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let bot = self.contexts.bot().as_str();
        let mut events = vec![AuditEvent::update(
            bot,
            update_id,
            chat_id,
            user_id,
            outcome.handled,
            outcome.stopped,
            effects.fired.clone(),
            effects.sent.len(),
            elapsed.as_millis() as u64,
        )];
        if let Some(account) = &effects.linked {
            events.push(AuditEvent::auth(
                bot,
                update_id,
                chat_id,
                user_id,
                Some(account.as_str()),
                true,
            ));
        }
        if effects.login_rejected {
            events.push(AuditEvent::auth(bot, update_id, chat_id, user_id, None, false));
        }
        for ev in events {
            if let Err(e) = audit.write(ev) {
                warn!(error = %e, "failed to write audit log");
            }
        }
    }

    fn audit_error(&self, update_id: i64, chat_id: i64, user_id: Option<i64>, err: &str, origin: &str) {
        let Some(audit) = &self.audit else {
            return;
        };
        let ev = AuditEvent::error(
            self.contexts.bot().as_str(),
            update_id,
            chat_id,
            user_id,
            err,
            Some(origin),
        );
        if let Err(e) = audit.write(ev) {
            warn!(error = %e, "failed to write audit log");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_string()
    }
}
