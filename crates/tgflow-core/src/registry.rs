//! Handler groups and the per-update group scheduler.
//!
//! Groups run in ascending priority. Inside a group the first matching
//! handler (registration order) is the only one invoked; a [`Flow::Stop`]
//! ends the whole pass.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::{
    context::{ContextManager, ExecutionContext},
    errors::Error,
    handler::{Action, Flow, Handler, Resume, RunMode},
    update::InboundUpdate,
    Result,
};

/// Early group for access control.
pub const AUTH_GROUP: i32 = -100;
/// Feature handlers.
pub const DEFAULT_GROUP: i32 = 0;

/// Summary of one `process` pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Some handler matched. Informational only.
    pub handled: bool,
    /// A handler requested pipeline-stop.
    pub stopped: bool,
}

#[derive(Default)]
pub struct HandlerRegistry {
    groups: BTreeMap<i32, Vec<Handler>>,
    pool: Option<WorkerPool>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run detached handlers on `pool`. Without a pool they run inline.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    pub fn register(&mut self, handler: Handler, group: i32) -> Result<()> {
        handler.validate()?;
        let bucket = self.groups.entry(group).or_default();
        if bucket.iter().any(|h| h.name() == handler.name()) {
            return Err(Error::InvalidHandler {
                name: handler.name().to_string(),
                reason: format!("duplicate handler name in group {group}"),
            });
        }
        debug!(handler = handler.name(), group, "registered handler");
        bucket.push(handler);
        Ok(())
    }

    pub fn groups(&self) -> impl Iterator<Item = i32> + '_ {
        self.groups.keys().copied()
    }

    pub fn handler_names(&self, group: i32) -> Vec<&str> {
        self.groups
            .get(&group)
            .map(|hs| hs.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    pub async fn process(
        &self,
        update: &InboundUpdate,
        ctx: &mut ExecutionContext,
    ) -> Result<Outcome> {
        let mut outcome = Outcome::default();

        for (group, handlers) in &self.groups {
            let Some(handler) = handlers.iter().find(|h| h.check(update, ctx)) else {
                continue;
            };
            outcome.handled = true;
            ctx.record_fired(handler.name());
            debug!(
                update_id = update.id.0,
                group = *group,
                handler = handler.name(),
                "handler matched"
            );

            let flow = match (handler.mode(), &self.pool) {
                (RunMode::Detached, Some(pool)) => {
                    pool.spawn(handler.name(), handler.action(), update, ctx);
                    Flow::Continue
                }
                _ => handler.action().call(update, ctx).await?,
            };

            if let Flow::Stop(resume) = flow {
                apply_resume(ctx, resume);
                outcome.stopped = true;
                break;
            }
        }

        Ok(outcome)
    }
}

/// Move the user's conversation as requested by a pipeline stop.
pub(crate) fn apply_resume(ctx: &mut ExecutionContext, resume: Option<Resume>) {
    match resume {
        Some(Resume::Enter(state)) => ctx.set_conversation(Some(state)),
        Some(Resume::End) => ctx.set_conversation(None),
        None => {}
    }
}

/// Bounded pool for detached handler actions.
///
/// Each job runs in its own execution scope opened from the shared
/// [`ContextManager`], acting as the same principal as the originating update.
/// Jobs commit their unit-of-work but never write the session back.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    contexts: ContextManager,
}

impl WorkerPool {
    pub fn new(size: usize, contexts: ContextManager) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            tasks: TaskTracker::new(),
            contexts,
        }
    }

    /// Queue a job. Returns immediately; the job waits for a free worker.
    fn spawn(
        &self,
        name: &str,
        action: Arc<dyn Action>,
        update: &InboundUpdate,
        origin: &ExecutionContext,
    ) {
        if self.tasks.is_closed() {
            warn!(handler = name, "worker pool closed; dropping detached job");
            return;
        }
        let permits = self.permits.clone();
        let contexts = self.contexts.clone();
        let update = update.clone();
        let principal = origin.principal().clone();
        let name = name.to_string();

        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(handler = %name, "worker pool closed; dropping detached job");
                return;
            };
            let mut ctx = match contexts.open(&update).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!(handler = %name, error = %e, "failed to open detached scope");
                    return;
                }
            };
            ctx.set_principal(principal);
            if let Err(e) = action.call(&update, &mut ctx).await {
                error!(handler = %name, update_id = update.id.0, error = ?e, "detached handler failed");
            }
            if let Err(e) = contexts.close_detached(ctx).await {
                error!(handler = %name, error = %e, "failed to close detached scope");
            }
        });
    }

    /// Refuse new jobs, then wait until every queued job has finished.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.permits.close();
    }
}
