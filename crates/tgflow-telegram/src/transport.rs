//! Long-polling transport: Telegram updates into the dispatch queue.

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tgflow_core::update::InboundUpdate;

use crate::convert;

/// Poll Telegram until `cancel` fires, pushing converted updates into `queue`.
///
/// Updates from one chat are forwarded in arrival order. A full queue blocks
/// polling rather than dropping updates.
pub async fn run_polling(
    bot: Bot,
    queue: mpsc::Sender<InboundUpdate>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let me = bot.get_me().await?;
    info!(bot = %me.username(), "telegram polling started");

    let handler = dptree::entry().endpoint(forward);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![queue])
        .default_handler(|upd: Arc<Update>| async move {
            debug!(update_id = upd.id, "update ignored");
        })
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        match shutdown.shutdown() {
            Ok(done) => done.await,
            Err(_) => debug!("polling already idle at shutdown"),
        }
    });

    dispatcher.dispatch().await;
    info!("telegram polling stopped");
    Ok(())
}

async fn forward(upd: Update, queue: mpsc::Sender<InboundUpdate>) -> ResponseResult<()> {
    let Some(inbound) = convert::inbound(&upd) else {
        debug!(update_id = upd.id, "unsupported update kind");
        return Ok(());
    };
    if queue.send(inbound).await.is_err() {
        warn!(update_id = upd.id, "dispatch queue closed; update dropped");
    }
    Ok(())
}
