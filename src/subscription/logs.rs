//! Log-driven refresh.
//!
//! Subscribes to transaction logs mentioning the program and re-reads the
//! watched filter whenever one arrives. Only changed accounts are emitted, so
//! a transaction that touched unrelated accounts costs one read and nothing
//! else. Every notification is reported as a heartbeat, so a quiet filter on
//! a busy program is not mistaken for a dead stream.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter},
};
use solana_commitment_config::CommitmentConfig;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    ledger::LedgerReader,
    subscription::{ChangeTracker, ChannelEvent, SubscriptionError, UpdateCallback, UpdateChannel, WatchFilter, read_filter},
};

pub struct LogStreamChannel {
    ws_url: String,
    reader: Arc<dyn LedgerReader>,
    filter: WatchFilter,
    commitment: CommitmentConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogStreamChannel {
    pub fn new(
        ws_url: String,
        reader: Arc<dyn LedgerReader>,
        filter: WatchFilter,
        commitment: CommitmentConfig,
    ) -> Self {
        Self {
            ws_url,
            reader,
            filter,
            commitment,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

async fn refresh(
    reader: &dyn LedgerReader,
    filter: &WatchFilter,
    tracker: &mut ChangeTracker,
    on_update: &UpdateCallback,
) {
    match read_filter(reader, filter).await {
        Ok(read) => {
            let emitted = tracker.emit_changed(read, on_update);
            if emitted > 0 {
                debug!("log refresh emitted {} changed accounts", emitted);
            }
        }
        Err(err) => warn!("log-triggered read failed: {}", err),
    }
}

async fn run(
    ws_url: String,
    reader: Arc<dyn LedgerReader>,
    filter: WatchFilter,
    commitment: CommitmentConfig,
    cancel: CancellationToken,
    on_update: UpdateCallback,
    ready: oneshot::Sender<Result<(), SubscriptionError>>,
) {
    let client = match PubsubClient::new(&ws_url).await {
        Ok(client) => client,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };

    let program_id = reader.program_id();
    let (mut logs, unsubscribe) = match client
        .logs_subscribe(
            RpcTransactionLogsFilter::Mentions(vec![program_id.to_string()]),
            RpcTransactionLogsConfig {
                commitment: Some(commitment),
            },
        )
        .await
    {
        Ok(subscription) => subscription,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut tracker = ChangeTracker::default();
    refresh(reader.as_ref(), &filter, &mut tracker, &on_update).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            notification = logs.next() => match notification {
                Some(response) => {
                    on_update(ChannelEvent::Heartbeat);
                    if response.value.err.is_some() {
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = refresh(reader.as_ref(), &filter, &mut tracker, &on_update) => {}
                    }
                }
                None => {
                    warn!("log stream for {} ended", program_id);
                    on_update(ChannelEvent::Closed);
                    break;
                }
            }
        }
    }

    drop(logs);
    unsubscribe().await;
    debug!("log channel task exiting");
}

#[async_trait]
impl UpdateChannel for LogStreamChannel {
    fn name(&self) -> &'static str {
        "logs"
    }

    async fn start(&mut self, on_update: UpdateCallback) -> Result<(), SubscriptionError> {
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            self.ws_url.clone(),
            self.reader.clone(),
            self.filter.clone(),
            self.commitment,
            self.cancel.clone(),
            on_update,
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("log subscription open on {}", self.ws_url);
                self.task = Some(task);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = task.await;
                Err(err)
            }
            Err(_) => Err(SubscriptionError::ChannelClosed(self.name())),
        }
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
