use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    ledger::LedgerReader,
    subscription::{ChangeTracker, SubscriptionError, UpdateCallback, UpdateChannel, WatchFilter, read_filter},
};

/// Re-reads its filter every `frequency` and emits the accounts whose bytes
/// changed. The first read happens inside `start`, so a caller sees the
/// current values before `start` returns.
pub struct PollingChannel {
    reader: Arc<dyn LedgerReader>,
    filter: WatchFilter,
    frequency: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingChannel {
    pub fn new(reader: Arc<dyn LedgerReader>, filter: WatchFilter, frequency: Duration) -> Self {
        Self {
            reader,
            filter,
            frequency,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl UpdateChannel for PollingChannel {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn can_stall(&self) -> bool {
        false
    }

    async fn start(&mut self, on_update: UpdateCallback) -> Result<(), SubscriptionError> {
        let mut tracker = ChangeTracker::default();
        let initial = read_filter(self.reader.as_ref(), &self.filter).await?;
        tracker.emit_changed(initial, &on_update);

        let reader = self.reader.clone();
        let filter = self.filter.clone();
        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(self.frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.task = Some(tokio::spawn(async move {
            // The first tick completes immediately and the initial read is done.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let read = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = read_filter(reader.as_ref(), &filter) => read,
                };

                match read {
                    Ok(read) => {
                        let emitted = tracker.emit_changed(read, &on_update);
                        if emitted > 0 {
                            debug!("poll emitted {} changed accounts", emitted);
                        }
                    }
                    Err(err) => warn!("poll read failed: {}", err),
                }
            }
        }));

        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
