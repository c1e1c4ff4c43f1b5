//! Push subscriptions over the ledger's pubsub websocket.
//!
//! A `PubsubClient` hands out streams that borrow it, so each channel runs one
//! task that owns the client, opens the subscriptions, reports the handshake
//! result back to `start` and then forwards notifications until cancelled. A
//! stream that ends on its own is reported as `ChannelEvent::Closed`.

use async_trait::async_trait;
use futures_util::{StreamExt, stream::select_all};
use log::{debug, info, warn};
use solana_account::Account;
use solana_account_decoder::{UiAccount, UiAccountEncoding};
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
};
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    ledger::rpc::to_rpc_filters,
    subscription::{ChannelEvent, RawUpdate, SubscriptionError, UpdateCallback, UpdateChannel, WatchFilter},
};

pub struct WebSocketChannel {
    ws_url: String,
    program_id: Pubkey,
    filter: WatchFilter,
    commitment: CommitmentConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    pub fn new(ws_url: String, program_id: Pubkey, filter: WatchFilter, commitment: CommitmentConfig) -> Self {
        Self {
            ws_url,
            program_id,
            filter,
            commitment,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

fn account_config(commitment: CommitmentConfig) -> RpcAccountInfoConfig {
    RpcAccountInfoConfig {
        encoding: Some(UiAccountEncoding::Base64),
        commitment: Some(commitment),
        ..RpcAccountInfoConfig::default()
    }
}

fn account_bytes(account: &UiAccount) -> Option<Vec<u8>> {
    account.decode::<Account>().map(|account| account.data)
}

fn emit(on_update: &UpdateCallback, address: Pubkey, account: &UiAccount, slot: u64) {
    match account_bytes(account) {
        Some(data) => on_update(ChannelEvent::Update(RawUpdate { address, data, slot })),
        None => {
            warn!("undecodable account payload for {}", address);
            on_update(ChannelEvent::Heartbeat);
        }
    }
}

async fn run(
    ws_url: String,
    program_id: Pubkey,
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

    match filter {
        WatchFilter::Account(address) => {
            let (mut stream, unsubscribe) =
                match client.account_subscribe(&address, Some(account_config(commitment))).await {
                    Ok(subscription) => subscription,
                    Err(err) => {
                        let _ = ready.send(Err(err.into()));
                        return;
                    }
                };
            let _ = ready.send(Ok(()));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = stream.next() => match notification {
                        Some(response) => emit(&on_update, address, &response.value, response.context.slot),
                        None => {
                            warn!("account stream for {} ended", address);
                            on_update(ChannelEvent::Closed);
                            break;
                        }
                    }
                }
            }

            drop(stream);
            unsubscribe().await;
        }
        WatchFilter::Accounts(addresses) => {
            let mut streams = Vec::with_capacity(addresses.len());
            let mut unsubscribes = Vec::with_capacity(addresses.len());
            for address in addresses {
                match client.account_subscribe(&address, Some(account_config(commitment))).await {
                    Ok((stream, unsubscribe)) => {
                        streams.push(stream.map(move |response| (address, response)).boxed());
                        unsubscribes.push(unsubscribe);
                    }
                    Err(err) => {
                        drop(streams);
                        for unsubscribe in unsubscribes {
                            unsubscribe().await;
                        }
                        let _ = ready.send(Err(err.into()));
                        return;
                    }
                }
            }
            let _ = ready.send(Ok(()));

            let mut merged = select_all(streams);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = merged.next() => match notification {
                        Some((address, response)) => {
                            emit(&on_update, address, &response.value, response.context.slot)
                        }
                        None => {
                            warn!("all account streams ended");
                            on_update(ChannelEvent::Closed);
                            break;
                        }
                    }
                }
            }

            drop(merged);
            for unsubscribe in unsubscribes {
                unsubscribe().await;
            }
        }
        WatchFilter::Program(filters) => {
            let config = RpcProgramAccountsConfig {
                filters: Some(to_rpc_filters(&filters)),
                account_config: account_config(commitment),
                ..RpcProgramAccountsConfig::default()
            };
            let (mut stream, unsubscribe) = match client.program_subscribe(&program_id, Some(config)).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    let _ = ready.send(Err(err.into()));
                    return;
                }
            };
            let _ = ready.send(Ok(()));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = stream.next() => match notification {
                        Some(response) => match response.value.pubkey.parse::<Pubkey>() {
                            Ok(address) => {
                                emit(&on_update, address, &response.value.account, response.context.slot)
                            }
                            Err(err) => {
                                warn!("bad pubkey {} in program notification: {}", response.value.pubkey, err);
                                on_update(ChannelEvent::Heartbeat);
                            }
                        },
                        None => {
                            warn!("program stream for {} ended", program_id);
                            on_update(ChannelEvent::Closed);
                            break;
                        }
                    }
                }
            }

            drop(stream);
            unsubscribe().await;
        }
    }

    debug!("websocket channel task exiting");
}

#[async_trait]
impl UpdateChannel for WebSocketChannel {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn start(&mut self, on_update: UpdateCallback) -> Result<(), SubscriptionError> {
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            self.ws_url.clone(),
            self.program_id,
            self.filter.clone(),
            self.commitment,
            self.cancel.clone(),
            on_update,
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("websocket subscription open on {}", self.ws_url);
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
