//! C8 — one task per configured network, converting custody-contract log
//! events into ledger/channel mutations (§4.2).
//!
//! Grounded on `eth_listener.go`'s `listenEvents`/`waitForBackOffTimeout`
//! for the subscribe-with-backoff shape, and on `custody.go`'s
//! `handleBlockChainEvent` for the event-to-mutation mapping. The Go
//! original's per-event switch on a raw `types.Log` is replaced here with a
//! topic0 match against each event's `SolEvent::SIGNATURE_HASH`, decoded
//! through the same inline interface [`crate::state::Custody`] uses for the
//! `join` call.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use futures_util::StreamExt;
use rust_decimal::prelude::ToPrimitive;

use crate::chain::custody::{ChainProvider, CustodyClient, connect_provider};
use crate::config::NetworkConfig;
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::ledger::ledger_for;
use crate::rpc::handlers::AppState;
use crate::state::{Custody, Intent, allocation, encode_state};
use crate::store::ChannelStatus;
use crate::util::money_amount::raw_to_decimal;

/// Hard cap on consecutive subscribe failures before the reconciler gives up
/// on this network and the process exits (spec §5's "operator-restart
/// model").
const MAX_BACKOFF_ATTEMPTS: u32 = 5;

/// `initial attempt immediate; subsequent waits 2^(k-1) seconds for attempt
/// k > 0` — the spec-prescribed shift form, not the source's `2^k - 1` XOR
/// bug (see DESIGN.md Open Question decisions).
fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1u64 << (attempt - 1))
    }
}

pub struct Reconciler {
    state: Arc<AppState>,
    network: NetworkConfig,
}

impl Reconciler {
    pub fn new(state: Arc<AppState>, network: NetworkConfig) -> Self {
        Self { state, network }
    }

    /// Runs forever, resubscribing with exponential backoff on every
    /// connection failure. Exits the process once the backoff cap is hit,
    /// matching `waitForBackOffTimeout`'s `Fatalw`.
    pub async fn run(self) {
        let mut attempt = 0u32;
        loop {
            let delay = backoff_delay(attempt);
            if delay > Duration::ZERO {
                tracing::info!(network = %self.network.name, attempt, delay_secs = delay.as_secs(), "backing off before resubscribing");
                tokio::time::sleep(delay).await;
            }

            match self.subscribe_and_process().await {
                Ok(()) => {
                    tracing::warn!(network = %self.network.name, "log subscription closed, resubscribing from now (missed events are not replayed)");
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    tracing::error!(network = %self.network.name, error = %e, attempt, "log subscription failed");
                    if attempt > MAX_BACKOFF_ATTEMPTS {
                        tracing::error!(network = %self.network.name, "backoff limit reached, exiting");
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    async fn subscribe_and_process(&self) -> ClearnodeResult<()> {
        let provider = connect_provider(&self.network, &self.state.signer).await?;
        let custody = CustodyClient::new(self.network.custody_address, provider.clone());

        let filter = Filter::new().address(self.network.custody_address);
        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ClearnodeError::chain(format!("failed to subscribe to logs: {e}")))?;
        tracing::info!(network = %self.network.name, address = %self.network.custody_address, "watching custody contract events");

        let mut stream = subscription.into_stream();
        while let Some(log) = stream.next().await {
            if let Err(e) = self.dispatch(&log, &custody).await {
                tracing::warn!(network = %self.network.name, error = %e, "failed to process chain event");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, log: &Log, custody: &CustodyClient) -> ClearnodeResult<()> {
        let Some(topic0) = log.topics().first().copied() else {
            return Ok(());
        };

        if topic0 == Custody::Created::SIGNATURE_HASH {
            let decoded = Custody::Created::decode_log(&log.inner).map_err(|e| ClearnodeError::chain(format!("bad Created log: {e}")))?;
            self.handle_created(decoded.data, custody).await
        } else if topic0 == Custody::Joined::SIGNATURE_HASH {
            let decoded = Custody::Joined::decode_log(&log.inner).map_err(|e| ClearnodeError::chain(format!("bad Joined log: {e}")))?;
            self.handle_joined(decoded.data).await
        } else if topic0 == Custody::Resized::SIGNATURE_HASH {
            let decoded = Custody::Resized::decode_log(&log.inner).map_err(|e| ClearnodeError::chain(format!("bad Resized log: {e}")))?;
            self.handle_resized(decoded.data).await
        } else if topic0 == Custody::Closed::SIGNATURE_HASH {
            let decoded = Custody::Closed::decode_log(&log.inner).map_err(|e| ClearnodeError::chain(format!("bad Closed log: {e}")))?;
            self.handle_closed(decoded.data).await
        } else {
            Ok(())
        }
    }

    /// Validates the six preconditions from spec §4.2; any violation drops
    /// the event with a log line and no state change.
    async fn handle_created(&self, ev: Custody::Created, custody: &CustodyClient) -> ClearnodeResult<()> {
        let channel_id = ev.channelId.to_string();

        if ev.participants.len() < 2 {
            tracing::warn!(channel_id, "Created event: not enough participants");
            return Ok(());
        }
        let wallet_amount = ev.walletAmount;
        let broker_amount = ev.brokerAmount;
        if broker_amount != U256::ZERO {
            tracing::warn!(channel_id, %broker_amount, "Created event: broker amount should be 0");
            return Ok(());
        }
        if ev.challenge < 3600 {
            tracing::warn!(channel_id, challenge = ev.challenge, "Created event: invalid challenge period");
            return Ok(());
        }
        if ev.adjudicator != self.network.adjudicator_address {
            tracing::warn!(channel_id, adjudicator = %ev.adjudicator, expected = %self.network.adjudicator_address, "Created event: unsupported adjudicator");
            return Ok(());
        }
        if ev.participants[1] != self.state.signer.address() {
            tracing::warn!(channel_id, participant_b = %ev.participants[1], "Created event: second participant is not the broker");
            return Ok(());
        }

        let wallet = ev.wallet.to_string();
        let participant_signer = ev.participants[0].to_string();
        let token = ev.token.to_string();

        if self.state.channels.existing_open(&wallet, &token, self.network.chain_id).await?.is_some() {
            tracing::warn!(channel_id, wallet, "Created event: open channel with broker already exists");
            return Ok(());
        }

        let mut tx = self.state.pool.begin().await?;
        self.state.signer_wallets.add_signer(&mut tx, &wallet, &participant_signer).await?;
        self.state
            .channels
            .create(
                &mut tx,
                &channel_id,
                &wallet,
                &participant_signer,
                ev.nonce,
                ev.challenge,
                &ev.adjudicator.to_string(),
                self.network.chain_id,
                &token,
                wallet_amount.to::<u128>(),
            )
            .await?;
        tx.commit().await?;

        let allocations = vec![
            allocation(ev.wallet, ev.token, wallet_amount),
            allocation(self.state.signer.address(), ev.token, U256::ZERO),
        ];
        let encoded = encode_state(ev.channelId, Intent::Initialize, U256::ZERO, &[], &allocations);
        let sig = self.state.signer.sign(&encoded).await?;
        if let Err(e) = custody.join(ev.channelId, sig.0).await {
            tracing::error!(channel_id, error = %e, "failed to submit join transaction");
        }

        self.state.fanout.send_to(&wallet, b"channel_update".to_vec());
        tracing::info!(channel_id, wallet, "joined channel");
        Ok(())
    }

    async fn handle_joined(&self, ev: Custody::Joined) -> ClearnodeResult<()> {
        let channel_id = ev.channelId.to_string();
        let Some(channel) = self.state.channels.by_id(&channel_id).await? else {
            return Err(ClearnodeError::chain(format!("channel {channel_id} not found")));
        };

        let asset = self
            .state
            .assets
            .by_token(&channel.token, channel.chain_id as u32)
            .await?
            .ok_or_else(|| ClearnodeError::chain(format!("asset not found for token {}", channel.token)))?;

        let amount = raw_to_decimal(channel.amount as u64, asset.decimals as u8);
        let mut tx = self.state.pool.begin().await?;
        ledger_for(&channel.wallet, &mut tx).record(&channel.wallet, &asset.symbol, amount).await?;
        self.state.channels.update_status(&mut tx, &channel_id, ChannelStatus::Open, channel.amount as u128, channel.version as u64).await?;
        tx.commit().await?;

        self.state.fanout.send_to(&channel.wallet, b"balance_update".to_vec());
        self.state.fanout.send_to(&channel.wallet, b"channel_update".to_vec());
        tracing::info!(channel_id, wallet = channel.wallet, "channel joined and funded");
        Ok(())
    }

    async fn handle_closed(&self, ev: Custody::Closed) -> ClearnodeResult<()> {
        let channel_id = ev.channelId.to_string();
        let Some(channel) = self.state.channels.by_id(&channel_id).await? else {
            return Err(ClearnodeError::chain(format!("channel {channel_id} not found")));
        };

        let asset = self
            .state
            .assets
            .by_token(&channel.token, channel.chain_id as u32)
            .await?
            .ok_or_else(|| ClearnodeError::chain(format!("asset not found for token {}", channel.token)))?;

        let amount = raw_to_decimal(ev.finalAmount.to::<u64>(), asset.decimals as u8);
        let mut tx = self.state.pool.begin().await?;
        ledger_for(&channel.wallet, &mut tx).record(&channel.wallet, &asset.symbol, -amount).await?;
        self.state.channels.update_status(&mut tx, &channel_id, ChannelStatus::Closed, 0, channel.version as u64 + 1).await?;
        tx.commit().await?;

        self.state.fanout.send_to(&channel.wallet, b"balance_update".to_vec());
        self.state.fanout.send_to(&channel.wallet, b"channel_update".to_vec());
        tracing::info!(channel_id, wallet = channel.wallet, "channel closed");
        Ok(())
    }

    async fn handle_resized(&self, ev: Custody::Resized) -> ClearnodeResult<()> {
        let channel_id = ev.channelId.to_string();
        let Some(channel) = self.state.channels.by_id(&channel_id).await? else {
            return Err(ClearnodeError::chain(format!("channel {channel_id} not found")));
        };

        let delta_sum: i128 = ev.deltas.iter().map(|d| i128::try_from(*d).unwrap_or(0)).sum();
        let new_amount = channel.amount as i128 + delta_sum;
        if new_amount < 0 {
            return Err(ClearnodeError::chain(format!("channel {channel_id} resized below zero")));
        }

        let participant_delta = ev.deltas.first().map(|d| i128::try_from(*d).unwrap_or(0)).unwrap_or(0);
        let mut tx = self.state.pool.begin().await?;
        if participant_delta != 0 {
            let asset = self
                .state
                .assets
                .by_token(&channel.token, channel.chain_id as u32)
                .await?
                .ok_or_else(|| ClearnodeError::chain(format!("asset not found for token {}", channel.token)))?;
            let magnitude = raw_to_decimal(participant_delta.unsigned_abs() as u64, asset.decimals as u8);
            let signed = if participant_delta > 0 { magnitude } else { -magnitude };
            ledger_for(&channel.wallet, &mut tx).record(&channel.wallet, &asset.symbol, signed).await?;
        }
        self.state.channels.update_status(&mut tx, &channel_id, channel.status, new_amount as u128, channel.version as u64 + 1).await?;
        tx.commit().await?;

        self.state.fanout.send_to(&channel.wallet, b"balance_update".to_vec());
        self.state.fanout.send_to(&channel.wallet, b"channel_update".to_vec());
        tracing::info!(channel_id, wallet = channel.wallet, %delta_sum, "channel resized");
        Ok(())
    }
}

/// Periodically fetches the broker's on-chain available balance and channel
/// count for every configured asset, and publishes them as gauges.
/// Grounded on `custody.go`'s `UpdateBalanceMetrics`.
pub async fn run_balance_metrics_loop(state: Arc<AppState>, network: NetworkConfig, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = update_balance_metrics(&state, &network).await {
            tracing::warn!(network = %network.name, error = %e, "failed to update broker balance metrics");
        }
    }
}

async fn update_balance_metrics(state: &Arc<AppState>, network: &NetworkConfig) -> ClearnodeResult<()> {
    let provider: ChainProvider = connect_provider(network, &state.signer).await?;
    let custody = CustodyClient::new(network.custody_address, provider);
    let broker = state.signer.address();

    for asset in state.assets.all(Some(network.chain_id)).await? {
        let token: Address = asset.token.parse().map_err(|_| ClearnodeError::chain(format!("invalid token address {}", asset.token)))?;
        let (available, channel_count) = custody.account_info(broker, token).await?;
        let available_decimal = raw_to_decimal(available.to::<u64>(), asset.decimals as u8);

        state
            .metrics
            .set_broker_balance(&network.name, &asset.token, &asset.symbol, available_decimal.to_f64().unwrap_or(0.0));
        state.metrics.set_broker_channel_count(&network.name, channel_count.to::<u64>() as f64);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_uses_shift_form_not_source_xor_bug() {
        assert_eq!(backoff_delay(0), Duration::ZERO);
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
    }

    #[test]
    fn backoff_cap_is_five_attempts() {
        assert_eq!(MAX_BACKOFF_ATTEMPTS, 5);
    }
}
