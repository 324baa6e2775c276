//! Thin binding over the custody contract's inline interface (§4.6),
//! connection setup, and the broker's own `join`/balance-query calls.
//!
//! Grounded on `custody.go`'s `NewCustody`/`Join`/`UpdateBalanceMetrics`.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};

use crate::config::NetworkConfig;
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::signer::BrokerSigner;
use crate::state::Custody;

/// An EVM JSON-RPC/WS provider, type-erased so every network's reconciler
/// task can share the same concrete type regardless of transport.
pub type ChainProvider = DynProvider;

/// Opens a wallet-backed provider for one network, signed by the broker's
/// own key so the `join` transaction the reconciler issues is self-funded.
pub async fn connect_provider(network: &NetworkConfig, signer: &BrokerSigner) -> ClearnodeResult<ChainProvider> {
    let wallet = EthereumWallet::from(signer.local_signer());
    let provider = ProviderBuilder::new()
        .wallet(wallet)
        .connect(&network.rpc_url)
        .await
        .map_err(|e| ClearnodeError::chain(format!("failed to connect provider for {}: {e}", network.name)))?;
    Ok(provider.erased())
}

/// Bound custody contract for one network.
pub struct CustodyClient {
    contract: Custody::CustodyInstance<ChainProvider>,
}

impl CustodyClient {
    pub fn new(address: Address, provider: ChainProvider) -> Self {
        Self { contract: Custody::new(address, provider) }
    }

    /// Co-signs and submits the broker's `join` call for a freshly created
    /// channel, always as participant index 1 (the second participant).
    pub async fn join(&self, channel_id: B256, sig: [u8; 65]) -> ClearnodeResult<B256> {
        let pending = self
            .contract
            .join(channel_id, U256::from(1u64), Bytes::copy_from_slice(&sig))
            .send()
            .await
            .map_err(|e| ClearnodeError::chain(format!("failed to join channel {channel_id}: {e}")))?;
        let hash = *pending.tx_hash();
        tracing::info!(%channel_id, tx_hash = %hash, "submitted join transaction");
        Ok(hash)
    }

    /// The broker's available balance and open-channel count on this
    /// network for one token, per `getAccountInfo`.
    pub async fn account_info(&self, broker: Address, token: Address) -> ClearnodeResult<(U256, U256)> {
        let info = self
            .contract
            .getAccountInfo(broker, token)
            .call()
            .await
            .map_err(|e| ClearnodeError::chain(format!("getAccountInfo failed for {token}: {e}")))?;
        Ok((info.available, info.channelCount))
    }
}
