//! C1 — deterministic ECDSA sign/recover and EIP-712 typed-data recovery.
//!
//! The 65-byte `r(32) || s(32) || v(1)` signature shape with `v ∈ {27, 28}`
//! is the wire contract every other component assumes; this module is the
//! only place that shape is produced or consumed.

use alloy::primitives::{Address, Signature as AlloySignature, keccak256};
use alloy::signers::Signer as _;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolStruct, eip712_domain};
use serde::{Deserialize, Serialize};

use crate::error::{ClearnodeError, ClearnodeResult};

/// A 65-byte `r || s || v` signature, hex-encoded on the wire as
/// `0x<130 hex chars>` with `v ∈ {27, 28}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn from_alloy(sig: AlloySignature) -> Self {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
        bytes[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
        bytes[64] = if sig.v() { 28 } else { 27 };
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> ClearnodeResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(s).map_err(|e| ClearnodeError::protocol(format!("invalid signature hex: {e}")))?;
        if bytes.len() != 65 {
            return Err(ClearnodeError::protocol(format!(
                "invalid signature length: got {}, want 65",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 65];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    fn to_alloy(self) -> ClearnodeResult<AlloySignature> {
        let mut v = self.0[64];
        if v >= 27 {
            v -= 27;
        }
        Ok(AlloySignature::from_bytes_and_parity(&self.0[0..64], v != 0))
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The broker's signing identity. Cheap to clone; safe for concurrent use
/// per spec §5's shared-resource policy.
#[derive(Clone)]
pub struct BrokerSigner {
    inner: PrivateKeySigner,
}

impl BrokerSigner {
    pub fn from_hex(private_key_hex: &str) -> ClearnodeResult<Self> {
        let private_key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
        let inner: PrivateKeySigner = private_key_hex
            .parse()
            .map_err(|e| ClearnodeError::protocol(format!("invalid broker private key: {e}")))?;
        tracing::info!(address = %inner.address(), "broker signer initialized");
        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Clones the underlying local signer for use with an
    /// `alloy::network::EthereumWallet`, e.g. to sign the broker's own
    /// on-chain `join` transactions. Cheap: `PrivateKeySigner` wraps a single
    /// secp256k1 key.
    pub fn local_signer(&self) -> PrivateKeySigner {
        self.inner.clone()
    }

    /// Signs the keccak256 digest of `data`, returning the fixed 65-byte
    /// shape.
    pub async fn sign(&self, data: &[u8]) -> ClearnodeResult<Signature> {
        let digest = keccak256(data);
        let sig = self
            .inner
            .sign_hash(&digest)
            .await
            .map_err(|e| ClearnodeError::auth(format!("failed to sign data: {e}")))?;
        Ok(Signature::from_alloy(sig))
    }

    /// Signs an already-computed state digest directly (no re-hashing),
    /// used by the channel resize/close signing path where the digest is
    /// `keccak256(encode_state(...))`.
    pub async fn sign_digest(&self, digest: alloy::primitives::B256) -> ClearnodeResult<Signature> {
        let sig = self
            .inner
            .sign_hash(&digest)
            .await
            .map_err(|e| ClearnodeError::auth(format!("failed to sign state: {e}")))?;
        Ok(Signature::from_alloy(sig))
    }
}

/// Recovers the signing address from `data` (hashed with keccak256) and a
/// 65-byte signature.
pub fn recover_address(data: &[u8], sig: Signature) -> ClearnodeResult<Address> {
    let digest = keccak256(data);
    let alloy_sig = sig.to_alloy()?;
    alloy_sig
        .recover_address_from_prehash(&digest)
        .map_err(|e| ClearnodeError::auth(format!("signature recovery failed: {e}")))
}

/// Recovers the signing address from an already-computed digest.
pub fn recover_address_from_digest(
    digest: alloy::primitives::B256,
    sig: Signature,
) -> ClearnodeResult<Address> {
    let alloy_sig = sig.to_alloy()?;
    alloy_sig
        .recover_address_from_prehash(&digest)
        .map_err(|e| ClearnodeError::auth(format!("signature recovery failed: {e}")))
}

/// One asset allowance declared in an auth [`Policy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: String,
}

alloy::sol! {
    #[derive(Debug)]
    struct Eip712Allowance {
        string asset;
        uint256 amount;
    }

    #[derive(Debug)]
    struct Policy {
        string challenge;
        string scope;
        address wallet;
        address application;
        address participant;
        uint256 expire;
        Eip712Allowance[] allowances;
    }
}

/// Recovers the address that produced an EIP-712 signature over a [`Policy`]
/// typed-data struct, per spec §4.7. `app_name` is the EIP-712 domain name.
pub fn recover_policy_signer(
    app_name: &str,
    policy: &Policy,
    sig: Signature,
) -> ClearnodeResult<Address> {
    let domain = eip712_domain! {
        name: app_name.to_string(),
    };
    let digest = policy.eip712_signing_hash(&domain);
    recover_address_from_digest(digest, sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn test_signer() -> BrokerSigner {
        BrokerSigner::from_hex("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
            .unwrap()
    }

    #[tokio::test]
    async fn sign_then_recover_round_trips() {
        let signer = test_signer();
        let data = b"hello clearnode";
        let sig = signer.sign(data).await.unwrap();
        assert_eq!(sig.0.len(), 65);
        assert!(sig.0[64] == 27 || sig.0[64] == 28);
        let recovered = recover_address(data, sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn signature_hex_round_trips() {
        let signer = test_signer();
        let sig = signer.sign(b"data").await.unwrap();
        let hex = sig.to_hex();
        assert_eq!(hex.len(), 2 + 130);
        let parsed = Signature::from_hex(&hex).unwrap();
        assert_eq!(parsed, sig);
    }

    #[tokio::test]
    async fn policy_signature_recovers_wallet() {
        let wallet = PrivateKeySigner::random();
        let signer = BrokerSigner {
            inner: wallet.clone(),
        };
        let policy = Policy {
            challenge: "chal-1".to_string(),
            scope: "app.create".to_string(),
            wallet: wallet.address(),
            application: Address::ZERO,
            participant: Address::ZERO,
            expire: U256::from(1_900_000_000u64),
            allowances: vec![],
        };
        let domain = eip712_domain! { name: "clearnode-app".to_string() };
        let digest = policy.eip712_signing_hash(&domain);
        let sig = signer.sign_digest(digest).await.unwrap();
        let recovered = recover_policy_signer("clearnode-app", &policy, sig).unwrap();
        assert_eq!(recovered, wallet.address());
    }
}
