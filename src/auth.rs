//! C9 — the authentication manager: challenge issuance, EIP-712
//! challenge verification, bearer-token (JWT) issuance/verification, and
//! per-connection session liveness.

use std::time::{Duration, Instant};

use alloy::primitives::Address;
use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ClearnodeError, ClearnodeResult};
use crate::signer::{Allowance, Policy, Signature, recover_policy_signer};
use crate::timestamp::UnixMillis;

/// How long an issued challenge remains redeemable.
const CHALLENGE_TTL: Duration = Duration::from_secs(60);
/// How long a session may go without activity before `auth_verify` must
/// run again. The source tracks this with no documented value; one hour
/// matches the JWT default expiry below.
const SESSION_TTL: Duration = Duration::from_secs(3600);

struct Challenge {
    address: String,
    session_key: String,
    app_name: String,
    allowances: Vec<Allowance>,
    scope: String,
    expire: String,
    application_address: String,
    issued_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyClaims {
    pub wallet: String,
    pub session_key: String,
    pub app_name: String,
    pub scope: String,
    pub application: String,
    pub allowances: Vec<Allowance>,
    pub exp: u64,
    pub iat: u64,
}

pub struct AuthManager {
    app_name: String,
    jwt_encoding_key: EncodingKey,
    jwt_decoding_key: DecodingKey,
    challenges: DashMap<Uuid, Challenge>,
    sessions: DashMap<String, Instant>,
}

impl AuthManager {
    /// Derives the JWT signing secret from the broker's private key via
    /// SHA-256, so no separate secret needs provisioning.
    pub fn new(app_name: impl Into<String>, broker_private_key_hex: &str) -> Self {
        let key_hex = broker_private_key_hex.strip_prefix("0x").unwrap_or(broker_private_key_hex);
        let mut hasher = Sha256::new();
        hasher.update(key_hex.as_bytes());
        let secret = hasher.finalize();

        Self {
            app_name: app_name.into(),
            jwt_encoding_key: EncodingKey::from_secret(&secret),
            jwt_decoding_key: DecodingKey::from_secret(&secret),
            challenges: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Issues a challenge token for an `auth_request`, to be redeemed by a
    /// signature over the same fields in a following `auth_verify`.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_challenge(
        &self,
        address: &str,
        session_key: &str,
        app_name: &str,
        allowances: Vec<Allowance>,
        scope: &str,
        expire: &str,
        application_address: &str,
    ) -> Uuid {
        let token = Uuid::new_v4();
        self.challenges.insert(
            token,
            Challenge {
                address: address.to_string(),
                session_key: session_key.to_string(),
                app_name: app_name.to_string(),
                allowances,
                scope: scope.to_string(),
                expire: expire.to_string(),
                application_address: application_address.to_string(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    fn get_challenge(&self, token: Uuid) -> ClearnodeResult<dashmap::mapref::one::Ref<'_, Uuid, Challenge>> {
        self.challenges
            .get(&token)
            .ok_or_else(|| ClearnodeError::auth("unknown or expired challenge"))
    }

    /// Verifies `sig` recovers the address the challenge claims to
    /// authenticate, and that the challenge has not expired. Consumes the
    /// challenge either way (single redemption).
    pub fn validate_challenge(&self, token: Uuid, sig: Signature) -> ClearnodeResult<PolicyClaims> {
        let challenge = self.get_challenge(token)?;
        if challenge.issued_at.elapsed() > CHALLENGE_TTL {
            drop(challenge);
            self.challenges.remove(&token);
            return Err(ClearnodeError::auth("challenge expired"));
        }

        let policy = Policy {
            challenge: token.to_string(),
            scope: challenge.scope.clone(),
            wallet: challenge.address.parse::<Address>().map_err(|e| ClearnodeError::auth(e.to_string()))?,
            application: challenge
                .application_address
                .parse::<Address>()
                .unwrap_or(Address::ZERO),
            participant: challenge
                .session_key
                .parse::<Address>()
                .map_err(|e| ClearnodeError::auth(e.to_string()))?,
            expire: challenge.expire.parse().unwrap_or_default(),
            allowances: challenge
                .allowances
                .iter()
                .map(|a| crate::signer::Eip712Allowance {
                    asset: a.asset.clone(),
                    amount: a.amount.parse().unwrap_or_default(),
                })
                .collect(),
        };

        let recovered = recover_policy_signer(&self.app_name, &policy, sig)?;
        if recovered.to_string().to_lowercase() != challenge.address.to_lowercase() {
            return Err(ClearnodeError::auth("invalid signature"));
        }

        let claims = PolicyClaims {
            wallet: challenge.address.clone(),
            session_key: challenge.session_key.clone(),
            app_name: challenge.app_name.clone(),
            scope: challenge.scope.clone(),
            application: challenge.application_address.clone(),
            allowances: challenge.allowances.clone(),
            iat: UnixMillis::try_now().map(|t| t.0 / 1000).unwrap_or_default(),
            exp: UnixMillis::try_now().map(|t| t.0 / 1000 + SESSION_TTL.as_secs()).unwrap_or_default(),
        };

        drop(challenge);
        self.challenges.remove(&token);
        Ok(claims)
    }

    pub fn generate_jwt(&self, claims: &PolicyClaims) -> ClearnodeResult<String> {
        encode(&Header::default(), claims, &self.jwt_encoding_key)
            .map_err(|e| ClearnodeError::auth(format!("failed to generate JWT: {e}")))
    }

    pub fn verify_jwt(&self, token: &str) -> ClearnodeResult<PolicyClaims> {
        let data = decode::<PolicyClaims>(token, &self.jwt_decoding_key, &Validation::default())
            .map_err(|e| ClearnodeError::auth(format!("invalid JWT: {e}")))?;
        Ok(data.claims)
    }

    pub fn touch_session(&self, signer_address: &str) {
        self.sessions.insert(signer_address.to_string(), Instant::now());
    }

    pub fn session_is_valid(&self, signer_address: &str) -> bool {
        match self.sessions.get(signer_address) {
            Some(last) => last.elapsed() <= SESSION_TTL,
            None => false,
        }
    }
}

/// Parses the `[[asset, amount], ...]` nested-array shape `auth_request`
/// sends for allowances.
pub fn parse_allowances(raw: &serde_json::Value) -> ClearnodeResult<Vec<Allowance>> {
    let outer = raw.as_array().ok_or_else(|| ClearnodeError::protocol("input is not a list of allowances"))?;
    outer
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let inner = item
                .as_array()
                .ok_or_else(|| ClearnodeError::protocol(format!("allowance at index {i} is not a list")))?;
            if inner.len() != 2 {
                return Err(ClearnodeError::protocol(format!(
                    "allowance at index {i} must have exactly 2 elements (asset, amount)"
                )));
            }
            let asset = inner[0]
                .as_str()
                .ok_or_else(|| ClearnodeError::protocol(format!("allowance at index {i} has non-string asset")))?;
            let amount = inner[1]
                .as_str()
                .ok_or_else(|| ClearnodeError::protocol(format!("allowance at index {i} has non-string amount")))?;
            Ok(Allowance { asset: asset.to_string(), amount: amount.to_string() })
        })
        .collect()
}

/// Validates a 13-digit millisecond timestamp is within `expiry_secs` of
/// now, rejecting both stale and out-of-range values.
pub fn validate_timestamp(ts_ms: u64, expiry_secs: u64) -> ClearnodeResult<()> {
    if !(1_000_000_000_000..=9_999_999_999_999).contains(&ts_ms) {
        return Err(ClearnodeError::validation(format!("invalid timestamp {ts_ms}: must be 13-digit Unix ms")));
    }
    let now = UnixMillis::try_now()?;
    if now.0.abs_diff(ts_ms) > expiry_secs * 1000 {
        return Err(ClearnodeError::validation(format!("timestamp expired: {ts_ms} older than {expiry_secs}s")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_allowances_rejects_wrong_arity() {
        let raw = serde_json::json!([["usdc"]]);
        assert!(parse_allowances(&raw).is_err());
    }

    #[test]
    fn parse_allowances_accepts_well_formed_pairs() {
        let raw = serde_json::json!([["usdc", "100"], ["eth", "1"]]);
        let parsed = parse_allowances(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].asset, "usdc");
    }

    #[test]
    fn validate_timestamp_rejects_non_13_digit() {
        assert!(validate_timestamp(123, 60).is_err());
    }

    #[test]
    fn challenge_roundtrip_with_matching_signature() {
        use alloy::signers::local::PrivateKeySigner;
        let wallet = PrivateKeySigner::random();
        let manager = AuthManager::new(
            "clearnode",
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        );
        let token = manager.generate_challenge(
            &wallet.address().to_string(),
            &wallet.address().to_string(),
            "my-app",
            vec![],
            "app.create",
            "1900000000",
            "0x0000000000000000000000000000000000000000",
        );

        let policy = Policy {
            challenge: token.to_string(),
            scope: "app.create".to_string(),
            wallet: wallet.address(),
            application: Default::default(),
            participant: wallet.address(),
            expire: alloy::primitives::U256::from(1_900_000_000u64),
            allowances: vec![],
        };
        let domain = alloy::sol_types::eip712_domain! { name: "clearnode".to_string() };
        use alloy::sol_types::SolStruct;
        let digest = policy.eip712_signing_hash(&domain);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sig = rt.block_on(async {
            use alloy::signers::Signer as _;
            let alloy_sig = wallet.sign_hash(&digest).await.unwrap();
            Signature::from_alloy(alloy_sig)
        });

        let claims = manager.validate_challenge(token, sig).unwrap();
        assert_eq!(claims.wallet, wallet.address().to_string());

        let jwt = manager.generate_jwt(&claims).unwrap();
        let verified = manager.verify_jwt(&jwt).unwrap();
        assert_eq!(verified.wallet, claims.wallet);
    }
}
