//! The WebSocket connection state machine and method dispatch table
//! (§4.3–4.5), grounded on `original_source/.../ws.go`'s
//! `UnifiedWSHandler.HandleConnection`.
//!
//! Every connection starts unauthenticated and may only call the read-only
//! public whitelist plus `auth_request`/`auth_verify`; once `auth_verify`
//! succeeds the connection is registered in [`SessionFanout`] under its
//! resolved wallet and every other method becomes available.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::frame::{RpcData, RpcMessage};
use super::handlers::{AppState, app_session, channel_ops, queries};
use crate::auth::{parse_allowances, validate_timestamp};
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::signer::Signature;

/// Methods a connection may call before completing `auth_verify`.
const PUBLIC_METHODS: &[&str] =
    &["ping", "get_config", "get_assets", "get_app_definition", "get_app_sessions", "get_channels", "get_ledger_entries"];

/// Methods whose request/response pair is persisted to the RPC audit trail.
const RECORDED_METHODS: &[&str] = &["create_app_session", "close_app_session", "resize_channel", "close_channel"];

/// Resolved identity of an authenticated connection.
pub struct ConnectionState {
    pub signer_address: String,
    pub wallet: String,
}

pub struct RpcRouter {
    state: Arc<AppState>,
}

impl RpcRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn handle_socket(&self, socket: WebSocket) {
        self.state.metrics.connections_total.inc();
        self.state.metrics.connected_clients.inc();

        let (mut sink, mut stream) = socket.split();

        let conn = match self.authenticate(&mut sink, &mut stream).await {
            Some(conn) => conn,
            None => {
                self.state.metrics.connected_clients.dec();
                return;
            }
        };

        tracing::info!(wallet = %conn.wallet, "participant authenticated");

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.state.fanout.register(&conn.wallet, tx);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            self.state.metrics.messages_received.inc();

            if !self.state.auth.session_is_valid(&conn.signer_address) {
                self.send_error(&conn.wallet, None, "Session expired. Please re-authenticate.");
                break;
            }
            self.state.auth.touch_session(&conn.signer_address);

            let Ok(msg) = RpcMessage::parse(text.as_bytes()) else {
                self.send_error(&conn.wallet, None, "Invalid message format");
                continue;
            };

            if !msg.app_session_id.is_empty() {
                if let Err(e) = self.forward_message(&msg, text.as_bytes(), &conn.wallet).await {
                    tracing::warn!(error = %e, "failed to forward app-session message");
                    self.send_error(&conn.wallet, Some(&msg), &format!("Failed to forward message: {e}"));
                }
                continue;
            }

            let Some(req) = &msg.req else { continue };

            if let Err(e) = validate_timestamp(req.timestamp, self.state.config.msg_expiry_secs) {
                self.send_error(&conn.wallet, Some(&msg), &format!("Message timestamp validation failed: {e}"));
                continue;
            }

            self.state.metrics.rpc_requests.with_label_values(&[req.method.as_str()]).inc();

            let record_history = RECORDED_METHODS.contains(&req.method.as_str());
            let result = self.dispatch_authenticated(&conn, req, &msg.sig).await;

            match result {
                Ok(params) => {
                    if let Err(e) = self.respond(&conn.wallet, req, params, record_history, &msg.sig).await {
                        tracing::warn!(error = %e, "failed to send response");
                    }
                }
                Err(e) => self.send_error(&conn.wallet, Some(&msg), &e.to_string()),
            }
        }

        self.state.fanout.unregister(&conn.wallet);
        self.state.metrics.connected_clients.dec();
        writer.abort();
        tracing::info!(wallet = %conn.wallet, "connection closed");
    }

    /// Reads messages until `auth_verify` succeeds, serving the public
    /// whitelist along the way. Returns `None` if the socket closes first.
    async fn authenticate(
        &self,
        sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
        stream: &mut futures_util::stream::SplitStream<WebSocket>,
    ) -> Option<ConnectionState> {
        loop {
            let msg = stream.next().await?.ok()?;
            let Message::Text(text) = msg else { continue };
            self.state.metrics.messages_received.inc();

            let Ok(parsed) = RpcMessage::parse(text.as_bytes()) else {
                let _ = sink.send(Message::Text("Invalid message format".into())).await;
                return None;
            };
            let Some(req) = &parsed.req else { continue };

            if PUBLIC_METHODS.contains(&req.method.as_str()) {
                let result = self.dispatch_public(req).await;
                match result {
                    Ok(params) => {
                        if let Ok(response) = self.sign_response(req, params).await {
                            let _ = sink.send(Message::Text(response.into())).await;
                        }
                    }
                    Err(e) => {
                        let _ = sink.send(Message::Text(format!("Failed to process {}: {e}", req.method).into())).await;
                    }
                }
                continue;
            }

            match req.method.as_str() {
                "auth_request" => {
                    self.state.metrics.auth_requests.inc();
                    if let Err(e) = self.handle_auth_request(sink, req).await {
                        let _ = sink.send(Message::Text(e.to_string().into())).await;
                    }
                }
                "auth_verify" => match self.handle_auth_verify(sink, req, &parsed.sig).await {
                    Ok(Some(conn)) => return Some(conn),
                    Ok(None) => continue,
                    Err((auth_method, e)) => {
                        self.state.metrics.auth_attempts_total.with_label_values(&[auth_method.as_str()]).inc();
                        self.state.metrics.auth_attempts_fail.with_label_values(&[auth_method.as_str()]).inc();
                        let _ = sink.send(Message::Text(e.to_string().into())).await;
                    }
                },
                _ => {
                    let _ =
                        sink.send(Message::Text("Authentication required. Please send auth_request first.".into())).await;
                }
            }
        }
    }

    async fn handle_auth_request(
        &self,
        sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
        req: &RpcData,
    ) -> ClearnodeResult<()> {
        if req.params.len() < 7 {
            return Err(ClearnodeError::protocol("missing parameters"));
        }
        let addr = req.params[0].as_str().filter(|s| !s.is_empty()).ok_or_else(|| ClearnodeError::protocol("invalid address"))?;
        let session_key =
            req.params[1].as_str().filter(|s| !s.is_empty()).ok_or_else(|| ClearnodeError::protocol("invalid session key"))?;
        let app_name =
            req.params[2].as_str().filter(|s| !s.is_empty()).ok_or_else(|| ClearnodeError::protocol("invalid app name"))?;
        let allowances = parse_allowances(&req.params[3])?;
        let expire = req.params[4].as_str().ok_or_else(|| ClearnodeError::protocol("invalid expire"))?;
        let scope = req.params[5].as_str().ok_or_else(|| ClearnodeError::protocol("invalid scope"))?;
        let application_address = req.params[6].as_str().ok_or_else(|| ClearnodeError::protocol("invalid application address"))?;

        let token = self.state.auth.generate_challenge(addr, session_key, app_name, allowances, scope, expire, application_address);

        let response = RpcMessage::response(req.request_id, "auth_challenge", vec![serde_json::json!({"challenge_message": token})], now_ms());
        let signed = self.sign_message(response).await?;
        sink.send(Message::Text(signed.into())).await.map_err(|e| ClearnodeError::protocol(e.to_string()))?;
        Ok(())
    }

    /// Returns `Ok(Some(conn))` on success, `Ok(None)` if the client
    /// completed a sub-step that doesn't yet authenticate (there are none
    /// in this protocol, kept for symmetry with the Go original's
    /// two-branch return), `Err((auth_method, error))` on failure.
    async fn handle_auth_verify(
        &self,
        sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
        req: &RpcData,
        sigs: &[String],
    ) -> Result<Option<ConnectionState>, (String, ClearnodeError)> {
        let params = req.params.first().ok_or_else(|| ("unknown".to_string(), ClearnodeError::protocol("missing parameters")))?;

        let jwt = params.get("jwt").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        if let Some(jwt) = jwt {
            let claims = self.state.auth.verify_jwt(jwt).map_err(|e| ("jwt".to_string(), e))?;
            let response = RpcMessage::response(
                req.request_id,
                "auth_verify",
                vec![serde_json::json!({"address": claims.wallet, "session_key": claims.session_key, "success": true})],
                now_ms(),
            );
            let signed = self.sign_message(response).await.map_err(|e| ("jwt".to_string(), e))?;
            sink.send(Message::Text(signed.into())).await.map_err(|e| ("jwt".to_string(), ClearnodeError::protocol(e.to_string())))?;

            self.state.metrics.auth_attempts_total.with_label_values(&["jwt"]).inc();
            self.state.metrics.auth_attempts_success.with_label_values(&["jwt"]).inc();
            self.state.auth.touch_session(&claims.wallet);
            return Ok(Some(ConnectionState { signer_address: claims.wallet.clone(), wallet: claims.wallet }));
        }

        let challenge_str = params.get("challenge").and_then(|v| v.as_str()).unwrap_or_default();
        let challenge_token: uuid::Uuid =
            challenge_str.parse().map_err(|_| ("signature".to_string(), ClearnodeError::auth("invalid challenge token")))?;
        let sig_hex = sigs.first().ok_or_else(|| ("signature".to_string(), ClearnodeError::auth("missing signature in request")))?;
        let sig = Signature::from_hex(sig_hex).map_err(|e| ("signature".to_string(), e))?;

        let claims = self
            .state
            .auth
            .validate_challenge(challenge_token, sig)
            .map_err(|e| ("signature".to_string(), e))?;

        let mut tx = self.state.pool.begin().await.map_err(|e| ("signature".to_string(), ClearnodeError::from(e)))?;
        self.state
            .signer_wallets
            .add_signer(&mut tx, &claims.wallet, &claims.session_key)
            .await
            .map_err(|e| ("signature".to_string(), e))?;
        tx.commit().await.map_err(|e| ("signature".to_string(), ClearnodeError::from(e)))?;

        let jwt_token = self.state.auth.generate_jwt(&claims).map_err(|e| ("signature".to_string(), e))?;

        let response = RpcMessage::response(
            req.request_id,
            "auth_verify",
            vec![serde_json::json!({
                "address": claims.wallet,
                "session_key": claims.session_key,
                "jwt_token": jwt_token,
                "success": true,
            })],
            now_ms(),
        );
        let signed = self.sign_message(response).await.map_err(|e| ("signature".to_string(), e))?;
        sink.send(Message::Text(signed.into()))
            .await
            .map_err(|e| ("signature".to_string(), ClearnodeError::protocol(e.to_string())))?;

        self.state.metrics.auth_attempts_total.with_label_values(&["signature"]).inc();
        self.state.metrics.auth_attempts_success.with_label_values(&["signature"]).inc();
        self.state.auth.touch_session(&claims.wallet);
        Ok(Some(ConnectionState { signer_address: claims.wallet.clone(), wallet: claims.wallet }))
    }

    async fn dispatch_public(&self, req: &RpcData) -> ClearnodeResult<Vec<Value>> {
        match req.method.as_str() {
            "ping" => queries::ping().await,
            "get_config" => queries::get_config(&self.state).await,
            "get_assets" => queries::get_assets(&self.state, &req.params).await,
            "get_app_definition" => queries::get_app_definition(&self.state, &req.params).await,
            "get_app_sessions" => queries::get_app_sessions(&self.state, &req.params).await,
            "get_channels" => queries::get_channels(&self.state, &req.params).await,
            "get_ledger_entries" => queries::get_ledger_entries(&self.state, "", &req.params).await,
            other => Err(ClearnodeError::protocol(format!("unsupported method {other}"))),
        }
    }

    async fn dispatch_authenticated(&self, conn: &ConnectionState, req: &RpcData, sigs: &[String]) -> ClearnodeResult<Vec<Value>> {
        match req.method.as_str() {
            "ping" => queries::ping().await,
            "get_config" => queries::get_config(&self.state).await,
            "get_assets" => queries::get_assets(&self.state, &req.params).await,
            "get_ledger_balances" => queries::get_ledger_balances(&self.state, &conn.wallet, &req.params).await,
            "get_ledger_entries" => queries::get_ledger_entries(&self.state, &conn.wallet, &req.params).await,
            "get_app_definition" => queries::get_app_definition(&self.state, &req.params).await,
            "get_app_sessions" => queries::get_app_sessions(&self.state, &req.params).await,
            "get_channels" => queries::get_channels(&self.state, &req.params).await,
            "create_app_session" => {
                let result = app_session::create_app_session(&self.state, req, sigs).await?;
                self.state.fanout.send_to(&conn.wallet, b"balance_update".to_vec());
                Ok(result)
            }
            "close_app_session" => {
                let result = app_session::close_app_session(&self.state, req, sigs).await?;
                self.state.fanout.send_to(&conn.wallet, b"balance_update".to_vec());
                Ok(result)
            }
            "resize_channel" => channel_ops::resize_channel(&self.state, req, sigs).await,
            "close_channel" => channel_ops::close_channel(&self.state, req, sigs).await,
            "get_rpc_history" => queries::get_rpc_history(&self.state, &conn.wallet, &req.params).await,
            other => Err(ClearnodeError::protocol(format!("Unsupported method {other}"))),
        }
    }

    /// Signs and pushes an authenticated-loop response, recording it to the
    /// audit trail when the method requires it.
    async fn respond(
        &self,
        wallet: &str,
        req: &RpcData,
        params: Vec<Value>,
        record_history: bool,
        req_sig: &[String],
    ) -> ClearnodeResult<()> {
        let response = RpcMessage::response(req.request_id, req.method.as_str(), params, now_ms());
        let res_bytes = response.sign_data()?;
        let signature = self.state.signer.sign(&res_bytes).await?;
        let mut signed = response;
        signed.sig = vec![signature.to_hex()];

        if record_history {
            self.state
                .rpc_store
                .store(wallet, req, req_sig, &String::from_utf8_lossy(&res_bytes), &signed.sig)
                .await?;
        }

        let payload = serde_json::to_vec(&signed)?;
        self.state.metrics.messages_sent.inc();
        if !self.state.fanout.send_to(wallet, payload) {
            return Err(ClearnodeError::protocol("connection no longer registered"));
        }
        Ok(())
    }

    async fn sign_message(&self, mut msg: RpcMessage) -> ClearnodeResult<String> {
        let res_bytes = msg.sign_data()?;
        let signature = self.state.signer.sign(&res_bytes).await?;
        msg.sig = vec![signature.to_hex()];
        Ok(serde_json::to_string(&msg)?)
    }

    async fn sign_response(&self, req: &RpcData, params: Vec<Value>) -> ClearnodeResult<String> {
        self.sign_message(RpcMessage::response(req.request_id, req.method.as_str(), params, now_ms())).await
    }

    fn send_error(&self, wallet: &str, _msg: Option<&RpcMessage>, error: &str) {
        let response = RpcMessage::response(now_ms(), "error", vec![Value::String(error.to_string())], now_ms());
        if let Ok(payload) = serde_json::to_vec(&response) {
            self.state.fanout.send_to(wallet, payload);
        }
    }

    /// `forwardMessage`-equivalent: recovers the sender, checks they are a
    /// participant of the named app session, and relays the raw bytes to
    /// every other participant currently online.
    async fn forward_message(&self, msg: &RpcMessage, raw: &[u8], from_wallet: &str) -> ClearnodeResult<()> {
        let data = msg.req.as_ref().or(msg.res.as_ref()).ok_or_else(|| ClearnodeError::protocol("message has neither req nor res"))?;
        let data_bytes = serde_json::to_vec(data)?;

        let mut authorized = false;
        for sig_hex in &msg.sig {
            let sig = Signature::from_hex(sig_hex)?;
            let addr = crate::signer::recover_address(&data_bytes, sig)?;
            if addr.to_string().eq_ignore_ascii_case(from_wallet) {
                authorized = true;
            }
        }
        if !authorized {
            return Err(ClearnodeError::auth("unauthorized: invalid signature or sender is not a participant of this vApp"));
        }

        let session = self
            .state
            .app_sessions
            .by_session_id(&msg.app_session_id)
            .await?
            .ok_or_else(|| ClearnodeError::conflict("failed to find virtual app session"))?;

        for participant in &session.participants {
            if participant.eq_ignore_ascii_case(from_wallet) {
                continue;
            }
            self.state.fanout.send_to(participant, raw.to_vec());
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_whitelist_excludes_mutating_methods() {
        for method in ["create_app_session", "close_app_session", "resize_channel", "close_channel", "auth_request", "auth_verify"] {
            assert!(!PUBLIC_METHODS.contains(&method), "{method} must require authentication");
        }
    }

    #[test]
    fn recorded_methods_are_all_mutating() {
        for method in RECORDED_METHODS {
            assert!(!PUBLIC_METHODS.contains(method), "{method} is both public and recorded, that's inconsistent");
        }
    }

    #[test]
    fn now_ms_is_a_13_digit_unix_timestamp() {
        let ts = now_ms();
        assert!((1_000_000_000_000..=9_999_999_999_999).contains(&ts));
    }
}
