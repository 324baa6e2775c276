//! Wire shapes for the `RPCMessage`/`RPCData` envelope: a request or
//! response is serialized as the 4-element JSON array
//! `[request_id, method, params, timestamp_ms]`, never as a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClearnodeError, ClearnodeResult};

/// One request or response body — always 4 positional fields on the wire.
#[derive(Debug, Clone)]
pub struct RpcData {
    pub request_id: u64,
    pub method: String,
    pub params: Vec<Value>,
    pub timestamp: u64,
}

impl RpcData {
    pub fn response(request_id: u64, method: impl Into<String>, params: Vec<Value>, timestamp_ms: u64) -> Self {
        Self {
            request_id,
            method: method.into(),
            params,
            timestamp: timestamp_ms,
        }
    }
}

impl Serialize for RpcData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.request_id)?;
        seq.serialize_element(&self.method)?;
        seq.serialize_element(&self.params)?;
        seq.serialize_element(&self.timestamp)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for RpcData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<Value>::deserialize(deserializer)?;
        if raw.len() != 4 {
            return Err(serde::de::Error::custom("invalid message format: expected 4 elements"));
        }
        let mut it = raw.into_iter();
        let request_id = serde_json::from_value(it.next().unwrap()).map_err(serde::de::Error::custom)?;
        let method = serde_json::from_value(it.next().unwrap()).map_err(serde::de::Error::custom)?;
        let params = serde_json::from_value(it.next().unwrap()).map_err(serde::de::Error::custom)?;
        let timestamp = serde_json::from_value(it.next().unwrap()).map_err(serde::de::Error::custom)?;
        Ok(Self { request_id, method, params, timestamp })
    }
}

/// The full envelope: exactly one of `req`/`res`, plus zero or more
/// signatures and an optional app-session routing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(rename = "req", skip_serializing_if = "Option::is_none")]
    pub req: Option<RpcData>,
    #[serde(rename = "res", skip_serializing_if = "Option::is_none")]
    pub res: Option<RpcData>,
    #[serde(rename = "sid", skip_serializing_if = "String::is_empty", default)]
    pub app_session_id: String,
    pub sig: Vec<String>,
}

pub type RpcRequest = RpcData;

impl RpcMessage {
    pub fn parse(data: &[u8]) -> ClearnodeResult<Self> {
        serde_json::from_slice(data).map_err(|e| ClearnodeError::protocol(format!("failed to parse request: {e}")))
    }

    pub fn response(request_id: u64, method: impl Into<String>, params: Vec<Value>, timestamp_ms: u64) -> Self {
        Self {
            req: None,
            res: Some(RpcData::response(request_id, method, params, timestamp_ms)),
            app_session_id: String::new(),
            sig: Vec::new(),
        }
    }

    /// The canonical sign-data bytes for this message's payload half
    /// (`req` for a request, `res` for a response) — the shape every
    /// signature in `sig` is computed over.
    pub fn sign_data(&self) -> ClearnodeResult<Vec<u8>> {
        let data = self
            .req
            .as_ref()
            .or(self.res.as_ref())
            .ok_or_else(|| ClearnodeError::protocol("message has neither req nor res"))?;
        serde_json::to_vec(data).map_err(|e| ClearnodeError::protocol(format!("failed to encode sign data: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_data_round_trips_through_positional_array() {
        let data = RpcData::response(42, "ping", vec![], 1_700_000_000_000);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"[42,"ping",[],1700000000000]"#);
        let parsed: RpcData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 42);
        assert_eq!(parsed.method, "ping");
    }

    #[test]
    fn rpc_data_rejects_wrong_arity() {
        let err = serde_json::from_str::<RpcData>(r#"[1,"ping",[]]"#).unwrap_err();
        assert!(err.to_string().contains("expected 4 elements"));
    }

    #[test]
    fn message_requires_req_or_res_for_sign_data() {
        let msg = RpcMessage { req: None, res: None, app_session_id: String::new(), sig: vec![] };
        assert!(msg.sign_data().is_err());
    }
}
