//! C11 — wallet → connection fan-out.
//!
//! Each authenticated connection owns a writer task fed by an
//! `mpsc::UnboundedSender`; pushing here never blocks on a slow reader the
//! way writing directly to the socket from an arbitrary handler would.
//! Grounded on the Go original's `UnifiedWSHandler.connections` map
//! (`sync.RWMutex` + `map[string]*websocket.Conn`) — the concurrent map is
//! replaced by [`DashMap`] and the direct write by a channel send, matching
//! spec §5's "transient worker per connection" shape.

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

pub struct SessionFanout {
    connections: DashMap<String, UnboundedSender<Message>>,
}

impl SessionFanout {
    pub fn new() -> Self {
        Self { connections: DashMap::new() }
    }

    /// Registers the writer channel for a newly authenticated wallet.
    /// Only one connection per wallet is allowed, matching the source: a
    /// second login silently displaces the first.
    pub fn register(&self, wallet: &str, sender: UnboundedSender<Message>) {
        self.connections.insert(wallet.to_string(), sender);
    }

    pub fn unregister(&self, wallet: &str) {
        self.connections.remove(wallet);
    }

    pub fn is_connected(&self, wallet: &str) -> bool {
        self.connections.contains_key(wallet)
    }

    /// Best-effort push; `false` means the wallet has no live connection
    /// (or its writer task has already exited).
    pub fn send_to(&self, wallet: &str, payload: Vec<u8>) -> bool {
        match self.connections.get(wallet) {
            Some(sender) => sender.send(Message::Text(String::from_utf8_lossy(&payload).into_owned().into())).is_ok(),
            None => false,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Drops every registered sender, which closes each writer task's
    /// channel and lets it terminate the underlying socket.
    pub fn close_all(&self) {
        self.connections.clear();
    }
}

impl Default for SessionFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_unknown_wallet_returns_false() {
        let fanout = SessionFanout::new();
        assert!(!fanout.send_to("0xnobody", b"hi".to_vec()));
    }

    #[tokio::test]
    async fn register_then_send_delivers_message() {
        let fanout = SessionFanout::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        fanout.register("0xwallet", tx);
        assert!(fanout.send_to("0xwallet", b"hello".to_vec()));
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, Message::Text(_)));
    }

    #[tokio::test]
    async fn unregister_removes_connection() {
        let fanout = SessionFanout::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        fanout.register("0xwallet", tx);
        fanout.unregister("0xwallet");
        assert!(!fanout.is_connected("0xwallet"));
    }
}
