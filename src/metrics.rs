//! C14 — Prometheus metrics, exposed on a dedicated port separate from the
//! WebSocket listener, same split as the teacher's metrics server.

use prometheus::{CounterVec, Encoder, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    pub connected_clients: IntGauge,
    pub connections_total: IntCounter,
    pub messages_received: IntCounter,
    pub messages_sent: IntCounter,

    pub auth_requests: IntCounter,
    pub auth_attempts_total: CounterVec,
    pub auth_attempts_success: CounterVec,
    pub auth_attempts_fail: CounterVec,

    pub channels_total: IntGauge,
    pub channels_open: IntGauge,
    pub channels_closed: IntGauge,

    pub rpc_requests: CounterVec,
    pub app_sessions_total: IntGauge,

    pub broker_balance_available: GaugeVec,
    pub broker_channel_count: GaugeVec,
    pub broker_wallet_balance: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connected_clients =
            IntGauge::new("clearnode_connected_clients", "The current number of connected clients").unwrap();
        let connections_total = IntCounter::new(
            "clearnode_connections_total",
            "The total number of WebSocket connections made since server start",
        )
        .unwrap();
        let messages_received =
            IntCounter::new("clearnode_ws_messages_received_total", "Total WebSocket messages received").unwrap();
        let messages_sent =
            IntCounter::new("clearnode_ws_messages_sent_total", "Total WebSocket messages sent").unwrap();

        let auth_requests =
            IntCounter::new("clearnode_auth_requests_total", "Total auth_request challenges issued").unwrap();
        let auth_attempts_total = CounterVec::new(
            Opts::new("clearnode_auth_attempts_total", "Total authentication attempts"),
            &["auth_method"],
        )
        .unwrap();
        let auth_attempts_success = CounterVec::new(
            Opts::new("clearnode_auth_attempts_success", "Successful authentication attempts"),
            &["auth_method"],
        )
        .unwrap();
        let auth_attempts_fail = CounterVec::new(
            Opts::new("clearnode_auth_attempts_fail", "Failed authentication attempts"),
            &["auth_method"],
        )
        .unwrap();

        let channels_total = IntGauge::new("clearnode_channels_total", "Total number of channels").unwrap();
        let channels_open = IntGauge::new("clearnode_channels_open", "Number of open channels").unwrap();
        let channels_closed = IntGauge::new("clearnode_channels_closed", "Number of closed channels").unwrap();

        let rpc_requests = CounterVec::new(
            Opts::new("clearnode_rpc_requests_total", "Total RPC requests by method"),
            &["method"],
        )
        .unwrap();
        let app_sessions_total =
            IntGauge::new("clearnode_app_sessions_total", "Total number of application sessions").unwrap();

        let broker_balance_available = GaugeVec::new(
            Opts::new("clearnode_broker_balance_available", "Available broker balance on the custody contract"),
            &["network", "token", "asset"],
        )
        .unwrap();
        let broker_channel_count = GaugeVec::new(
            Opts::new("clearnode_broker_channel_count", "Number of channels for the broker on the custody contract"),
            &["network"],
        )
        .unwrap();
        let broker_wallet_balance = GaugeVec::new(
            Opts::new("clearnode_broker_wallet_balance", "Broker wallet balance"),
            &["network", "token", "asset"],
        )
        .unwrap();

        for c in [
            Box::new(connected_clients.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(connections_total.clone()),
            Box::new(messages_received.clone()),
            Box::new(messages_sent.clone()),
            Box::new(auth_requests.clone()),
            Box::new(auth_attempts_total.clone()),
            Box::new(auth_attempts_success.clone()),
            Box::new(auth_attempts_fail.clone()),
            Box::new(channels_total.clone()),
            Box::new(channels_open.clone()),
            Box::new(channels_closed.clone()),
            Box::new(rpc_requests.clone()),
            Box::new(app_sessions_total.clone()),
            Box::new(broker_balance_available.clone()),
            Box::new(broker_channel_count.clone()),
            Box::new(broker_wallet_balance.clone()),
        ] {
            registry.register(c).expect("metric names are unique and well-formed");
        }

        Self {
            registry,
            connected_clients,
            connections_total,
            messages_received,
            messages_sent,
            auth_requests,
            auth_attempts_total,
            auth_attempts_success,
            auth_attempts_fail,
            channels_total,
            channels_open,
            channels_closed,
            rpc_requests,
            app_sessions_total,
            broker_balance_available,
            broker_channel_count,
            broker_wallet_balance,
        }
    }

    /// Renders the registry in Prometheus text exposition format, for the
    /// `/metrics` handler on the metrics port.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoding never fails");
        String::from_utf8(buf).expect("prometheus text output is valid utf8")
    }

    pub fn update_channel_counts(&self, total: i64, open: i64, closed: i64) {
        self.channels_total.set(total);
        self.channels_open.set(open);
        self.channels_closed.set(closed);
    }

    pub fn set_broker_balance(&self, network: &str, token: &str, asset: &str, amount: f64) {
        self.broker_balance_available
            .with_label_values(&[network, token, asset])
            .set(amount);
    }

    pub fn set_broker_wallet_balance(&self, network: &str, token: &str, asset: &str, amount: f64) {
        self.broker_wallet_balance.with_label_values(&[network, token, asset]).set(amount);
    }

    pub fn set_broker_channel_count(&self, network: &str, count: f64) {
        self.broker_channel_count.with_label_values(&[network]).set(count);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.connections_total.inc();
        let rendered = metrics.render();
        assert!(rendered.contains("clearnode_connections_total"));
    }
}
