//! Clearnode entrypoint.
//!
//! This binary launches:
//! - a WebSocket listener (`/ws`) serving the authenticated RPC protocol
//!   (§4.3–4.5) via [`RpcRouter`],
//! - a Prometheus metrics listener on a separate port,
//! - one chain reconciler task per configured network (§4.2), each paired
//!   with a periodic broker-balance metrics poll.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CLEARNODE_DATABASE_URL`, `BROKER_PRIVATE_KEY` are required
//! - `HOST`, `PORT`, `METRICS_PORT` control binding addresses
//! - `{PREFIX}_INFURA_URL` / `{PREFIX}_CUSTODY_CONTRACT_ADDRESS` /
//!   `{PREFIX}_ADJUDICATOR_ADDRESS` configure each supported network

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use clearnode::auth::AuthManager;
use clearnode::chain::{Reconciler, run_balance_metrics_loop};
use clearnode::config::Config;
use clearnode::metrics::Metrics;
use clearnode::rpc::handlers::AppState;
use clearnode::rpc::router::RpcRouter;
use clearnode::session_fanout::SessionFanout;
use clearnode::sig_down::ShutdownSignal;
use clearnode::signer::BrokerSigner;
use clearnode::store::{AppSessionStore, AssetStore, ChannelStore, RpcStore, SignerWalletIndex};
use clearnode::telemetry::Telemetry;

const BALANCE_METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let _telemetry = Telemetry::new();

    let config = Config::load()?;
    tracing::info!(networks = config.networks.len(), "loaded configuration");

    let pool = PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;

    let signer = BrokerSigner::from_hex(&config.broker_private_key_hex)?;
    let signer_wallets = SignerWalletIndex::new(pool.clone());
    signer_wallets.warm().await?;

    let state = Arc::new(AppState {
        auth: AuthManager::new("clearnode", &config.broker_private_key_hex),
        channels: ChannelStore::new(pool.clone()),
        assets: AssetStore::new(pool.clone()),
        app_sessions: AppSessionStore::new(pool.clone()),
        rpc_store: RpcStore::new(pool.clone()),
        signer_wallets,
        metrics: Metrics::new(),
        fanout: SessionFanout::new(),
        signer,
        pool,
        config: Arc::new(config.clone()),
    });

    let shutdown = ShutdownSignal::try_new()?;

    let mut reconciler_tasks = Vec::new();
    for network in &config.networks {
        let reconciler = Reconciler::new(state.clone(), network.clone());
        reconciler_tasks.push(tokio::spawn(reconciler.run()));
        reconciler_tasks.push(tokio::spawn(run_balance_metrics_loop(state.clone(), network.clone(), BALANCE_METRICS_INTERVAL)));
    }

    let ws_app = Router::new().route("/ws", get(ws_upgrade)).with_state(state.clone());
    let ws_addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%ws_addr, "starting websocket listener");
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await?;

    let metrics_app = Router::new().route("/metrics", get(serve_metrics)).with_state(state.clone());
    let metrics_addr: SocketAddr = format!("{}:{}", config.host, config.metrics_port).parse()?;
    tracing::info!(%metrics_addr, "starting metrics listener");
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;

    let ws_shutdown = shutdown.token();
    let metrics_shutdown = shutdown.token();

    let ws_task = tokio::spawn(async move {
        axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move { ws_shutdown.cancelled().await }).await
    });
    let metrics_task = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await
    });

    let (ws_result, metrics_result) = tokio::join!(ws_task, metrics_task);

    for task in reconciler_tasks {
        task.abort();
    }

    ws_result??;
    metrics_result??;
    Ok(())
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket: WebSocket| async move {
        RpcRouter::new(state).handle_socket(socket).await;
    })
}

async fn serve_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.render()
}
