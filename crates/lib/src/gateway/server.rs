//! Process supervisor: wires store, relay engine and the selected event source, serves the
//! webhook endpoint in push mode, and runs the shutdown sequence.

use crate::channels::{Messenger, TelegramChannel};
use crate::config::{self, Config, TransportMode};
use crate::relay::{Escalator, RelayEngine, RelaySettings};
use crate::store::{CorrelationStore, FileCorrelationStore};
use crate::transport::{webhook_channel, EventSource, PollingSource, WebhookIngress};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Path the webhook is served on and registered with (appended to the base URL).
pub const WEBHOOK_PATH: &str = "/telegram/webhook";

const WEBHOOK_QUEUE_CAPACITY: usize = 256;

/// Shared state for the webhook HTTP server.
#[derive(Clone)]
pub struct GatewayState {
    pub port: u16,
    pub ingress: WebhookIngress,
}

/// Router for push mode: `POST /telegram/webhook` and a `GET /` health probe.
pub fn webhook_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(WEBHOOK_PATH, post(telegram_webhook))
        .with_state(state)
}

/// POST /telegram/webhook — receives one Telegram update; verifies optional secret and queues it.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.ingress.accept(&headers, &body).await
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "mode": TransportMode::Push.as_str(),
        "port": state.port,
    }))
}

/// Feed events from `source` into `engine` one at a time until `shutdown` completes or the
/// source ends. An event already being handled is finished before returning.
/// Returns the number of events handled.
pub async fn run_relay_loop<F>(
    source: &mut dyn EventSource,
    engine: &RelayEngine,
    shutdown: F,
) -> usize
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut handled = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("shutdown signal received, no longer accepting updates");
                break;
            }
            event = source.next_event() => {
                let Some(event) = event else { break };
                engine.handle(&event).await;
                handled += 1;
            }
        }
    }
    handled
}

/// Close `source` and handle whatever it already accepted, for at most `timeout`.
/// Returns the number of events handled.
pub async fn drain_source(
    source: &mut dyn EventSource,
    engine: &RelayEngine,
    timeout: Duration,
) -> usize {
    source.close().await;
    let mut handled = 0;
    let drained = tokio::time::timeout(timeout, async {
        while let Some(event) = source.next_event().await {
            engine.handle(&event).await;
            handled += 1;
        }
    })
    .await;
    if drained.is_err() {
        log::warn!(
            "drain timeout ({:?}) reached; {} queued event(s) handled before giving up",
            timeout,
            handled
        );
    } else if handled > 0 {
        log::info!("drained {} queued event(s)", handled);
    }
    handled
}

/// Run the relay until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    run_gateway_until(config, shutdown_signal()).await
}

/// Run the relay until `shutdown` completes.
///
/// Startup failures (missing token or identities, unreadable store, webhook registration,
/// port bind) are returned as errors. After startup, transport and send failures are
/// handled internally and never end the process.
pub async fn run_gateway_until<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let token = config::resolve_telegram_token(&config).context(
        "telegram bot token not configured (set channels.telegram.botToken or TELEGRAM_BOT_TOKEN)",
    )?;
    let identities = config::resolve_identities(&config)?;
    let mode = config.gateway.mode;

    let store_path = config::resolve_store_path(&config);
    let store: Arc<dyn CorrelationStore> = Arc::new(
        FileCorrelationStore::open(&store_path)
            .await
            .with_context(|| format!("opening correlation store {}", store_path.display()))?,
    );

    let telegram = Arc::new(TelegramChannel::new(
        token,
        config.channels.telegram.api_base.clone(),
    ));
    let messenger: Arc<dyn Messenger> = telegram.clone();
    let escalator = Escalator::new(
        messenger.clone(),
        identities.developer_chat_id,
        store.clone(),
    );
    let engine = RelayEngine::new(
        RelaySettings::new(&config.relay, &identities),
        store.clone(),
        messenger,
        escalator,
    );
    log::info!(
        "relay ready: operator {}, developer chat {}, audit mirror {}",
        identities.operator_id,
        identities.developer_chat_id,
        identities
            .audit_chat_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "off".to_string())
    );

    match mode {
        TransportMode::Pull => {
            if let Err(e) = telegram.delete_webhook().await {
                log::warn!("telegram deleteWebhook before polling failed: {}", e);
            }
            let mut source = PollingSource::new(telegram.clone(), identities.operator_id);
            log::info!("telegram channel started (pull mode, getUpdates long poll)");
            run_relay_loop(&mut source, &engine, shutdown).await;
            drain_source(&mut source, &engine, config.gateway.drain_timeout()).await;
        }
        TransportMode::Push => {
            let base = config::resolve_webhook_url(&config).context(
                "push mode requires channels.telegram.webhookUrl (or HUSH_WEBHOOK_URL)",
            )?;
            let webhook_url = format!("{}{}", base.trim_end_matches('/'), WEBHOOK_PATH);
            let secret = config.channels.telegram.webhook_secret.clone();
            let (ingress, mut source) = webhook_channel(
                identities.operator_id,
                secret.clone(),
                WEBHOOK_QUEUE_CAPACITY,
            );

            let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .with_context(|| format!("binding to {}", bind_addr))?;
            let app = webhook_router(GatewayState {
                port: config.gateway.port,
                ingress,
            });
            let (stop_tx, mut stop_rx) = watch::channel(false);
            let mut server = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop_rx.changed().await;
                    })
                    .await
            });
            log::info!("webhook listening on {}", bind_addr);

            if let Err(e) = telegram.set_webhook(&webhook_url, secret.as_deref()).await {
                let _ = stop_tx.send(true);
                let _ = server.await;
                return Err(e).with_context(|| format!("registering webhook {}", webhook_url));
            }
            log::info!("telegram channel registered (push mode): {}", webhook_url);

            run_relay_loop(&mut source, &engine, shutdown).await;

            // Handlers blocked on a full queue only return once the queue is closed, so
            // the server is stopped while the source drains, both within the drain timeout.
            let _ = stop_tx.send(true);
            let drain_timeout = config.gateway.drain_timeout();
            let stop_server = async move {
                let stopped = tokio::time::timeout(drain_timeout, &mut server).await;
                match stopped {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => log::warn!("webhook server error: {}", e),
                    Ok(Err(e)) => log::warn!("webhook server task failed: {}", e),
                    Err(_) => {
                        log::warn!(
                            "webhook server did not stop within {:?}, aborting",
                            drain_timeout
                        );
                        server.abort();
                    }
                }
            };
            tokio::join!(
                stop_server,
                drain_source(&mut source, &engine, drain_timeout)
            );
            if let Err(e) = telegram.delete_webhook().await {
                log::debug!("telegram delete_webhook on shutdown: {}", e);
            }
        }
    }

    store
        .flush()
        .await
        .with_context(|| format!("flushing correlation store {}", store_path.display()))?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
