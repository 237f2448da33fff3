//! Patient-reply daemon.
//!
//! Receives replies from the messaging gateway, appointment events from the
//! scheduling connector, and serves the operator API.

mod config;
mod error;
mod processor;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use conversation_store::ConversationStore;
use database::Database;
use dispatch_queue::{DispatchConfig, DispatchQueue};
use gateway_client::{GatewayClient, GatewayConfig};
use keyword_classifier::KeywordClassifier;
use orchestrator::{AuditLog, Orchestrator, RecordBook};
use reply_core::{
    ConfidenceThresholds, LoggingTransport, MessageTransport, ReplyTemplates, TimeWindows,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::processor::{InboundProcessor, ProcessorConfig};
use crate::state::AppState;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves once shutdown has been signalled.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Periodically drop idle conversation contexts.
fn spawn_context_gc(
    store: Arc<ConversationStore>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        let stop = shutdown_signal(shutdown);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                _ = interval.tick() => match store.prune_inactive().await {
                    Ok(0) => {}
                    Ok(pruned) => info!("Pruned {} inactive contexts", pruned),
                    Err(e) => error!("Context pruning failed: {}", e),
                },
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let config = DaemonConfig::from_env()?;
    init_tracing(config.json_logs);
    info!(addr = %config.addr, "Starting reply daemon");

    let windows = TimeWindows::from_env()?;
    let thresholds = ConfidenceThresholds::from_env()?;
    let dispatch = DispatchConfig::from_env()?;

    // Connect to database
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    // Messaging gateway, or a logging transport for dry runs
    let (transport, gateway): (Arc<dyn MessageTransport>, Option<GatewayClient>) =
        match GatewayConfig::from_env() {
            Ok(gateway_config) => {
                let client = GatewayClient::new(gateway_config)?;
                (Arc::new(client.clone()), Some(client))
            }
            Err(e) => {
                warn!("Gateway not configured ({}), running in dry-run mode", e);
                (Arc::new(LoggingTransport::default()), None)
            }
        };
    info!("Transport: {}", transport.name());

    let store = Arc::new(ConversationStore::new(windows).with_database(db.clone()));
    store.load_all().await?;
    let records = Arc::new(RecordBook::new().with_database(db.clone()));
    records.load_all().await?;
    let audit = Arc::new(AuditLog::new().with_database(db.clone()));
    let queue = DispatchQueue::with_database(dispatch, transport, db.clone());

    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(KeywordClassifier::new()), queue.clone())
            .with_store(store.clone())
            .with_records(records)
            .with_audit(audit)
            .with_templates(ReplyTemplates::load())
            .with_thresholds(thresholds)
            .with_classifier_timeout(config.classifier_timeout),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background workers
    let dispatch_worker = {
        let stop = shutdown_signal(shutdown_rx.clone());
        tokio::spawn(async move { queue.run_until(stop).await })
    };
    let dispatch_audit = orchestrator.spawn_dispatch_audit(shutdown_signal(shutdown_rx.clone()));
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
    let processor = InboundProcessor::new(
        orchestrator.clone(),
        ProcessorConfig {
            max_concurrent: config.max_concurrent,
            pass_timeout: config.pass_timeout,
        },
    );
    let processor_worker = tokio::spawn(
        processor.run_until(inbound_rx, shutdown_signal(shutdown_rx.clone())),
    );
    let gc_worker = spawn_context_gc(store, config.gc_interval, shutdown_rx);

    // Build router
    let state = AppState::new(orchestrator, inbound_tx, gateway);
    let app = routes::router().with_state(state);

    // Start server
    info!(addr = %config.addr, "Reply daemon listening");
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    processor_worker.await?;
    if let Err(e) = dispatch_worker.await? {
        error!("Dispatch worker failed: {}", e);
    }
    gc_worker.await?;
    dispatch_audit.await?;

    info!("Reply daemon stopped");
    Ok(())
}
