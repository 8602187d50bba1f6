use anyhow::Result;
use chrono::Utc;
use coldtrace_alert::AlertStateMachine;
use coldtrace_common::types::Channel;
use coldtrace_notify::dispatcher::NotificationDispatcher;
use coldtrace_notify::escalation::EscalationScheduler;
use coldtrace_notify::plugin::ChannelRegistry;
use coldtrace_notify::worker::DeliveryWorker;
use coldtrace_notify::ChannelMap;
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_storage::FacilityStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use coldtrace_server::app;
use coldtrace_server::config::ServerConfig;
use coldtrace_server::reconcile::{self, ReconcileLoop};
use coldtrace_server::state::{AppState, TelemetryRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("coldtrace=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/server.toml");
    run_server(config_path).await
}

/// Builds the per-channel senders from the `[channels.*]` config sections.
fn build_channels(config: &ServerConfig) -> ChannelMap {
    let registry = ChannelRegistry::default();
    let mut channels = ChannelMap::new();
    for (type_name, channel_config) in &config.channels {
        let key = match type_name.parse::<Channel>() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(channel = %type_name, error = %e, "Unknown channel type in config, skipped");
                continue;
            }
        };
        match registry.create_channel(type_name, channel_config) {
            Ok(channel) => {
                tracing::info!(channel = %type_name, "Notification channel configured");
                channels.insert(key, Arc::from(channel));
            }
            Err(e) => {
                tracing::error!(channel = %type_name, error = %e, "Invalid channel config, skipped");
            }
        }
    }
    channels
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    coldtrace_common::id::init(config.snowflake.machine_id, config.snowflake.node_id);

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.database.data_dir,
        db = %config.database.redacted_url(),
        "coldtrace-server starting"
    );

    let store = Arc::new(
        FacilityStore::new(
            &config.database.connection_url(),
            Path::new(&config.database.data_dir),
        )
        .await?,
    );

    let resolver = Arc::new(RuleResolver::new(
        store.clone(),
        Duration::from_secs(config.rules.cache_ttl_secs),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        chrono::Duration::minutes(config.delivery.rate_limit_window_minutes),
        config.delivery.max_attempts,
    ));

    let mut digest_recipients: Vec<(Channel, String)> = Vec::new();
    if config.digest.enabled {
        for r in &config.digest.recipients {
            match r.channel.parse::<Channel>() {
                Ok(channel) => digest_recipients.push((channel, r.address.clone())),
                Err(e) => {
                    tracing::warn!(channel = %r.channel, error = %e, "Invalid digest recipient, skipped");
                }
            }
        }
    }
    let escalation = Arc::new(EscalationScheduler::new(
        store.clone(),
        dispatcher.clone(),
        resolver.clone(),
        digest_recipients,
    ));

    let machine = Arc::new(AlertStateMachine::new(
        store.clone(),
        dispatcher.clone(),
        escalation.clone(),
    ));

    let channels = build_channels(&config);
    if channels.is_empty() {
        tracing::warn!("No notification channels configured; queued jobs will fail at delivery");
    }
    let worker = Arc::new(DeliveryWorker::new(
        store.clone(),
        channels,
        config.delivery.max_concurrent,
        Duration::from_secs(config.delivery.backoff_base_secs),
        Duration::from_secs(config.delivery.throttle_delay_secs),
        Duration::from_secs(config.delivery.visibility_timeout_secs),
        config.delivery.batch_size,
    ));

    let telemetry = Arc::new(Mutex::new(TelemetryRegistry::new()));
    let state = AppState {
        store: store.clone(),
        machine: machine.clone(),
        resolver: resolver.clone(),
        telemetry: telemetry.clone(),
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    // Background loops
    let worker_handle = {
        let poll = Duration::from_secs(config.delivery.poll_secs);
        tokio::spawn(worker.run(poll))
    };
    let escalation_handle = {
        let scheduler = escalation.clone();
        let poll = Duration::from_secs(config.escalation.tick_secs);
        tokio::spawn(scheduler.run(poll))
    };
    let reconcile_handle = {
        let reconcile_loop = Arc::new(ReconcileLoop::new(
            store.clone(),
            resolver.clone(),
            machine.clone(),
            telemetry.clone(),
        ));
        let poll = Duration::from_secs(config.reconcile.tick_secs);
        tokio::spawn(reconcile_loop.run(poll))
    };
    let digest_handle = if config.digest.enabled {
        let scheduler = escalation.clone();
        let hour = config.digest.hour;
        Some(tokio::spawn(reconcile::run_digest_loop(scheduler, hour)))
    } else {
        tracing::info!("Daily digest disabled");
        None
    };

    // HTTP/REST server
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let router = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    let http_server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    worker_handle.abort();
    escalation_handle.abort();
    reconcile_handle.abort();
    if let Some(h) = digest_handle {
        h.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
