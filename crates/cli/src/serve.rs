//! The `serve` command: wire every component together and run until ctrl-c.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    volery_bridge::{BridgeEvent, BridgePlugin, BridgeRegistry, BridgeServerState, router},
    volery_channels::{
        AccountStore, ChannelAccountConfig, ChannelEvent, ChannelEventSink, ChannelRegistry,
        FileAccountStore, SharedChannels, StoredAccount, TracingEventSink,
    },
    volery_config::{VoleryConfig, validate::Severity},
    volery_dispatch::{
        Debouncer, EchoTurnHandler, InboundPipeline, ReplyDispatcher, TurnHandler,
        spawn_turn_drain,
    },
    volery_pairing::{FilePairingStore, PairingStore},
};

pub async fn run(config: VoleryConfig, state_dir: PathBuf) -> anyhow::Result<()> {
    report_diagnostics(&config)?;

    #[cfg(feature = "metrics")]
    let metrics_handle = volery_metrics::init_metrics(volery_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: vec![],
    })?;

    tokio::fs::create_dir_all(&state_dir)
        .await
        .with_context(|| format!("create state dir {}", state_dir.display()))?;
    let pairing: Arc<dyn PairingStore> =
        Arc::new(FilePairingStore::open(state_dir.join("pairing.json")).await?);
    let accounts = FileAccountStore::open(state_dir.join("accounts.json")).await?;

    let (registry, mut bridge_events) = BridgeRegistry::new();
    let mut channel_registry = ChannelRegistry::new();
    channel_registry.register(Box::new(BridgePlugin::new(registry.clone())))?;
    let channels = SharedChannels::new(channel_registry);

    let sink: Arc<dyn ChannelEventSink> = Arc::new(TracingEventSink);
    let (debouncer, turns) =
        Debouncer::new(Duration::from_millis(config.dispatch.debounce_ms));
    let dispatcher = Arc::new(ReplyDispatcher::new(channels.clone(), sink.clone()));
    let pipeline = Arc::new(InboundPipeline::new(
        channels.clone(),
        pairing,
        dispatcher.clone(),
        debouncer.clone(),
        sink.clone(),
    ));

    start_accounts(&config, &channels, &pipeline, &accounts).await?;

    // Bridge events (inbound payloads, session status) feed the pipeline.
    let event_task = {
        let pipeline = pipeline.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            while let Some(event) = bridge_events.recv().await {
                match event {
                    BridgeEvent::Inbound {
                        channel_id,
                        account_id,
                        payload,
                    } => pipeline.handle_raw(&channel_id, &account_id, &payload).await,
                    BridgeEvent::Status {
                        channel_id,
                        account_id,
                        state,
                    } => sink.emit(ChannelEvent::AccountStatusChanged {
                        channel_id,
                        account_id,
                        state,
                    }),
                }
            }
        })
    };

    let drain_token = CancellationToken::new();
    let handler: Arc<dyn TurnHandler> = Arc::new(EchoTurnHandler);
    let turn_task = spawn_turn_drain(pipeline.clone(), turns, handler, drain_token.clone());

    let state = Arc::new(BridgeServerState {
        registry: registry.clone(),
        channels: channels.clone(),
        auth_token: config.bridge.token().map(String::from),
        request_timeout: Duration::from_millis(config.bridge.request_timeout_ms),
        ping_interval: Duration::from_millis(config.bridge.ping_interval_ms),
    });
    #[allow(unused_mut)]
    let mut app = router(state);
    #[cfg(feature = "metrics")]
    if config.metrics.prometheus_endpoint {
        let handle = metrics_handle.clone();
        app = app.route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port))
            .await
            .with_context(|| {
                format!("bind {}:{}", config.server.bind, config.server.port)
            })?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in dependency order: close sessions, flush buffered
    // conversations, let the turn drain finish, wait out deliveries.
    info!("shutting down");
    registry.close_all();
    debouncer.shutdown();
    drain_token.cancel();
    let _ = turn_task.await;
    dispatcher.wait_for_idle().await;
    event_task.abort();
    info!("shutdown complete");
    Ok(())
}

/// Log validation diagnostics; hard errors stop startup.
fn report_diagnostics(config: &VoleryConfig) -> anyhow::Result<()> {
    let result = volery_config::validate::validate(config);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => {
                warn!(path = %diagnostic.path, "config error: {}", diagnostic.message);
            },
            Severity::Warning => {
                warn!(path = %diagnostic.path, "config warning: {}", diagnostic.message);
            },
            Severity::Info => {
                info!(path = %diagnostic.path, "config note: {}", diagnostic.message);
            },
        }
    }
    if result.has_errors() {
        anyhow::bail!("configuration has errors; refusing to start");
    }
    Ok(())
}

/// Start every enabled account from config, recording it in the account
/// store. Accounts disabled in the store (via `volery accounts disable`)
/// stay down even if config still lists them.
async fn start_accounts(
    config: &VoleryConfig,
    channels: &SharedChannels,
    pipeline: &Arc<InboundPipeline>,
    accounts: &FileAccountStore,
) -> anyhow::Result<()> {
    for (account_id, block) in &config.channels.bridge {
        let parsed = ChannelAccountConfig::from_value(block)
            .with_context(|| format!("channels.bridge.{account_id}"))?;
        if !parsed.enabled {
            info!(account = %account_id, "account disabled in config; skipping");
            continue;
        }
        if let Some(stored) = accounts.get("bridge", account_id).await?
            && !stored.enabled
        {
            info!(account = %account_id, "account disabled in store; skipping");
            continue;
        }
        accounts
            .upsert(StoredAccount::new("bridge", account_id).with_config(block.clone()))
            .await?;
        pipeline.set_account_config("bridge", account_id, parsed);
        channels
            .start_account("bridge", account_id, block.clone())
            .await
            .with_context(|| format!("start account bridge/{account_id}"))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "could not install ctrl-c handler");
    }
}
