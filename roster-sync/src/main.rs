use std::sync::Arc;
use std::time::Duration;

use roster_sync::logging;
use roster_sync::notification::{SyncEvent, SyncEventBroadcaster};
use roster_sync::panic_hook;
use roster_sync::preferences::JsonFilePreferencesStore;
use roster_sync::remote::{HttpRemoteClient, JsonWireDecoder};
use roster_sync::{EngineDeps, SyncConfig, SyncEngine};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host loop cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncConfig::from_env()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.child_token());

    let remote = HttpRemoteClient::new(&config.base_url, config.request_timeout())?;
    let events = SyncEventBroadcaster::new();
    let deps = EngineDeps::new(
        Arc::new(remote),
        Arc::new(JsonWireDecoder),
        Arc::new(events.clone()),
        Arc::new(events.clone()),
        Arc::new(JsonFilePreferencesStore::new(&config.preferences_path)),
    )
    .with_debug_hook(logging_config.debug_mode_hook());

    let idle_timeout = config.idle_timeout();
    let engine = Arc::new(SyncEngine::new(config, deps)?);
    if let Err(e) = engine.load_preferences().await {
        warn!(error = %e, "Failed to load preferences, using defaults");
    }

    match engine.session() {
        Some(session) => info!(character = %session.character_name, "Starting roster sync"),
        None => warn!("ROSTER_API_KEY / ROSTER_CHARACTER not set, scheduler stays idle"),
    }

    let listener = tokio::spawn(run_event_listener(events.subscribe(), cancel.child_token()));

    run_tick_loop(&engine, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
    .await;

    engine.pause();
    let idle = engine.wait_for_idle(idle_timeout).await;
    if !idle.is_idle() {
        warn!(?idle, "Background work still running at shutdown");
    }
    engine.shutdown();
    cancel.cancel();
    let _ = listener.await;

    info!("roster-syncd stopped");
    Ok(())
}

/// Drive the engine every [`TICK_INTERVAL`] until `shutdown` resolves.
/// Returns the number of ticks driven.
async fn run_tick_loop(engine: &SyncEngine, shutdown: impl Future<Output = ()>) -> u64 {
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ticks = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            instant = ticker.tick() => {
                ticks += 1;
                let report = engine.tick(instant);
                for category in report.dispatched() {
                    debug!(category = %category, "Dispatched");
                }
                if let Some(error) = engine.take_error() {
                    warn!(error = %error, "Action failed");
                }
            }
        }
    }

    ticks
}

/// Log user-facing events until cancelled.
async fn run_event_listener(
    mut rx: tokio::sync::broadcast::Receiver<SyncEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Event listener shutting down");
                break;
            }
            result = rx.recv() => {
                match result {
                    Ok(event) if event.should_notify() => info!("{}", event.description()),
                    Ok(event) => debug!("{}", event.description()),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event listener lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event channel closed, stopping listener");
                        break;
                    }
                }
            }
        }
    }
}
