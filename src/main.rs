//! relay-dispatch demo
//!
//! Loads the dispatch configuration (from the path given as the first
//! argument, or the default location), then runs a few pipelines through a
//! lifecycle controller and prints what they produce.

use crossbeam_channel::{bounded, Sender};
use relay_dispatch::{
    config::{self, settings},
    logging, CancelType, ContextKind, DispatchConfig, DispatchQueue,
    LifecycleDispatchQueueController, LifecycleEvent,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(config::default_path);

    let dispatch_config = match &config_path {
        Some(path) if path.exists() => DispatchConfig::load_or_default(path),
        _ => DispatchConfig::default(),
    };

    logging::init_tracing(&dispatch_config.log_filter);
    tracing::info!("Starting relay-dispatch demo");
    if let Some(path) = &config_path {
        tracing::debug!("Config path: {}", path.display());
    }

    let mut runtime = dispatch_config.into_settings();
    runtime.error_callback = Some(Arc::new(|failure: relay_dispatch::DispatchFailure| {
        tracing::error!("Pipeline failed: {}", failure);
    }));
    settings::init(runtime);

    let controller = Arc::new(LifecycleDispatchQueueController::new());
    let (tx, rx) = bounded::<String>(16);

    run_chain(&controller, tx.clone())?;
    run_join(&controller, tx.clone())?;
    run_retry(&controller, tx.clone())?;
    run_interval(&controller, tx)?;

    for _ in 0..6 {
        match rx.recv_timeout(WAIT) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                tracing::warn!("Timed out waiting for pipeline output: {}", e);
                break;
            }
        }
    }

    controller.handle_event(LifecycleEvent::Destroyed);
    tracing::info!("All pipelines cancelled, exiting");
    Ok(())
}

fn run_chain(
    controller: &Arc<LifecycleDispatchQueueController>,
    tx: Sender<String>,
) -> anyhow::Result<()> {
    DispatchQueue::background()?
        .then(|()| 5)?
        .then(|n: i32| n * 2)?
        .then(|n: i32| n.to_string())?
        .post(move |s: String| {
            let _ = tx.send(format!("chain: {}", s));
        })?
        .managed_by_lifecycle(controller, CancelType::Destroyed)
        .start()?;
    Ok(())
}

fn run_join(
    controller: &Arc<LifecycleDispatchQueueController>,
    tx: Sender<String>,
) -> anyhow::Result<()> {
    let letters = DispatchQueue::io()?.then(|()| "x".to_string())?;
    DispatchQueue::network()?
        .then(|()| 1)?
        .zip(&letters)?
        .then(|(n, s): (i32, String)| format!("{}{}", n, s))?
        .then(move |joined: String| {
            let _ = tx.send(format!("join: {}", joined));
        })?
        .managed_by_lifecycle(controller, CancelType::Stopped)
        .start()?;
    Ok(())
}

fn run_retry(
    controller: &Arc<LifecycleDispatchQueueController>,
    tx: Sender<String>,
) -> anyhow::Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    DispatchQueue::background_secondary()?
        .try_then(move |()| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                anyhow::bail!("attempt {} failed", attempt);
            }
            Ok(attempt)
        })?
        .retry(2, Duration::from_millis(50))
        .then(move |attempt: u32| {
            let _ = tx.send(format!("retry: succeeded on attempt {}", attempt));
        })?
        .managed_by_lifecycle(controller, CancelType::Paused)
        .start()?;
    Ok(())
}

fn run_interval(
    controller: &Arc<LifecycleDispatchQueueController>,
    tx: Sender<String>,
) -> anyhow::Result<()> {
    let ticks = Arc::new(AtomicU32::new(0));
    DispatchQueue::interval(Duration::from_millis(100), ContextKind::Background)?
        .then(move |()| {
            let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = tx.try_send(format!("interval: tick {}", tick));
        })?
        .managed_by(controller.clone())
        .start()?;
    Ok(())
}
