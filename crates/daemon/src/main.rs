use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unicorn_daemon::config::{self, DaemonConfig, SinkKind};
use unicorn_daemon::{audio_sink, stream_sink, text_sink};
use unicorn_sensor::{MockDevice, SampleSource, UnicornDevice};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "unicorn_daemon=debug,audio_bridge=info,unicorn_sensor=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Unicorn bridge daemon starting...");

    // --- Argument parsing and configuration ---
    let matches = config::cli().get_matches();
    let config = DaemonConfig::load(&matches)?;

    let running = Arc::new(AtomicBool::new(true));
    let source = build_source(&config)?;

    // --- Acquisition thread, one per sink kind ---
    let (done_tx, done_rx) = flume::bounded::<()>(1);
    let acquisition = match config.sink {
        SinkKind::Audio => {
            let sink_config = config.clone();
            let flag = Arc::clone(&running);
            spawn_acquisition(move || audio_sink::run(source, &sink_config, flag), done_tx)?
        }
        SinkKind::Text => {
            let out = config.out.clone();
            let flag = Arc::clone(&running);
            spawn_acquisition(
                move || text_sink::run(source, out.as_deref(), flag),
                done_tx,
            )?
        }
        SinkKind::Stream => {
            // Bind up front so address errors surface before the
            // device starts streaming.
            let listener = TcpListener::bind(&config.listen)
                .await
                .with_context(|| format!("could not listen on {}", config.listen))?;
            tracing::info!("NDJSON stream listening on {}", config.listen);
            let (publisher, _) = broadcast::channel(1024);
            tokio::spawn(stream_sink::serve(listener, publisher.clone()));
            let flag = Arc::clone(&running);
            spawn_acquisition(move || stream_sink::run(source, publisher, flag), done_tx)?
        }
    };

    // --- Graceful shutdown ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("could not listen for the shutdown signal")?;
            tracing::info!("Shutdown signal received. Stopping acquisition...");
            running.store(false, Ordering::SeqCst);
        }
        _ = done_rx.recv_async() => {
            // The acquisition thread left on its own, clean or not.
            running.store(false, Ordering::SeqCst);
        }
    }

    let joined = tokio::task::spawn_blocking(move || acquisition.join())
        .await
        .context("could not join the acquisition thread")?;
    match joined {
        Ok(result) => result?,
        Err(_) => bail!("acquisition thread panicked"),
    }

    tracing::info!("Unicorn bridge daemon stopped.");
    Ok(())
}

/// Pick the sample source: the synthetic device under `--mock`, else
/// the configured serial port, else the first port that looks like a
/// Unicorn.
fn build_source(config: &DaemonConfig) -> Result<Box<dyn SampleSource>> {
    if config.mock {
        tracing::info!("Using synthetic EEG device");
        return Ok(Box::new(MockDevice::new()));
    }
    let port = match &config.port {
        Some(port) => port.clone(),
        None => UnicornDevice::detect_port()
            .context("no serial port configured and autodetection failed")?,
    };
    tracing::info!("Opening Unicorn on {}", port);
    let device = UnicornDevice::open(&port, config.resync)
        .with_context(|| format!("could not open device on '{}'", port))?;
    Ok(Box::new(device))
}

fn spawn_acquisition<F>(
    work: F,
    done: flume::Sender<()>,
) -> Result<thread::JoinHandle<Result<()>>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name("unicorn_acq".into())
        .spawn(move || {
            let result = work();
            if let Err(e) = &result {
                tracing::error!("Acquisition failed: {:#}", e);
            }
            // Dropping the sender wakes the shutdown select.
            drop(done);
            result
        })
        .map_err(|e| anyhow!("could not spawn acquisition thread: {}", e))
}
