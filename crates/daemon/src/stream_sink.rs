//! Newline-delimited JSON publisher over TCP.
//!
//! Every client first receives one stream-info line describing the
//! source, then one JSON object per sample. Fan-out goes through a
//! broadcast channel; a client that cannot keep up is dropped on lag
//! rather than back-pressuring the acquisition thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use unicorn_sensor::{protocol, Sample, SampleSource, CHANNEL_LABELS, CHANNEL_UNITS};

/// One entry in the preamble channel list.
#[derive(Serialize)]
struct ChannelInfo {
    label: &'static str,
    unit: &'static str,
}

/// First line sent to every client. `precision` is the ADC word width
/// in bits.
#[derive(Serialize)]
struct StreamInfo {
    name: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    channels: [ChannelInfo; 16],
    rate: f64,
    precision: u32,
    manufacturer: &'static str,
    model: &'static str,
}

fn stream_info() -> StreamInfo {
    StreamInfo {
        name: "Unicorn",
        kind: "EEG",
        channels: std::array::from_fn(|i| ChannelInfo {
            label: CHANNEL_LABELS[i],
            unit: CHANNEL_UNITS[i],
        }),
        rate: protocol::SAMPLE_RATE,
        precision: 24,
        manufacturer: "g.tec",
        model: "Unicorn Hybrid Black",
    }
}

/// Acquisition loop for `--sink stream`: publish every decoded sample
/// to the broadcast channel. Runs on the acquisition thread.
pub fn run(
    mut source: Box<dyn SampleSource>,
    publisher: broadcast::Sender<Sample>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    source.start_streaming().context("could not start acquisition")?;

    let mut published: u64 = 0;
    let result = publish_loop(source.as_mut(), &publisher, &running, &mut published);

    if let Err(e) = source.stop_streaming() {
        warn!("Device stop failed: {}", e);
    }
    info!("Stream sink stopped after {} samples.", published);
    result
}

fn publish_loop(
    source: &mut dyn SampleSource,
    publisher: &broadcast::Sender<Sample>,
    running: &Arc<AtomicBool>,
    published: &mut u64,
) -> Result<()> {
    let per_second = protocol::SAMPLE_RATE as u64;
    while running.load(Ordering::SeqCst) {
        let sample = source.read_sample().context("acquisition failed")?;
        // A send error only means nobody is connected right now.
        let _ = publisher.send(sample);
        *published += 1;
        if *published % per_second == 0 {
            debug!(
                "{} samples published, {} subscribers",
                published,
                publisher.receiver_count()
            );
        }
    }
    Ok(())
}

/// Accept loop: one writer task per client. Runs until the daemon
/// exits; clients subscribe before the preamble goes out, so nothing
/// published after the preamble is missed.
pub async fn serve(listener: TcpListener, publisher: broadcast::Sender<Sample>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("Stream client connected: {}", peer);
                let subscription = publisher.subscribe();
                tokio::spawn(handle_client(socket, peer, subscription));
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    mut subscription: broadcast::Receiver<Sample>,
) {
    match serde_json::to_vec(&stream_info()) {
        Ok(mut line) => {
            line.push(b'\n');
            if let Err(e) = socket.write_all(&line).await {
                debug!("Stream client {} dropped during preamble: {}", peer, e);
                return;
            }
        }
        Err(e) => {
            error!("Could not serialize stream info: {}", e);
            return;
        }
    }

    loop {
        match subscription.recv().await {
            Ok(sample) => {
                let mut line = match serde_json::to_vec(&sample) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Could not serialize sample: {}", e);
                        return;
                    }
                };
                line.push(b'\n');
                if let Err(e) = socket.write_all(&line).await {
                    info!("Stream client {} disconnected: {}", peer, e);
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Stream client {} lagged {} samples behind, dropping it",
                    peer, skipped
                );
                return;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Publisher gone, closing client {}", peer);
                return;
            }
        }
    }
}
