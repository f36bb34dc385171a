//! In-process relay demo
//!
//! A simulated camera and two viewers share one `MemoryBus`. The camera waits
//! for a `start` command, then pushes base64 JPEG frames at the requested
//! rate; each viewer parses the multipart stream it receives.
//!
//! Run with: cargo run --example loopback
//!
//! Set `RUST_LOG=mjpeg_relay=debug` for per-tick detail.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};
use tracing_subscriber::EnvFilter;

use mjpeg_relay::{
    CameraRelay, DeviceId, MemoryBus, MessageBus, RelayConfig, StreamCommand, Topics, ViewerSink,
};

/// Fake camera: obeys start/stop on its control topic
async fn run_camera(bus: MemoryBus, device: DeviceId) -> mjpeg_relay::Result<()> {
    let topics = Topics::default();
    let mut control = bus.subscribe(&topics.command_topic(&device)).await?;
    let frame_topic = topics.frame_topic(&device);

    let mut fps: Option<u32> = None;
    let mut seq: u32 = 0;

    loop {
        let period = Duration::from_millis(1000 / u64::from(fps.unwrap_or(1).max(1)));

        tokio::select! {
            msg = control.recv() => {
                let Some(msg) = msg else { break };
                match serde_json::from_slice::<StreamCommand>(&msg.payload) {
                    Ok(StreamCommand::Start { fps: requested, quality }) => {
                        tracing::info!(device = %device, fps = ?requested, quality = ?quality, "Camera starting");
                        fps = Some(requested.unwrap_or(5));
                    }
                    Ok(StreamCommand::Stop) => {
                        tracing::info!(device = %device, "Camera stopping");
                        fps = None;
                    }
                    Err(e) => tracing::warn!(error = %e, "Camera ignored bad command"),
                }
            }
            _ = tokio::time::sleep(period), if fps.is_some() => {
                seq += 1;
                // Not a real JPEG, just SOI/EOI around a counter
                let mut jpeg = vec![0xFF, 0xD8];
                jpeg.extend_from_slice(format!("frame {}", seq).as_bytes());
                jpeg.extend_from_slice(&[0xFF, 0xD9]);

                bus.publish(&frame_topic, Bytes::from(STANDARD.encode(&jpeg))).await?;
            }
        }
    }

    Ok(())
}

/// Read multipart chunks until the relay lets go of the stream
async fn run_viewer(name: &'static str, body: DuplexStream) -> usize {
    let mut reader = BufReader::new(body);
    let mut frames = 0;
    let mut content_length = 0usize;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let header = line.trim_end();
        if let Some(len) = header.strip_prefix("Content-Length: ") {
            content_length = len.parse().unwrap_or(0);
        } else if header.is_empty() && content_length > 0 {
            // Payload plus trailing CRLF
            let mut payload = vec![0u8; content_length + 2];
            if reader.read_exact(&mut payload).await.is_err() {
                break;
            }
            frames += 1;
            tracing::debug!(viewer = name, bytes = content_length, "Viewer got frame");
            content_length = 0;
        }
    }

    tracing::info!(viewer = name, frames = frames, "Viewer stream ended");
    frames
}

#[tokio::main]
async fn main() -> mjpeg_relay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mjpeg_relay=info,loopback=info")),
        )
        .init();

    let bus = MemoryBus::new();
    let relay = CameraRelay::new(
        bus.clone(),
        RelayConfig::default()
            .idle_device_timeout(Duration::from_secs(1))
            .cleanup_interval(Duration::from_millis(500)),
    );
    let cleanup = relay.spawn_cleanup_task();

    let device = DeviceId::new("cam-01");
    let camera = tokio::spawn(run_camera(bus.clone(), device.clone()));

    let (first, first_body) = ViewerSink::duplex(256 * 1024);
    let (second, second_body) = ViewerSink::duplex(256 * 1024);
    let first_reader = tokio::spawn(run_viewer("first", first_body));
    let second_reader = tokio::spawn(run_viewer("second", second_body));

    relay.subscribe(&device, first).await?;
    let second_id = relay.subscribe(&device, second).await?;

    relay.start_stream(&device, Some(10), Some(20)).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    relay.unsubscribe(&device, second_id);
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Some(stats) = relay.device_stats(&device) {
        tracing::info!(
            device = %device,
            received = stats.frames_received,
            dispatched = stats.frames_dispatched,
            viewers = stats.viewers,
            fps = %format!("{:.1}", stats.ingest_fps()),
            "Device stats"
        );
    }

    relay.stop_stream(&device).await?;
    relay.shutdown().await;
    let _ = cleanup.await;

    // Dropping the camera's bus ends its control subscription
    bus.close();
    if let Ok(Err(e)) = camera.await {
        tracing::warn!(error = %e, "Camera exited with error");
    }

    // Viewers see EOF once their sinks are dropped with the relay
    drop(relay);
    let first_frames = first_reader.await.unwrap_or(0);
    let second_frames = second_reader.await.unwrap_or(0);

    println!("first viewer frames:  {}", first_frames);
    println!("second viewer frames: {}", second_frames);

    Ok(())
}
