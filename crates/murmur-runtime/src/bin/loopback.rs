//! Two voice engines talking over localhost UDP
//!
//! Alice sends a 440 Hz tone to Bob, standing 10 blocks away; Bob's mixed
//! output peak and both engines' counters are printed at the end.
//!
//! `MURMUR_LOG=debug murmur-loopback --json` for structured logs.

use std::f32::consts::PI;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use murmur_core::{Destination, PcmFrame, PlayerId, Position, VoiceConfig, VoiceResult};
use murmur_crypto::SessionSecret;
use murmur_runtime::{init_logging, CapturedFrame, LogFormat, VoiceEngine};
use murmur_transport::UdpTransport;

const ALICE: PlayerId = PlayerId(1);
const BOB: PlayerId = PlayerId(2);
const FRAMES: usize = 100;

fn tone(config: &VoiceConfig, index: usize) -> PcmFrame {
    let n = config.frame_size as usize;
    let rate = config.sample_rate as f32;
    let samples = (0..n)
        .map(|i| {
            let t = (index * n + i) as f32 / rate;
            ((2.0 * PI * 440.0 * t).sin() * 8_000.0) as i16
        })
        .collect();
    PcmFrame::new(samples)
}

#[tokio::main]
async fn main() -> VoiceResult<()> {
    let format = if std::env::args().any(|a| a == "--json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(format)?;

    let config = VoiceConfig::default();
    let positions = Arc::new(|player: PlayerId| match player {
        ALICE => Some(Position::new(0.0, 64.0, 0.0)),
        BOB => Some(Position::new(10.0, 64.0, 0.0)),
        _ => None,
    });

    let any: SocketAddr = ([127, 0, 0, 1], 0).into();
    let alice_transport = Arc::new(UdpTransport::bind(any, config.mtu as usize).await?);
    let bob_transport = Arc::new(UdpTransport::bind(any, config.mtu as usize).await?);

    let (alice, _alice_events) = VoiceEngine::new(ALICE, config.clone(), alice_transport, positions.clone())?;
    let (bob, mut bob_events) = VoiceEngine::new(BOB, config.clone(), bob_transport, positions)?;

    let (alice_capture, alice_capture_rx) = mpsc::channel(config.queue_capacity);
    let (alice_playback, _alice_playback_rx) = mpsc::channel(config.queue_capacity);
    let (_bob_capture, bob_capture_rx) = mpsc::channel(config.queue_capacity);
    let (bob_playback, mut bob_playback_rx) = mpsc::channel(config.queue_capacity);
    let alice_tasks = alice.start(alice_capture_rx, alice_playback);
    let bob_tasks = bob.start(bob_capture_rx, bob_playback);

    let secret = SessionSecret::generate();
    bob.accept(alice.local_addr(), secret.clone())?;
    alice.connect(bob.local_addr(), secret)?;

    match tokio::time::timeout(config.handshake_timeout, bob_events.recv()).await {
        Ok(Some(event)) => tracing::info!(?event, "bob"),
        _ => tracing::warn!("no connection event before the handshake timeout"),
    }

    let frame_duration = config.frame_duration();
    let sender = tokio::spawn({
        let config = config.clone();
        async move {
            let mut interval = tokio::time::interval(frame_duration);
            for index in 0..FRAMES {
                interval.tick().await;
                let captured = CapturedFrame {
                    frame: tone(&config, index),
                    destination: Destination::Proximity,
                };
                if alice_capture.send(captured).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut peak = 0u16;
    let mut audible = 0usize;
    let deadline = tokio::time::sleep(frame_duration * (FRAMES as u32 + 20));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            frame = bob_playback_rx.recv() => match frame {
                Some(frame) => {
                    if !frame.is_silent() {
                        audible += 1;
                    }
                    peak = peak.max(frame.peak());
                }
                None => break,
            },
            _ = &mut deadline => break,
        }
    }
    let _ = sender.await;

    println!("bob heard {} audible frames, peak {}", audible, peak);
    println!("alice: {}", serde_json::to_string(&alice.stats()).unwrap_or_default());
    println!("bob:   {}", serde_json::to_string(&bob.stats()).unwrap_or_default());

    alice_tasks.shutdown();
    bob_tasks.shutdown();
    Ok(())
}
