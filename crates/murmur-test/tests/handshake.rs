//! Connection lifecycle scenarios

use std::sync::Arc;
use std::time::Instant;

use murmur_core::{CodecKind, Destination, PlayerId, Position, PositionLookup, VoiceConfig};
use murmur_crypto::SessionSecret;
use murmur_runtime::{ConnectionEvent, ConnectionState, VoiceEngine};
use murmur_test::{flat_frame, Cluster};
use murmur_transport::MemoryNetwork;

const ALICE: PlayerId = PlayerId(1);
const BOB: PlayerId = PlayerId(2);

fn config() -> VoiceConfig {
    VoiceConfig {
        codec: CodecKind::Pcm,
        frame_size: 160,
        ..Default::default()
    }
}

fn two_nodes() -> Cluster {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::ORIGIN).unwrap();
    cluster.add(BOB, Position::new(3.0, 0.0, 0.0)).unwrap();
    cluster
}

#[test]
fn test_correct_secret_connects() {
    let mut cluster = two_nodes();
    let secret = SessionSecret::generate();
    cluster.link_with(0, 1, secret).unwrap();

    let id = cluster.engine(0).connections()[0].id;
    assert_eq!(cluster.engine(0).connection_info(id).unwrap().state, ConnectionState::Handshaking);

    cluster.settle(2);
    let info = cluster.engine(0).connection_info(id).unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.remote_player, Some(BOB));
    assert!(info.authenticated);
    assert_eq!(info.params, config().audio_params());

    let events = cluster.node_mut(0).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::Connected { player: BOB, .. }]));
    let events = cluster.node_mut(1).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::Connected { player: ALICE, .. }]));
}

#[test]
fn test_wrong_secret_times_out() {
    let mut cluster = two_nodes();
    let alice_addr = cluster.engine(0).local_addr();
    let bob_addr = cluster.engine(1).local_addr();
    cluster
        .engine(1)
        .accept(alice_addr, SessionSecret::from_bytes([1; 32]))
        .unwrap();
    let id = cluster
        .engine(0)
        .connect(bob_addr, SessionSecret::from_bytes([2; 32]))
        .unwrap();

    cluster.settle(5);
    assert_eq!(
        cluster.engine(0).connection_info(id).unwrap().state,
        ConnectionState::Handshaking
    );
    assert!(cluster.engine(1).stats().auth_failures >= 1);
    assert!(cluster.engine(1).active_players().is_empty());

    // Past the handshake timeout the attempt is abandoned
    cluster.engine(0).maintain(Instant::now() + config().handshake_timeout);
    let events = cluster.node_mut(0).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::HandshakeTimedOut { connection, .. }] if connection == id));
    assert!(cluster.engine(0).connection_info(id).is_err());
}

#[test]
fn test_mismatched_codec_never_connects() {
    let net = MemoryNetwork::new();
    let lookup: Arc<dyn PositionLookup> = Arc::new(|_: PlayerId| Some(Position::ORIGIN));
    let (alice, _alice_events) =
        VoiceEngine::new(ALICE, config(), Arc::new(net.bind_any(1024)), lookup.clone()).unwrap();
    let other = VoiceConfig {
        codec: CodecKind::MuLaw,
        ..config()
    };
    let (bob, _bob_events) = VoiceEngine::new(BOB, other, Arc::new(net.bind_any(1024)), lookup).unwrap();

    let secret = SessionSecret::generate();
    bob.accept(alice.local_addr(), secret.clone()).unwrap();
    alice.connect(bob.local_addr(), secret).unwrap();
    for _ in 0..4 {
        alice.process_incoming(Instant::now()).unwrap();
        bob.process_incoming(Instant::now()).unwrap();
    }

    assert_eq!(bob.stats().handshakes_rejected, 1);
    assert!(alice.active_players().is_empty());
    assert!(bob.active_players().is_empty());
}

#[test]
fn test_silent_peer_times_out_and_reconnects() {
    let mut cluster = two_nodes();
    let secret = SessionSecret::generate();
    cluster.link_with(0, 1, secret.clone()).unwrap();
    cluster.settle(2);
    cluster.node_mut(0).drain_events();
    cluster.node_mut(1).drain_events();

    let alice_addr = cluster.engine(0).local_addr();
    let bob_addr = cluster.engine(1).local_addr();
    cluster.network().partition(alice_addr, bob_addr);

    let later = Instant::now() + config().liveness_timeout();
    cluster.engine(0).maintain(later);
    cluster.engine(1).maintain(later);
    let events = cluster.node_mut(0).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::TimedOut { player: Some(BOB), .. }]));
    let events = cluster.node_mut(1).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::TimedOut { player: Some(ALICE), .. }]));
    assert!(cluster.engine(0).connections().is_empty());

    // Bob still knows the secret for Alice's endpoint
    cluster.network().heal(alice_addr, bob_addr);
    cluster.engine(0).connect(bob_addr, secret).unwrap();
    cluster.settle(3);
    assert_eq!(cluster.engine(1).active_players(), vec![ALICE]);
    assert_eq!(cluster.engine(0).active_players(), vec![BOB]);
}

#[test]
fn test_explicit_disconnect_is_reported_to_peer() {
    let mut cluster = two_nodes();
    cluster.link(0, 1).unwrap();
    cluster.node_mut(1).drain_events();

    let id = cluster.engine(0).connections()[0].id;
    cluster.engine(0).disconnect(id).unwrap();
    cluster.settle(1);

    let events = cluster.node_mut(1).drain_events();
    assert!(matches!(events[..], [ConnectionEvent::Closed { player: Some(ALICE), .. }]));
    assert!(cluster.engine(1).active_players().is_empty());
}

#[test]
fn test_restarted_node_reconnects_with_same_secret() {
    let net = MemoryNetwork::new();
    let lookup: Arc<dyn PositionLookup> = Arc::new(|_: PlayerId| Some(Position::ORIGIN));
    let config = VoiceConfig {
        jitter_playout_delay: 0,
        ..config()
    };
    let secret = SessionSecret::from_bytes([0x5A; 32]);
    let pump = |engines: &[&VoiceEngine]| {
        for _ in 0..3 {
            for engine in engines {
                engine.process_incoming(Instant::now()).unwrap();
            }
        }
    };

    let (alice, _) = VoiceEngine::new(ALICE, config.clone(), Arc::new(net.bind_any(1024)), lookup.clone()).unwrap();
    let (bob, mut bob_events) =
        VoiceEngine::new(BOB, config.clone(), Arc::new(net.bind_any(1024)), lookup.clone()).unwrap();
    let alice_addr = alice.local_addr();
    bob.accept(alice_addr, secret.clone()).unwrap();
    alice.connect(bob.local_addr(), secret.clone()).unwrap();
    pump(&[&alice, &bob]);
    for amplitude in 1..=5 {
        alice.send_audio(ALICE, &flat_frame(160, amplitude), Destination::Proximity).unwrap();
    }
    pump(&[&bob]);
    for _ in 0..5 {
        assert_eq!(bob.mix_tick(), 1);
    }
    while bob_events.try_recv().is_ok() {}

    // Alice's node restarts on the same address with the same secret
    drop(alice);
    let transport = net.bind(alice_addr, 1024).unwrap();
    let (alice, _) = VoiceEngine::new(ALICE, config, Arc::new(transport), lookup).unwrap();
    alice.connect(bob.local_addr(), secret).unwrap();
    pump(&[&alice, &bob]);

    let events: Vec<_> = std::iter::from_fn(|| bob_events.try_recv().ok()).collect();
    assert!(matches!(
        events[..],
        [ConnectionEvent::Closed { player: Some(ALICE), .. }, ConnectionEvent::Connected { player: ALICE, .. }]
    ));
    assert_eq!(bob.connections().len(), 1);

    // Its audio sequence starts over and still plays
    alice.send_audio(ALICE, &flat_frame(160, 700), Destination::Proximity).unwrap();
    pump(&[&bob]);
    assert_eq!(bob.mix_tick(), 1);
    assert_eq!(bob.poll_mixed_output(BOB), flat_frame(160, 700));
}
