//! Benchmarks for per-datagram protection

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use murmur_crypto::{handshake_nonce, CryptoSession, ReplayWindow, Role, SessionSecret};
use murmur_wire::{HandshakeNonce, PacketType};

const MTU: usize = 1024;
const INITIATOR: HandshakeNonce = [0x01; 16];
const RESPONDER: HandshakeNonce = [0x02; 16];

fn sessions() -> (CryptoSession, CryptoSession) {
    let secret = SessionSecret::from_bytes([0x42u8; 32]);
    (
        CryptoSession::established(&secret, Role::Initiator, &INITIATOR, &RESPONDER).unwrap(),
        CryptoSession::established(&secret, Role::Responder, &INITIATOR, &RESPONDER).unwrap(),
    )
}

fn bench_session_derive(c: &mut Criterion) {
    let secret = SessionSecret::from_bytes([0x42u8; 32]);
    c.bench_function("session_derive", |b| {
        b.iter(|| {
            let responder = handshake_nonce();
            CryptoSession::established(black_box(&secret), Role::Initiator, &INITIATOR, &responder).unwrap()
        })
    });
}

fn bench_seal_by_size(c: &mut Criterion) {
    let (alice, _) = sessions();
    let mut group = c.benchmark_group("seal_datagram");

    for size in [64, 256, 512, 960] {
        let payload = vec![0u8; size];
        let mut sequence = 0u32;

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{}_bytes", size), |b| {
            b.iter(|| {
                sequence = sequence.wrapping_add(1);
                alice
                    .seal_datagram(PacketType::Audio, sequence, black_box(&payload), MTU)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let (alice, bob) = sessions();
    let datagram = alice
        .seal_datagram(PacketType::Audio, 7, &[0u8; 256], MTU)
        .unwrap();

    let mut group = c.benchmark_group("open_datagram");
    group.throughput(Throughput::Bytes(datagram.len() as u64));
    group.bench_function("256_bytes", |b| {
        b.iter(|| bob.open_datagram(black_box(&datagram)).unwrap())
    });

    let mut tampered = datagram.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    group.bench_function("reject_tampered", |b| {
        b.iter(|| bob.open_datagram(black_box(&tampered)).is_err())
    });

    group.finish();
}

fn bench_replay_window(c: &mut Criterion) {
    c.bench_function("replay_window_in_order", |b| {
        let mut window = ReplayWindow::default();
        let mut sequence = 0u32;
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            window.accept(black_box(sequence)).is_ok()
        })
    });
}

criterion_group!(
    benches,
    bench_session_derive,
    bench_seal_by_size,
    bench_open,
    bench_replay_window,
);
criterion_main!(benches);
