//! Benchmarks for the receive-side audio path

use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use murmur_audio::{Attenuation, JitterBuffer, JitterConfig, MixInput, Placement, SpatialMixer};
use murmur_codec::CodecAdapter;
use murmur_core::{CodecKind, PcmFrame, Position};

const FRAME: usize = 960;

fn tone(frame_size: usize, freq: f32) -> PcmFrame {
    (0..frame_size)
        .map(|i| {
            let t = i as f32 / 48_000.0;
            ((t * freq * std::f32::consts::TAU).sin() * 6_000.0) as i16
        })
        .collect::<Vec<_>>()
        .into()
}

fn bench_mixer(c: &mut Criterion) {
    let mixer = SpatialMixer::new(Attenuation::new(5.0, 48.0), FRAME);
    let listener = Position::new(0.0, 64.0, 0.0);

    let mut group = c.benchmark_group("spatial_mix");
    for sources in [1usize, 4, 16, 64] {
        let frames: Vec<PcmFrame> = (0..sources).map(|i| tone(FRAME, 200.0 + i as f32 * 37.0)).collect();
        let inputs: Vec<MixInput<'_>> = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| MixInput {
                frame,
                placement: if i % 4 == 0 {
                    Placement::Direct
                } else {
                    Placement::At(Position::new(i as f64, 64.0, 0.0))
                },
                volume: 1.0,
            })
            .collect();

        group.throughput(Throughput::Elements((sources * FRAME) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sources), &inputs, |b, inputs| {
            b.iter(|| mixer.mix(listener, black_box(inputs)))
        });
    }
    group.finish();
}

fn bench_jitter(c: &mut Criterion) {
    let config = JitterConfig {
        capacity: 16,
        playout_delay: 3,
        idle_after: 16,
    };
    let now = Instant::now();

    c.bench_function("jitter_push_read", |b| {
        let mut buffer = JitterBuffer::new(config);
        let mut sequence = 0u32;
        b.iter(|| {
            buffer.push(sequence, now, sequence);
            sequence = sequence.wrapping_add(1);
            black_box(buffer.read())
        })
    });

    c.bench_function("jitter_reordered_push", |b| {
        let mut buffer = JitterBuffer::new(config);
        let mut base = 0u32;
        b.iter(|| {
            for offset in [1u32, 0, 3, 2] {
                let sequence = base.wrapping_add(offset);
                buffer.push(sequence, now, sequence);
            }
            for _ in 0..4 {
                black_box(buffer.read());
            }
            base = base.wrapping_add(4);
        })
    });
}

fn bench_codecs(c: &mut Criterion) {
    let frame = tone(FRAME, 440.0);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(FRAME as u64));
    for kind in [CodecKind::Pcm, CodecKind::MuLaw, CodecKind::Adpcm] {
        let mut encoder = CodecAdapter::new(kind, FRAME);
        let mut decoder = CodecAdapter::new(kind, FRAME);
        let payload = encoder.encode(&frame).unwrap();

        group.bench_function(format!("{:?}_encode", kind), |b| {
            b.iter(|| encoder.encode(black_box(&frame)).unwrap())
        });
        group.bench_function(format!("{:?}_decode", kind), |b| {
            b.iter(|| decoder.decode(black_box(&payload)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mixer, bench_jitter, bench_codecs);
criterion_main!(benches);
