//! Proximity mixing scenarios

use murmur_audio::Attenuation;
use murmur_core::{CodecKind, Destination, PlayerId, Position, VoiceConfig};
use murmur_test::{flat_frame, Cluster};

const ALICE: PlayerId = PlayerId(1);
const BOB: PlayerId = PlayerId(2);
const CAROL: PlayerId = PlayerId(3);
const FRAME: usize = 160;

fn config() -> VoiceConfig {
    VoiceConfig {
        codec: CodecKind::Pcm,
        frame_size: FRAME as u16,
        full_volume_radius: 5.0,
        fade_distance: 30.0,
        jitter_playout_delay: 0,
        ..Default::default()
    }
}

fn speak(cluster: &Cluster, speaker: usize, amplitude: i16) {
    let engine = cluster.engine(speaker);
    engine
        .send_audio(engine.local_player(), &flat_frame(FRAME, amplitude), Destination::Proximity)
        .unwrap();
}

#[test]
fn test_full_volume_at_radius_silent_at_fade_distance() {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::new(0.0, 64.0, 0.0)).unwrap();
    cluster.add(BOB, Position::new(5.0, 64.0, 0.0)).unwrap();
    cluster.link(0, 1).unwrap();

    speak(&cluster, 0, 4_000);
    cluster.settle(1);
    assert_eq!(cluster.mix(1), flat_frame(FRAME, 4_000));

    // Bob walks to the fade distance
    cluster.board().place(BOB, Position::new(30.0, 64.0, 0.0));
    speak(&cluster, 0, 4_000);
    cluster.settle(1);
    assert!(cluster.mix(1).is_silent());

    // Halfway through the falloff
    cluster.board().place(BOB, Position::new(17.5, 64.0, 0.0));
    speak(&cluster, 0, 4_000);
    cluster.settle(1);
    assert_eq!(cluster.mix(1), flat_frame(FRAME, 2_000));
}

#[test]
fn test_attenuation_scenario_values() {
    let attenuation = Attenuation::new(5.0, 30.0);
    assert!((attenuation.gain(5.0) - 1.0).abs() < 1e-6);
    assert_eq!(attenuation.gain(30.0), 0.0);
    assert!(attenuation.gain(10.0) > attenuation.gain(20.0));
}

#[test]
fn test_two_speakers_sum_and_clip() {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::ORIGIN).unwrap();
    cluster.add(BOB, Position::new(1.0, 0.0, 0.0)).unwrap();
    cluster.add(CAROL, Position::new(1.0, 0.0, 0.0)).unwrap();
    cluster.mesh().unwrap();

    speak(&cluster, 1, 1_000);
    speak(&cluster, 2, 2_500);
    cluster.settle(1);
    assert_eq!(cluster.mix(0), flat_frame(FRAME, 3_500));

    speak(&cluster, 1, 30_000);
    speak(&cluster, 2, 30_000);
    cluster.settle(1);
    assert_eq!(cluster.mix(0), flat_frame(FRAME, i16::MAX));
}

#[test]
fn test_loud_speaker_not_normalized_by_silent_ones() {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::ORIGIN).unwrap();
    cluster.add(BOB, Position::ORIGIN).unwrap();
    cluster.add(CAROL, Position::ORIGIN).unwrap();
    cluster.mesh().unwrap();

    speak(&cluster, 1, 12_000);
    speak(&cluster, 2, 0);
    cluster.settle(1);
    assert_eq!(cluster.mix(0), flat_frame(FRAME, 12_000));
}

#[test]
fn test_mute_and_volume_apply_per_listener() {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::ORIGIN).unwrap();
    cluster.add(BOB, Position::ORIGIN).unwrap();
    cluster.add(CAROL, Position::ORIGIN).unwrap();
    cluster.mesh().unwrap();

    // Carol boosts Alice; Bob's own view is untouched
    assert_eq!(cluster.engine(2).set_volume(CAROL, ALICE, 9.0), 4.0);
    speak(&cluster, 0, 1_000);
    cluster.settle(1);
    assert_eq!(cluster.mix(1), flat_frame(FRAME, 1_000));
    assert_eq!(cluster.mix(2), flat_frame(FRAME, 4_000));

    // A muted source is dropped before mixing
    cluster.engine(1).set_muted(ALICE, true);
    speak(&cluster, 0, 1_000);
    cluster.settle(1);
    assert!(cluster.mix(1).is_silent());
    assert_eq!(cluster.mix(2), flat_frame(FRAME, 4_000));
}

#[test]
fn test_unplaced_listener_hears_no_proximity() {
    let mut cluster = Cluster::new(config());
    cluster.add(ALICE, Position::ORIGIN).unwrap();
    cluster.add(BOB, Position::ORIGIN).unwrap();
    cluster.link(0, 1).unwrap();

    cluster.board().remove(BOB);
    speak(&cluster, 0, 1_000);
    cluster.settle(1);
    assert!(cluster.mix(1).is_silent());
}
