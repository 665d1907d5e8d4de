mod common;

use airsync::audio::StuffingMode;
use airsync::testing::NetworkSimulator;
use airsync::{PlayerConfig, ResendConfig};
use common::{Harness, SEC, init_logging, tag};

fn config() -> PlayerConfig {
    PlayerConfig::default()
}

#[test]
fn test_in_order_stream_needs_no_help() {
    init_logging();
    let mut harness = Harness::new(config(), 1000);
    harness.run_to_end();

    let stats = harness.stats();
    assert_eq!(stats.packets_played, 1000);
    assert_eq!(stats.counters.packets_received, 1000);
    assert_eq!(stats.counters.missing_frames, 0);
    assert_eq!(stats.counters.resend_requests, 0);
    assert_eq!(stats.counters.hard_resyncs, 0);
    assert_eq!(stats.counters.late_packets, 0);
    assert!(harness.resender.requests().is_empty());
    assert!(stats.sync_error_frames.abs() < 88, "{}", stats.sync_error_frames);
}

#[test]
fn test_lost_packets_requested_and_played_as_silence() {
    init_logging();
    let lost = (0..1000).filter(|n| n % 10 == 5);
    let mut harness = Harness::new(config(), 1000).losing(lost);
    harness.run_to_end();

    let stats = harness.stats();
    assert_eq!(stats.packets_played, 900);
    assert_eq!(stats.counters.missing_frames, 100);
    assert_eq!(stats.counters.hard_resyncs, 0);

    for n in (300..900).filter(|n| n % 10 == 5) {
        let seq = harness.seq(n);
        let asked = harness.resender.count_for(seq);
        assert!((1..=8).contains(&asked), "seq {seq} requested {asked} times");
    }
}

#[test]
fn test_answered_resends_fill_every_gap() {
    init_logging();
    let lost = [300, 301, 450, 600, 601, 602, 603, 604, 605];
    let mut harness = Harness::new(config(), 1000)
        .losing(lost)
        .answering_resends();
    harness.run_to_end();

    let stats = harness.stats();
    assert_eq!(stats.packets_played, 1000);
    assert_eq!(stats.counters.missing_frames, 0);
    assert_eq!(stats.counters.late_packets, 9);
    assert_eq!(stats.counters.resend_requests, 9);
    for n in lost {
        assert_eq!(harness.resender.count_for(harness.seq(n)), 1);
    }
}

#[test]
fn test_disabled_resends_are_never_sent() {
    let config = PlayerConfig::builder()
        .resend(ResendConfig {
            disabled: true,
            ..ResendConfig::default()
        })
        .build();
    let mut harness = Harness::new(config, 600).losing([300]);
    harness.run_to_end();

    assert!(harness.resender.requests().is_empty());
    assert_eq!(harness.stats().counters.missing_frames, 1);
}

#[test]
fn test_duplicates_are_ignored() {
    init_logging();
    let mut network = NetworkSimulator::perfect().seeded(7);
    network.duplicate_rate = 0.1;
    let mut harness = Harness::new(config(), 400)
        .with_network(network)
        .in_bursts(8);
    harness.run_to_end();

    let stats = harness.stats();
    assert!(stats.counters.duplicate_packets > 0);
    assert_eq!(stats.packets_played, 400);
    assert_eq!(stats.counters.missing_frames, 0);
    assert_eq!(stats.counters.hard_resyncs, 0);
}

#[test]
fn test_reordered_packets_play_in_order() {
    init_logging();
    let mut network = NetworkSimulator::perfect().seeded(9);
    network.reorder_rate = 0.1;
    let mut harness = Harness::new(config(), 400)
        .with_network(network)
        .in_bursts(8)
        .answering_resends();
    harness.run_to_end();

    let stats = harness.stats();
    assert!(stats.counters.late_packets > 0);
    assert_eq!(stats.packets_played, 400);
    assert_eq!(stats.counters.missing_frames, 0);
    assert_eq!(stats.counters.too_late_packets, 0);
}

#[test]
fn test_sequence_and_timestamp_wraparound() {
    init_logging();
    let first_ts = u32::MAX - 100 * common::FRAMES;
    let mut harness = Harness::starting_at(config(), 800, 65300, first_ts);
    harness.run_to_end();

    let stats = harness.stats();
    assert_eq!(stats.packets_played, 800);
    assert_eq!(stats.counters.missing_frames, 0);
    assert_eq!(stats.counters.too_late_packets, 0);
    assert_eq!(stats.counters.hard_resyncs, 0);
}

#[test]
fn test_flush_round_trip() {
    init_logging();
    let config = PlayerConfig::builder()
        .stuffing(StuffingMode::Basic)
        .build();
    let mut harness = Harness::new(config, 600);
    harness.run_until(3 * SEC);
    let before = harness.stats();
    assert!(before.packets_played > 100);

    let target = harness.timestamp(440);
    harness.handle.request_flush(target);
    harness.sink.start_recording();
    harness.run_to_end();

    // Nothing from before the target reaches the sink after the flush.
    let played: Vec<i16> = harness
        .sink
        .audio()
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .filter(|sample| *sample != 0)
        .collect();
    assert!(!played.is_empty());
    assert_eq!(played.iter().min(), Some(&tag(440)));
    assert_eq!(played.iter().max(), Some(&tag(599)));

    let after = harness.stats();
    assert_eq!(harness.sink.flush_count(), 1);
    assert!(after.counters.flushed_frames >= 50, "{}", after.counters.flushed_frames);
    assert!(after.packets_played >= before.packets_played + 150);
    assert!(!after.buffering);
    assert_eq!(after.counters.hard_resyncs, 0);
}

#[test]
fn test_sink_delay_step_converges_by_stuffing() {
    init_logging();
    let config = PlayerConfig::builder()
        .stuffing(StuffingMode::Basic)
        .build();
    let mut harness = Harness::new(config, 1600);
    harness.run_until(3 * SEC);
    // 5 ms of extra queue the engine did not put there.
    harness.sink.queue_frames(220);
    harness.run_to_end();

    let stats = harness.stats();
    assert_eq!(stats.counters.hard_resyncs, 0);
    assert!(stats.counters.stuffed_frames <= -30, "{}", stats.counters.stuffed_frames);
    assert!(stats.sync_error_frames.abs() < 180, "{}", stats.sync_error_frames);
    assert!(stats.correction_ppm < 0.0, "{}", stats.correction_ppm);
    assert!(stats.abs_correction_ppm > 0.0);
    assert!(stats.abs_correction_ppm >= stats.correction_ppm.abs() - 1e-6);
}

#[test]
fn test_large_sink_delay_step_forces_resync() {
    init_logging();
    let mut harness = Harness::new(config(), 800);
    harness.run_until(3 * SEC);
    // Half a second late is far past the resync threshold.
    harness.sink.queue_frames(22050);
    harness.run_to_end();

    let stats = harness.stats();
    assert!(stats.counters.hard_resyncs >= 1);
    assert!(stats.sync_error_frames.abs() < 2205, "{}", stats.sync_error_frames);
}
