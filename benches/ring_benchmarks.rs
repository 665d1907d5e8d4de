use airsync::PlayerConfig;
use airsync::player::resend::ResendPolicy;
use airsync::player::FrameRing;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

const FRAMES: u32 = 352;

fn benchmark_ring(c: &mut Criterion) {
    let pcm = vec![0i16; FRAMES as usize * 2];

    c.bench_function("ring_put_get_in_order", |b| {
        let mut ring = FrameRing::new(1024, pcm.len());
        let mut out = Vec::with_capacity(pcm.len());
        let mut seq = 0u16;
        b.iter(|| {
            ring.put(seq, u32::from(seq) * FRAMES, black_box(&pcm), 2);
            black_box(ring.get_next(&mut out));
            seq = seq.wrapping_add(1);
        })
    });

    c.bench_function("ring_fill_reordered_256", |b| {
        b.iter_batched(
            || FrameRing::new(1024, pcm.len()),
            |mut ring| {
                for pair in 0..128u16 {
                    let second = pair * 2 + 1;
                    ring.put(second, u32::from(second) * FRAMES, &pcm, 2);
                    ring.put(second - 1, u32::from(second - 1) * FRAMES, &pcm, 2);
                }
                ring
            },
            BatchSize::SmallInput,
        )
    });
}

fn benchmark_resend_scan(c: &mut Criterion) {
    let config = PlayerConfig::default();
    let policy = ResendPolicy::new(&config);
    let pcm = vec![0i16; FRAMES as usize * 2];

    c.bench_function("resend_scan_with_gaps", |b| {
        b.iter_batched(
            || {
                let mut ring = FrameRing::new(1024, pcm.len());
                ring.put(0, 0, &pcm, 2);
                ring.set_buffering(false);
                ring
            },
            |mut ring| {
                let mut requests = Vec::new();
                for seq in 1..300u16 {
                    if seq % 7 != 0 {
                        ring.put(seq, u32::from(seq) * FRAMES, &pcm, 2);
                        policy.scan(&mut ring, &mut requests);
                    }
                }
                requests
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_ring, benchmark_resend_scan);
criterion_main!(benches);
