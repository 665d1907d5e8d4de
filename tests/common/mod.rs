//! Common test utilities and fixtures
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Once};
use std::time::Duration;

use airsync::player::{PlaybackEngine, PlaybackStats, Player, PlayerHandle, SessionContext, Step};
use airsync::testing::{ManualClock, MockSink, NetworkSimulator, RecordingHooks, RecordingResender};
use airsync::{LocalClock, PlayerConfig, TimingReference};
use tracing_subscriber::{EnvFilter, fmt};

pub const SEC: u64 = 1_000_000_000;
pub const RATE: u32 = 44100;
pub const FRAMES: u32 = 352;

static INIT: Once = Once::new();

/// Initialize test logging (call once per test module)
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive("airsync=info".parse().unwrap());

        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

/// Local time at which packet `n` leaves the sender
pub fn send_time(n: u32) -> u64 {
    u64::from(n) * u64::from(FRAMES) * SEC / u64::from(RATE)
}

/// Sample value carried by packet `n`
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn tag(n: u32) -> i16 {
    (n % 1000) as i16 + 1
}

/// A sender streaming in real time to an engine ticked in virtual time.
///
/// The sender's clock runs at exactly the local rate; a timing reference is
/// sent at every whole second.
pub struct Harness {
    pub engine: PlaybackEngine,
    pub handle: PlayerHandle,
    pub clock: Arc<ManualClock>,
    pub sink: MockSink,
    pub resender: Arc<RecordingResender>,
    pub hooks: Arc<RecordingHooks>,
    pub network: NetworkSimulator,
    pub answer_resends: bool,
    burst: u32,
    lost: HashSet<u32>,
    first_seq: u16,
    first_ts: u32,
    total: u32,
    sent: u32,
    answered: usize,
    next_reference: u64,
}

impl Harness {
    /// Stream `total` packets starting at sequence 0, timestamp 0.
    pub fn new(config: PlayerConfig, total: u32) -> Self {
        Self::starting_at(config, total, 0, 0)
    }

    /// Stream `total` packets starting at `first_seq` and `first_ts`.
    pub fn starting_at(config: PlayerConfig, total: u32, first_seq: u16, first_ts: u32) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let sink = MockSink::with_delay().draining(Arc::clone(&clock), RATE);
        let resender = Arc::new(RecordingResender::new());
        let hooks = Arc::new(RecordingHooks::new());
        let context = SessionContext::default()
            .with_clock(clock.clone())
            .with_resender(resender.clone())
            .with_hooks(hooks.clone());
        let (mut engine, handle) =
            Player::prepare(config, Box::new(sink.clone()), context).expect("valid config");
        engine.start().expect("sink starts");
        Self {
            engine,
            handle,
            clock,
            sink,
            resender,
            hooks,
            network: NetworkSimulator::perfect(),
            answer_resends: false,
            burst: 1,
            lost: HashSet::new(),
            first_seq,
            first_ts,
            total,
            sent: 0,
            answered: 0,
            next_reference: 0,
        }
    }

    /// Deliver traffic through `network`
    #[must_use]
    pub fn with_network(mut self, network: NetworkSimulator) -> Self {
        self.network = network;
        self
    }

    /// Lose packets `n` on their first transmission
    #[must_use]
    pub fn losing(mut self, packets: impl IntoIterator<Item = u32>) -> Self {
        self.lost.extend(packets);
        self
    }

    /// Send packets in groups of `burst`, each group when its last packet is due
    #[must_use]
    pub fn in_bursts(mut self, burst: u32) -> Self {
        self.burst = burst.max(1);
        self
    }

    /// Re-send packets when the engine asks for them
    #[must_use]
    pub fn answering_resends(mut self) -> Self {
        self.answer_resends = true;
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn seq(&self, n: u32) -> u16 {
        self.first_seq.wrapping_add(n as u16)
    }

    pub fn timestamp(&self, n: u32) -> u32 {
        self.first_ts.wrapping_add(n * FRAMES)
    }

    fn put(&self, n: u32) {
        let pcm = vec![tag(n); FRAMES as usize * 2];
        self.handle
            .put_packet(self.seq(n), self.timestamp(n), &pcm)
            .expect("session running");
    }

    fn send_reference(&mut self) {
        let now = self.clock.now();
        while self.next_reference <= now {
            let seconds = u32::try_from(self.next_reference / SEC).unwrap();
            self.handle.set_reference(TimingReference {
                remote_timestamp: self.first_ts.wrapping_add(seconds * RATE),
                remote_time: self.next_reference,
                local_time: self.next_reference,
            });
            self.next_reference += SEC;
        }
    }

    fn release_time(&self, n: u32) -> u64 {
        let last = (n - n % self.burst + self.burst - 1).min(self.total - 1);
        send_time(last)
    }

    fn send_due(&mut self) {
        let now = self.clock.now();
        let mut batch = Vec::new();
        while self.sent < self.total && self.release_time(self.sent) <= now {
            if !self.lost.contains(&self.sent) {
                batch.push(self.sent);
            }
            self.sent += 1;
        }
        for n in self.network.deliver(batch) {
            self.put(n);
        }
        if self.answer_resends {
            let requests = self.resender.requests();
            for &(seq, count) in &requests[self.answered..] {
                for i in 0..count {
                    let n = u32::from(seq.wrapping_add(i).wrapping_sub(self.first_seq));
                    if n < self.sent {
                        self.put(n);
                    }
                }
            }
            self.answered = requests.len();
        }
    }

    /// One sender pass and one engine step, advancing virtual time on waits.
    pub fn step(&mut self) -> Step {
        self.send_reference();
        self.send_due();
        let step = self.engine.tick();
        if let Step::Wait(d) = step {
            self.clock.advance(d.max(Duration::from_micros(100)));
        }
        step
    }

    /// Run until the virtual clock reaches `limit` nanoseconds.
    pub fn run_until(&mut self, limit: u64) {
        while self.clock.now() < limit {
            self.step();
        }
        self.engine.tick();
    }

    /// Run until every packet has had time to play.
    pub fn run_to_end(&mut self) {
        let limit = send_time(self.total) + 3 * SEC;
        self.run_until(limit);
    }

    pub fn stats(&self) -> PlaybackStats {
        self.handle.stats()
    }
}
