//! Fixed-capacity frame ring
//!
//! Slots are allocated once and reused in place. Positions are indexed by
//! `sequence_number mod capacity`, and every cursor comparison is a signed
//! offset relative to the read cursor (see [`super::seq`]).

use super::seq::{ordinate, seq_add, seq_diff, seq_order};

/// One position of the frame ring
#[derive(Debug, Clone)]
pub struct FrameSlot {
    ready: bool,
    resend_level: u32,
    sequence_number: u16,
    timestamp: u32,
    payload: Vec<i16>,
    frame_count: usize,
}

impl FrameSlot {
    fn with_capacity(samples: usize) -> Self {
        Self {
            ready: false,
            resend_level: 0,
            sequence_number: 0,
            timestamp: 0,
            payload: Vec::with_capacity(samples),
            frame_count: 0,
        }
    }

    fn clear(&mut self) {
        self.ready = false;
        self.resend_level = 0;
        self.sequence_number = 0;
        self.timestamp = 0;
        self.frame_count = 0;
    }

    /// Whether the slot holds a decoded packet
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Highest backoff pass that has already requested this slot
    #[must_use]
    pub fn resend_level(&self) -> u32 {
        self.resend_level
    }

    pub(crate) fn set_resend_level(&mut self, level: u32) {
        self.resend_level = level;
    }

    /// Sequence number, meaningful only while ready
    #[must_use]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// RTP timestamp of the first frame in the slot
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Number of frames held
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Interleaved samples held
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.payload
    }
}

/// Result of storing a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored at or beyond the write cursor
    Stored {
        /// Slots cleared to open a gap before this packet
        cleared: usize,
        /// Unread slots overwritten because the ring was full
        evicted: usize,
    },
    /// Stored behind the write cursor but not yet played
    Late,
    /// The slot already holds this packet
    Duplicate,
    /// Behind the read cursor; discarded
    TooLate,
}

/// State of the slot at the read cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    /// Nothing unread
    Empty,
    /// A decoded packet is waiting
    Ready {
        /// Sequence number at the read cursor
        seq: u16,
        /// Its RTP timestamp
        timestamp: u32,
    },
    /// The read cursor points at a slot that never arrived
    Missing {
        /// Sequence number at the read cursor
        seq: u16,
    },
}

/// A consumed position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// A packet was copied out
    Frame {
        /// Sequence number
        seq: u16,
        /// RTP timestamp
        timestamp: u32,
        /// Frames copied into the caller's buffer
        frames: usize,
    },
    /// The slot was not ready; the caller substitutes silence
    Missing {
        /// Sequence number that was skipped over
        seq: u16,
    },
}

impl Fetched {
    /// Sequence number of the consumed position
    #[must_use]
    pub fn seq(&self) -> u16 {
        match *self {
            Self::Frame { seq, .. } | Self::Missing { seq } => seq,
        }
    }
}

/// Circular array of frame slots with read and write cursors
#[derive(Debug)]
pub struct FrameRing {
    slots: Box<[FrameSlot]>,
    mask: usize,
    samples_per_slot: usize,
    read: u16,
    write: u16,
    synced: bool,
    buffering: bool,
}

impl FrameRing {
    /// Create a ring of `capacity` slots, each holding up to `samples_per_slot`
    /// interleaved samples.
    ///
    /// `capacity` must be a power of two no larger than 2^15; callers validate
    /// this through the player configuration.
    #[must_use]
    pub fn new(capacity: usize, samples_per_slot: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| FrameSlot::with_capacity(samples_per_slot))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            samples_per_slot,
            read: 0,
            write: 0,
            synced: false,
            buffering: true,
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Read cursor
    #[must_use]
    pub fn read_cursor(&self) -> u16 {
        self.read
    }

    /// Write cursor (one past the newest stored position)
    #[must_use]
    pub fn write_cursor(&self) -> u16 {
        self.write
    }

    /// Whether the first packet has fixed the cursors
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Whether the scheduler is still pre-rolling
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Enter or leave the pre-roll state
    pub fn set_buffering(&mut self, buffering: bool) {
        self.buffering = buffering;
    }

    /// Unread span between the cursors
    #[must_use]
    #[allow(clippy::cast_sign_loss, reason = "The span is never negative")]
    pub fn occupancy(&self) -> usize {
        seq_diff(self.read, self.write, self.read).max(0) as usize
    }

    /// True when nothing is waiting to be read
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.synced || self.read == self.write
    }

    fn index(&self, seq: u16) -> usize {
        usize::from(seq) & self.mask
    }

    /// Slot that `seq` maps to
    #[must_use]
    pub fn slot(&self, seq: u16) -> &FrameSlot {
        &self.slots[self.index(seq)]
    }

    pub(crate) fn slot_mut(&mut self, seq: u16) -> &mut FrameSlot {
        let idx = self.index(seq);
        &mut self.slots[idx]
    }

    /// Store a decoded packet.
    ///
    /// [`PlayerHandle::put_packet`](super::PlayerHandle::put_packet) rejects
    /// oversized packets; here samples beyond the slot's capacity are cut.
    pub fn put(&mut self, seq: u16, timestamp: u32, pcm: &[i16], channels: usize) -> PutOutcome {
        if !self.synced {
            tracing::trace!(seq, "Frame ring synced to first packet");
            self.read = seq;
            self.write = seq;
            self.synced = true;
        }

        let outcome = if seq == self.write {
            self.write = seq.wrapping_add(1);
            PutOutcome::Stored {
                cleared: 0,
                evicted: self.evict_overflow(),
            }
        } else if seq_order(self.write, seq, self.read) {
            #[allow(clippy::cast_sign_loss, reason = "Ordered, so the gap is positive")]
            let gap = seq_diff(self.write, seq, self.read) as usize;
            let cleared = gap.min(self.capacity());
            for i in 0..cleared {
                let pos = self.write.wrapping_add(u16::try_from(i).unwrap_or(u16::MAX));
                self.slot_mut(pos).clear();
            }
            self.write = seq.wrapping_add(1);
            PutOutcome::Stored {
                cleared,
                evicted: self.evict_overflow(),
            }
        } else if seq_order(self.read, seq, self.read) || seq == self.read {
            let slot = self.slot(seq);
            if slot.ready && slot.sequence_number == seq {
                return PutOutcome::Duplicate;
            }
            PutOutcome::Late
        } else {
            return PutOutcome::TooLate;
        };

        let samples_per_slot = self.samples_per_slot;
        let slot = self.slot_mut(seq);
        let n = pcm.len().min(samples_per_slot);
        slot.payload.clear();
        slot.payload.extend_from_slice(&pcm[..n]);
        slot.frame_count = if channels == 0 { 0 } else { n / channels };
        slot.timestamp = timestamp;
        slot.sequence_number = seq;
        slot.ready = true;
        outcome
    }

    /// Clear the slot for `seq` after a failed decode.
    pub fn discard(&mut self, seq: u16) {
        self.slot_mut(seq).clear();
    }

    fn evict_overflow(&mut self) -> usize {
        let span = seq_diff(self.read, self.write, self.read);
        let capacity = i32::try_from(self.capacity()).unwrap_or(i32::MAX);
        if span <= capacity {
            return 0;
        }
        let excess = span - capacity;
        self.read = seq_add(self.read, excess);
        tracing::debug!(excess, read = self.read, "Frame ring full, oldest slots overwritten");
        #[allow(clippy::cast_sign_loss, reason = "Excess is positive here")]
        let evicted = excess as usize;
        evicted
    }

    /// Inspect the slot at the read cursor, correcting index aliasing first.
    pub fn head(&mut self) -> Head {
        if self.is_empty() {
            return Head::Empty;
        }
        let read = self.read;
        let slot = self.slot(read);
        if slot.ready && slot.sequence_number != read {
            let stored = slot.sequence_number;
            if self.index(stored) == self.index(read) && seq_order(read, stored, read) {
                tracing::debug!(read, stored, "Aliasing of ring index, read cursor reset");
                self.read = stored;
            } else {
                tracing::debug!(read, stored, "Inconsistent sequence number in slot");
                self.slot_mut(read).clear();
                return Head::Missing { seq: read };
            }
        }
        let slot = self.slot(self.read);
        if slot.ready {
            Head::Ready {
                seq: self.read,
                timestamp: slot.timestamp,
            }
        } else {
            Head::Missing { seq: self.read }
        }
    }

    /// Consume the read cursor without copying anything out.
    pub fn skip_head(&mut self) {
        let read = self.read;
        self.slot_mut(read).clear();
        self.read = read.wrapping_add(1);
    }

    /// Consume the read cursor, copying a ready payload into `out`.
    ///
    /// Always advances exactly one position.
    pub fn take_head(&mut self, out: &mut Vec<i16>) -> Fetched {
        let read = self.read;
        let idx = self.index(read);
        let slot = &mut self.slots[idx];
        let fetched = if slot.ready {
            out.clear();
            out.extend_from_slice(&slot.payload);
            Fetched::Frame {
                seq: read,
                timestamp: slot.timestamp,
                frames: slot.frame_count,
            }
        } else {
            Fetched::Missing { seq: read }
        };
        slot.clear();
        self.read = read.wrapping_add(1);
        fetched
    }

    /// Consume the next position, or `None` if nothing is unread.
    pub fn get_next(&mut self, out: &mut Vec<i16>) -> Option<Fetched> {
        match self.head() {
            Head::Empty => None,
            Head::Ready { .. } | Head::Missing { .. } => Some(self.take_head(out)),
        }
    }

    /// Clear every slot and return to the unsynced, buffering state.
    pub fn resync(&mut self) {
        for slot in &mut *self.slots {
            slot.clear();
        }
        self.synced = false;
        self.buffering = true;
        self.read = 0;
        self.write = 0;
    }

    /// Signed position of `seq` relative to the read cursor.
    #[must_use]
    pub fn position_of(&self, seq: u16) -> i16 {
        ordinate(seq, self.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(v: i16) -> Vec<i16> {
        vec![v; 8]
    }

    #[test]
    fn test_first_packet_syncs_cursors() {
        let mut ring = FrameRing::new(16, 8);
        assert!(ring.is_empty());

        let outcome = ring.put(500, 1000, &pcm(1), 2);
        assert_eq!(
            outcome,
            PutOutcome::Stored {
                cleared: 0,
                evicted: 0
            }
        );
        assert_eq!(ring.read_cursor(), 500);
        assert_eq!(ring.write_cursor(), 501);
        assert_eq!(ring.occupancy(), 1);
    }

    #[test]
    fn test_gap_clears_intervening_slots() {
        let mut ring = FrameRing::new(16, 8);
        ring.put(0, 0, &pcm(1), 2);
        ring.slot_mut(2).set_resend_level(3);

        let outcome = ring.put(4, 16, &pcm(5), 2);
        assert_eq!(
            outcome,
            PutOutcome::Stored {
                cleared: 3,
                evicted: 0
            }
        );
        assert_eq!(ring.slot(2).resend_level(), 0);
        assert!(!ring.slot(3).is_ready());
    }

    #[test]
    fn test_late_and_duplicate() {
        let mut ring = FrameRing::new(16, 8);
        ring.put(0, 0, &pcm(1), 2);
        ring.put(3, 12, &pcm(4), 2);

        assert_eq!(ring.put(1, 4, &pcm(2), 2), PutOutcome::Late);
        assert_eq!(ring.put(1, 4, &pcm(2), 2), PutOutcome::Duplicate);
        assert_eq!(ring.put(3, 12, &pcm(4), 2), PutOutcome::Duplicate);
    }

    #[test]
    fn test_too_late_after_read() {
        let mut ring = FrameRing::new(16, 8);
        let mut out = Vec::new();
        ring.put(10, 0, &pcm(1), 2);
        ring.put(11, 4, &pcm(1), 2);
        ring.get_next(&mut out);

        assert_eq!(ring.put(10, 0, &pcm(1), 2), PutOutcome::TooLate);
        assert_eq!(ring.put(9, 0, &pcm(1), 2), PutOutcome::TooLate);
    }

    #[test]
    fn test_missing_slot_still_advances() {
        let mut ring = FrameRing::new(16, 8);
        let mut out = Vec::new();
        ring.put(0, 0, &pcm(1), 2);
        ring.put(2, 8, &pcm(3), 2);

        assert!(matches!(
            ring.get_next(&mut out),
            Some(Fetched::Frame { seq: 0, frames: 4, .. })
        ));
        assert_eq!(ring.get_next(&mut out), Some(Fetched::Missing { seq: 1 }));
        assert!(matches!(
            ring.get_next(&mut out),
            Some(Fetched::Frame { seq: 2, .. })
        ));
        assert_eq!(out, pcm(3));
        assert_eq!(ring.get_next(&mut out), None);
    }

    #[test]
    fn test_wraparound_is_consecutive() {
        let mut ring = FrameRing::new(16, 8);
        let mut out = Vec::new();
        ring.put(0xFFFF, 0, &pcm(1), 2);
        let outcome = ring.put(0x0000, 4, &pcm(2), 2);
        assert_eq!(
            outcome,
            PutOutcome::Stored {
                cleared: 0,
                evicted: 0
            }
        );
        assert_eq!(ring.occupancy(), 2);
        assert_eq!(ring.get_next(&mut out).map(|f| f.seq()), Some(0xFFFF));
        assert_eq!(ring.get_next(&mut out).map(|f| f.seq()), Some(0x0000));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut ring = FrameRing::new(8, 8);
        for seq in 0..10u16 {
            ring.put(seq, u32::from(seq) * 4, &pcm(1), 2);
        }
        assert_eq!(ring.occupancy(), 8);
        assert_eq!(ring.read_cursor(), 2);

        let outcome = ring.put(40, 160, &pcm(1), 2);
        assert!(matches!(outcome, PutOutcome::Stored { cleared: 8, .. }));
        assert_eq!(ring.occupancy(), 8);
        assert_eq!(ring.read_cursor(), 33);
    }

    #[test]
    fn test_aliasing_resets_read_cursor() {
        let mut ring = FrameRing::new(8, 8);
        ring.put(0, 0, &pcm(1), 2);
        ring.put(1, 4, &pcm(1), 2);
        // Force a stale slot: position 1 now holds a packet one lap ahead.
        ring.slot_mut(1).sequence_number = 9;
        ring.skip_head();
        ring.write = 10;

        assert_eq!(ring.head(), Head::Ready { seq: 9, timestamp: 4 });
        assert_eq!(ring.read_cursor(), 9);
    }

    #[test]
    fn test_resync_clears_everything() {
        let mut ring = FrameRing::new(8, 8);
        ring.put(3, 0, &pcm(1), 2);
        ring.set_buffering(false);
        ring.resync();

        assert!(!ring.is_synced());
        assert!(ring.is_buffering());
        assert!(!ring.slot(3).is_ready());
        assert_eq!(ring.head(), Head::Empty);
    }
}
