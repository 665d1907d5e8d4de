//! Wraparound-aware sequence and timestamp arithmetic
//!
//! Sequence numbers live in a 16-bit modulo space and RTP timestamps in a
//! 32-bit one. Every position comparison in the ring goes through this module
//! so that wraparound is handled in exactly one place.

/// Signed offset of `seq` relative to `base`, in the interval `[-32768, 32767]`.
#[must_use]
#[allow(
    clippy::cast_possible_wrap,
    reason = "Reinterpreting the modulo difference as signed is the point"
)]
pub fn ordinate(seq: u16, base: u16) -> i16 {
    seq.wrapping_sub(base) as i16
}

/// Distance from `a` to `b`, both measured relative to `base`.
///
/// Positive when `b` is ahead of `a` within the window anchored at `base`.
#[must_use]
pub fn seq_diff(a: u16, b: u16, base: u16) -> i32 {
    i32::from(ordinate(b, base)) - i32::from(ordinate(a, base))
}

/// True if `b` comes strictly after `a` in the window anchored at `base`.
#[must_use]
pub fn seq_order(a: u16, b: u16, base: u16) -> bool {
    seq_diff(a, b, base) > 0
}

/// Forward distance from `from` to `to` in the 32-bit timestamp space.
#[must_use]
pub fn modulo_32_offset(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

/// Signed difference `to - from` between two RTP timestamps.
#[must_use]
#[allow(
    clippy::cast_possible_wrap,
    reason = "Reinterpreting the modulo difference as signed is the point"
)]
pub fn timestamp_delta(from: u32, to: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Add a signed offset to a sequence number.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Sequence numbers wrap at 2^16"
)]
pub fn seq_add(seq: u16, offset: i32) -> u16 {
    seq.wrapping_add(offset as u16)
}

/// Add a signed frame offset to an RTP timestamp.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Timestamps wrap at 2^32"
)]
pub fn timestamp_add(ts: u32, offset: i64) -> u32 {
    ts.wrapping_add(offset as u32)
}
