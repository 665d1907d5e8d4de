//! Sample conversion: widening, volume scaling, dither and byte packing

use super::dither::Dither;
use super::format::{OutputFormat, PlaybackMode};

/// Software volume at unity gain
pub const UNITY_VOLUME: i32 = 0x10000;

/// Widen decoded 16-bit stereo into 32-bit output frames.
///
/// Each input frame is mapped through `mode` and repeated `ratio` times so the
/// output runs at an integer multiple of the input rate.
pub fn widen_frames(pcm: &[i16], mode: PlaybackMode, ratio: usize, out: &mut Vec<i32>) {
    out.clear();
    out.reserve(pcm.len() * ratio);
    for frame in pcm.chunks_exact(2) {
        let (l, r) = mode.map_frame(frame[0], frame[1]);
        for _ in 0..ratio {
            out.push(l);
            out.push(r);
        }
    }
}

/// Scale, dither and pack one sample, appending its bytes to `out`.
///
/// `volume` is a fixed-point gain where [`UNITY_VOLUME`] leaves the sample
/// unchanged.
pub fn process_sample(
    sample: i32,
    volume: i32,
    format: OutputFormat,
    dither: Option<&mut Dither>,
    out: &mut Vec<u8>,
) {
    let gain = i64::from(volume.clamp(0, UNITY_VOLUME)) << 16;
    let mut hyper = i64::from(sample) * gain;
    if let Some(dither) = dither {
        hyper = hyper.saturating_add(dither.next(format.bits_per_sample()));
    }
    pack(hyper, format, out);
}

/// Scale, dither and pack a run of interleaved samples.
pub fn process_samples(
    samples: &[i32],
    volume: i32,
    format: OutputFormat,
    mut dither: Option<&mut Dither>,
    out: &mut Vec<u8>,
) {
    out.reserve(samples.len() * format.bytes_per_sample());
    for &sample in samples {
        process_sample(sample, volume, format, dither.as_deref_mut(), out);
    }
}

/// Append `frames` frames of (optionally dithered) silence.
pub fn generate_zero_frames(
    frames: usize,
    channels: usize,
    format: OutputFormat,
    mut dither: Option<&mut Dither>,
    out: &mut Vec<u8>,
) {
    let samples = frames * channels;
    out.reserve(samples * format.bytes_per_sample());
    for _ in 0..samples {
        let hyper = dither
            .as_deref_mut()
            .map_or(0, |d| d.next(format.bits_per_sample()));
        pack(hyper, format, out);
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Shifted down to the target width before narrowing"
)]
fn pack(hyper: i64, format: OutputFormat, out: &mut Vec<u8>) {
    match format {
        OutputFormat::S32 => out.extend_from_slice(&((hyper >> 32) as i32).to_ne_bytes()),
        OutputFormat::S32Le => out.extend_from_slice(&((hyper >> 32) as i32).to_le_bytes()),
        OutputFormat::S32Be => out.extend_from_slice(&((hyper >> 32) as i32).to_be_bytes()),
        OutputFormat::S24 => out.extend_from_slice(&((hyper >> 40) as i32).to_ne_bytes()),
        OutputFormat::S24Le => {
            let b = ((hyper >> 40) as i32).to_le_bytes();
            out.extend_from_slice(&[b[0], b[1], b[2], 0]);
        }
        OutputFormat::S24Be => {
            let b = ((hyper >> 40) as i32).to_le_bytes();
            out.extend_from_slice(&[0, b[2], b[1], b[0]]);
        }
        OutputFormat::S24Le3 => {
            let b = ((hyper >> 40) as i32).to_le_bytes();
            out.extend_from_slice(&b[..3]);
        }
        OutputFormat::S24Be3 => {
            let b = ((hyper >> 40) as i32).to_le_bytes();
            out.extend_from_slice(&[b[2], b[1], b[0]]);
        }
        OutputFormat::S16 => out.extend_from_slice(&((hyper >> 48) as i16).to_ne_bytes()),
        OutputFormat::S16Le => out.extend_from_slice(&((hyper >> 48) as i16).to_le_bytes()),
        OutputFormat::S16Be => out.extend_from_slice(&((hyper >> 48) as i16).to_be_bytes()),
        OutputFormat::S8 => out.push((hyper >> 56) as i8 as u8),
        OutputFormat::U8 => out.push(((hyper >> 56) as i8 as u8) ^ 0x80),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(sample: i32, format: OutputFormat) -> Vec<u8> {
        let mut out = Vec::new();
        process_sample(sample, UNITY_VOLUME, format, None, &mut out);
        out
    }

    #[test]
    fn test_unity_16_bit() {
        let sample = 0x1234_0000;
        assert_eq!(packed(sample, OutputFormat::S16Le), vec![0x34, 0x12]);
        assert_eq!(packed(sample, OutputFormat::S16Be), vec![0x12, 0x34]);
        assert_eq!(packed(sample, OutputFormat::S16), 0x1234i16.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_24_bit_layouts() {
        let sample = 0x1234_5600;
        assert_eq!(packed(sample, OutputFormat::S24Le3), vec![0x56, 0x34, 0x12]);
        assert_eq!(packed(sample, OutputFormat::S24Be3), vec![0x12, 0x34, 0x56]);
        assert_eq!(packed(sample, OutputFormat::S24Le), vec![0x56, 0x34, 0x12, 0]);
        assert_eq!(packed(sample, OutputFormat::S24Be), vec![0, 0x12, 0x34, 0x56]);
        assert_eq!(
            packed(sample, OutputFormat::S24),
            0x0012_3456i32.to_ne_bytes().to_vec()
        );
    }

    #[test]
    fn test_32_and_8_bit() {
        let sample = -0x0102_0304;
        assert_eq!(
            packed(sample, OutputFormat::S32Be),
            (-0x0102_0304i32).to_be_bytes().to_vec()
        );
        assert_eq!(packed(0x7F00_0000, OutputFormat::S8), vec![0x7F]);
        assert_eq!(packed(0, OutputFormat::U8), vec![0x80]);
        assert_eq!(packed(i32::MIN, OutputFormat::U8), vec![0x00]);
    }

    #[test]
    fn test_volume_scaling() {
        let mut out = Vec::new();
        process_sample(0x4000_0000, UNITY_VOLUME / 2, OutputFormat::S16Le, None, &mut out);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0x2000);

        out.clear();
        process_sample(0x4000_0000, 0, OutputFormat::S16Le, None, &mut out);
        assert_eq!(out, vec![0, 0]);
    }

    #[test]
    fn test_dither_stays_within_one_lsb() {
        let mut dither = Dither::seeded(1);
        for _ in 0..1000 {
            let mut out = Vec::new();
            process_sample(
                0x1000_0000,
                UNITY_VOLUME,
                OutputFormat::S16Le,
                Some(&mut dither),
                &mut out,
            );
            let v = i16::from_le_bytes([out[0], out[1]]);
            assert!((0x0FFF..=0x1001).contains(&v), "got {v:#x}");
        }
    }

    #[test]
    fn test_dither_saturates_instead_of_wrapping() {
        let mut dither = Dither::seeded(5);
        for _ in 0..1000 {
            let mut out = Vec::new();
            process_sample(
                i32::MAX,
                UNITY_VOLUME,
                OutputFormat::S16Le,
                Some(&mut dither),
                &mut out,
            );
            let v = i16::from_le_bytes([out[0], out[1]]);
            assert!(v > 0x7F00, "wrapped to {v:#x}");
        }
    }

    #[test]
    fn test_silence() {
        let mut out = Vec::new();
        generate_zero_frames(3, 2, OutputFormat::S24Le3, None, &mut out);
        assert_eq!(out, vec![0; 18]);

        out.clear();
        generate_zero_frames(2, 2, OutputFormat::U8, None, &mut out);
        assert_eq!(out, vec![0x80; 4]);

        out.clear();
        let mut dither = Dither::seeded(9);
        generate_zero_frames(100, 2, OutputFormat::S16Le, Some(&mut dither), &mut out);
        assert_eq!(out.len(), 400);
        for pair in out.chunks_exact(2) {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            assert!((-1..=1).contains(&v));
        }
    }

    #[test]
    fn test_widen_with_ratio() {
        let mut out = Vec::new();
        widen_frames(&[1, 2, 3, 4], PlaybackMode::Stereo, 2, &mut out);
        assert_eq!(
            out,
            vec![1 << 16, 2 << 16, 1 << 16, 2 << 16, 3 << 16, 4 << 16, 3 << 16, 4 << 16]
        );
    }
}
