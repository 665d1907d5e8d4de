//! Output sample formats and playback modes

use serde::{Deserialize, Serialize};

/// Byte layout of samples delivered to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// 8-bit signed
    #[serde(rename = "S8")]
    S8,
    /// 8-bit unsigned, offset by 128
    #[serde(rename = "U8")]
    U8,
    /// 16-bit signed, native endian
    #[serde(rename = "S16")]
    S16,
    /// 16-bit signed little endian
    #[default]
    #[serde(rename = "S16_LE")]
    S16Le,
    /// 16-bit signed big endian
    #[serde(rename = "S16_BE")]
    S16Be,
    /// 24-bit signed in a 4-byte container, native endian
    #[serde(rename = "S24")]
    S24,
    /// 24-bit signed in a 4-byte little endian container
    #[serde(rename = "S24_LE")]
    S24Le,
    /// 24-bit signed in a 4-byte big endian container
    #[serde(rename = "S24_BE")]
    S24Be,
    /// 24-bit signed packed into 3 bytes, little endian
    #[serde(rename = "S24_3LE")]
    S24Le3,
    /// 24-bit signed packed into 3 bytes, big endian
    #[serde(rename = "S24_3BE")]
    S24Be3,
    /// 32-bit signed, native endian
    #[serde(rename = "S32")]
    S32,
    /// 32-bit signed little endian
    #[serde(rename = "S32_LE")]
    S32Le,
    /// 32-bit signed big endian
    #[serde(rename = "S32_BE")]
    S32Be,
}

impl OutputFormat {
    /// Significant bits per sample
    #[must_use]
    pub fn bits_per_sample(self) -> u32 {
        match self {
            Self::S8 | Self::U8 => 8,
            Self::S16 | Self::S16Le | Self::S16Be => 16,
            Self::S24 | Self::S24Le | Self::S24Be | Self::S24Le3 | Self::S24Be3 => 24,
            Self::S32 | Self::S32Le | Self::S32Be => 32,
        }
    }

    /// Bytes occupied by one sample
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::S16 | Self::S16Le | Self::S16Be => 2,
            Self::S24Le3 | Self::S24Be3 => 3,
            Self::S24 | Self::S24Le | Self::S24Be | Self::S32 | Self::S32Le | Self::S32Be => 4,
        }
    }

    /// Bytes occupied by one interleaved frame
    #[must_use]
    pub fn bytes_per_frame(self, channels: usize) -> usize {
        self.bytes_per_sample() * channels
    }
}

/// How decoded stereo is mapped onto the output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Left to left, right to right
    #[default]
    Stereo,
    /// Both channels carry the average of left and right
    Mono,
    /// Left and right swapped
    ReverseStereo,
    /// Left channel on both outputs
    LeftOnly,
    /// Right channel on both outputs
    RightOnly,
}

impl PlaybackMode {
    /// Map one decoded 16-bit frame to a 32-bit output frame.
    #[must_use]
    pub fn map_frame(self, left: i16, right: i16) -> (i32, i32) {
        let l = i32::from(left) << 16;
        let r = i32::from(right) << 16;
        match self {
            Self::Stereo => (l, r),
            Self::Mono => {
                let both = (i32::from(left) + i32::from(right)) << 15;
                (both, both)
            }
            Self::ReverseStereo => (r, l),
            Self::LeftOnly => (l, l),
            Self::RightOnly => (r, r),
        }
    }
}
