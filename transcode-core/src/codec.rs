//! Codec identifiers used by module descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Codec accepted or produced by a module.
///
/// `Any` is a wildcard in accept lists; `Error` terminates nothing and only
/// marks an unusable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Codec {
    /// Invalid entry.
    Error,
    /// Matches any codec.
    Any,
    /// Raw, unspecified layout.
    Raw,
    /// Planar YUV 4:2:0.
    Yuv420p,
    /// Planar YUV 4:2:2.
    Yuv422p,
    /// Packed RGB24.
    Rgb,
    /// Signed 16-bit PCM.
    Pcm,
    /// MPEG-1 video.
    Mpeg1,
    /// MPEG-2 video.
    Mpeg2,
    /// MPEG-4 part 2 (Xvid).
    Xvid,
    /// H.264 / AVC.
    H264,
    /// Motion JPEG.
    Mjpeg,
    /// Theora.
    Theora,
    /// DV.
    Dv,
    /// MPEG Layer 2 audio.
    Mp2,
    /// MPEG Layer 3 audio.
    Mp3,
    /// AC-3 audio.
    Ac3,
    /// Vorbis audio.
    Vorbis,
}

impl Codec {
    /// All codecs that name a concrete format.
    pub const KNOWN: [Codec; 16] = [
        Codec::Raw,
        Codec::Yuv420p,
        Codec::Yuv422p,
        Codec::Rgb,
        Codec::Pcm,
        Codec::Mpeg1,
        Codec::Mpeg2,
        Codec::Xvid,
        Codec::H264,
        Codec::Mjpeg,
        Codec::Theora,
        Codec::Dv,
        Codec::Mp2,
        Codec::Mp3,
        Codec::Ac3,
        Codec::Vorbis,
    ];

    /// Lowercase name, as used in option strings and config files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Any => "any",
            Self::Raw => "raw",
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Rgb => "rgb",
            Self::Pcm => "pcm",
            Self::Mpeg1 => "mpeg1",
            Self::Mpeg2 => "mpeg2",
            Self::Xvid => "xvid",
            Self::H264 => "h264",
            Self::Mjpeg => "mjpeg",
            Self::Theora => "theora",
            Self::Dv => "dv",
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Ac3 => "ac3",
            Self::Vorbis => "vorbis",
        }
    }

    /// Check if this is an audio codec.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            Self::Pcm | Self::Mp2 | Self::Mp3 | Self::Ac3 | Self::Vorbis
        )
    }

    /// Check if this is a video codec.
    pub fn is_video(&self) -> bool {
        !self.is_audio() && !matches!(self, Self::Error | Self::Any | Self::Raw)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "any" => Ok(Self::Any),
            "i420" | "yuv420" => Ok(Self::Yuv420p),
            "y42b" | "yuv422" => Ok(Self::Yuv422p),
            "mpeg4" | "divx" => Ok(Self::Xvid),
            "avc" => Ok(Self::H264),
            "mjpg" => Ok(Self::Mjpeg),
            other => Self::KNOWN
                .iter()
                .copied()
                .find(|c| c.name() == other)
                .ok_or_else(|| Error::unsupported(format!("unknown codec '{}'", s))),
        }
    }
}
