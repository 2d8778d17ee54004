//! Half-open frame ranges selecting what gets encoded.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frames `start..end` (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct FrameRange {
    /// First frame to encode.
    pub start: u64,
    /// First frame past the range.
    pub end: u64,
}

impl FrameRange {
    /// Create a range; `start` must not exceed `end`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_param(format!(
                "frame range {}-{} is reversed",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Every frame of the stream.
    pub fn all() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    /// Check whether frame `id` is inside the range.
    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id < self.end
    }

    /// Number of frames covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Check if the range covers no frame.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Parse `a-b` where each side is a frame number or a
    /// `HH:MM:SS[.mmm]` timecode converted with `fps`.
    pub fn parse_with_fps(s: &str, fps: f64) -> Result<Self> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| Error::invalid_param(format!("frame range '{}' lacks '-'", s)))?;
        Self::new(parse_position(a, fps)?, parse_position(b, fps)?)
    }
}

#[derive(Deserialize)]
struct RawRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawRange> for FrameRange {
    type Error = Error;

    fn try_from(raw: RawRange) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end == u64::MAX {
            write!(f, "{}-end", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

fn parse_position(s: &str, fps: f64) -> Result<u64> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("end") {
        return Ok(u64::MAX);
    }
    if !s.contains(':') {
        return s
            .parse::<u64>()
            .map_err(|_| Error::invalid_param(format!("bad frame number '{}'", s)));
    }
    if fps <= 0.0 {
        return Err(Error::invalid_param("timecode ranges need a positive frame rate"));
    }
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(Error::invalid_param(format!("bad timecode '{}'", s)));
    }
    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| Error::invalid_param(format!("bad hours in '{}'", s)))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| Error::invalid_param(format!("bad minutes in '{}'", s)))?;
    let seconds: f64 = parts[2]
        .parse()
        .map_err(|_| Error::invalid_param(format!("bad seconds in '{}'", s)))?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(Error::invalid_param(format!("timecode '{}' out of range", s)));
    }
    let whole = hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60))
        .ok_or_else(|| Error::invalid_param(format!("timecode '{}' too large", s)))?;
    let frames = ((whole as f64 + seconds) * fps).round();
    if !frames.is_finite() || frames >= u64::MAX as f64 {
        return Err(Error::invalid_param(format!("timecode '{}' too large", s)));
    }
    Ok(frames as u64)
}

/// Ordered, non-overlapping list of frame ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FrameRange>")]
pub struct FrameRanges(Vec<FrameRange>);

impl FrameRanges {
    /// Build a list; ranges must be sorted and must not overlap.
    pub fn new(ranges: Vec<FrameRange>) -> Result<Self> {
        for pair in ranges.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(Error::invalid_param(format!(
                    "frame ranges {} and {} overlap or are unordered",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Self(ranges))
    }

    /// A single range covering the whole stream.
    pub fn all() -> Self {
        Self(vec![FrameRange::all()])
    }

    /// Parse a comma separated list, see [`FrameRange::parse_with_fps`].
    pub fn parse_with_fps(s: &str, fps: f64) -> Result<Self> {
        let ranges = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| FrameRange::parse_with_fps(part, fps))
            .collect::<Result<Vec<_>>>()?;
        Self::new(ranges)
    }

    /// The ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = &FrameRange> {
        self.0.iter()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the list holds no range.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether any range contains frame `id`.
    pub fn contains(&self, id: u64) -> bool {
        self.0.iter().any(|r| r.contains(id))
    }
}

impl From<FrameRange> for FrameRanges {
    fn from(range: FrameRange) -> Self {
        Self(vec![range])
    }
}

impl TryFrom<Vec<FrameRange>> for FrameRanges {
    type Error = Error;

    fn try_from(ranges: Vec<FrameRange>) -> Result<Self> {
        Self::new(ranges)
    }
}

impl FromStr for FrameRanges {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_fps(s, 0.0)
    }
}
