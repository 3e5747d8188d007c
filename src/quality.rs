//! Audio quality ceilings and format negotiation.
//!
//! The caller sets a quality *ceiling*. Each provider has a fixed, configured
//! priority order of formats. Negotiation picks the first format of that
//! order which is both offered upstream and at or below the ceiling, so a
//! download is never upgraded past what the caller asked for and never
//! degraded below what is available.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Audio quality tiers, ordered from lowest to highest.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    /// 64 kbps
    Basic,
    /// 96-128 kbps
    Standard,
    /// 320 kbps
    #[default]
    High,
    /// FLAC
    Lossless,
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::High => "high",
            Self::Lossless => "lossless",
        };
        write!(f, "{name}")
    }
}

impl FromStr for AudioQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" | "low" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            "lossless" => Ok(Self::Lossless),
            other => Err(Error::invalid_argument(format!(
                "unknown audio quality \"{other}\""
            ))),
        }
    }
}

/// Concrete download format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[expect(non_camel_case_types)]
pub enum Format {
    MP3_64,
    AAC_96,
    MP3_128,
    AAC_320,
    MP3_320,
    FLAC,
}

impl Format {
    #[must_use]
    pub fn quality(self) -> AudioQuality {
        match self {
            Self::MP3_64 => AudioQuality::Basic,
            Self::AAC_96 | Self::MP3_128 => AudioQuality::Standard,
            Self::AAC_320 | Self::MP3_320 => AudioQuality::High,
            Self::FLAC => AudioQuality::Lossless,
        }
    }

    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::MP3_64 | Self::MP3_128 | Self::MP3_320 => "mp3",
            Self::AAC_96 | Self::AAC_320 => "m4a",
            Self::FLAC => "flac",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The format actually obtained for one download.
///
/// Derived once when the download URL is resolved and immutable thereafter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormatSelection {
    format: Format,
}

impl FormatSelection {
    #[must_use]
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    #[must_use]
    pub fn quality(&self) -> AudioQuality {
        self.format.quality()
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

impl fmt::Display for FormatSelection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.format, self.quality())
    }
}

/// Provider-defined priority order of formats.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QualityPolicy {
    order: Vec<Format>,
}

impl QualityPolicy {
    /// Creates a policy from a priority order, best first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `order` is empty.
    pub fn new(order: Vec<Format>) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::invalid_argument("format priority list is empty"));
        }
        Ok(Self { order })
    }

    /// Formats at or below `ceiling`, in priority order.
    #[must_use]
    pub fn candidates(&self, ceiling: AudioQuality) -> Vec<Format> {
        self.order
            .iter()
            .copied()
            .filter(|format| format.quality() <= ceiling)
            .collect()
    }

    /// Best format of `offered` at or below `ceiling`.
    #[must_use]
    pub fn select(&self, offered: &[Format], ceiling: AudioQuality) -> Option<FormatSelection> {
        self.candidates(ceiling)
            .into_iter()
            .find(|format| offered.contains(format))
            .map(FormatSelection::new)
    }

    /// Checks that a format chosen upstream honours this policy and the
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` if the upstream delivered a format above the
    /// ceiling or outside the policy.
    pub fn accept(&self, format: Format, ceiling: AudioQuality) -> Result<FormatSelection> {
        if self.candidates(ceiling).contains(&format) {
            Ok(FormatSelection::new(format))
        } else {
            Err(Error::exhausted(format!(
                "upstream offered {format}, which is not acceptable at {ceiling} quality"
            )))
        }
    }
}
