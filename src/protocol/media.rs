//! Deezer media API: trading a license token and track tokens for CDN URLs.
//!
//! A `get_url` request lists format and cipher pairs in order of preference.
//! The API answers with the first one the track is available in:
//!
//! ```json
//! {"data": [{"media": [{
//!     "media_type": "FULL",
//!     "cipher": {"type": "BF_CBC_STRIPE"},
//!     "format": "FLAC",
//!     "sources": [{"url": "https://...", "provider": "ak"}]
//! }]}]}
//! ```
//!
//! or with `{"data": [{"errors": [{"code": 2002, "message": "..."}]}]}` when
//! none are.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use veil::Redact;

use crate::{
    error::{Error, Result},
    quality,
};

/// Body of a `get_url` call.
#[derive(Clone, Serialize, Redact)]
pub struct Request {
    #[redact]
    pub license_token: String,
    pub media: Vec<MediaRequest>,
    #[redact]
    pub track_tokens: Vec<String>,
}

impl Request {
    /// Requests the full track behind `track_token`, trying `formats` in
    /// order. Every format is asked for with the stripe cipher; the API
    /// answers `NONE` for tracks it serves in the clear.
    #[must_use]
    pub fn full_track(license_token: &str, track_token: &str, formats: &[Format]) -> Self {
        Self {
            license_token: license_token.to_owned(),
            media: vec![MediaRequest {
                kind: "FULL",
                formats: formats
                    .iter()
                    .map(|&format| CipherFormat {
                        cipher: Cipher::BF_CBC_STRIPE,
                        format,
                    })
                    .collect(),
            }],
            track_tokens: vec![track_token.to_owned()],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MediaRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    formats: Vec<CipherFormat>,
}

#[derive(Copy, Clone, Debug, Serialize)]
struct CipherFormat {
    cipher: Cipher,
    format: Format,
}

/// Encryption applied to a media stream.
#[derive(Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize, Debug)]
#[expect(non_camel_case_types)]
pub enum Cipher {
    /// Every third 2 KiB chunk is Blowfish-CBC encrypted.
    #[default]
    BF_CBC_STRIPE,
    NONE,
}

/// Audio format as the media API names it.
#[derive(Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize, Debug)]
#[expect(non_camel_case_types)]
pub enum Format {
    FLAC,
    MP3_320,
    #[default]
    MP3_128,
    MP3_64,
    /// Legacy uploads of unknown bitrate. Never requested.
    MP3_MISC,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TryFrom<quality::Format> for Format {
    type Error = quality::Format;

    /// Fails for formats Deezer does not serve, such as AAC.
    fn try_from(format: quality::Format) -> std::result::Result<Self, Self::Error> {
        match format {
            quality::Format::FLAC => Ok(Self::FLAC),
            quality::Format::MP3_320 => Ok(Self::MP3_320),
            quality::Format::MP3_128 => Ok(Self::MP3_128),
            quality::Format::MP3_64 => Ok(Self::MP3_64),
            other => Err(other),
        }
    }
}

impl TryFrom<Format> for quality::Format {
    type Error = Format;

    fn try_from(format: Format) -> std::result::Result<Self, Self::Error> {
        match format {
            Format::FLAC => Ok(Self::FLAC),
            Format::MP3_320 => Ok(Self::MP3_320),
            Format::MP3_128 => Ok(Self::MP3_128),
            Format::MP3_64 => Ok(Self::MP3_64),
            Format::MP3_MISC => Err(format),
        }
    }
}

/// Body of a `get_url` answer. One entry per requested track token.
#[derive(Clone, Default, Deserialize, Debug)]
pub struct Response {
    #[serde(default)]
    pub data: Vec<Data>,
}

#[derive(Clone, Deserialize, Debug)]
#[serde(untagged)]
pub enum Data {
    Media { media: Vec<Medium> },
    Errors { errors: Vec<ApiError> },
}

#[derive(Clone, Deserialize, Debug)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl Response {
    /// Takes the first medium with at least one source for the single track
    /// that was asked for.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` when the track has no medium in any requested
    /// format, with the API's error messages if it sent any.
    pub fn into_medium(self, track_id: &str) -> Result<Medium> {
        match self.data.into_iter().next() {
            Some(Data::Media { media }) => media
                .into_iter()
                .find(|medium| !medium.sources.is_empty())
                .ok_or_else(|| Error::exhausted(format!("no media sources for {track_id}"))),
            Some(Data::Errors { errors }) => {
                let detail = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(Error::exhausted(format!("no media for {track_id}: {detail}")))
            }
            None => Err(Error::exhausted(format!("no media for {track_id}"))),
        }
    }
}

/// A track available in one format and cipher, from one or more CDNs.
#[derive(Clone, Deserialize, Debug)]
pub struct Medium {
    #[serde(default)]
    pub cipher: CipherType,
    #[serde(default)]
    pub format: Format,
    pub sources: Vec<Source>,
}

impl Medium {
    /// URL of the preferred CDN.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.sources.first().map(|source| &source.url)
    }
}

/// `{"type": "BF_CBC_STRIPE"}`
#[derive(Copy, Clone, Default, Deserialize, Debug)]
pub struct CipherType {
    #[serde(rename = "type")]
    pub typ: Cipher,
}

#[derive(Clone, Deserialize, Redact)]
pub struct Source {
    /// Signed and short-lived.
    #[redact]
    pub url: Url,
    #[serde(default)]
    pub provider: String,
}
