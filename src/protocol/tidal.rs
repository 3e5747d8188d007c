//! Playback types of the community Tidal mirrors.
//!
//! # Wire Format
//!
//! `GET /track/?id=12345&quality=LOSSLESS`:
//! ```json
//! {
//!     "version": "2.0",
//!     "data": {
//!         "trackId": 12345,
//!         "audioQuality": "LOSSLESS",
//!         "manifestMimeType": "application/vnd.tidal.bts",
//!         "manifest": "eyJtaW1lVHlwZSI6ImF1ZGlvL2ZsYWMiLC4uLn0="
//!     }
//! }
//! ```
//!
//! The base64 manifest decodes to:
//! ```json
//! {
//!     "mimeType": "audio/flac",
//!     "codecs": "flac",
//!     "encryptionType": "NONE",
//!     "urls": ["https://..."]
//! }
//! ```
//!
//! `GET /info/?id=12345` returns the track's catalog entry:
//! ```json
//! {
//!     "version": "2.0",
//!     "data": {
//!         "id": 12345,
//!         "title": "Title",
//!         "trackNumber": 3,
//!         "volumeNumber": 1,
//!         "duration": 215,
//!         "isrc": "GBAYE0000001",
//!         "artist": {"id": 7, "name": "Artist"},
//!         "album": {"id": 900, "title": "Album"}
//!     }
//! }
//! ```

use std::{fmt, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use url::Url;
use veil::Redact;

use crate::{
    error::{Error, Result},
    quality::{AudioQuality, Format},
    track::Track,
};

/// MIME type of the manifests this client can follow.
pub const BTS_MANIFEST: &str = "application/vnd.tidal.bts";

/// Quality tier as named by the mirror API.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    Low,
    High,
    Lossless,
    HiResLossless,
}

impl Quality {
    /// Highest tier that does not exceed `ceiling`.
    #[must_use]
    pub fn for_ceiling(ceiling: AudioQuality) -> Self {
        match ceiling {
            AudioQuality::Lossless => Self::Lossless,
            AudioQuality::High => Self::High,
            AudioQuality::Standard | AudioQuality::Basic => Self::Low,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::High => "HIGH",
            Self::Lossless => "LOSSLESS",
            Self::HiResLossless => "HI_RES_LOSSLESS",
        };
        write!(f, "{name}")
    }
}

/// Response envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct Response {
    pub data: PlaybackInfo,
}

/// Playback information of one track.
#[derive(Clone, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    #[serde(default)]
    pub audio_quality: Option<Quality>,
    pub manifest_mime_type: String,
    #[redact]
    pub manifest: String,
}

impl PlaybackInfo {
    /// Decodes the base64 BTS manifest.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for manifest types other than BTS, or if the
    /// manifest is not valid base64 JSON.
    pub fn manifest(&self) -> Result<Manifest> {
        if self.manifest_mime_type != BTS_MANIFEST {
            return Err(Error::invalid_argument(format!(
                "unsupported manifest type {}",
                self.manifest_mime_type
            )));
        }

        let decoded = STANDARD.decode(self.manifest.trim())?;
        serde_json::from_slice(&decoded).map_err(Into::into)
    }
}

/// Decoded BTS manifest.
#[derive(Clone, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub codecs: String,
    #[serde(default = "Manifest::no_encryption")]
    pub encryption_type: String,
    #[redact]
    pub urls: Vec<Url>,
}

impl Manifest {
    fn no_encryption() -> String {
        "NONE".to_owned()
    }

    /// Whether the stream behind the URLs is served in the clear.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.encryption_type.eq_ignore_ascii_case("NONE")
    }

    /// Download format implied by the codec and the delivered tier.
    #[must_use]
    pub fn format(&self, quality: Option<Quality>) -> Option<Format> {
        let codecs = self.codecs.to_ascii_lowercase();
        if codecs.contains("flac") || self.mime_type == "audio/flac" {
            return Some(Format::FLAC);
        }

        if codecs.starts_with("mp4a") || self.mime_type == "audio/mp4" {
            return match quality {
                Some(Quality::Low) => Some(Format::AAC_96),
                _ => Some(Format::AAC_320),
            };
        }

        None
    }
}

/// Envelope of `/info/`.
#[derive(Clone, Debug, Deserialize)]
pub struct InfoResponse {
    pub data: TrackInfo,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub volume_number: Option<u32>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub artist: Option<Artist>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlbumRef {
    pub id: u64,
    pub title: String,
}

impl From<TrackInfo> for Track {
    fn from(info: TrackInfo) -> Self {
        Self {
            id: info.id.to_string(),
            title: info.title,
            artist: info.artist.map(|artist| artist.name).unwrap_or_default(),
            album: info
                .album
                .as_ref()
                .map(|album| album.title.clone())
                .unwrap_or_default(),
            album_id: info.album.map(|album| album.id.to_string()),
            track_number: info.track_number,
            disc_number: info.volume_number,
            duration: info.duration.map(Duration::from_secs),
            isrc: info.isrc,
        }
    }
}
