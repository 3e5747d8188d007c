//! Deezer public catalog API.
//!
//! # Wire Format
//!
//! `GET /track/3135556`:
//! ```json
//! {
//!     "id": 3135556,
//!     "title": "Harder, Better, Faster, Stronger",
//!     "track_position": 4,
//!     "disk_number": 1,
//!     "duration": 224,
//!     "isrc": "GBDUW0000059",
//!     "artist": { "id": 27, "name": "Daft Punk" },
//!     "album": { "id": 302127, "title": "Discovery" }
//! }
//! ```
//!
//! `GET /album/302127` carries the same track objects under
//! `"tracks": { "data": [...] }`.
//!
//! Failures are reported in a `200 OK` body:
//! ```json
//! { "error": { "type": "DataException", "message": "no data", "code": 800 } }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    track::{Album as CatalogAlbum, Track as CatalogTrack},
};

/// Error code for exceeding the request quota.
pub const QUOTA_EXCEEDED: i64 = 4;

/// Error code for absent entities.
pub const DATA_NOT_FOUND: i64 = 800;

/// Response that is either an entity or an error object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Response<T> {
    Error { error: ApiError },
    Ok(T),
}

impl<T> Response<T> {
    /// Converts into a lookup result: absent entities become `None`.
    ///
    /// # Errors
    ///
    /// * `RateLimited` when the quota is exceeded
    /// * `Unknown` for any other API error
    pub fn into_option(self) -> Result<Option<T>> {
        match self {
            Self::Ok(entity) => Ok(Some(entity)),
            Self::Error { error } if error.code == DATA_NOT_FOUND => Ok(None),
            Self::Error { error } if error.code == QUOTA_EXCEEDED => {
                Err(Error::rate_limited(error.to_string()))
            }
            Self::Error { error } => Err(Error::unknown(error.to_string())),
        }
    }
}

/// Error object of the public API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    #[serde(default, rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.typ, self.message, self.code)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Artist {
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AlbumRef {
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub track_position: Option<u32>,
    #[serde(default)]
    pub disk_number: Option<u32>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub artist: Artist,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

impl From<Track> for CatalogTrack {
    fn from(track: Track) -> Self {
        Self {
            id: track.id.to_string(),
            title: track.title,
            artist: track.artist.name,
            album: track
                .album
                .as_ref()
                .map(|album| album.title.clone())
                .unwrap_or_default(),
            album_id: track.album.map(|album| album.id.to_string()),
            track_number: track.track_position.unwrap_or_default(),
            disc_number: track.disk_number,
            duration: track.duration.map(Duration::from_secs),
            isrc: track.isrc,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct TrackList {
    #[serde(default)]
    pub data: Vec<Track>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Album {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub artist: Artist,
    #[serde(default)]
    pub tracks: TrackList,
}

impl From<Album> for CatalogAlbum {
    /// Converts the album, filling in album fields the embedded track
    /// objects leave out.
    fn from(album: Album) -> Self {
        let id = album.id.to_string();
        let tracks = album
            .tracks
            .data
            .into_iter()
            .map(|track| {
                let mut track = CatalogTrack::from(track);
                track.album_id.get_or_insert_with(|| id.clone());
                if track.album.is_empty() {
                    track.album.clone_from(&album.title);
                }
                track
            })
            .collect();

        Self {
            id,
            title: album.title,
            artist: album.artist.name,
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn converts_track() {
        let response: Response<Track> = serde_json::from_str(
            r#"{"id": 3135556, "title": "Harder", "track_position": 4, "disk_number": 1,
                "duration": 224, "artist": {"id": 27, "name": "Daft Punk"},
                "album": {"id": 302127, "title": "Discovery"}}"#,
        )
        .unwrap();
        let track: CatalogTrack = response.into_option().unwrap().unwrap().into();
        assert_eq!(track.id, "3135556");
        assert_eq!(track.album_id.as_deref(), Some("302127"));
        assert_eq!(track.track_number, 4);
        assert_eq!(track.duration, Some(Duration::from_secs(224)));
    }

    #[test]
    fn missing_entity_is_none_and_quota_is_rate_limited() {
        let missing: Response<Track> = serde_json::from_str(
            r#"{"error": {"type": "DataException", "message": "no data", "code": 800}}"#,
        )
        .unwrap();
        assert!(missing.into_option().unwrap().is_none());

        let quota: Response<Track> = serde_json::from_str(
            r#"{"error": {"type": "Exception", "message": "Quota limit exceeded", "code": 4}}"#,
        )
        .unwrap();
        assert_eq!(quota.into_option().unwrap_err().kind, ErrorKind::RateLimited);
    }

    #[test]
    fn album_tracks_inherit_album_fields() {
        let response: Response<Album> = serde_json::from_str(
            r#"{"id": 302127, "title": "Discovery", "artist": {"name": "Daft Punk"},
                "tracks": {"data": [{"id": 1, "title": "One More Time"}, {"id": 2, "title": "Aerodynamic"}]}}"#,
        )
        .unwrap();
        let album: CatalogAlbum = response.into_option().unwrap().unwrap().into();
        assert_eq!(album.tracks.len(), 2);
        assert_eq!(album.tracks[1].album, "Discovery");
        assert_eq!(album.tracks[1].album_id.as_deref(), Some("302127"));
    }
}
