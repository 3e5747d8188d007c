//! Catalog entities handed between the pipeline and its collaborators.

use std::{fmt, time::Duration};

/// Identity of one acquisition: a provider name and its external track id.
///
/// Unique while an acquisition for it is live.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackKey {
    pub provider: String,
    pub id: String,
}

impl TrackKey {
    #[must_use]
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

/// Track metadata as returned by the metadata collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Track {
    /// External id at the provider
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// External id of the album, when the track belongs to one
    pub album_id: Option<String>,
    /// Position on its disc, starting at 1; 0 when unknown
    pub track_number: u32,
    pub disc_number: Option<u32>,
    pub duration: Option<Duration>,
    pub isrc: Option<String>,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist, self.title)
    }
}

/// Album metadata with its track list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub tracks: Vec<Track>,
}
