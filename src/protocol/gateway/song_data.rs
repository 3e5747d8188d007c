//! Song data from Deezer's gateway API.
//!
//! # Wire Format
//!
//! Request body:
//! ```json
//! { "sng_id": "3135556" }
//! ```
//!
//! Response results:
//! ```json
//! {
//!     "SNG_ID": "3135556",
//!     "SNG_TITLE": "Harder, Better, Faster, Stronger",
//!     "ALB_ID": "302127",
//!     "TRACK_TOKEN": "secret_token",
//!     "FALLBACK": { "SNG_ID": "...", "TRACK_TOKEN": "..." }
//! }
//! ```

use serde::{Deserialize, Serialize};
use veil::Redact;

use super::Method;

impl Method for SongData {
    const METHOD: &'static str = "song.getData";
}

/// Request body of `song.getData`.
#[derive(Clone, Eq, PartialEq, Serialize, Debug, Hash)]
pub struct Request<'a> {
    pub sng_id: &'a str,
}

/// Track token and identifiers of a song.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct SongData {
    /// Song identifier
    #[serde(rename = "SNG_ID")]
    pub id: String,

    /// Token authorizing media access to this song
    #[serde(rename = "TRACK_TOKEN")]
    #[redact]
    pub track_token: String,

    /// Alternative release of the same song, when this one is unavailable
    /// in the account's region
    #[serde(default)]
    #[serde(rename = "FALLBACK")]
    pub fallback: Option<Box<SongData>>,
}
