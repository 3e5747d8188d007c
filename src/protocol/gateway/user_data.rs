//! User data from Deezer's gateway API.
//!
//! Bootstraps a download session: the `checkForm` value is the `api_token`
//! for later gateway calls, and the license token authorizes media URL
//! requests.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "USER": {
//!         "USER_ID": "123456789",
//!         "OPTIONS": {
//!             "license_token": "secret"
//!         }
//!     },
//!     "checkForm": "api_token"
//! }
//! ```
//!
//! An invalid or expired ARL yields a `USER_ID` of `0`.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use veil::Redact;

use super::Method;

impl Method for UserData {
    const METHOD: &'static str = "deezer.getUserData";
}

/// Session data of the account the ARL belongs to.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct UserData {
    /// User profile
    #[serde(rename = "USER")]
    pub user: User,

    /// API authentication token
    #[serde(rename = "checkForm")]
    #[redact]
    pub api_token: String,
}

impl UserData {
    /// Whether the gateway recognized the credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.id != 0
    }
}

/// User identification and license.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct User {
    /// Unique user identifier, `0` for anonymous sessions
    #[serde(rename = "USER_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: u64,

    /// License options
    #[serde(default)]
    #[serde(rename = "OPTIONS")]
    pub options: Options,
}

/// User license options.
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct Options {
    /// License authentication token for the media API
    #[serde(default)]
    #[redact]
    pub license_token: String,
}
