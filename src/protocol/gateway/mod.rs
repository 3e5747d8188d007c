//! Gateway API types for Deezer's web services.
//!
//! Only the two methods the download path needs are modelled:
//! * session bootstrap ([`user_data`])
//! * track token lookup ([`song_data`])
//!
//! # Response Format
//!
//! ```json
//! {
//!     "error": {},          // or [] when empty, or {"CODE": "message"}
//!     "results": { ... }
//! }
//! ```

pub mod song_data;
pub mod user_data;

pub use song_data::SongData;
pub use user_data::UserData;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Defines a gateway API method identifier.
///
/// # Examples
///
/// ```rust
/// use trackfill::protocol::gateway::{Method, UserData};
///
/// assert_eq!(UserData::METHOD, "deezer.getUserData");
/// ```
pub trait Method {
    /// The gateway API method name, in Deezer's dot-notation.
    const METHOD: &'static str;
}

/// Error code returned when the `api_token` of the session is stale.
pub const VALID_TOKEN_REQUIRED: &str = "VALID_TOKEN_REQUIRED";

/// Raw gateway response envelope.
///
/// `results` is kept as a JSON value until the error map has been checked,
/// because failed calls return results of an unrelated shape.
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Response {
    /// API status information; empty object or array on success
    #[serde(default)]
    pub error: serde_json::Value,

    /// Method-specific payload
    #[serde(default)]
    pub results: serde_json::Value,
}

impl Response {
    /// Returns the first error code and message, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<(String, String)> {
        let map = self.error.as_object()?;
        map.iter().next().map(|(code, message)| {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), ToOwned::to_owned);
            (code.clone(), message)
        })
    }

    /// Checks the error map and deserializes the results.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` for session and credential errors
    /// * `NotFound` for `DATA_ERROR`
    /// * `RateLimited` for quota errors
    /// * `Unknown` for any other gateway error
    /// * `InvalidArgument` if the results do not match `T`
    pub fn into_result<T>(self) -> Result<T>
    where
        T: Method + for<'de> Deserialize<'de>,
    {
        if let Some((code, message)) = self.error() {
            let detail = format!("{}: {code}: {message}", T::METHOD);
            return Err(match code.as_str() {
                VALID_TOKEN_REQUIRED | "NEED_USER_AUTH_REQUIRED" | "USER_AUTH_REQUIRED" => {
                    Error::unauthenticated(detail)
                }
                "DATA_ERROR" => Error::not_found(detail),
                "QUOTA_ERROR" | "TOO_MANY_REQUESTS" => Error::rate_limited(detail),
                _ => Error::unknown(detail),
            });
        }

        serde_json::from_value(self.results).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_error_array_is_success() {
        let response: Response = serde_json::from_str(
            r#"{"error": [], "results": {"SNG_ID": "3135556", "TRACK_TOKEN": "abc"}}"#,
        )
        .unwrap();
        let song: SongData = response.into_result().unwrap();
        assert_eq!(song.id, "3135556");
    }

    #[test]
    fn stale_token_is_unauthenticated() {
        let response: Response = serde_json::from_str(
            r#"{"error": {"VALID_TOKEN_REQUIRED": "Invalid CSRF token"}, "results": {}}"#,
        )
        .unwrap();
        let err = response.into_result::<SongData>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[test]
    fn data_error_is_not_found() {
        let response: Response = serde_json::from_str(
            r#"{"error": {"DATA_ERROR": "song not found"}, "results": []}"#,
        )
        .unwrap();
        let err = response.into_result::<SongData>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
