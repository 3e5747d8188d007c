//! Wire types for the upstream services.
//!
//! # Submodules
//!
//! * [`api`] - Deezer public catalog API (track and album metadata)
//! * [`gateway`] - Deezer gateway API (session and track tokens)
//! * [`media`] - Deezer media API (download URL resolution)
//! * [`tidal`] - community mirror API returning pre-decrypted streams
//!
//! All parsing goes through [`json`], which logs the payload at trace level
//! and the failure with context at debug level.

pub mod api;
pub mod gateway;
pub mod media;
pub mod tidal;

use serde::Deserialize;

use crate::error::Result;

/// Parses a JSON response body and logs the result.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if the body does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + std::fmt::Debug,
{
    match serde_json::from_str::<T>(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            debug!("{origin}: failed parsing response ({e}): {body}");
            Err(e.into())
        }
    }
}
