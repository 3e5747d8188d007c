//! Deezer session credential.
//!
//! An ARL is a long-lived cookie value that authenticates gateway requests.
//! It is read from the configuration file and sent as the `arl` cookie.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use veil::Redact;

use crate::error::Error;

/// Validated ARL credential. Redacted in debug output.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Redact)]
#[serde(try_from = "String")]
#[redact(all)]
pub struct Arl(String);

impl Arl {
    /// Length of every ARL issued by Deezer.
    pub const LENGTH: usize = 192;
}

impl FromStr for Arl {
    type Err = Error;

    /// Parses an ARL, checking its length and character set.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the value is not 192 alphanumeric
    /// characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let chars = s.chars().count();
        if chars != Self::LENGTH {
            return Err(Error::invalid_argument(format!(
                "arl should be {} characters long but is {chars}",
                Self::LENGTH
            )));
        }

        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::invalid_argument("arl contains invalid characters"));
        }

        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for Arl {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Formats the raw credential, for use in a cookie header.
impl fmt::Display for Arl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_arl() {
        let raw = "a".repeat(Arl::LENGTH);
        let arl: Arl = raw.parse().unwrap();
        assert_eq!(arl.to_string(), raw);
        assert!(!format!("{arl:?}").contains(&raw));
    }

    #[test]
    fn rejects_wrong_length_and_characters() {
        assert!("short".parse::<Arl>().is_err());
        let mut raw = "a".repeat(Arl::LENGTH - 1);
        raw.push(';');
        assert!(raw.parse::<Arl>().is_err());
    }
}
