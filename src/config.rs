//! Configuration file.
//!
//! ```toml
//! download_root = "/music/downloads"
//! quality = "lossless"
//! download_albums = true
//!
//! [deezer]
//! arl = "..."
//! secret = "..."
//! ```
//!
//! A provider is enabled by the presence of its section. See
//! `trackfill.toml.example` for every setting.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use veil::Redact;

use crate::{
    arl::Arl,
    decrypt::Key,
    error::{Error, Result},
    quality::{AudioQuality, Format, QualityPolicy},
    retry::RetryPolicy,
    throttle::RequestThrottle,
};

/// Largest configuration file that is read.
const MAX_FILE_SIZE: u64 = 64 * 1024;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the `{Artist}/{Album}/{NN} - {Title}.{ext}` tree
    pub download_root: PathBuf,

    /// Quality ceiling for all providers
    #[serde(default)]
    pub quality: AudioQuality,

    /// Whether one downloaded track pulls in the rest of its album
    #[serde(default)]
    pub download_albums: bool,

    /// Minimum spacing between metadata calls
    #[serde(default = "default_metadata_interval_ms")]
    pub metadata_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    pub deezer: Option<DeezerConfig>,
    pub tidal: Option<TidalConfig>,
    pub server: Option<ServerConfig>,
}

fn default_metadata_interval_ms() -> u64 {
    200
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: 1_000,
        }
    }
}

#[derive(Clone, Deserialize, Redact)]
#[serde(deny_unknown_fields)]
pub struct DeezerConfig {
    /// Primary session credential
    pub arl: Option<Arl>,

    /// Used once when the primary credential is rejected
    pub fallback_arl: Option<Arl>,

    /// Stripe cipher constant
    #[redact]
    pub secret: Option<Key>,

    #[serde(default = "DeezerConfig::default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "DeezerConfig::default_media_instances")]
    pub media_instances: Vec<String>,

    #[serde(default = "DeezerConfig::default_formats")]
    pub formats: Vec<Format>,

    /// Overrides the global ceiling
    pub quality: Option<AudioQuality>,
}

impl DeezerConfig {
    fn default_gateway_url() -> String {
        "https://www.deezer.com/ajax/gw-light.php".to_owned()
    }

    fn default_media_instances() -> Vec<String> {
        vec!["https://media.deezer.com".to_owned()]
    }

    /// Every format the media API serves, best first.
    #[must_use]
    pub fn default_formats() -> Vec<Format> {
        vec![Format::FLAC, Format::MP3_320, Format::MP3_128, Format::MP3_64]
    }

    /// Checks the format list against what Deezer serves.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty list, duplicates, or a format
    /// Deezer does not serve.
    pub fn quality_policy(&self) -> Result<QualityPolicy> {
        served_only("deezer", &self.formats, &Self::default_formats())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TidalConfig {
    pub instances: Vec<String>,

    #[serde(default = "TidalConfig::default_formats")]
    pub formats: Vec<Format>,

    pub quality: Option<AudioQuality>,
}

impl TidalConfig {
    /// Every format the mirrors deliver, best first.
    #[must_use]
    pub fn default_formats() -> Vec<Format> {
        vec![Format::FLAC, Format::AAC_320, Format::AAC_96]
    }

    /// Checks the format list against what the mirrors deliver.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty list, duplicates, or a format
    /// the mirrors do not deliver.
    pub fn quality_policy(&self) -> Result<QualityPolicy> {
        served_only("tidal", &self.formats, &Self::default_formats())
    }
}

fn served_only(provider: &str, formats: &[Format], served: &[Format]) -> Result<QualityPolicy> {
    if let Some(format) = formats.iter().find(|format| !served.contains(format)) {
        return Err(Error::invalid_argument(format!(
            "{provider}.formats: {provider} does not serve {format}"
        )));
    }
    QualityPolicy::new(formats.to_vec())
}

/// Subsonic-compatible media server to rescan after downloads.
#[derive(Clone, Deserialize, Redact)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub url: String,
    pub username: String,
    #[redact]
    pub password: String,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// * `Io` if the file cannot be read
    /// * `InvalidArgument` if it is too large, malformed or inconsistent
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let size = std::fs::metadata(path)?.len();
        if size > MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is {size} bytes, larger than {MAX_FILE_SIZE}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    #[must_use]
    pub fn metadata_throttle(&self) -> RequestThrottle {
        RequestThrottle::new(Duration::from_millis(self.metadata_interval_ms))
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.download_root.as_os_str().is_empty() {
            return Err(Error::invalid_argument("download_root is empty"));
        }

        if let Some(deezer) = &self.deezer {
            deezer.quality_policy()?;
            if deezer.media_instances.is_empty() {
                return Err(Error::invalid_argument("deezer.media_instances is empty"));
            }
        }

        if let Some(tidal) = &self.tidal {
            tidal.quality_policy()?;
            if tidal.instances.is_empty() {
                return Err(Error::invalid_argument("tidal.instances is empty"));
            }
        }

        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Builds the `User-Agent` string sent to every upstream.
///
/// Formatted like a desktop client:
/// `trackfill/0.1.0 (Rust; linux/6.1; Desktop; en)`.
///
/// # Errors
///
/// Returns `Internal` if the name, version or OS contain characters that
/// would break the format.
pub fn user_agent() -> Result<String> {
    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    let app_lang = "en";

    // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
    let illegal_chars = |chr| chr == '/' || chr == ';';
    if app_name.is_empty()
        || app_name.contains(illegal_chars)
        || app_version.is_empty()
        || app_version.contains(illegal_chars)
    {
        return Err(Error::internal(format!(
            "application name and/or version invalid (\"{app_name}\"; \"{app_version}\")"
        )));
    }

    let os_name = match std::env::consts::OS {
        "macos" => "osx",
        other => other,
    };
    let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
    if os_name.is_empty()
        || os_name.contains(illegal_chars)
        || os_version.is_empty()
        || os_version.contains(illegal_chars)
    {
        return Err(Error::internal(format!(
            "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
        )));
    }

    let user_agent =
        format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
    trace!("user agent: {user_agent}");

    Ok(user_agent)
}
