//! Streaming decryption of protected Deezer media.
//!
//! # Encryption Format
//!
//! Deezer uses a striped encryption pattern:
//! * Content is divided into 2KB chunks
//! * Every third chunk (index 0, 3, 6, ...) is encrypted, if it is full
//! * Encryption uses Blowfish in CBC mode, reset for every chunk
//! * A fixed IV is used
//!
//! The trailing partial chunk is never encrypted, so the plaintext has the
//! same length as the ciphertext.
//!
//! # Security
//!
//! No decryption keys are included in this code. The master secret must be
//! configured externally.

use std::{ops::Deref, str::FromStr};

use blowfish::{
    cipher::{BlockDecryptMut, KeyIvInit},
    Blowfish,
};
use cbc::cipher::block_padding::NoPadding;
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use veil::Redact;

use crate::error::{Error, Result};

/// Length of decryption keys in bytes.
pub const KEY_LENGTH: usize = 16;

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// Fixed IV for CBC decryption.
const CBC_BF_IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";

/// Size of each chunk in bytes.
pub const CHUNK_SIZE: usize = 2 * 1024;

/// Every this many chunks, one is encrypted.
const STRIPE_COUNT: u64 = 3;

/// Validated decryption key. Redacted in debug output.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Redact)]
#[serde(try_from = "String")]
#[redact(all)]
pub struct Key(RawKey);

impl FromStr for Key {
    type Err = Error;

    /// Parses a 16-byte string into a decryption key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the string isn't exactly 16 bytes long.
    fn from_str(s: &str) -> Result<Self> {
        let len = s.len();
        if len != KEY_LENGTH {
            return Err(Error::invalid_argument(format!(
                "key length is {len} but should be {KEY_LENGTH}",
            )));
        }

        let mut key = [0; KEY_LENGTH];
        key.copy_from_slice(s.as_bytes());

        Ok(Self(key))
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl Deref for Key {
    type Target = RawKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Derives the key of one track from the master secret.
///
/// The key is the lowercase hex MD5 of the track id, with its two halves
/// XORed together and with the secret.
#[must_use]
pub fn key_for_track_id(track_id: &str, secret: &Key) -> Key {
    let track_hash = format!("{:x}", Md5::digest(track_id));
    let track_hash = track_hash.as_bytes();

    let mut key = RawKey::default();
    for i in 0..KEY_LENGTH {
        key[i] = track_hash[i] ^ track_hash[i + KEY_LENGTH] ^ secret[i];
    }
    Key(key)
}

/// Decrypts one full chunk in place.
fn decrypt_chunk(key: &Key, chunk: &mut [u8]) -> Result<()> {
    // The state of the cipher is reset on each chunk.
    let cipher = cbc::Decryptor::<Blowfish>::new_from_slices(&**key, CBC_BF_IV)
        .map_err(|e| Error::decryption(e.to_string()))?;

    // Full chunks are a multiple of the cipher block size.
    cipher
        .decrypt_padded_mut::<NoPadding>(chunk)
        .map_err(|e| Error::decryption(e.to_string()))?;

    Ok(())
}

/// Reads until `buf` is full or the input ends; returns the number of bytes
/// read.
async fn read_chunk<R>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Streams `input` to `output`, decrypting every third full chunk with
/// `key`.
///
/// Returns the number of bytes written, which equals the number read.
///
/// # Errors
///
/// * `Io` if reading or writing fails
/// * `Decryption` if the cipher cannot be initialized
pub async fn decrypt<R, W>(mut input: R, output: &mut W, key: &Key) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0; CHUNK_SIZE];
    let mut index: u64 = 0;
    let mut written: u64 = 0;

    loop {
        let length = read_chunk(&mut input, &mut buffer).await?;
        if length == 0 {
            break;
        }

        let chunk = &mut buffer[..length];
        if index % STRIPE_COUNT == 0 && length == CHUNK_SIZE {
            decrypt_chunk(key, chunk)?;
        }

        output.write_all(chunk).await?;
        written += length as u64;
        index += 1;

        if length < CHUNK_SIZE {
            break;
        }
    }

    output.flush().await?;
    Ok(written)
}
