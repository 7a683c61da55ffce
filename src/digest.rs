//! Content-address digests (sha256 only, per the Docker/OCI wire format).

use std::{
    fmt::{self, Display},
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};

use hex::FromHex;
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const SHA256_LEN: usize = 32;
const PREFIX: &str = "sha256:";
const DIGEST_HEX_LEN: usize = SHA256_LEN * 2;

/// A `sha256:<hex>` content digest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Digest([u8; SHA256_LEN]);

impl Digest {
    pub const fn new(bytes: [u8; SHA256_LEN]) -> Self {
        Self(bytes)
    }

    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Splits the hex form into a two-level fan-out path, matching the
    /// `ab/cd/abcd...` layout used by the content store (spec.md §6).
    pub fn fanout_path(&self) -> (String, String, String) {
        let hex = hex::encode(self.0);
        (hex[0..2].to_owned(), hex[2..4].to_owned(), hex)
    }
}

#[derive(Debug, Error)]
pub enum DigestParseError {
    #[error("wrong length")]
    WrongLength,
    #[error("wrong or unsupported prefix (only sha256: is supported)")]
    WrongPrefix,
    #[error("hex decoding error")]
    HexDecodeError,
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() != PREFIX.len() + DIGEST_HEX_LEN {
            return Err(DigestParseError::WrongLength);
        }
        if !raw.starts_with(PREFIX) {
            return Err(DigestParseError::WrongPrefix);
        }

        let hex_encoded = &raw[PREFIX.len()..];
        let bytes = <[u8; SHA256_LEN]>::from_hex(hex_encoded)
            .map_err(|_| DigestParseError::HexDecodeError)?;

        Ok(Digest(bytes))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Tees every byte written through it into a running SHA-256 hash, so a
/// staged upload's digest can be computed without a second pass over disk.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (W, Digest) {
        let digest = Digest(self.hasher.finalize().into());
        (self.inner, digest)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.hasher.update(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Tees every byte read through it into a running SHA-256 hash; used on the
/// read path when re-verifying a manifest or finalizing an upload.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if poll.is_ready() {
            self.hasher.update(&buf.filled()[before..]);
        }
        poll
    }
}

type IoResult<T> = std::io::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let digest = Digest::of(b"hello world");
        let rendered = digest.to_string();
        let parsed: Digest = rendered.parse().unwrap();
        assert_eq!(digest, parsed);
        assert!(rendered.starts_with("sha256:"));
    }

    #[test]
    fn rejects_wrong_prefix_and_length() {
        assert!(matches!(
            "md5:deadbeef".parse::<Digest>(),
            Err(DigestParseError::WrongLength)
        ));
        assert!(matches!(
            format!("sha1:{}", "a".repeat(64)).parse::<Digest>(),
            Err(DigestParseError::WrongPrefix)
        ));
    }

    #[test]
    fn fanout_path_splits_first_four_hex_chars() {
        let digest = Digest::of(b"x");
        let (a, b, full) = digest.fanout_path();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert!(full.starts_with(&a));
        assert!(full[2..].starts_with(&b));
    }
}
