//! SHA-256 verification for downloaded artifacts.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A SHA-256 digest.
///
/// Descriptors may write it either as 64 hex digits or as base64 of the raw
/// 32 bytes; both parse to the same value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

#[derive(Debug, Error)]
pub enum ChecksumParseError {
    #[error("invalid hex checksum: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base64 checksum: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("expected 32 bytes of SHA-256, got {0}")]
    Length(usize),
}

impl Checksum {
    pub fn compute(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Compute the checksum of a file on disk
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::compute(&bytes))
    }

    pub fn from_hex(value: &str) -> Result<Self, ChecksumParseError> {
        let bytes = hex::decode(value.trim())?;
        Self::from_slice(&bytes)
    }

    pub fn from_base64(value: &str) -> Result<Self, ChecksumParseError> {
        let bytes = STANDARD.decode(value.trim())?;
        Self::from_slice(&bytes)
    }

    /// Parse either encoding: exactly 64 hex digits, otherwise base64.
    pub fn parse(value: &str) -> Result<Self, ChecksumParseError> {
        let value = value.trim();
        if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::from_hex(value)
        } else {
            Self::from_base64(value)
        }
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, ChecksumParseError> {
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ChecksumParseError::Length(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The bytes hash to the declared checksum.
    Verified,
    /// No checksum was declared; the bytes were trusted as-is.
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("checksum mismatch: expected {expected}, got {actual}")]
pub struct ChecksumMismatch {
    pub expected: Checksum,
    pub actual: Checksum,
}

/// Verify `bytes` against an optional expected checksum.
pub fn verify_checksum(
    bytes: &[u8],
    expected: Option<&Checksum>,
) -> Result<Verification, ChecksumMismatch> {
    let Some(expected) = expected else {
        return Ok(Verification::Unverified);
    };

    let actual = Checksum::compute(bytes);
    if actual == *expected {
        Ok(Verification::Verified)
    } else {
        Err(ChecksumMismatch {
            expected: *expected,
            actual,
        })
    }
}
