// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::algorithm::{DigestAlgorithm, EncryptionAlgorithm};
use std::fmt;
use thiserror::Error;

/// Result type used by the AS2 APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// LookupKind names the directory entry a lookup failed to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKind {
    Organization,
    Partner,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Organization => f.write_str("organization"),
            LookupKind::Partner => f.write_str("partner"),
        }
    }
}

/// Error is the failures that can occur while processing AS2 messages. Each
/// pipeline layer fails with its own variant, carrying the algorithm that was
/// negotiated for that layer where one is known.
#[derive(Debug, Error)]
pub enum Error {
    #[error("content type error: {0}")]
    ContentType(String),
    #[error("no {kind} found for AS2 identifier {}", .as2_id.as_deref().unwrap_or("<missing>"))]
    DirectoryLookup {
        kind: LookupKind,
        as2_id: Option<String>,
    },
    #[error("decryption failed ({}): {reason}", .algorithm.map_or("unknown", |a| a.as_str()))]
    Decryption {
        algorithm: Option<EncryptionAlgorithm>,
        reason: String,
    },
    #[error("signature verification failed ({}): {reason}", .algorithm.map_or("unknown", |a| a.as_str()))]
    SignatureVerification {
        algorithm: Option<DigestAlgorithm>,
        reason: String,
    },
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("MDN parse error: {0}")]
    MdnParse(String),
    #[error("MIC mismatch: have {received}, want {expected}")]
    MicMismatch { expected: String, received: String },
    #[error("insufficient message security: {0}")]
    InsufficientSecurity(String),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] der::Error),
}

impl Error {
    /// decryption creates a decryption failure for the given cipher.
    pub(crate) fn decryption(algorithm: Option<EncryptionAlgorithm>, reason: impl fmt::Display) -> Self {
        Error::Decryption {
            algorithm,
            reason: reason.to_string(),
        }
    }

    /// signature creates a signature verification failure for the given digest.
    pub(crate) fn signature(algorithm: Option<DigestAlgorithm>, reason: impl fmt::Display) -> Self {
        Error::SignatureVerification {
            algorithm,
            reason: reason.to_string(),
        }
    }

    /// disposition_modifier returns the RFC 4130 disposition modifier that a
    /// negative MDN reports for this failure.
    pub fn disposition_modifier(&self) -> &'static str {
        match self {
            Error::Decryption { .. } => "decryption-failed",
            Error::SignatureVerification { .. } => "authentication-failed",
            Error::Decompression(_) => "decompression-failed",
            Error::MicMismatch { .. } => "integrity-check-failed",
            Error::InsufficientSecurity(_) => "insufficient-message-security",
            Error::DirectoryLookup { .. } => "unknown-trading-partner",
            _ => "unexpected-processing-error",
        }
    }
}
