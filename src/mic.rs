// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Message integrity checks as reported in MDN receipts.
//!
//! https://datatracker.ietf.org/doc/html/rfc4130#section-7.3.1

use crate::algorithm::DigestAlgorithm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::str::FromStr;

/// Mic is a digest of the received content together with the algorithm that
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mic {
    pub digest: Vec<u8>,
    pub algorithm: DigestAlgorithm,
}

impl Mic {
    /// compute digests the data with the given algorithm.
    pub fn compute(data: &[u8], algorithm: DigestAlgorithm) -> Self {
        Self {
            digest: algorithm.digest(data),
            algorithm,
        }
    }
}

/// Renders as the Received-content-MIC value: `<base64 digest>, <micalg>`.
impl fmt::Display for Mic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", STANDARD.encode(&self.digest), self.algorithm.micalg())
    }
}

/// ParseMicError is returned when a Received-content-MIC value is malformed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid MIC {0:?}")]
pub struct ParseMicError(String);

impl FromStr for Mic {
    type Err = ParseMicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMicError(s.to_string());

        let (digest, algorithm) = s.split_once(',').ok_or_else(err)?;
        let algorithm: DigestAlgorithm = algorithm.trim().parse().map_err(|_| err())?;
        let digest = STANDARD.decode(digest.trim()).map_err(|_| err())?;
        if digest.len() != algorithm.digest(b"").len() {
            return Err(err());
        }
        Ok(Self { digest, algorithm })
    }
}
