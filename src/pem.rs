// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! PEM bundle decoding.
//!
//! AS2 key material is usually exchanged as a single file holding a private
//! key followed by its certificate (and sometimes the issuer chain), often
//! interleaved with the "Bag Attributes" text openssl emits on PKCS#12
//! exports. Text outside of the blocks is skipped, the blocks themselves are
//! validated strictly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::error::Error;
use zeroize::Zeroize;

const PEM_HEADER: &str = "-----BEGIN ";
const PEM_FOOTER: &str = "-----END ";
const PEM_ENDING: &str = "-----";

/// Block is a single decoded PEM block. Blocks may hold private key material,
/// so they can be wiped.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize)]
pub struct Block {
    pub kind: String,
    pub data: Vec<u8>,
}

/// Decodes every PEM block in a bundle.
///
/// Rules:
///   - Text before, between and after blocks is ignored
///   - Header and footer must be on their own lines and name the same type
///   - Encapsulated headers (legacy encrypted keys) are rejected
///   - Base64 lines contain only base64 characters
///   - Strict base64 decoding (no padding errors, etc.)
///   - At least one block must be present
pub fn decode(data: &[u8]) -> Result<Vec<Block>, Box<dyn Error>> {
    let text = std::str::from_utf8(data).map_err(|_| "pem: bundle is not valid UTF-8")?;

    let mut blocks = Vec::new();
    let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));

    while let Some(line) = lines.next() {
        // Skip anything that is not a block header
        let Some(kind) = line
            .strip_prefix(PEM_HEADER)
            .and_then(|rest| rest.strip_suffix(PEM_ENDING))
        else {
            continue;
        };
        if kind.is_empty() {
            return Err("pem: empty PEM block type".into());
        }
        let footer = format!("{PEM_FOOTER}{kind}{PEM_ENDING}");

        // Collect the body up until the matching footer
        let mut body = String::new();
        let mut closed = false;
        for line in lines.by_ref() {
            if line == footer {
                closed = true;
                break;
            }
            if line.starts_with(PEM_HEADER) || line.starts_with(PEM_FOOTER) {
                return Err(format!("pem: unterminated {kind} block").into());
            }
            if line.contains(':') {
                return Err(format!("pem: {kind} block has encapsulated headers").into());
            }
            body.push_str(line.trim());
        }
        if !closed {
            return Err(format!("pem: missing {kind} footer").into());
        }
        if body.is_empty() {
            return Err("pem: empty PEM body".into());
        }
        blocks.push(Block {
            kind: kind.to_string(),
            data: STANDARD.decode(body.as_bytes())?,
        });
    }
    if blocks.is_empty() {
        return Err("pem: no PEM blocks found".into());
    }
    Ok(blocks)
}
