// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! CMS CompressedData with the zlib algorithm.
//!
//! https://datatracker.ietf.org/doc/html/rfc3274

use crate::algorithm::{ID_ALG_ZLIB_COMPRESS, ID_COMPRESSED_DATA, ID_DATA};
use crate::ber;
use crate::error::{Error, Result};
use cms::compressed_data::CompressedData;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::EncapsulatedContentInfo;
use der::asn1::OctetString;
use der::{Any, Decode, Encode};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use spki::AlgorithmIdentifierOwned;
use std::io::Write;
use tracing::debug;

/// decompress unwraps a DER or BER encoded CompressedData ContentInfo and
/// inflates its content.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let der = ber::normalize(data).map_err(|err| Error::Decompression(err.to_string()))?;
    let info = ContentInfo::from_der(&der).map_err(|err| Error::Decompression(err.to_string()))?;
    if info.content_type != ID_COMPRESSED_DATA {
        return Err(Error::Decompression(format!(
            "unexpected content type {}",
            info.content_type
        )));
    }
    let compressed: CompressedData = info
        .content
        .decode_as()
        .map_err(|err| Error::Decompression(err.to_string()))?;
    if compressed.compression_alg.oid != ID_ALG_ZLIB_COMPRESS {
        return Err(Error::Decompression(format!(
            "unsupported compression algorithm {}",
            compressed.compression_alg.oid
        )));
    }
    let content = compressed
        .encap_content_info
        .econtent
        .ok_or_else(|| Error::Decompression("compressed data has no content".into()))?;
    let stream: OctetString = content
        .decode_as()
        .map_err(|err| Error::Decompression(err.to_string()))?;

    let plain = inflate(stream.as_bytes())?;
    debug!(compressed = stream.as_bytes().len(), plain = plain.len(), "inflated CMS content");
    Ok(plain)
}

/// compress deflates the data and wraps it into a DER encoded CompressedData
/// ContentInfo.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|err| Error::Compression(err.to_string()))?;
    let stream = encoder
        .finish()
        .map_err(|err| Error::Compression(err.to_string()))?;

    let compressed = CompressedData {
        version: CmsVersion::V0,
        compression_alg: AlgorithmIdentifierOwned {
            oid: ID_ALG_ZLIB_COMPRESS,
            parameters: None,
        },
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: Some(Any::encode_from(&OctetString::new(stream)?)?),
        },
    };
    let info = ContentInfo {
        content_type: ID_COMPRESSED_DATA,
        content: Any::encode_from(&compressed)?,
    };
    Ok(info.to_der()?)
}

/// Inflates a complete zlib stream, rejecting truncated input and anything
/// trailing the end of the stream.
fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }
        let (read, written) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(&data[read as usize..], &mut out, FlushDecompress::None)
            .map_err(|err| Error::Decompression(format!("corrupt zlib stream: {err}")))?;
        if status == Status::StreamEnd {
            break;
        }
        if inflater.total_in() == read && inflater.total_out() == written {
            return Err(Error::Decompression("truncated zlib stream".into()));
        }
    }
    if inflater.total_in() as usize != data.len() {
        return Err(Error::Decompression("trailing data after zlib stream".into()));
    }
    Ok(out)
}
