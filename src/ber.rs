// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! BER to DER normalization.
//!
//! Several AS2 implementations stream their CMS output, producing BER with
//! indefinite lengths and chunked (constructed) octet strings. The DER decoder
//! rejects both, so such inputs are decoded into a TLV tree here and re-encoded
//! with definite lengths and flattened strings.
//!
//! https://www.itu.int/rec/T-REC-X.690

use bcder::decode::{Constructed, Content, DecodeError, Source};
use bcder::{Mode, Tag};

/// Maximum nesting depth accepted before bailing out.
const MAX_DEPTH: usize = 64;

/// Universal tag numbers whose constructed form is a segmented string.
const STRING_TAGS: &[u8] = &[3, 4, 12, 18, 19, 20, 21, 22, 25, 26, 27, 28, 30];

/// Error is the failures that can occur while normalizing BER.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed encoding: {0}")]
    Malformed(String),
    #[error("invalid segment in constructed string")]
    InvalidSegment,
}

/// Tlv is a single node of a decoded BER tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tlv {
    tag: Vec<u8>,
    value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Primitive(Vec<u8>),
    Constructed(Vec<Tlv>),
}

impl Tlv {
    /// parse decodes a single BER element spanning the whole input.
    pub fn parse(data: &[u8]) -> Result<Tlv, Error> {
        Mode::Ber
            .decode(data, |cons| {
                take_tlv(cons, 0)?.ok_or_else(|| cons.content_err("empty encoding"))
            })
            .map_err(|err| Error::Malformed(err.to_string()))
    }

    /// tag returns the first identifier octet of the element.
    pub fn tag(&self) -> u8 {
        self.tag[0]
    }

    /// content returns the value octets of a primitive encoding.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Primitive(content) => Some(content),
            Value::Constructed(_) => None,
        }
    }

    /// children returns the nested elements of a constructed encoding, or an
    /// empty slice for primitives.
    pub fn children(&self) -> &[Tlv] {
        match &self.value {
            Value::Constructed(children) => children,
            Value::Primitive(_) => &[],
        }
    }

    /// children_mut returns the nested elements of a constructed encoding.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Tlv>> {
        match &mut self.value {
            Value::Constructed(children) => Some(children),
            Value::Primitive(_) => None,
        }
    }

    /// flatten turns a constructed string encoding into its primitive form by
    /// concatenating the segments. The element keeps its class and number, so
    /// this also works for implicitly tagged strings that carry a context tag.
    pub fn flatten(&mut self) -> Result<(), Error> {
        let Value::Constructed(children) = &self.value else {
            return Ok(());
        };
        let mut segments = Vec::new();
        for child in children {
            collect_segments(child, &mut segments)?;
        }
        let content = if self.tag[0] & 0x1f == 3 {
            // Bit strings prefix every segment with its unused bit count, only
            // the last one may be non-zero
            let mut out = vec![segments.last().and_then(|s| s.first().copied()).unwrap_or(0)];
            for (i, seg) in segments.iter().enumerate() {
                let (&unused, bits) = seg.split_first().ok_or(Error::InvalidSegment)?;
                if unused != 0 && i + 1 != segments.len() {
                    return Err(Error::InvalidSegment);
                }
                out.extend_from_slice(bits);
            }
            out
        } else {
            segments.concat()
        };
        self.tag[0] &= !0x20;
        self.value = Value::Primitive(content);
        Ok(())
    }

    /// canonicalize flattens every constructed universal string in the tree.
    pub fn canonicalize(&mut self) -> Result<(), Error> {
        if let Value::Constructed(children) = &mut self.value {
            for child in children.iter_mut() {
                child.canonicalize()?;
            }
        }
        let universal = self.tag[0] & 0xc0 == 0 && self.tag.len() == 1;
        if universal && STRING_TAGS.contains(&(self.tag[0] & 0x1f)) {
            self.flatten()?;
        }
        Ok(())
    }

    /// to_der encodes the tree with definite lengths.
    pub fn to_der(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag);
        match &self.value {
            Value::Primitive(content) => {
                encode_length(content.len(), out);
                out.extend_from_slice(content);
            }
            Value::Constructed(children) => {
                let mut content = Vec::new();
                for child in children {
                    child.encode_into(&mut content);
                }
                encode_length(content.len(), out);
                out.extend_from_slice(&content);
            }
        }
    }
}

/// normalize converts a BER encoded element into DER lengths and primitive
/// strings. DER input passes through unchanged. Trailing line breaks or zero
/// padding after the element are dropped.
pub fn normalize(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut tlv = Tlv::parse(trim_padding(data))?;
    tlv.canonicalize()?;
    Ok(tlv.to_der())
}

/// trim_padding strips trailing whitespace and zero bytes some transports
/// leave after a binary body. Only bytes past the end announced by a definite
/// length header are dropped; an indefinite element ends in zero octets of its
/// own, so only whitespace is stripped after it.
pub(crate) fn trim_padding(data: &[u8]) -> &[u8] {
    match element_end(data) {
        Some(end) if end <= data.len() => {
            let padding = data[end..].iter().all(|b| matches!(b, b'\r' | b'\n' | b' ' | b'\t' | 0));
            if padding { &data[..end] } else { data }
        }
        Some(_) => data,
        None => {
            let end = data
                .iter()
                .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
                .map_or(0, |i| i + 1);
            &data[..end]
        }
    }
}

/// element_end returns the offset just past a definite length element at the
/// start of the input, or None for indefinite lengths and broken headers.
fn element_end(data: &[u8]) -> Option<usize> {
    let mut pos = 1;
    if *data.first()? & 0x1f == 0x1f {
        while *data.get(pos)? & 0x80 != 0 {
            pos += 1;
        }
        pos += 1;
    }
    let lead = *data.get(pos)?;
    pos += 1;
    let len = match lead {
        l if l < 0x80 => l as usize,
        0x80 | 0xff => return None,
        l => {
            let n = (l & 0x7f) as usize;
            if n > size_of::<u32>() {
                return None;
            }
            let bytes = data.get(pos..pos + n)?;
            pos += n;
            bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
        }
    };
    pos.checked_add(len)
}

/// take_tlv reads the next element of a constructed value, recursing into
/// nested constructed encodings.
fn take_tlv<S: Source>(cons: &mut Constructed<S>, depth: usize) -> Result<Option<Tlv>, DecodeError<S::Error>> {
    cons.take_opt_value(|tag, content| match content {
        Content::Primitive(prim) => Ok(Tlv {
            tag: encode_tag(tag, false),
            value: Value::Primitive(prim.take_all()?.to_vec()),
        }),
        Content::Constructed(inner) => {
            if depth >= MAX_DEPTH {
                return Err(inner.content_err("nesting too deep"));
            }
            let mut children = Vec::new();
            while let Some(child) = take_tlv(inner, depth + 1)? {
                children.push(child);
            }
            Ok(Tlv {
                tag: encode_tag(tag, true),
                value: Value::Constructed(children),
            })
        }
    })
}

fn encode_tag(tag: Tag, constructed: bool) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail
    let _ = tag.write_encoded(constructed, &mut out);
    out
}

fn collect_segments(tlv: &Tlv, out: &mut Vec<Vec<u8>>) -> Result<(), Error> {
    match &tlv.value {
        Value::Primitive(content) => out.push(content.clone()),
        Value::Constructed(children) => {
            for child in children {
                collect_segments(child, out)?;
            }
        }
    }
    Ok(())
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}
