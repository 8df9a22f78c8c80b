// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! MIME entity codec for AS2 message bodies.
//!
//! https://datatracker.ietf.org/doc/html/rfc2045
//! https://datatracker.ietf.org/doc/html/rfc1847
//! https://datatracker.ietf.org/doc/html/rfc5751#section-3.2

use crate::algorithm::DigestAlgorithm;
use crate::error::{Error, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use mail_parser::{MessageParser, PartType};
use std::borrow::Cow;
use std::fmt;
use tracing::warn;

/// Lenient base64 engine for decoding bodies, some peers strip the padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Headers is an ordered, case-insensitive collection of header fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// new creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// parse decodes a header block, unfolding continuation lines. It returns
    /// the headers and the offset at which the body starts. Both CRLF and bare
    /// LF line endings are accepted.
    pub fn parse(data: &[u8]) -> Result<(Headers, usize)> {
        let mut headers = Headers::new();
        let mut current: Option<(String, String)> = None;
        let mut pos = 0;

        while pos < data.len() {
            let end = data[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(data.len(), |i| pos + i + 1);
            let line = trim_line_ending(&data[pos..end]);
            pos = end;

            // An empty line terminates the header block
            if line.is_empty() {
                break;
            }
            // Continuation lines extend the previous field
            if line[0] == b' ' || line[0] == b'\t' {
                let (_, value) = current
                    .as_mut()
                    .ok_or_else(|| Error::ContentType("header continuation without field".into()))?;
                value.push(' ');
                value.push_str(String::from_utf8_lossy(line).trim());
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.append(name, value);
            }
            let text = String::from_utf8_lossy(line);
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| Error::ContentType("malformed header line".into()))?;
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(Error::ContentType(format!("invalid header name: {name:?}")));
            }
            current = Some((name.to_string(), value.trim().to_string()));
        }
        if let Some((name, value)) = current {
            headers.append(name, value);
        }
        Ok((headers, pos))
    }

    /// get returns the first value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// contains reports whether the named header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// insert sets a header, replacing every previous value of it.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// append adds a header, keeping any previous values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// remove deletes every value of the named header.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// iter iterates over the header fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// content_type parses the Content-Type header.
    pub fn content_type(&self) -> Result<ContentType> {
        let value = self
            .get("Content-Type")
            .ok_or_else(|| Error::ContentType("missing Content-Type header".into()))?;
        value.parse()
    }

    /// content_headers returns only the Content-* fields, which are the ones
    /// that belong to a MIME entity rather than to its transport.
    pub fn content_headers(&self) -> Headers {
        self.entries
            .iter()
            .filter(|(k, _)| k.len() > 8 && k[..8].eq_ignore_ascii_case("content-"))
            .cloned()
            .collect()
    }

    /// to_bytes serializes the header block with CRLF line endings, without
    /// the terminating empty line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// ContentType is a parsed Content-Type (or Content-Disposition) value: a
/// lowercased media type and its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    mime_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// new creates a content type without parameters.
    pub fn new(mime_type: &str) -> Self {
        ContentType {
            mime_type: mime_type.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// with_param adds a parameter to the content type.
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// mime_type returns the lowercased `type/subtype` pair.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// param returns the value of a parameter, matched case-insensitively.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// is reports whether the media type matches one of the given names.
    pub fn is(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.mime_type == *n)
    }

    /// parse_disposition parses a Content-Disposition value, which shares the
    /// parameter syntax but has no subtype.
    pub fn parse_disposition(value: &str) -> Result<ContentType> {
        let (kind, params) = split_params(value)?;
        Ok(ContentType {
            mime_type: kind.to_ascii_lowercase(),
            params,
        })
    }
}

impl std::str::FromStr for ContentType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (mime_type, params) = split_params(value)?;
        let (kind, sub) = mime_type
            .split_once('/')
            .ok_or_else(|| Error::ContentType(format!("invalid media type: {mime_type:?}")))?;
        if kind.trim().is_empty() || sub.trim().is_empty() {
            return Err(Error::ContentType(format!("invalid media type: {mime_type:?}")));
        }
        Ok(ContentType {
            mime_type: format!("{}/{}", kind.trim(), sub.trim()).to_ascii_lowercase(),
            params,
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime_type)?;
        for (name, value) in &self.params {
            let plain = !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c));
            if plain {
                write!(f, "; {name}={value}")?;
            } else {
                write!(f, "; {name}=\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

/// Splits a header value into its leading token and its parameters, honoring
/// quoted strings.
fn split_params(value: &str) -> Result<(String, Vec<(String, String)>)> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                piece.push(c);
                escaped = false;
            }
            '\\' if quoted => escaped = true,
            '"' => {
                quoted = !quoted;
                piece.push(c);
            }
            ';' if !quoted => pieces.push(std::mem::take(&mut piece)),
            _ => piece.push(c),
        }
    }
    if quoted {
        return Err(Error::ContentType("unterminated quoted string".into()));
    }
    pieces.push(piece);

    let mut iter = pieces.into_iter();
    let head = iter.next().unwrap_or_default().trim().to_string();
    if head.is_empty() {
        return Err(Error::ContentType("empty header value".into()));
    }
    let mut params = Vec::new();
    for piece in iter {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (name, value) = piece
            .split_once('=')
            .ok_or_else(|| Error::ContentType(format!("invalid parameter: {piece:?}")))?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        params.push((name.trim().to_ascii_lowercase(), value.to_string()));
    }
    Ok((head, params))
}

/// MimePart is a single MIME entity: its headers, its transfer-decoded body and
/// the exact bytes it was parsed from (or serialized to).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimePart {
    headers: Headers,
    body: Vec<u8>,
    raw: Vec<u8>,
    header_len: usize,
}

impl MimePart {
    /// new creates an entity from content headers and an unencoded body. The
    /// body is transfer-encoded according to the Content-Transfer-Encoding
    /// header (base64, or passed through as binary otherwise).
    pub fn new(headers: Headers, body: Vec<u8>) -> Result<MimePart> {
        let encoded = match transfer_encoding(&headers).as_str() {
            "base64" => encode_base64(&body),
            "quoted-printable" => {
                return Err(Error::ContentType(
                    "quoted-printable encoding is not supported for outbound entities".into(),
                ));
            }
            _ => body.clone(),
        };
        let mut raw = headers.to_bytes();
        raw.extend_from_slice(b"\r\n");
        let header_len = raw.len();
        raw.extend_from_slice(&encoded);

        Ok(MimePart {
            headers,
            body,
            raw,
            header_len,
        })
    }

    /// parse decodes a full entity (headers, empty line, body).
    pub fn parse(data: &[u8]) -> Result<MimePart> {
        let (headers, header_len) = Headers::parse(data)?;
        let body = decode_transfer(&data[header_len..], &headers)?;
        Ok(MimePart {
            headers,
            body,
            raw: data.to_vec(),
            header_len,
        })
    }

    /// from_transport builds an entity from a transport-level body and its
    /// header map, keeping only the Content-* fields. This is how the outer
    /// HTTP entity of an unsecured message is represented.
    pub fn from_transport(body: &[u8], headers: &Headers) -> Result<MimePart> {
        let headers = headers.content_headers();
        let decoded = decode_transfer(body, &headers)?;

        let mut raw = headers.to_bytes();
        raw.extend_from_slice(b"\r\n");
        let header_len = raw.len();
        raw.extend_from_slice(body);

        Ok(MimePart {
            headers,
            body: decoded,
            raw,
            header_len,
        })
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// body returns the transfer-decoded body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// into_body consumes the entity returning its transfer-decoded body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// raw returns the entity exactly as it appears on the wire.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// raw_body returns the body as it appears on the wire, still
    /// transfer-encoded.
    pub fn raw_body(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }

    /// content_type parses the entity's Content-Type, defaulting to
    /// text/plain as RFC 2045 mandates.
    pub fn content_type(&self) -> Result<ContentType> {
        match self.headers.get("Content-Type") {
            Some(value) => value.parse(),
            None => Ok(ContentType::new("text/plain")),
        }
    }

    /// filename returns the file name from Content-Disposition, falling back
    /// to the Content-Type name parameter.
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self
            .headers
            .get("Content-Disposition")
            .and_then(|v| ContentType::parse_disposition(v).ok())
            .and_then(|d| d.param("filename").map(str::to_string));
        from_disposition.or_else(|| {
            self.content_type()
                .ok()
                .and_then(|ct| ct.param("name").map(str::to_string))
        })
    }
}

/// SmimeType is the kind of CMS structure an application/pkcs7-mime entity
/// carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmimeType {
    EnvelopedData,
    CompressedData,
}

impl SmimeType {
    /// as_str returns the smime-type parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SmimeType::EnvelopedData => "enveloped-data",
            SmimeType::CompressedData => "compressed-data",
        }
    }

    fn filename(&self) -> &'static str {
        match self {
            SmimeType::EnvelopedData => "smime.p7m",
            SmimeType::CompressedData => "smime.p7z",
        }
    }
}

/// PartTree is the security-relevant structure of a MIME entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartTree {
    /// A terminal entity, the payload or a layer wrapping nothing known.
    Opaque(MimePart),
    /// A multipart/signed pair of content and detached signature.
    Signed {
        content: MimePart,
        signature: Vec<u8>,
        micalg: Option<DigestAlgorithm>,
        protocol: String,
    },
    /// An application/pkcs7-mime CMS structure.
    Smime { kind: SmimeType, data: Vec<u8> },
}

const SIGNATURE_TYPES: &[&str] = &["application/pkcs7-signature", "application/x-pkcs7-signature"];
const SMIME_TYPES: &[&str] = &["application/pkcs7-mime", "application/x-pkcs7-mime"];

/// parse sniffs a body, given the headers that describe it, into a part tree.
pub fn parse(body: &[u8], headers: &Headers) -> Result<PartTree> {
    let content_type = headers.content_type()?;

    if content_type.is(&["multipart/signed"]) {
        return parse_signed(body, &content_type);
    }
    if content_type.is(SMIME_TYPES) {
        let kind = match content_type.param("smime-type").map(str::to_ascii_lowercase) {
            Some(t) if t == "enveloped-data" => SmimeType::EnvelopedData,
            Some(t) if t == "compressed-data" => SmimeType::CompressedData,
            Some(t) => return Err(Error::ContentType(format!("unsupported smime-type: {t}"))),
            None => return Err(Error::ContentType("pkcs7-mime without smime-type".into())),
        };
        let data = decode_transfer(body, headers)?;
        return Ok(PartTree::Smime { kind, data });
    }
    Ok(PartTree::Opaque(MimePart::from_transport(body, headers)?))
}

/// parse_entity sniffs a full MIME entity (headers and body) into a part tree.
/// This is used to re-sniff the content recovered from a security layer.
pub fn parse_entity(data: &[u8]) -> Result<PartTree> {
    let (headers, offset) = Headers::parse(data)?;
    if !headers.contains("Content-Type") {
        return Err(Error::ContentType("entity has no Content-Type".into()));
    }
    match parse(&data[offset..], &headers)? {
        // Keep the exact entity bytes, they are what a MIC is computed over
        PartTree::Opaque(_) => Ok(PartTree::Opaque(MimePart::parse(data)?)),
        tree => Ok(tree),
    }
}

fn parse_signed(body: &[u8], content_type: &ContentType) -> Result<PartTree> {
    let boundary = content_type
        .param("boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::ContentType("multipart/signed without boundary".into()))?;
    let protocol = content_type
        .param("protocol")
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| Error::ContentType("multipart/signed without protocol".into()))?;
    if !SIGNATURE_TYPES.contains(&protocol.as_str()) {
        return Err(Error::ContentType(format!("unsupported signature protocol: {protocol}")));
    }
    let micalg = content_type.param("micalg").and_then(|m| {
        m.parse::<DigestAlgorithm>()
            .inspect_err(|err| warn!(micalg = m, "ignoring micalg: {err}"))
            .ok()
    });

    let parts = split_multipart(body, boundary)?;
    let [content, signature] = parts.as_slice() else {
        return Err(Error::ContentType(format!(
            "multipart/signed must have exactly 2 parts, found {}",
            parts.len()
        )));
    };
    let content = MimePart::parse(content)?;
    let signature = MimePart::parse(signature)?;
    if !signature.content_type()?.is(SIGNATURE_TYPES) {
        return Err(Error::ContentType("second part of multipart/signed is not a signature".into()));
    }
    Ok(PartTree::Signed {
        content,
        signature: signature.into_body(),
        micalg,
        protocol,
    })
}

/// Splits a multipart body into the raw bytes of its parts. The line break
/// preceding each delimiter belongs to the delimiter, not to the part.
///
/// The part structure comes from mail_parser; the delimiter scan pins the
/// exact byte range of each part, which must agree with it.
pub(crate) fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let marks = delimiters(body, boundary)?;
    let starts = part_offsets(body, boundary)?;
    let opened = &marks[..marks.len() - 1];
    if !starts.iter().copied().eq(opened.iter().map(|&(_, end)| end)) {
        return Err(Error::ContentType(format!(
            "multipart structure disagrees with its delimiters ({} parts, {} delimiters)",
            starts.len(),
            opened.len()
        )));
    }
    Ok(marks.windows(2).map(|w| &body[w[0].1..w[1].0.max(w[0].1)]).collect())
}

/// Offsets of the parts of a multipart body as mail_parser sees them.
fn part_offsets(body: &[u8], boundary: &str) -> Result<Vec<usize>> {
    let head = format!("Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n");
    let mut entity = Vec::with_capacity(head.len() + body.len());
    entity.extend_from_slice(head.as_bytes());
    entity.extend_from_slice(body);

    let message = MessageParser::default()
        .parse(entity.as_slice())
        .ok_or_else(|| Error::ContentType("unparseable multipart body".into()))?;
    let Some(PartType::Multipart(children)) = message.parts.first().map(|part| &part.body) else {
        return Err(Error::ContentType("multipart body has no parts".into()));
    };
    children
        .iter()
        .map(|&id| {
            message
                .parts
                .get(id as usize)
                .map(|part| (part.raw_header_offset() as usize).saturating_sub(head.len()))
                .ok_or_else(|| Error::ContentType("dangling multipart part".into()))
        })
        .collect()
}

/// Locates every delimiter line of a multipart body, up to and including the
/// close delimiter, as the offsets where the line (with its leading line
/// break) starts and where the following part begins.
fn delimiters(body: &[u8], boundary: &str) -> Result<Vec<(usize, usize)>> {
    let delimiter = format!("--{boundary}").into_bytes();

    let mut marks = Vec::new();
    let mut pos = 0;
    while let Some(idx) = find(&body[pos..], &delimiter) {
        let start = pos + idx;
        let after = start + delimiter.len();
        pos = after;

        // Only "--" may follow the boundary, then transport padding up to the
        // end of the line
        let rest = &body[after..];
        let closing = rest.starts_with(b"--");
        let tail = if closing { &rest[2..] } else { rest };
        let line = &tail[..tail.iter().position(|&b| b == b'\n').unwrap_or(tail.len())];

        let at_line_start = start == 0 || body[start - 1] == b'\n';
        if !at_line_start || !line.iter().all(|b| matches!(b, b' ' | b'\t' | b'\r')) {
            continue;
        }
        let mut line_start = start;
        if line_start > 0 {
            line_start -= 1;
            if line_start > 0 && body[line_start - 1] == b'\r' {
                line_start -= 1;
            }
        }
        let line_end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| after + i + 1);
        marks.push((line_start, line_end));
        if closing {
            return Ok(marks);
        }
    }
    Err(Error::ContentType("multipart body is not terminated".into()))
}

impl PartTree {
    /// serialize returns the body and the Content-* headers describing it, in
    /// the form used as a transport entity.
    pub fn serialize(&self) -> (Vec<u8>, Headers) {
        match self {
            PartTree::Opaque(part) => (part.raw_body().to_vec(), part.headers().clone()),
            PartTree::Signed {
                content,
                signature,
                micalg,
                protocol,
            } => {
                let boundary = boundary();
                let mut content_type = ContentType::new("multipart/signed")
                    .with_param("protocol", protocol.clone());
                if let Some(micalg) = micalg {
                    content_type = content_type.with_param("micalg", micalg.micalg());
                }
                let content_type = content_type.with_param("boundary", boundary.clone());

                let mut body = Vec::new();
                body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                body.extend_from_slice(content.raw());
                body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
                body.extend_from_slice(
                    format!("Content-Type: {protocol}; name=smime.p7s\r\n").as_bytes(),
                );
                body.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n");
                body.extend_from_slice(b"Content-Disposition: attachment; filename=smime.p7s\r\n\r\n");
                body.extend_from_slice(&encode_base64(signature));
                body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

                let headers = Headers::from_iter([("Content-Type", content_type.to_string())]);
                (body, headers)
            }
            PartTree::Smime { kind, data } => {
                let content_type = ContentType::new("application/pkcs7-mime")
                    .with_param("smime-type", kind.as_str())
                    .with_param("name", kind.filename());
                let headers = Headers::from_iter([
                    ("Content-Type", content_type.to_string()),
                    ("Content-Transfer-Encoding", "binary".to_string()),
                    (
                        "Content-Disposition",
                        format!("attachment; filename={}", kind.filename()),
                    ),
                ]);
                (data.clone(), headers)
            }
        }
    }

    /// to_entity serializes the tree as a full MIME entity, suitable for
    /// nesting inside another security layer.
    pub fn to_entity(&self) -> Vec<u8> {
        if let PartTree::Opaque(part) = self {
            return part.raw().to_vec();
        }
        let (body, headers) = self.serialize();
        let mut out = headers.to_bytes();
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&body);
        out
    }
}

/// canonicalize converts bare LF line endings into CRLF, the canonical form
/// MIME content is signed and digested in.
pub fn canonicalize(data: &[u8]) -> Cow<'_, [u8]> {
    let bare = data
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\n' && (i == 0 || data[i - 1] != b'\r'));
    if !bare {
        return Cow::Borrowed(data);
    }
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' && (i == 0 || data[i - 1] != b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    Cow::Owned(out)
}

/// boundary generates a fresh multipart boundary.
pub fn boundary() -> String {
    format!("----=_Part_{}", uuid::Uuid::new_v4().simple())
}

/// unbracket strips the angle brackets around a message identifier.
pub(crate) fn unbracket(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value)
}

fn transfer_encoding(headers: &Headers) -> String {
    headers
        .get("Content-Transfer-Encoding")
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "binary".to_string())
}

fn decode_transfer(body: &[u8], headers: &Headers) -> Result<Vec<u8>> {
    match transfer_encoding(headers).as_str() {
        "base64" => {
            let compact: Vec<u8> = body.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            LENIENT
                .decode(&compact)
                .map_err(|err| Error::ContentType(format!("invalid base64 body: {err}")))
        }
        "quoted-printable" => decode_quoted_printable(body),
        "binary" | "8bit" | "7bit" => Ok(body.to_vec()),
        other => Err(Error::ContentType(format!("unsupported transfer encoding: {other}"))),
    }
}

fn decode_quoted_printable(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] != b'=' {
            out.push(body[i]);
            i += 1;
            continue;
        }
        // Soft line breaks vanish, escapes are two hex digits
        match body.get(i + 1..i + 3) {
            Some(b"\r\n") => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some(hex) => {
                let text = std::str::from_utf8(hex).ok();
                let byte = text
                    .and_then(|t| u8::from_str_radix(t, 16).ok())
                    .ok_or_else(|| Error::ContentType("invalid quoted-printable escape".into()))?;
                out.push(byte);
                i += 3;
            }
            None if body.get(i + 1) == Some(&b'\n') => i += 2,
            None => return Err(Error::ContentType("truncated quoted-printable escape".into())),
        }
    }
    Ok(out)
}

fn encode_base64(data: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38 + 2);
    for line in encoded.as_bytes().chunks(76) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
