// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! AS2 message parsing and building.
//!
//! Inbound messages are peeled layer by layer: decryption, signature
//! verification and decompression, re-sniffing the MIME structure after each
//! step. Outbound messages apply the same layers in reverse.
//!
//! https://datatracker.ietf.org/doc/html/rfc4130
//! https://datatracker.ietf.org/doc/html/rfc5402

use crate::algorithm::{DigestAlgorithm, EncryptionAlgorithm};
use crate::compress;
use crate::directory::{Directory, unquote};
use crate::envelope;
use crate::error::{Error, LookupKind, Result};
use crate::identity::{Organization, Partner};
use crate::mdn::{self, MdnRequest};
use crate::mic::Mic;
use crate::mime::{self, Headers, MimePart, PartTree, SmimeType};
use crate::signature;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const SIGNATURE_PROTOCOL: &str = "application/pkcs7-signature";

/// Payload is the business document carried by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    content: Vec<u8>,
    content_type: String,
    filename: Option<String>,
    disposition: Option<String>,
}

impl Payload {
    /// new creates a payload of the given MIME type.
    pub fn new(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            filename: None,
            disposition: None,
        }
    }

    /// with_filename sets the file name announced as an attachment.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// get_payload returns the document content.
    pub fn get_payload(&self) -> &[u8] {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// disposition returns the raw Content-Disposition of a received payload.
    pub fn disposition(&self) -> Option<&str> {
        self.disposition.as_deref()
    }

    fn from_part(part: MimePart) -> Self {
        let content_type = part
            .headers()
            .get("Content-Type")
            .unwrap_or("text/plain")
            .to_string();
        let filename = part.filename();
        let disposition = part.headers().get("Content-Disposition").map(str::to_string);
        Self {
            content: part.into_body(),
            content_type,
            filename,
            disposition,
        }
    }

    fn to_part(&self) -> Result<MimePart> {
        let mut headers = Headers::new();
        headers.append("Content-Type", self.content_type.clone());
        headers.append("Content-Transfer-Encoding", "binary");
        match (&self.disposition, &self.filename) {
            (Some(disposition), _) => headers.append("Content-Disposition", disposition.clone()),
            (None, Some(filename)) => headers.append(
                "Content-Disposition",
                mime::ContentType::new("attachment")
                    .with_param("filename", filename.clone())
                    .to_string(),
            ),
            (None, None) => {}
        }
        MimePart::new(headers, self.content.clone())
    }
}

/// BuildOptions selects the security layers of an outbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub subject: String,
    pub compress: bool,
    /// Compress the payload before signing it rather than after (RFC 5402).
    pub compress_before_signing: bool,
    pub sign: Option<DigestAlgorithm>,
    pub encrypt: Option<EncryptionAlgorithm>,
    pub request_mdn: bool,
    /// Digest of the signed receipt to request, if any.
    pub mdn_digest: Option<DigestAlgorithm>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            subject: "AS2 Message".to_string(),
            compress: false,
            compress_before_signing: true,
            sign: None,
            encrypt: None,
            request_mdn: false,
            mdn_digest: None,
        }
    }
}

impl BuildOptions {
    /// from_partner derives the options from the partner's profile.
    pub fn from_partner(partner: &Partner) -> Self {
        let settings = partner.settings();
        Self {
            compress: settings.compress,
            sign: settings.sign.then_some(settings.digest),
            encrypt: settings.encrypt.then_some(settings.cipher),
            request_mdn: settings.mdn_mode == crate::identity::MdnMode::Sync,
            mdn_digest: settings.mdn_digest,
            ..Self::default()
        }
    }
}

/// Message is a fully processed AS2 message, either parsed from the wire or
/// built for sending.
#[derive(Clone, Debug)]
pub struct Message {
    message_id: String,
    headers: Headers,
    organization: Arc<Organization>,
    partner: Arc<Partner>,
    payload: Payload,
    compressed: bool,
    compressed_before_signing: bool,
    digest_alg: Option<DigestAlgorithm>,
    enc_alg: Option<EncryptionAlgorithm>,
    mic: Option<Mic>,
    mdn_request: Option<MdnRequest>,
}

/// Security layers peeled so far from an inbound message.
#[derive(Default)]
struct Layers {
    encrypted: Option<EncryptionAlgorithm>,
    signed: Option<DigestAlgorithm>,
    compressed: bool,
    compressed_before_signing: bool,
    mic: Option<Mic>,
}

impl Message {
    /// parse processes a raw message, its header block followed by its body.
    pub fn parse<D: Directory + ?Sized>(raw: &[u8], directory: &D) -> Result<Message> {
        let (headers, offset) = Headers::parse(raw)?;
        Self::parse_with_headers(&raw[offset..], headers, directory)
    }

    /// parse_with_headers processes a message whose HTTP headers and body
    /// were already taken apart by the transport.
    pub fn parse_with_headers<D: Directory + ?Sized>(
        body: &[u8],
        headers: Headers,
        directory: &D,
    ) -> Result<Message> {
        let organization =
            directory
                .lookup_organization(&headers)
                .ok_or_else(|| Error::DirectoryLookup {
                    kind: LookupKind::Organization,
                    as2_id: headers.get("AS2-To").map(|id| unquote(id).to_string()),
                })?;
        let partner = directory
            .lookup_partner(&headers)
            .ok_or_else(|| Error::DirectoryLookup {
                kind: LookupKind::Partner,
                as2_id: headers.get("AS2-From").map(|id| unquote(id).to_string()),
            })?;
        let message_id = mime::unbracket(headers.get("Message-ID").unwrap_or_default()).to_string();
        let mdn_request = MdnRequest::from_headers(&headers);
        debug!(%message_id, from = partner.as2_id(), to = organization.as2_id(), "parsing AS2 message");

        let mut tree = mime::parse(body, &headers)?;
        let settings = partner.settings();
        if settings.encrypt && !matches!(tree, PartTree::Smime { kind: SmimeType::EnvelopedData, .. }) {
            return Err(Error::InsufficientSecurity("message is not encrypted".into()));
        }
        // The entity a signature would cover, digested for unsigned receipts
        let mut entity = MimePart::from_transport(body, &headers)?.raw().to_vec();
        let mut layers = Layers::default();

        let part = loop {
            tree = match tree {
                PartTree::Smime {
                    kind: SmimeType::EnvelopedData,
                    data,
                } => {
                    if layers.encrypted.is_some() || layers.signed.is_some() || layers.compressed {
                        return Err(Error::ContentType("encryption must be the outermost layer".into()));
                    }
                    let (plain, algorithm) = envelope::decrypt(&data, &organization)?;
                    layers.encrypted = Some(algorithm);

                    // Garbage decrypting with valid padding must not pass
                    let inner = mime::parse_entity(&plain).map_err(|err| {
                        Error::decryption(Some(algorithm), format!("decrypted content is not MIME: {err}"))
                    })?;
                    entity = plain;
                    inner
                }
                PartTree::Signed {
                    content,
                    signature,
                    micalg,
                    ..
                } => {
                    if layers.signed.is_some() {
                        return Err(Error::ContentType("nested signatures".into()));
                    }
                    let verified = signature::verify(
                        content.raw(),
                        &signature,
                        partner.verify_cert(),
                        partner.indefinite_length(),
                    )?;
                    if micalg.is_some_and(|alg| alg != verified.algorithm) {
                        warn!(?micalg, actual = %verified.algorithm, "micalg does not match signer digest");
                    }
                    layers.signed = Some(verified.algorithm);
                    layers.mic = Some(Mic {
                        digest: verified.digest,
                        algorithm: verified.algorithm,
                    });
                    mime::parse_entity(content.raw())?
                }
                PartTree::Smime {
                    kind: SmimeType::CompressedData,
                    data,
                } => {
                    if layers.compressed {
                        return Err(Error::ContentType("nested compression".into()));
                    }
                    let plain = compress::decompress(&data)?;
                    layers.compressed = true;
                    layers.compressed_before_signing = layers.signed.is_some();

                    mime::parse_entity(&plain).map_err(|err| {
                        Error::Decompression(format!("decompressed content is not MIME: {err}"))
                    })?
                }
                PartTree::Opaque(part) => break part,
            };
        };
        if settings.sign && layers.signed.is_none() {
            return Err(Error::InsufficientSecurity("message is not signed".into()));
        }
        let mic = match layers.mic {
            Some(mic) => mic,
            None => {
                let algorithm = mdn_request
                    .as_ref()
                    .and_then(|r| r.signed)
                    .or(settings.mdn_digest)
                    .unwrap_or(DigestAlgorithm::Sha1);
                Mic::compute(&mime::canonicalize(&entity), algorithm)
            }
        };
        debug!(
            %message_id,
            encrypted = ?layers.encrypted,
            signed = ?layers.signed,
            compressed = layers.compressed,
            "parsed AS2 message"
        );
        Ok(Message {
            message_id,
            headers,
            organization,
            partner,
            payload: Payload::from_part(part),
            compressed: layers.compressed,
            compressed_before_signing: layers.compressed_before_signing,
            digest_alg: layers.signed,
            enc_alg: layers.encrypted,
            mic: Some(mic),
            mdn_request,
        })
    }

    /// build creates an outbound message from the organization to the
    /// partner, returning the message (its headers included) and the HTTP
    /// body to send.
    pub fn build(
        payload: Payload,
        organization: Arc<Organization>,
        partner: Arc<Partner>,
        options: &BuildOptions,
    ) -> Result<(Message, Vec<u8>)> {
        let compress_first = options.compress && options.compress_before_signing;

        let mut tree = PartTree::Opaque(payload.to_part()?);
        if compress_first {
            tree = PartTree::Smime {
                kind: SmimeType::CompressedData,
                data: compress::compress(&tree.to_entity())?,
            };
        }
        let mut mic = None;
        if let Some(digest) = options.sign {
            let content = match tree {
                PartTree::Opaque(part) => part,
                other => MimePart::parse(&other.to_entity())?,
            };
            let signature = signature::sign(content.raw(), &organization, digest)?;
            mic = Some(Mic::compute(content.raw(), digest));
            tree = PartTree::Signed {
                content,
                signature,
                micalg: Some(digest),
                protocol: SIGNATURE_PROTOCOL.to_string(),
            };
        }
        if options.compress && !compress_first {
            tree = PartTree::Smime {
                kind: SmimeType::CompressedData,
                data: compress::compress(&tree.to_entity())?,
            };
        }
        // Receivers digest the entity that reaches their signature layer
        let mic = match mic {
            Some(mic) => mic,
            None => Mic::compute(
                &mime::canonicalize(&tree.to_entity()),
                options.mdn_digest.unwrap_or(DigestAlgorithm::Sha1),
            ),
        };
        if let Some(cipher) = options.encrypt {
            tree = PartTree::Smime {
                kind: SmimeType::EnvelopedData,
                data: envelope::encrypt(&tree.to_entity(), partner.encrypt_cert(), cipher)?,
            };
        }
        let (body, content_headers) = tree.serialize();

        let message_id = mdn::new_message_id(organization.as2_id());
        let mut headers = Headers::new();
        headers.append("AS2-Version", "1.2");
        headers.append("AS2-From", mdn::quote_id(organization.as2_id()));
        headers.append("AS2-To", mdn::quote_id(partner.as2_id()));
        headers.append("Message-ID", format!("<{message_id}>"));
        headers.append("Subject", options.subject.clone());
        headers.append("MIME-Version", "1.0");
        for (name, value) in content_headers.iter() {
            headers.append(name, value);
        }
        let mdn_request = options.request_mdn.then(|| MdnRequest {
            to: organization.as2_id().to_string(),
            signed: options.mdn_digest,
            receipt_delivery: None,
        });
        if let Some(request) = &mdn_request {
            request.apply(&mut headers);
        }
        debug!(
            %message_id,
            compressed = options.compress,
            signed = ?options.sign,
            encrypted = ?options.encrypt,
            "built AS2 message"
        );
        let message = Message {
            message_id,
            headers,
            organization,
            partner,
            payload,
            compressed: options.compress,
            compressed_before_signing: options.compress && options.sign.is_some() && compress_first,
            digest_alg: options.sign,
            enc_alg: options.encrypt,
            mic: Some(mic),
            mdn_request,
        };
        Ok((message, body))
    }

    /// message_id returns the message identifier without angle brackets.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// headers returns the transport headers of the message.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.organization
    }

    pub fn partner(&self) -> &Arc<Partner> {
        &self.partner
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn compress(&self) -> bool {
        self.compressed
    }

    /// compressed_before_signing reports whether the compressed layer sits
    /// inside the signature.
    pub fn compressed_before_signing(&self) -> bool {
        self.compressed_before_signing
    }

    pub fn sign(&self) -> bool {
        self.digest_alg.is_some()
    }

    pub fn encrypt(&self) -> bool {
        self.enc_alg.is_some()
    }

    /// digest_alg returns the signature digest, set iff the message is signed.
    pub fn digest_alg(&self) -> Option<DigestAlgorithm> {
        self.digest_alg
    }

    /// enc_alg returns the content cipher, set iff the message is encrypted.
    pub fn enc_alg(&self) -> Option<EncryptionAlgorithm> {
        self.enc_alg
    }

    /// mic returns the integrity check to put into, or expect from, the
    /// receipt.
    pub fn mic(&self) -> Option<&Mic> {
        self.mic.as_ref()
    }

    /// mdn_request returns the receipt the sender asked for, if any.
    pub fn mdn_request(&self) -> Option<&MdnRequest> {
        self.mdn_request.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{FnDirectory, StaticDirectory};
    use crate::identity::PartnerSettings;
    use crate::mdn::Mdn;
    use der::Decode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAYLOAD: &[u8] = include_bytes!("../testdata/payload.edi");
    const ORG_KEY: &str = include_str!("../testdata/org_private.pem");
    const ORG_CERT: &str = include_str!("../testdata/org_cert.pem");
    const PARTNER_KEY: &str = include_str!("../testdata/partner_private.pem");
    const PARTNER_CERT: &str = include_str!("../testdata/partner_cert.pem");

    // The receiving side of the interop fixtures: p1as2 hosted locally,
    // mecas2 as the remote partner.
    fn receiver(settings: PartnerSettings) -> StaticDirectory {
        let mut dir = StaticDirectory::new();
        dir.add_organization(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        dir.add_partner(
            Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, true)
                .unwrap()
                .with_settings(settings),
        );
        dir
    }

    // The mirrored side, used to parse what p1as2 builds.
    fn sender_view() -> StaticDirectory {
        let mut dir = StaticDirectory::new();
        dir.add_organization(
            Organization::new("mecas2", PARTNER_KEY, "test", PARTNER_KEY, "test").unwrap(),
        );
        dir.add_partner(Partner::new("p1as2", ORG_CERT, ORG_CERT, false).unwrap());
        dir
    }

    fn parse_fixture(data: &[u8]) -> Message {
        Message::parse(data, &receiver(PartnerSettings::default()))
            .unwrap_or_else(|e| panic!("failed to parse fixture: {}", e))
    }

    #[test]
    fn test_compressed_message() {
        let msg = parse_fixture(include_bytes!("../testdata/mecas2_compressed.as2"));
        assert!(msg.compress());
        assert!(!msg.sign());
        assert!(!msg.encrypt());
        assert_eq!(msg.payload().get_payload(), PAYLOAD);
        assert_eq!(msg.message_id(), "compressed@mecas2");
        assert_eq!(msg.mic().unwrap().algorithm, DigestAlgorithm::Sha1);
    }

    #[test]
    fn test_encrypted_message() {
        let msg = parse_fixture(include_bytes!("../testdata/mecas2_encrypted.as2"));
        assert!(msg.encrypt());
        assert_eq!(msg.enc_alg(), Some(EncryptionAlgorithm::TripleDes192Cbc));
        assert_eq!(msg.enc_alg().unwrap().as_str(), "tripledes_192_cbc");
        assert!(!msg.sign());
        assert_eq!(msg.payload().get_payload(), PAYLOAD);
        assert_eq!(msg.payload().content_type(), "application/edi-consent");
        assert_eq!(msg.payload().filename(), Some("payload.edi"));
    }

    #[test]
    fn test_signed_message() {
        let data = include_bytes!("../testdata/mecas2_signed.as2");
        let msg = parse_fixture(data);
        assert!(msg.sign());
        assert_eq!(msg.digest_alg(), Some(DigestAlgorithm::Sha1));
        assert_eq!(msg.digest_alg().unwrap().as_str(), "sha1");
        assert_eq!(msg.payload().get_payload(), PAYLOAD);

        // The MIC is the digest of the signed entity exactly as received
        let (headers, offset) = Headers::parse(data).unwrap();
        let PartTree::Signed { content, .. } = mime::parse(&data[offset..], &headers).unwrap() else {
            panic!("expected signed fixture");
        };
        assert_eq!(msg.mic(), Some(&Mic::compute(content.raw(), DigestAlgorithm::Sha1)));
    }

    #[test]
    fn test_signed_ber_message() {
        let data = include_bytes!("../testdata/mecas2_signed_ber.as2");
        let msg = parse_fixture(data);
        assert_eq!(msg.digest_alg(), Some(DigestAlgorithm::Sha1));
        assert_eq!(msg.payload().get_payload(), PAYLOAD);

        // Partners not flagged for indefinite lengths get strict DER checks
        let mut dir = StaticDirectory::new();
        dir.add_organization(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        dir.add_partner(Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, false).unwrap());
        assert!(matches!(
            Message::parse(data, &dir),
            Err(Error::SignatureVerification { .. })
        ));
    }

    #[test]
    fn test_encrypted_signed_message() {
        let msg = parse_fixture(include_bytes!("../testdata/mecas2_signed_encrypted.as2"));
        assert_eq!(msg.enc_alg(), Some(EncryptionAlgorithm::TripleDes192Cbc));
        assert_eq!(msg.digest_alg(), Some(DigestAlgorithm::Sha1));
        assert!(!msg.compress());
        assert_eq!(msg.payload().get_payload(), PAYLOAD);
    }

    #[test]
    fn test_encrypted_signed_compressed_message() {
        let msg = parse_fixture(include_bytes!("../testdata/mecas2_compressed_signed_encrypted.as2"));
        assert_eq!(msg.enc_alg(), Some(EncryptionAlgorithm::TripleDes192Cbc));
        assert_eq!(msg.digest_alg(), Some(DigestAlgorithm::Sha1));
        assert!(msg.compress());
        assert!(msg.compressed_before_signing());
        assert_eq!(msg.payload().get_payload(), PAYLOAD);
    }

    // Tests that compression applied after signing (RFC 5402) is peeled too.
    #[test]
    fn test_signed_compressed_message() {
        let msg = parse_fixture(include_bytes!("../testdata/mecas2_signed_compressed.as2"));
        assert!(msg.compress());
        assert!(!msg.compressed_before_signing());
        assert_eq!(msg.digest_alg(), Some(DigestAlgorithm::Sha1));
        assert_eq!(msg.payload().get_payload(), PAYLOAD);
    }

    // Tests that parsing the same bytes twice yields the same result.
    #[test]
    fn test_parse_deterministic() {
        let data = include_bytes!("../testdata/mecas2_compressed_signed_encrypted.as2");
        let first = parse_fixture(data);
        let second = parse_fixture(data);
        assert_eq!(first.payload(), second.payload());
        assert_eq!(first.mic(), second.mic());
        assert_eq!(first.headers(), second.headers());
    }

    // Tests that each lookup runs exactly once, with the message headers,
    // and that a failed lookup names the missing identifier.
    #[test]
    fn test_directory_lookups() {
        let dir = receiver(PartnerSettings::default());
        let orgs = AtomicUsize::new(0);
        let partners = AtomicUsize::new(0);
        let counting = FnDirectory::new(
            |headers: &Headers| {
                orgs.fetch_add(1, Ordering::SeqCst);
                assert_eq!(headers.get("AS2-To"), Some("p1as2"));
                dir.organization("p1as2")
            },
            |headers: &Headers| {
                partners.fetch_add(1, Ordering::SeqCst);
                assert_eq!(headers.get("AS2-From"), Some("mecas2"));
                dir.partner("mecas2")
            },
        );
        Message::parse(include_bytes!("../testdata/mecas2_signed_encrypted.as2"), &counting).unwrap();
        assert_eq!(orgs.load(Ordering::SeqCst), 1);
        assert_eq!(partners.load(Ordering::SeqCst), 1);

        let empty = StaticDirectory::new();
        match Message::parse(include_bytes!("../testdata/mecas2_signed.as2"), &empty) {
            Err(Error::DirectoryLookup { kind, as2_id }) => {
                assert_eq!(kind, LookupKind::Organization);
                assert_eq!(as2_id.as_deref(), Some("p1as2"));
            }
            other => panic!("expected lookup error, got {other:?}"),
        }
        let mut orgs_only = StaticDirectory::new();
        orgs_only.add_organization(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        match Message::parse(include_bytes!("../testdata/mecas2_signed.as2"), &orgs_only) {
            Err(Error::DirectoryLookup { kind, as2_id }) => {
                assert_eq!(kind, LookupKind::Partner);
                assert_eq!(as2_id.as_deref(), Some("mecas2"));
            }
            other => panic!("expected lookup error, got {other:?}"),
        }
    }

    // Tests that a corrupted ciphertext never yields a payload.
    #[test]
    fn test_tampered_ciphertext() {
        let mut data = include_bytes!("../testdata/mecas2_encrypted.as2").to_vec();
        let (_, offset) = Headers::parse(&data).unwrap();

        let info = cms::content_info::ContentInfo::from_der(&data[offset..]).unwrap();
        let enveloped: cms::enveloped_data::EnvelopedData = info.content.decode_as().unwrap();
        let ciphertext = enveloped.encrypted_content.encrypted_content.unwrap();
        let head = &ciphertext.as_bytes()[..16];
        let pos = data.windows(16).position(|w| w == head).unwrap();
        data[pos] ^= 0x80;

        match Message::parse(&data, &receiver(PartnerSettings::default())) {
            Err(Error::Decryption { algorithm, .. }) => {
                assert_eq!(algorithm, Some(EncryptionAlgorithm::TripleDes192Cbc))
            }
            other => panic!("expected decryption error, got {other:?}"),
        }
    }

    // Tests that altering the signed content is detected.
    #[test]
    fn test_tampered_signed_content() {
        let data = include_bytes!("../testdata/mecas2_signed.as2");
        let tampered = String::from_utf8_lossy(data).replace("INVOIC", "INVOIX");
        match Message::parse(tampered.as_bytes(), &receiver(PartnerSettings::default())) {
            Err(Error::SignatureVerification { algorithm, .. }) => {
                assert_eq!(algorithm, Some(DigestAlgorithm::Sha1))
            }
            other => panic!("expected verification error, got {other:?}"),
        }
    }

    // Tests that a partner profile requiring security rejects messages that
    // lack it.
    #[test]
    fn test_insufficient_security() {
        let settings = PartnerSettings {
            encrypt: true,
            ..PartnerSettings::default()
        };
        let err = Message::parse(include_bytes!("../testdata/mecas2_signed.as2"), &receiver(settings))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSecurity(_)));
        assert_eq!(err.disposition_modifier(), "insufficient-message-security");

        let settings = PartnerSettings {
            sign: true,
            ..PartnerSettings::default()
        };
        let err = Message::parse(include_bytes!("../testdata/mecas2_encrypted.as2"), &receiver(settings))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSecurity(_)));
    }

    // Tests that every combination of layers and algorithms survives a build
    // and parse cycle, recovering the payload, the flags and the MIC.
    #[test]
    fn test_build_parse_roundtrip() {
        let org = Arc::new(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        let partner = Arc::new(Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, false).unwrap());
        let dir = sender_view();

        let payload = Payload::new(PAYLOAD, "application/edi-consent").with_filename("invoice.edi");
        let signs = [None, Some(DigestAlgorithm::Sha1), Some(DigestAlgorithm::Sha256), Some(DigestAlgorithm::Sha512)];
        let ciphers = [
            None,
            Some(EncryptionAlgorithm::TripleDes192Cbc),
            Some(EncryptionAlgorithm::Aes128Cbc),
            Some(EncryptionAlgorithm::Aes192Cbc),
            Some(EncryptionAlgorithm::Aes256Cbc),
        ];
        for compress in [false, true] {
            for sign in signs {
                for encrypt in ciphers {
                    let options = BuildOptions {
                        compress,
                        sign,
                        encrypt,
                        ..BuildOptions::default()
                    };
                    let name = format!("compress={compress} sign={sign:?} encrypt={encrypt:?}");
                    let (sent, body) = Message::build(payload.clone(), org.clone(), partner.clone(), &options)
                        .unwrap_or_else(|e| panic!("{name}: failed to build: {}", e));

                    let received = Message::parse_with_headers(&body, sent.headers().clone(), &dir)
                        .unwrap_or_else(|e| panic!("{name}: failed to parse: {}", e));
                    assert_eq!(received.payload().get_payload(), PAYLOAD, "{name}");
                    assert_eq!(received.payload().filename(), Some("invoice.edi"), "{name}");
                    assert_eq!(received.compress(), compress, "{name}");
                    assert_eq!(received.digest_alg(), sign, "{name}");
                    assert_eq!(received.enc_alg(), encrypt, "{name}");
                    assert_eq!(
                        received.compressed_before_signing(),
                        sent.compressed_before_signing(),
                        "{name}"
                    );
                    assert_eq!(received.mic(), sent.mic(), "{name}");
                    assert_eq!(received.message_id(), sent.message_id(), "{name}");
                }
            }
        }
    }

    // Tests that compression can be placed outside the signature on request.
    #[test]
    fn test_build_compress_after_signing() {
        let org = Arc::new(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        let partner = Arc::new(Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, false).unwrap());
        let options = BuildOptions {
            compress: true,
            compress_before_signing: false,
            sign: Some(DigestAlgorithm::Sha256),
            ..BuildOptions::default()
        };
        let payload = Payload::new(PAYLOAD, "application/edi-consent");
        let (sent, body) = Message::build(payload, org, partner, &options).unwrap();
        assert!(!sent.compressed_before_signing());

        let received = Message::parse_with_headers(&body, sent.headers().clone(), &sender_view()).unwrap();
        assert!(received.compress());
        assert!(!received.compressed_before_signing());
        assert_eq!(received.mic(), sent.mic());
    }

    // Tests that the headers of a built message carry the routing, the
    // content type and the receipt request of the partner profile.
    #[test]
    fn test_build_headers() {
        let org = Arc::new(Organization::new("p1 as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        let settings = PartnerSettings {
            sign: true,
            encrypt: true,
            cipher: EncryptionAlgorithm::Aes256Cbc,
            mdn_mode: crate::identity::MdnMode::Sync,
            mdn_digest: Some(DigestAlgorithm::Sha256),
            ..PartnerSettings::default()
        };
        let partner = Arc::new(
            Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, false)
                .unwrap()
                .with_settings(settings),
        );
        let options = BuildOptions::from_partner(&partner);
        assert_eq!(options.sign, Some(DigestAlgorithm::Sha256));
        assert_eq!(options.encrypt, Some(EncryptionAlgorithm::Aes256Cbc));

        let payload = Payload::new(PAYLOAD, "application/edi-consent");
        let (sent, _) = Message::build(payload, org, partner, &options).unwrap();
        let headers = sent.headers();
        assert_eq!(headers.get("AS2-Version"), Some("1.2"));
        assert_eq!(headers.get("AS2-From"), Some("\"p1 as2\""));
        assert_eq!(headers.get("AS2-To"), Some("mecas2"));
        assert_eq!(headers.get("MIME-Version"), Some("1.0"));
        assert_eq!(headers.get("Message-ID").unwrap(), format!("<{}>", sent.message_id()));
        assert!(sent.message_id().ends_with("@p1as2"));
        assert_eq!(headers.get("Disposition-Notification-To"), Some("p1 as2"));

        let ct = headers.content_type().unwrap();
        assert_eq!(ct.mime_type(), "application/pkcs7-mime");
        assert_eq!(ct.param("smime-type"), Some("enveloped-data"));

        let request = sent.mdn_request().unwrap();
        assert_eq!(request.signed, Some(DigestAlgorithm::Sha256));
    }

    // Tests that the receipt for a received message echoes the MIC the
    // sender recorded when building it.
    #[test]
    fn test_mdn_exchange() {
        let org = Arc::new(Organization::new("p1as2", ORG_KEY, "test", ORG_KEY, "test").unwrap());
        let partner = Arc::new(Partner::new("mecas2", PARTNER_CERT, PARTNER_CERT, false).unwrap());
        let options = BuildOptions {
            sign: Some(DigestAlgorithm::Sha256),
            encrypt: Some(EncryptionAlgorithm::Aes128Cbc),
            request_mdn: true,
            mdn_digest: Some(DigestAlgorithm::Sha256),
            ..BuildOptions::default()
        };
        let payload = Payload::new(PAYLOAD, "application/edi-consent");
        let (sent, body) = Message::build(payload, org.clone(), partner, &options).unwrap();

        // The partner processes the message and answers with a signed receipt
        let dir = sender_view();
        let received = Message::parse_with_headers(&body, sent.headers().clone(), &dir).unwrap();
        let receipt = Mdn::for_message(&received);
        let signer = dir.organization("mecas2").unwrap();
        let (mdn_body, mdn_headers) = receipt.build(Some((&*signer, DigestAlgorithm::Sha256))).unwrap();

        // Back at the sender, the receipt verifies and matches the MIC
        let pem = PARTNER_CERT;
        let verifier = Partner::new("mecas2", pem, pem, false).unwrap();
        let mdn = Mdn::parse_verified(&mdn_body, &mdn_headers, &verifier).unwrap();
        assert_eq!(mdn.original_message_id, sent.message_id());
        assert!(mdn.disposition.is_positive());
        mdn.verify_mic(sent.mic().unwrap()).unwrap();
    }

    // Tests that repeated layers of the same kind are refused.
    #[test]
    fn test_nested_layers() {
        let entity = Payload::new(PAYLOAD, "application/edi-consent").to_part().unwrap();
        let inner = PartTree::Smime {
            kind: SmimeType::CompressedData,
            data: compress::compress(entity.raw()).unwrap(),
        };
        let outer = PartTree::Smime {
            kind: SmimeType::CompressedData,
            data: compress::compress(&inner.to_entity()).unwrap(),
        };
        let (body, mut headers) = outer.serialize();
        headers.append("AS2-From", "mecas2");
        headers.append("AS2-To", "p1as2");

        let err = Message::parse_with_headers(&body, headers, &receiver(PartnerSettings::default()))
            .unwrap_err();
        assert!(matches!(err, Error::ContentType(_)), "{err}");
    }

    #[test]
    fn test_unknown_content_type_is_payload() {
        let raw = b"AS2-From: mecas2\r\nAS2-To: p1as2\r\nMessage-ID: <plain@mecas2>\r\nContent-Type: application/edi-x12\r\n\r\nISA*00*\r\n";
        let msg = parse_fixture(raw);
        assert!(!msg.sign() && !msg.encrypt() && !msg.compress());
        assert_eq!(msg.payload().get_payload(), b"ISA*00*\r\n");
        assert_eq!(
            msg.mic(),
            Some(&Mic::compute(
                b"Content-Type: application/edi-x12\r\n\r\nISA*00*\r\n",
                DigestAlgorithm::Sha1
            ))
        );
    }
}
