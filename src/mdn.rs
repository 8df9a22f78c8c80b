// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Message disposition notifications (AS2 receipts).
//!
//! https://datatracker.ietf.org/doc/html/rfc4130#section-7
//! https://datatracker.ietf.org/doc/html/rfc3798

use crate::algorithm::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::identity::{Organization, Partner};
use crate::message::Message;
use crate::mic::Mic;
use crate::mime::{self, ContentType, Headers, MimePart, PartTree};
use crate::signature;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const DISPOSITION_MODE: &str = "automatic-action/MDN-sent-automatically";

/// Disposition is the processing outcome an MDN reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The message was processed successfully.
    Processed,
    /// The message was processed, with a warning.
    Warning(String),
    /// The message was rejected, with a reason.
    Failed(String),
    /// The message could not be processed, with an RFC 4130 modifier such as
    /// `decryption-failed`.
    Error(String),
}

impl Disposition {
    /// is_positive reports whether the partner processed the message.
    pub fn is_positive(&self) -> bool {
        matches!(self, Disposition::Processed | Disposition::Warning(_))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Processed => write!(f, "{DISPOSITION_MODE}; processed"),
            Disposition::Warning(text) => write!(f, "{DISPOSITION_MODE}; processed/warning: {text}"),
            Disposition::Failed(text) => write!(f, "{DISPOSITION_MODE}; failed/failure: {text}"),
            Disposition::Error(modifier) => write!(f, "{DISPOSITION_MODE}; processed/error: {modifier}"),
        }
    }
}

impl FromStr for Disposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let err = || Error::MdnParse(format!("invalid disposition {s:?}"));

        let (_, outcome) = s.split_once(';').ok_or_else(err)?;
        let outcome = outcome.trim();
        let Some((kind, text)) = outcome.split_once(':') else {
            return match outcome.to_ascii_lowercase().as_str() {
                "processed" => Ok(Disposition::Processed),
                _ => Err(err()),
            };
        };
        let text = text.trim().to_string();
        let kind: String = kind.chars().filter(|c| !c.is_whitespace()).collect();
        match kind.to_ascii_lowercase().as_str() {
            "processed/warning" => Ok(Disposition::Warning(text)),
            "processed/error" => Ok(Disposition::Error(text)),
            "failed/failure" => Ok(Disposition::Failed(text)),
            _ => Err(err()),
        }
    }
}

/// MdnRequest is a sender's request for a receipt, carried in the
/// Disposition-Notification-* headers of the original message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdnRequest {
    /// Address the receipt is requested for.
    pub to: String,
    /// Digest for a signed receipt, if one was requested.
    pub signed: Option<DigestAlgorithm>,
    /// URL for asynchronous delivery, if requested.
    pub receipt_delivery: Option<String>,
}

impl MdnRequest {
    /// from_headers extracts the receipt request of a message, if any.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        let to = headers.get("Disposition-Notification-To")?.to_string();

        // signed-receipt-protocol=optional, pkcs7-signature; signed-receipt-micalg=optional, sha-256
        let signed = headers.get("Disposition-Notification-Options").and_then(|options| {
            options.split(';').find_map(|option| {
                let (name, value) = option.split_once('=')?;
                if !name.trim().eq_ignore_ascii_case("signed-receipt-micalg") {
                    return None;
                }
                value
                    .split(',')
                    .skip(1)
                    .find_map(|alg| alg.trim().parse::<DigestAlgorithm>().ok())
            })
        });
        let receipt_delivery = headers.get("Receipt-Delivery-Option").map(str::to_string);

        Some(Self {
            to,
            signed,
            receipt_delivery,
        })
    }

    /// apply writes the request into the headers of an outbound message.
    pub fn apply(&self, headers: &mut Headers) {
        headers.insert("Disposition-Notification-To", self.to.clone());
        if let Some(digest) = self.signed {
            headers.insert(
                "Disposition-Notification-Options",
                format!(
                    "signed-receipt-protocol=optional, pkcs7-signature; signed-receipt-micalg=optional, {}",
                    digest.micalg()
                ),
            );
        }
        if let Some(url) = &self.receipt_delivery {
            headers.insert("Receipt-Delivery-Option", url.clone());
        }
    }
}

/// Mdn is a disposition notification, either built for a received message or
/// parsed from a partner's response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mdn {
    pub message_id: String,
    pub as2_from: String,
    pub as2_to: String,
    pub original_message_id: String,
    pub reporting_ua: String,
    pub original_recipient: Option<String>,
    pub final_recipient: String,
    pub disposition: Disposition,
    pub mic: Option<Mic>,
    pub text: String,
    /// Digest of the receipt signature, set only once it has been verified.
    pub signed: Option<DigestAlgorithm>,
}

impl Mdn {
    /// for_message creates the positive receipt for a processed message,
    /// echoing its MIC.
    pub fn for_message(message: &Message) -> Self {
        let org = message.organization().as2_id();
        Self {
            message_id: new_message_id(org),
            as2_from: org.to_string(),
            as2_to: message.partner().as2_id().to_string(),
            original_message_id: message.message_id().to_string(),
            reporting_ua: org.to_string(),
            original_recipient: Some(org.to_string()),
            final_recipient: org.to_string(),
            disposition: Disposition::Processed,
            mic: message.mic().cloned(),
            text: format!(
                "The AS2 message {} has been received and processed successfully.",
                message.message_id()
            ),
            signed: None,
        }
    }

    /// for_error creates the negative receipt for a message that failed to
    /// process, from the headers it arrived with.
    pub fn for_error(headers: &Headers, err: &Error, reporting_ua: &str) -> Self {
        let header = |name| headers.get(name).map(crate::directory::unquote).unwrap_or_default();
        let recipient = header("AS2-To").to_string();
        Self {
            message_id: new_message_id(&recipient),
            as2_from: recipient.clone(),
            as2_to: header("AS2-From").to_string(),
            original_message_id: mime::unbracket(header("Message-ID")).to_string(),
            reporting_ua: reporting_ua.to_string(),
            original_recipient: Some(recipient.clone()),
            final_recipient: recipient,
            disposition: Disposition::Error(err.disposition_modifier().to_string()),
            mic: None,
            text: format!("The AS2 message could not be processed: {err}"),
            signed: None,
        }
    }

    /// build serializes the receipt into an HTTP body and its headers,
    /// signing it when a signer is given.
    pub fn build(&self, signer: Option<(&Organization, DigestAlgorithm)>) -> Result<(Vec<u8>, Headers)> {
        let boundary = mime::boundary();
        let report_type = ContentType::new("multipart/report")
            .with_param("report-type", "disposition-notification")
            .with_param("boundary", boundary.clone());

        let mut fields = Headers::new();
        fields.append("Reporting-UA", self.reporting_ua.clone());
        if let Some(recipient) = &self.original_recipient {
            fields.append("Original-Recipient", format!("rfc822; {recipient}"));
        }
        fields.append("Final-Recipient", format!("rfc822; {}", self.final_recipient));
        fields.append("Original-Message-ID", format!("<{}>", self.original_message_id));
        if let Some(mic) = &self.mic {
            fields.append("Received-content-MIC", mic.to_string());
        }
        fields.append("Disposition", self.disposition.to_string());

        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: text/plain\r\nContent-Transfer-Encoding: 7bit\r\n\r\n");
        body.extend_from_slice(self.text.as_bytes());
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Type: message/disposition-notification\r\nContent-Transfer-Encoding: 7bit\r\n\r\n",
        );
        body.extend_from_slice(&fields.to_bytes());
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let report = MimePart::new(
            Headers::from_iter([("Content-Type", report_type.to_string())]),
            body,
        )?;
        let tree = match signer {
            Some((org, digest)) => PartTree::Signed {
                signature: signature::sign(report.raw(), org, digest)?,
                content: report,
                micalg: Some(digest),
                protocol: "application/pkcs7-signature".to_string(),
            },
            None => PartTree::Opaque(report),
        };
        let (body, content_headers) = tree.serialize();

        let mut headers = Headers::new();
        headers.append("AS2-Version", "1.2");
        headers.append("AS2-From", quote_id(&self.as2_from));
        headers.append("AS2-To", quote_id(&self.as2_to));
        headers.append("Message-ID", format!("<{}>", self.message_id));
        headers.append("Subject", "Message Disposition Notification");
        headers.append("MIME-Version", "1.0");
        for (name, value) in content_headers.iter() {
            headers.append(name, value);
        }
        debug!(original = %self.original_message_id, disposition = %self.disposition, "built MDN");
        Ok((body, headers))
    }

    /// parse decodes a receipt without checking its signature. A signed
    /// receipt is unwrapped and `signed` stays unset.
    pub fn parse(body: &[u8], headers: &Headers) -> Result<Self> {
        let tree = mime::parse(body, headers).map_err(|err| Error::MdnParse(err.to_string()))?;
        let report = match tree {
            PartTree::Signed { content, .. } => content,
            PartTree::Opaque(part) => part,
            PartTree::Smime { kind, .. } => {
                return Err(Error::MdnParse(format!("unexpected {} receipt", kind.as_str())));
            }
        };
        Self::parse_report(&report, headers)
    }

    /// parse_verified decodes a receipt, requiring and verifying a signature
    /// by the partner.
    pub fn parse_verified(body: &[u8], headers: &Headers, partner: &Partner) -> Result<Self> {
        let tree = mime::parse(body, headers).map_err(|err| Error::MdnParse(err.to_string()))?;
        let PartTree::Signed {
            content, signature, ..
        } = tree
        else {
            return Err(Error::InsufficientSecurity("receipt is not signed".into()));
        };
        let verified = signature::verify(
            content.raw(),
            &signature,
            partner.verify_cert(),
            partner.indefinite_length(),
        )?;
        let mut mdn = Self::parse_report(&content, headers)?;
        mdn.signed = Some(verified.algorithm);
        Ok(mdn)
    }

    /// verify_mic checks the returned MIC against the one computed when the
    /// original message was sent.
    pub fn verify_mic(&self, expected: &Mic) -> Result<()> {
        if self.mic.as_ref() == Some(expected) {
            return Ok(());
        }
        Err(Error::MicMismatch {
            expected: expected.to_string(),
            received: self
                .mic
                .as_ref()
                .map_or_else(|| "<none>".to_string(), Mic::to_string),
        })
    }

    fn parse_report(report: &MimePart, headers: &Headers) -> Result<Self> {
        let content_type = report
            .content_type()
            .map_err(|err| Error::MdnParse(err.to_string()))?;
        if !content_type.is(&["multipart/report"]) {
            return Err(Error::MdnParse(format!(
                "unexpected receipt type {}",
                content_type.mime_type()
            )));
        }
        let boundary = content_type
            .param("boundary")
            .ok_or_else(|| Error::MdnParse("report without boundary".into()))?;
        let parts = mime::split_multipart(report.body(), boundary)
            .map_err(|err| Error::MdnParse(err.to_string()))?;

        let mut text = String::new();
        let mut fields = None;
        for raw in parts {
            let part = MimePart::parse(raw).map_err(|err| Error::MdnParse(err.to_string()))?;
            let kind = part
                .content_type()
                .map_err(|err| Error::MdnParse(err.to_string()))?;
            if kind.is(&["message/disposition-notification"]) {
                let (parsed, _) = Headers::parse(part.body()).map_err(|err| Error::MdnParse(err.to_string()))?;
                fields = Some(parsed);
            } else if kind.is(&["text/plain"]) && text.is_empty() {
                text = String::from_utf8_lossy(part.body()).trim().to_string();
            }
        }
        let fields = fields.ok_or_else(|| Error::MdnParse("missing disposition notification".into()))?;
        let required = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| Error::MdnParse(format!("missing {name} field")))
        };

        let mic = fields
            .get("Received-content-MIC")
            .map(|value| value.parse::<Mic>().map_err(|err| Error::MdnParse(err.to_string())))
            .transpose()?;
        let header = |name| headers.get(name).map(crate::directory::unquote).unwrap_or_default();

        Ok(Self {
            message_id: mime::unbracket(header("Message-ID")).to_string(),
            as2_from: header("AS2-From").to_string(),
            as2_to: header("AS2-To").to_string(),
            original_message_id: mime::unbracket(required("Original-Message-ID")?).to_string(),
            reporting_ua: fields.get("Reporting-UA").unwrap_or_default().to_string(),
            original_recipient: fields.get("Original-Recipient").map(address),
            final_recipient: address(required("Final-Recipient")?),
            disposition: required("Disposition")?.parse()?,
            mic,
            text,
            signed: None,
        })
    }
}

/// Strips the address type from a recipient field (`rfc822; name`).
fn address(value: &str) -> String {
    value
        .split_once(';')
        .map_or(value, |(_, address)| address)
        .trim()
        .to_string()
}

pub(crate) fn new_message_id(as2_id: &str) -> String {
    let host: String = as2_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "-._".contains(*c))
        .collect();
    format!("{}@{}", uuid::Uuid::new_v4(), host)
}

/// AS2 identifiers containing spaces travel as quoted strings.
pub(crate) fn quote_id(as2_id: &str) -> String {
    if as2_id.contains(' ') {
        format!("\"{as2_id}\"")
    } else {
        as2_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn organization() -> Organization {
        let pem = include_str!("../testdata/org_private.pem");
        Organization::new("p1as2", pem, "test", pem, "test")
            .unwrap_or_else(|e| panic!("failed to load organization: {}", e))
    }

    fn partner() -> Partner {
        let cert = include_str!("../testdata/partner_cert.pem");
        Partner::new("mecas2", cert, cert, false).unwrap()
    }

    fn sample() -> Mdn {
        Mdn {
            message_id: "mdn-0002@p1as2".into(),
            as2_from: "p1as2".into(),
            as2_to: "mecas2".into(),
            original_message_id: "inbound-0001@mecas2".into(),
            reporting_ua: "p1as2".into(),
            original_recipient: Some("p1as2".into()),
            final_recipient: "p1as2".into(),
            disposition: Disposition::Processed,
            mic: Some("9I3ge9lvR2KHgHwR9pWv/FmwUaw=, sha1".parse().unwrap()),
            text: "The AS2 message has been received.".into(),
            signed: None,
        }
    }

    #[test]
    fn test_disposition() {
        let tests = [
            (Disposition::Processed, "automatic-action/MDN-sent-automatically; processed"),
            (
                Disposition::Warning("duplicate".into()),
                "automatic-action/MDN-sent-automatically; processed/warning: duplicate",
            ),
            (
                Disposition::Failed("unsupported format".into()),
                "automatic-action/MDN-sent-automatically; failed/failure: unsupported format",
            ),
            (
                Disposition::Error("decryption-failed".into()),
                "automatic-action/MDN-sent-automatically; processed/error: decryption-failed",
            ),
        ];
        for (disposition, text) in tests {
            assert_eq!(disposition.to_string(), text);
            assert_eq!(text.parse::<Disposition>().unwrap(), disposition);
        }
        let loose: Disposition = "automatic-action/MDN-sent-automatically; Processed / Error : authentication-failed"
            .parse()
            .unwrap();
        assert_eq!(loose, Disposition::Error("authentication-failed".into()));
        assert!(!loose.is_positive());

        assert!("processed".parse::<Disposition>().is_err());
        assert!("automatic-action/MDN-sent-automatically; deleted".parse::<Disposition>().is_err());
    }

    // Tests that a receipt survives building and parsing, signed or not.
    #[test]
    fn test_build_parse() {
        let mdn = sample();

        let (body, headers) = mdn.build(None).unwrap();
        assert_eq!(headers.get("AS2-To"), Some("mecas2"));
        assert_eq!(headers.get("Message-ID"), Some("<mdn-0002@p1as2>"));
        assert_eq!(Mdn::parse(&body, &headers).unwrap(), mdn);

        let org = organization();
        let (body, headers) = mdn.build(Some((&org, DigestAlgorithm::Sha256))).unwrap();
        let ct = headers.content_type().unwrap();
        assert_eq!(ct.mime_type(), "multipart/signed");
        assert_eq!(ct.param("micalg"), Some("sha-256"));
        assert_eq!(Mdn::parse(&body, &headers).unwrap(), mdn);

        // The organization acts as the partner verifying its own receipt
        let pem = include_str!("../testdata/org_cert.pem");
        let verifier = Partner::new("p1as2", pem, pem, false).unwrap();
        let parsed = Mdn::parse_verified(&body, &headers, &verifier).unwrap();
        assert_eq!(parsed.signed, Some(DigestAlgorithm::Sha256));
        assert_eq!(parsed.mic, mdn.mic);
    }

    // Tests that a signed receipt from the interop peer parses and verifies.
    #[test]
    fn test_parse_fixture() {
        let data = include_bytes!("../testdata/mecas2_mdn_signed.as2");
        let (headers, offset) = Headers::parse(data).unwrap();

        let mdn = Mdn::parse_verified(&data[offset..], &headers, &partner()).unwrap();
        assert_eq!(mdn.message_id, "mdn-0001@mecas2");
        assert_eq!(mdn.as2_from, "mecas2");
        assert_eq!(mdn.original_message_id, "outbound-0001@p1as2");
        assert_eq!(mdn.reporting_ua, "mecas2");
        assert_eq!(mdn.original_recipient.as_deref(), Some("mecas2"));
        assert_eq!(mdn.final_recipient, "mecas2");
        assert_eq!(mdn.disposition, Disposition::Processed);
        assert_eq!(mdn.text, "The AS2 message has been received.");
        assert_eq!(mdn.signed, Some(DigestAlgorithm::Sha1));

        let expected: Mic = "9I3ge9lvR2KHgHwR9pWv/FmwUaw=, sha1".parse().unwrap();
        mdn.verify_mic(&expected).unwrap();

        let other = Mic::compute(b"something else", DigestAlgorithm::Sha1);
        match mdn.verify_mic(&other) {
            Err(Error::MicMismatch { received, .. }) => {
                assert_eq!(received, "9I3ge9lvR2KHgHwR9pWv/FmwUaw=, sha1")
            }
            other => panic!("expected MIC mismatch, got {other:?}"),
        }
    }

    // Tests that a tampered signed receipt is rejected by parse_verified and
    // an unsigned one is reported as insufficiently secured.
    #[test]
    fn test_parse_verified_rejects() {
        let data = include_bytes!("../testdata/mecas2_mdn_signed.as2");
        let tampered = String::from_utf8_lossy(data).replace("processed", "processeD");
        let (headers, offset) = Headers::parse(tampered.as_bytes()).unwrap();
        assert!(matches!(
            Mdn::parse_verified(&tampered.as_bytes()[offset..], &headers, &partner()),
            Err(Error::SignatureVerification { .. })
        ));

        let (body, headers) = sample().build(None).unwrap();
        assert!(matches!(
            Mdn::parse_verified(&body, &headers, &partner()),
            Err(Error::InsufficientSecurity(_))
        ));
    }

    // Tests that a negative receipt carries the modifier of the failure and
    // addresses the sender of the failed message.
    #[test]
    fn test_for_error() {
        let headers = Headers::from_iter([
            ("AS2-From", "mecas2"),
            ("AS2-To", "p1as2"),
            ("Message-ID", "<broken-0001@mecas2>"),
        ]);
        let err = Error::decryption(None, "bad padding");
        let mdn = Mdn::for_error(&headers, &err, "p1as2");
        assert_eq!(mdn.as2_to, "mecas2");
        assert_eq!(mdn.original_message_id, "broken-0001@mecas2");
        assert_eq!(mdn.disposition, Disposition::Error("decryption-failed".into()));
        assert!(mdn.message_id.ends_with("@p1as2"));

        let (body, headers) = mdn.build(None).unwrap();
        let parsed = Mdn::parse(&body, &headers).unwrap();
        assert_eq!(parsed.disposition, mdn.disposition);
        assert_eq!(parsed.mic, None);
    }

    #[test]
    fn test_parse_malformed() {
        let headers = Headers::from_iter([("Content-Type", "multipart/report; boundary=B")]);
        let no_fields = b"--B\r\nContent-Type: text/plain\r\n\r\nhello\r\n--B--\r\n";
        assert!(matches!(Mdn::parse(no_fields, &headers), Err(Error::MdnParse(_))));

        let bad_mic = b"--B\r\nContent-Type: message/disposition-notification\r\n\r\n\
Final-Recipient: rfc822; x\r\nOriginal-Message-ID: <a@b>\r\n\
Disposition: automatic-action/MDN-sent-automatically; processed\r\n\
Received-content-MIC: nonsense\r\n\r\n--B--\r\n";
        assert!(matches!(Mdn::parse(bad_mic, &headers), Err(Error::MdnParse(_))));

        let headers = Headers::from_iter([("Content-Type", "text/plain")]);
        assert!(matches!(Mdn::parse(b"hello", &headers), Err(Error::MdnParse(_))));
    }

    #[test]
    fn test_mdn_request() {
        let headers = Headers::from_iter([
            ("Disposition-Notification-To", "mecas2@example.com"),
            (
                "Disposition-Notification-Options",
                "signed-receipt-protocol=optional, pkcs7-signature; signed-receipt-micalg=optional, sha-256, sha1",
            ),
        ]);
        let request = MdnRequest::from_headers(&headers).unwrap();
        assert_eq!(request.to, "mecas2@example.com");
        assert_eq!(request.signed, Some(DigestAlgorithm::Sha256));
        assert_eq!(request.receipt_delivery, None);

        let mut rebuilt = Headers::new();
        request.apply(&mut rebuilt);
        assert_eq!(MdnRequest::from_headers(&rebuilt).unwrap(), request);

        assert!(MdnRequest::from_headers(&Headers::new()).is_none());
    }
}
