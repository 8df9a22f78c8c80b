// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Detached CMS SignedData with RSA PKCS#1 v1.5 signatures.
//!
//! https://datatracker.ietf.org/doc/html/rfc5652#section-5
//! https://datatracker.ietf.org/doc/html/rfc5751#section-3.5

use crate::algorithm::{
    DigestAlgorithm, ID_CONTENT_TYPE, ID_DATA, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME,
    RSA_ENCRYPTION,
};
use crate::ber;
use crate::error::{Error, Result};
use crate::identity::{self, Organization};
use crate::mime;
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use const_oid::ObjectIdentifier;
use der::asn1::{OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use rsa::RsaPublicKey;
use spki::AlgorithmIdentifierOwned;
use std::time::SystemTime;
use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::attr::{Attribute, Attributes};

/// Verified is the outcome of a successful signature check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    /// Digest algorithm the signer used.
    pub algorithm: DigestAlgorithm,
    /// Digest of the signed content, which doubles as the MIC.
    pub digest: Vec<u8>,
}

/// verify checks a detached signature over the raw content bytes against the
/// pinned certificate of the signer.
///
/// If indefinite_length is set, BER encoded signatures are accepted (they are
/// normalized to DER first), otherwise the signature must be strict DER.
pub fn verify(
    content: &[u8],
    signature: &[u8],
    cert: &Certificate,
    indefinite_length: bool,
) -> Result<Verified> {
    let der = if indefinite_length {
        ber::normalize(signature).map_err(|err| Error::signature(None, err))?
    } else {
        signature.to_vec()
    };
    let info = ContentInfo::from_der(&der).map_err(|err| Error::signature(None, err))?;
    if info.content_type != ID_SIGNED_DATA {
        return Err(Error::signature(
            None,
            format!("unexpected content type {}", info.content_type),
        ));
    }
    let signed: SignedData = info
        .content
        .decode_as()
        .map_err(|err| Error::signature(None, err))?;

    let signer = select_signer(&signed.signer_infos, cert).map_err(|err| Error::signature(None, err))?;
    let algorithm =
        DigestAlgorithm::from_oid(&signer.digest_alg.oid).map_err(|err| Error::signature(None, err))?;
    let fail = |reason: String| Error::signature(Some(algorithm), reason);

    // Only PKCS#1 v1.5 with a digest matching the signer's is understood
    let sig_oid = &signer.signature_algorithm.oid;
    match DigestAlgorithm::from_signature_oid(sig_oid) {
        Some(implied) if implied != algorithm => {
            return Err(fail(format!("signature algorithm {sig_oid} contradicts digest")));
        }
        None if *sig_oid != RSA_ENCRYPTION => {
            return Err(fail(format!("unsupported signature algorithm {sig_oid}")));
        }
        _ => {}
    }
    let key = identity::public_key(cert).map_err(|err| fail(err.to_string()))?;
    let sig = signer.signature.as_bytes();

    let digest = match &signer.signed_attrs {
        Some(attrs) => {
            let content_type: ObjectIdentifier = attribute(attrs, ID_CONTENT_TYPE).map_err(&fail)?;
            if content_type != signed.encap_content_info.econtent_type {
                return Err(fail("content type attribute mismatch".into()));
            }
            let expected: OctetString = attribute(attrs, ID_MESSAGE_DIGEST).map_err(&fail)?;
            let digest = content_digest(content, algorithm, |digest| digest == expected.as_bytes())
                .ok_or_else(|| fail("message digest mismatch".into()))?;

            // The signature covers the attribute set as the signer encoded it
            let encoded = signed_attrs_encoding(&der, sig)
                .ok_or_else(|| fail("signed attributes not found".into()))?;
            verify_digest(&key, algorithm, &algorithm.digest(&encoded), sig)
                .map_err(|_| fail("invalid signature".into()))?;
            digest
        }
        None => content_digest(content, algorithm, |digest| {
            verify_digest(&key, algorithm, digest, sig).is_ok()
        })
        .ok_or_else(|| fail("invalid signature".into()))?,
    };
    debug!(%algorithm, "verified detached signature");
    Ok(Verified { algorithm, digest })
}

/// sign creates a detached DER SignedData over the content with the
/// organization's signing key, embedding its certificate.
pub fn sign(content: &[u8], org: &Organization, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    let cert = org.sign_cert();
    let digest = algorithm.digest(content);

    let attrs: Attributes = SetOfVec::try_from(vec![
        new_attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
        new_attribute(
            ID_SIGNING_TIME,
            Any::encode_from(&UtcTime::from_system_time(SystemTime::now())?)?,
        )?,
        new_attribute(ID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(digest)?)?)?,
    ])?;
    let hashed = algorithm.digest(&attrs.to_der()?);

    let key = org.sign_key()?;
    let signature = key
        .sign(algorithm.pkcs1v15(), &hashed)
        .map_err(|err| Error::Key(format!("signing failed: {err}")))?;
    drop(key);

    let digest_alg = AlgorithmIdentifierOwned {
        oid: algorithm.oid(),
        parameters: None,
    };
    let signer = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_alg.clone(),
        signed_attrs: Some(attrs),
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION,
            parameters: Some(Any::null()),
        },
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };
    let signed = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet::try_from(vec![CertificateChoices::Certificate(
            cert.clone(),
        )])?),
        crls: None,
        signer_infos: SignerInfos::try_from(vec![signer])?,
    };
    let info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed)?,
    };
    debug!(%algorithm, size = content.len(), "created detached signature");
    Ok(info.to_der()?)
}

/// Digests the content as is and, failing the check, in canonical CRLF form.
/// Some peers sign canonicalized text but transmit it with bare LF endings.
fn content_digest(
    content: &[u8],
    algorithm: DigestAlgorithm,
    check: impl Fn(&[u8]) -> bool,
) -> Option<Vec<u8>> {
    let digest = algorithm.digest(content);
    if check(&digest) {
        return Some(digest);
    }
    let canonical = mime::canonicalize(content);
    if canonical.len() == content.len() {
        return None;
    }
    let digest = algorithm.digest(&canonical);
    if check(&digest) {
        warn!("signature matched only after line ending canonicalization");
        return Some(digest);
    }
    None
}

fn verify_digest(
    key: &RsaPublicKey,
    algorithm: DigestAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> rsa::Result<()> {
    key.verify(algorithm.pkcs1v15(), digest, signature)
}

/// Picks the signer matching the certificate, or the only signer there is.
fn select_signer<'a>(
    signers: &'a SignerInfos,
    cert: &Certificate,
) -> std::result::Result<&'a SignerInfo, String> {
    let ski = identity::subject_key_id(cert);
    let matching = signers.0.iter().find(|si| match &si.sid {
        SignerIdentifier::IssuerAndSerialNumber(ias) => {
            ias.issuer == cert.tbs_certificate.issuer
                && ias.serial_number == cert.tbs_certificate.serial_number
        }
        SignerIdentifier::SubjectKeyIdentifier(id) => ski.as_deref() == Some(id.0.as_bytes()),
    });
    if let Some(signer) = matching {
        return Ok(signer);
    }
    match signers.0.as_slice() {
        [only] => {
            warn!("no signer matches the partner certificate, trying the only one");
            Ok(only)
        }
        [] => Err("no signer information".into()),
        all => Err(format!("none of {} signers matches the partner certificate", all.len())),
    }
}

/// Finds the signed attributes of the signer carrying the given signature
/// value in their received order, re-tagged from the implicit [0] to the SET
/// OF they are signed as. Decoding the attributes sorts them, so the decoded
/// set cannot be re-encoded for hashing.
fn signed_attrs_encoding(der: &[u8], signature: &[u8]) -> Option<Vec<u8>> {
    let root = ber::Tlv::parse(der).ok()?;

    // ContentInfo -> [0] -> SignedData -> SignerInfos
    let signers = root.children().get(1)?.children().first()?.children().last()?;
    let signer = signers.children().iter().find(|si| {
        si.children()
            .iter()
            .any(|field| field.tag() == 0x04 && field.content() == Some(signature))
    })?;
    let attrs = signer.children().iter().find(|field| field.tag() == 0xa0)?;

    let mut encoded = attrs.to_der();
    encoded[0] = 0x31;
    Some(encoded)
}

/// Extracts the single value of a signed attribute.
fn attribute<T>(attrs: &Attributes, oid: ObjectIdentifier) -> std::result::Result<T, String>
where
    T: for<'a> der::Decode<'a>,
{
    let attr = attrs
        .iter()
        .find(|a| a.oid == oid)
        .ok_or_else(|| format!("missing signed attribute {oid}"))?;
    let [value] = attr.values.as_slice() else {
        return Err(format!("signed attribute {oid} must have a single value"));
    };
    let encoded = value.to_der().map_err(|err| err.to_string())?;
    T::from_der(&encoded).map_err(|err| format!("invalid signed attribute {oid}: {err}"))
}

fn new_attribute(oid: ObjectIdentifier, value: Any) -> der::Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Partner;
    use crate::mime::{self, Headers, PartTree};

    fn organization() -> Organization {
        let pem = include_str!("../testdata/org_private.pem");
        Organization::new("p1as2", pem, "test", pem, "test")
            .unwrap_or_else(|e| panic!("failed to load organization: {}", e))
    }

    fn partner() -> Partner {
        let cert = include_str!("../testdata/partner_cert.pem");
        Partner::new("mecas2", cert, cert, true).unwrap()
    }

    // Splits a signed fixture into its raw content and signature.
    fn fixture_parts(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let (headers, offset) = Headers::parse(data).unwrap();
        match mime::parse(&data[offset..], &headers).unwrap() {
            PartTree::Signed {
                content, signature, ..
            } => (content.raw().to_vec(), signature),
            other => panic!("expected signed tree, got {other:?}"),
        }
    }

    // Tests that a DER signature produced with:
    //   openssl cms -sign -binary -md sha1 -outform DER
    // verifies in either mode.
    #[test]
    fn test_verify_fixture_der() {
        let (content, signature) = fixture_parts(include_bytes!("../testdata/mecas2_signed.as2"));
        let cert = partner().verify_cert().clone();

        for indefinite in [false, true] {
            let verified = verify(&content, &signature, &cert, indefinite).unwrap();
            assert_eq!(verified.algorithm, DigestAlgorithm::Sha1);
            assert_eq!(verified.digest, DigestAlgorithm::Sha1.digest(&content));
        }
    }

    // Tests that a streamed BER signature (openssl cms -sign -stream) is only
    // accepted when the partner is flagged for indefinite lengths.
    #[test]
    fn test_verify_fixture_ber() {
        let (content, signature) = fixture_parts(include_bytes!("../testdata/mecas2_signed_ber.as2"));
        let cert = partner().verify_cert().clone();

        let verified = verify(&content, &signature, &cert, true).unwrap();
        assert_eq!(verified.algorithm, DigestAlgorithm::Sha1);

        match verify(&content, &signature, &cert, false) {
            Err(Error::SignatureVerification { .. }) => {}
            other => panic!("expected verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip() {
        let org = organization();
        let content = b"Content-Type: application/edi-x12\r\n\r\nISA*00*\r\n";
        for algorithm in DigestAlgorithm::ALL {
            let signature = sign(content, &org, algorithm).unwrap();
            let verified = verify(content, &signature, org.sign_cert(), false).unwrap();
            assert_eq!(verified.algorithm, algorithm);
            assert_eq!(verified.digest, algorithm.digest(content));
        }
    }

    // Tests that any modification of the content or the signature is caught.
    #[test]
    fn test_verify_tampered() {
        let (content, signature) = fixture_parts(include_bytes!("../testdata/mecas2_signed.as2"));
        let cert = partner().verify_cert().clone();

        let mut altered = content.clone();
        let last = altered.len() - 3;
        altered[last] ^= 0x20;
        assert!(matches!(
            verify(&altered, &signature, &cert, false),
            Err(Error::SignatureVerification { algorithm: Some(DigestAlgorithm::Sha1), .. })
        ));

        let mut altered = signature.clone();
        let info = ContentInfo::from_der(&signature).unwrap();
        let signed: SignedData = info.content.decode_as().unwrap();
        let raw = signed.signer_infos.0.iter().next().unwrap().signature.as_bytes().to_vec();
        let pos = altered.windows(raw.len()).position(|w| w == raw).unwrap();
        altered[pos + raw.len() - 1] ^= 0x01;
        assert!(matches!(
            verify(&content, &altered, &cert, false),
            Err(Error::SignatureVerification { .. })
        ));
    }

    // Tests that a signature is rejected against another party's certificate.
    #[test]
    fn test_verify_wrong_certificate() {
        let (content, signature) = fixture_parts(include_bytes!("../testdata/mecas2_signed.as2"));
        let org = organization();
        assert!(verify(&content, &signature, org.sign_cert(), false).is_err());
    }

    // Tests that content signed in canonical form but received with bare LF
    // line endings still verifies, reporting the canonical digest.
    #[test]
    fn test_verify_canonicalized() {
        let org = organization();
        let canonical = b"Content-Type: text/plain\r\n\r\nline one\r\nline two\r\n";
        let signature = sign(canonical, &org, DigestAlgorithm::Sha256).unwrap();

        let received = b"Content-Type: text/plain\n\nline one\nline two\n";
        let verified = verify(received, &signature, org.sign_cert(), false).unwrap();
        assert_eq!(verified.digest, DigestAlgorithm::Sha256.digest(canonical));
    }

    // Tests that signed attributes are hashed in the order the signer sent
    // them, even when that is not the DER sort order.
    #[test]
    fn test_verify_unsorted_attributes() {
        let org = organization();
        let content = b"Content-Type: text/plain\r\n\r\nhello\r\n";
        let algorithm = DigestAlgorithm::Sha256;
        let mut signature = sign(content, &org, algorithm).unwrap();

        let info = ContentInfo::from_der(&signature).unwrap();
        let signed: SignedData = info.content.decode_as().unwrap();
        let signer = signed.signer_infos.0.iter().next().unwrap();
        let attrs = signer.signed_attrs.as_ref().unwrap();

        // Reverse the attributes in place and sign over the reversed set
        let sorted: Vec<u8> = attrs.iter().flat_map(|a| a.to_der().unwrap()).collect();
        let reversed: Vec<u8> = attrs.iter().rev().flat_map(|a| a.to_der().unwrap()).collect();
        assert_ne!(sorted, reversed);
        let pos = signature.windows(sorted.len()).position(|w| w == sorted).unwrap();
        signature[pos..pos + sorted.len()].copy_from_slice(&reversed);

        let mut set = attrs.to_der().unwrap();
        set.truncate(set.len() - sorted.len());
        set.extend_from_slice(&reversed);
        let resigned = org
            .sign_key()
            .unwrap()
            .sign(algorithm.pkcs1v15(), &algorithm.digest(&set))
            .unwrap();

        let old = signer.signature.as_bytes();
        let pos = signature.windows(old.len()).position(|w| w == old).unwrap();
        signature[pos..pos + old.len()].copy_from_slice(&resigned);

        let verified = verify(content, &signature, org.sign_cert(), false).unwrap();
        assert_eq!(verified.digest, algorithm.digest(content));
    }

    #[test]
    fn test_verify_garbage() {
        let cert = partner().verify_cert().clone();
        assert!(matches!(
            verify(b"data", b"\x30\x80\x00\x00", &cert, false),
            Err(Error::SignatureVerification { algorithm: None, .. })
        ));
        assert!(matches!(
            verify(b"data", b"not cms", &cert, true),
            Err(Error::SignatureVerification { algorithm: None, .. })
        ));
    }
}
