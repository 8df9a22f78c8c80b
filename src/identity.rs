// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Local organizations and remote trading partners.
//!
//! An organization owns private keys, a partner only ever carries public
//! certificates. Private keys are kept in their PEM form together with their
//! passphrases and are only decoded for the duration of a single signing or
//! decryption operation.

use crate::algorithm::{DigestAlgorithm, EncryptionAlgorithm};
use crate::error::{Error, Result};
use crate::pem;
use der::{Decode, Encode};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use x509_cert::Certificate;
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use zeroize::Zeroizing;

/// Organization is the local AS2 station: the identity messages are addressed
/// to and sent from.
pub struct Organization {
    as2_id: String,
    sign_key: Zeroizing<String>,
    sign_key_pass: Zeroizing<String>,
    sign_cert: Certificate,
    decrypt_key: Zeroizing<String>,
    decrypt_key_pass: Zeroizing<String>,
    decrypt_cert: Certificate,
}

impl Organization {
    /// new creates an organization from two PEM bundles, each holding a private
    /// key followed by its certificate. Both bundles are decoded and checked
    /// for a matching key and certificate, so a wrong passphrase fails here
    /// rather than on the first message.
    pub fn new(
        as2_id: impl Into<String>,
        sign_key: &str,
        sign_key_pass: &str,
        decrypt_key: &str,
        decrypt_key_pass: &str,
    ) -> Result<Self> {
        let (_, sign_cert) = load_key_pair(sign_key, sign_key_pass)?;
        let (_, decrypt_cert) = load_key_pair(decrypt_key, decrypt_key_pass)?;

        Ok(Self {
            as2_id: as2_id.into(),
            sign_key: Zeroizing::new(sign_key.to_string()),
            sign_key_pass: Zeroizing::new(sign_key_pass.to_string()),
            sign_cert,
            decrypt_key: Zeroizing::new(decrypt_key.to_string()),
            decrypt_key_pass: Zeroizing::new(decrypt_key_pass.to_string()),
            decrypt_cert,
        })
    }

    /// as2_id returns the AS2 identifier of the organization.
    pub fn as2_id(&self) -> &str {
        &self.as2_id
    }

    /// sign_cert returns the certificate matching the signing key.
    pub fn sign_cert(&self) -> &Certificate {
        &self.sign_cert
    }

    /// decrypt_cert returns the certificate matching the decryption key.
    pub fn decrypt_cert(&self) -> &Certificate {
        &self.decrypt_cert
    }

    /// sign_key decodes the signing key. The caller owns it for the duration
    /// of one operation, it is wiped when dropped.
    pub(crate) fn sign_key(&self) -> Result<RsaPrivateKey> {
        load_key_pair(&self.sign_key, &self.sign_key_pass).map(|(key, _)| key)
    }

    /// decrypt_key decodes the decryption key, see sign_key.
    pub(crate) fn decrypt_key(&self) -> Result<RsaPrivateKey> {
        load_key_pair(&self.decrypt_key, &self.decrypt_key_pass).map(|(key, _)| key)
    }
}

impl fmt::Debug for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Organization")
            .field("as2_id", &self.as2_id)
            .field("sign_cert", &self.sign_cert.tbs_certificate.subject.to_string())
            .field("decrypt_cert", &self.decrypt_cert.tbs_certificate.subject.to_string())
            .finish_non_exhaustive()
    }
}

/// MdnMode is how a partner wants receipts for the messages sent to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdnMode {
    #[default]
    None,
    Sync,
}

/// PartnerSettings is the negotiated security profile of a trading
/// relationship, used both to build outbound messages and to require a
/// minimum protection level on inbound ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerSettings {
    pub digest: DigestAlgorithm,
    pub cipher: EncryptionAlgorithm,
    pub compress: bool,
    pub sign: bool,
    pub encrypt: bool,
    pub mdn_mode: MdnMode,
    pub mdn_digest: Option<DigestAlgorithm>,
}

impl Default for PartnerSettings {
    fn default() -> Self {
        Self {
            digest: DigestAlgorithm::Sha256,
            cipher: EncryptionAlgorithm::TripleDes192Cbc,
            compress: false,
            sign: false,
            encrypt: false,
            mdn_mode: MdnMode::None,
            mdn_digest: None,
        }
    }
}

/// Partner is a remote AS2 station trading with the local organization.
#[derive(Clone)]
pub struct Partner {
    as2_id: String,
    verify_cert: Certificate,
    encrypt_cert: Certificate,
    indefinite_length: bool,
    settings: PartnerSettings,
}

impl Partner {
    /// new creates a partner from PEM encoded certificates. The flag
    /// indefinite_length marks partners known to emit BER indefinite length
    /// signatures, which are only accepted for such partners.
    pub fn new(
        as2_id: impl Into<String>,
        verify_cert: &str,
        encrypt_cert: &str,
        indefinite_length: bool,
    ) -> Result<Self> {
        let verify_cert = load_cert(verify_cert)?;
        let encrypt_cert = load_cert(encrypt_cert)?;
        public_key(&verify_cert)?;
        public_key(&encrypt_cert)?;

        Ok(Self {
            as2_id: as2_id.into(),
            verify_cert,
            encrypt_cert,
            indefinite_length,
            settings: PartnerSettings::default(),
        })
    }

    /// with_settings replaces the security profile of the partner.
    pub fn with_settings(mut self, settings: PartnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn as2_id(&self) -> &str {
        &self.as2_id
    }

    pub fn verify_cert(&self) -> &Certificate {
        &self.verify_cert
    }

    pub fn encrypt_cert(&self) -> &Certificate {
        &self.encrypt_cert
    }

    pub fn indefinite_length(&self) -> bool {
        self.indefinite_length
    }

    pub fn settings(&self) -> &PartnerSettings {
        &self.settings
    }
}

impl fmt::Debug for Partner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partner")
            .field("as2_id", &self.as2_id)
            .field("verify_cert", &self.verify_cert.tbs_certificate.subject.to_string())
            .field("encrypt_cert", &self.encrypt_cert.tbs_certificate.subject.to_string())
            .field("indefinite_length", &self.indefinite_length)
            .field("settings", &self.settings)
            .finish()
    }
}

/// public_key extracts the RSA public key of a certificate.
pub(crate) fn public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let spki = cert.tbs_certificate.subject_public_key_info.to_der()?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|err| Error::Key(format!("certificate does not hold an RSA key: {err}")))
}

/// subject_key_id returns the subject key identifier extension of a
/// certificate, if it has one.
pub(crate) fn subject_key_id(cert: &Certificate) -> Option<Vec<u8>> {
    match cert.tbs_certificate.get::<SubjectKeyIdentifier>() {
        Ok(Some((_, ski))) => Some(ski.0.as_bytes().to_vec()),
        _ => None,
    }
}

/// Decodes the first certificate of a PEM bundle.
fn load_cert(bundle: &str) -> Result<Certificate> {
    let blocks = Zeroizing::new(pem::decode(bundle.as_bytes()).map_err(|err| Error::Key(err.to_string()))?);
    let block = blocks
        .iter()
        .find(|b| b.kind == "CERTIFICATE")
        .ok_or_else(|| Error::Key("no certificate in PEM bundle".into()))?;
    Certificate::from_der(&block.data).map_err(|err| Error::Key(format!("invalid certificate: {err}")))
}

/// Decodes the private key and certificate of a PEM bundle, verifying that
/// they belong together.
fn load_key_pair(bundle: &str, pass: &str) -> Result<(RsaPrivateKey, Certificate)> {
    let blocks = Zeroizing::new(pem::decode(bundle.as_bytes()).map_err(|err| Error::Key(err.to_string()))?);

    let mut key = None;
    for block in blocks.iter() {
        let data = block.data.as_slice();
        let decoded = match block.kind.as_str() {
            "ENCRYPTED PRIVATE KEY" => RsaPrivateKey::from_pkcs8_encrypted_der(data, pass)
                .map_err(|err| format!("cannot decrypt private key: {err}")),
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(data).map_err(|err| err.to_string()),
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(data).map_err(|err| err.to_string()),
            _ => continue,
        };
        key = Some(decoded.map_err(Error::Key)?);
        break;
    }
    let key = key.ok_or_else(|| Error::Key("no private key in PEM bundle".into()))?;
    let cert = load_cert(bundle)?;

    if public_key(&cert)? != key.to_public_key() {
        return Err(Error::Key("private key does not match certificate".into()));
    }
    Ok((key, cert))
}
