// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! CMS EnvelopedData with RSA key transport and CBC content ciphers.
//!
//! https://datatracker.ietf.org/doc/html/rfc5652#section-6
//! https://datatracker.ietf.org/doc/html/rfc3370#section-4.2

use crate::algorithm::{EncryptionAlgorithm, ID_DATA, ID_ENVELOPED_DATA, RSA_ENCRYPTION};
use crate::ber::{self, Tlv};
use crate::error::{Error, Result};
use crate::identity::{self, Organization};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use cms::cert::IssuerAndSerialNumber;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use der::asn1::OctetString;
use der::{Any, Decode, Encode};
use rsa::Pkcs1v15Encrypt;
use rsa::rand_core::{OsRng, RngCore};
use spki::AlgorithmIdentifierOwned;
use tracing::{debug, warn};
use x509_cert::Certificate;
use zeroize::Zeroizing;

/// decrypt opens a DER or BER encoded EnvelopedData ContentInfo addressed to
/// the organization, returning the plaintext and the content cipher used.
pub fn decrypt(data: &[u8], org: &Organization) -> Result<(Vec<u8>, EncryptionAlgorithm)> {
    let der = normalize(data).map_err(|err| Error::decryption(None, err))?;
    let info = ContentInfo::from_der(&der).map_err(|err| Error::decryption(None, err))?;
    if info.content_type != ID_ENVELOPED_DATA {
        return Err(Error::decryption(
            None,
            format!("unexpected content type {}", info.content_type),
        ));
    }
    let enveloped: EnvelopedData = info
        .content
        .decode_as()
        .map_err(|err| Error::decryption(None, err))?;

    // Resolve the content cipher first so every later failure can name it
    let eci = &enveloped.encrypted_content;
    let algorithm =
        EncryptionAlgorithm::from_oid(&eci.content_enc_alg.oid).map_err(|err| Error::decryption(None, err))?;
    let fail = |reason: String| Error::decryption(Some(algorithm), reason);

    let iv: OctetString = eci
        .content_enc_alg
        .parameters
        .as_ref()
        .ok_or_else(|| fail("missing initialization vector".into()))?
        .decode_as()
        .map_err(|err| fail(format!("invalid initialization vector: {err}")))?;
    if iv.as_bytes().len() != algorithm.block_size() {
        return Err(fail(format!(
            "initialization vector is {} bytes, want {}",
            iv.as_bytes().len(),
            algorithm.block_size()
        )));
    }
    let ciphertext = eci
        .encrypted_content
        .as_ref()
        .ok_or_else(|| fail("detached encrypted content".into()))?;

    // Unwrap the content encryption key with the organization's key
    let recipient = select_recipient(&enveloped.recip_infos, org.decrypt_cert()).map_err(fail)?;
    if recipient.key_enc_alg.oid != RSA_ENCRYPTION {
        return Err(fail(format!(
            "unsupported key transport algorithm {}",
            recipient.key_enc_alg.oid
        )));
    }
    let key = org.decrypt_key().map_err(|err| fail(err.to_string()))?;
    let cek = Zeroizing::new(
        key.decrypt(Pkcs1v15Encrypt, recipient.enc_key.as_bytes())
            .map_err(|err| fail(format!("key transport: {err}")))?,
    );
    drop(key);
    if cek.len() != algorithm.key_size() {
        return Err(fail(format!(
            "content key is {} bytes, want {}",
            cek.len(),
            algorithm.key_size()
        )));
    }

    let plain = match algorithm {
        EncryptionAlgorithm::TripleDes192Cbc => {
            cbc_decrypt::<des::TdesEde3>(&cek, iv.as_bytes(), ciphertext.as_bytes())
        }
        EncryptionAlgorithm::Aes128Cbc => {
            cbc_decrypt::<aes::Aes128>(&cek, iv.as_bytes(), ciphertext.as_bytes())
        }
        EncryptionAlgorithm::Aes192Cbc => {
            cbc_decrypt::<aes::Aes192>(&cek, iv.as_bytes(), ciphertext.as_bytes())
        }
        EncryptionAlgorithm::Aes256Cbc => {
            cbc_decrypt::<aes::Aes256>(&cek, iv.as_bytes(), ciphertext.as_bytes())
        }
    }
    .map_err(fail)?;

    debug!(%algorithm, size = plain.len(), "decrypted CMS content");
    Ok((plain, algorithm))
}

/// encrypt seals the data for the holder of the certificate with a fresh
/// content key, producing a DER encoded EnvelopedData ContentInfo.
pub fn encrypt(data: &[u8], cert: &Certificate, algorithm: EncryptionAlgorithm) -> Result<Vec<u8>> {
    let mut cek = Zeroizing::new(vec![0u8; algorithm.key_size()]);
    OsRng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; algorithm.block_size()];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = match algorithm {
        EncryptionAlgorithm::TripleDes192Cbc => cbc_encrypt::<des::TdesEde3>(&cek, &iv, data),
        EncryptionAlgorithm::Aes128Cbc => cbc_encrypt::<aes::Aes128>(&cek, &iv, data),
        EncryptionAlgorithm::Aes192Cbc => cbc_encrypt::<aes::Aes192>(&cek, &iv, data),
        EncryptionAlgorithm::Aes256Cbc => cbc_encrypt::<aes::Aes256>(&cek, &iv, data),
    }
    .map_err(Error::Key)?;

    let enc_key = identity::public_key(cert)?
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &cek)
        .map_err(|err| Error::Key(format!("key transport: {err}")))?;

    let recipient = KeyTransRecipientInfo {
        version: CmsVersion::V0,
        rid: RecipientIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        }),
        key_enc_alg: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION,
            parameters: Some(Any::null()),
        },
        enc_key: OctetString::new(enc_key)?,
    };
    let enveloped = EnvelopedData {
        version: CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos::try_from(vec![RecipientInfo::Ktri(recipient)])?,
        encrypted_content: EncryptedContentInfo {
            content_type: ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(Any::encode_from(&OctetString::new(iv)?)?),
            },
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    };
    let info = ContentInfo {
        content_type: ID_ENVELOPED_DATA,
        content: Any::encode_from(&enveloped)?,
    };
    debug!(%algorithm, size = data.len(), "encrypted CMS content");
    Ok(info.to_der()?)
}

/// Picks the key transport recipient matching the certificate. A message with
/// a single recipient that does not match is still tried, some peers put a
/// stale certificate reference in there.
fn select_recipient<'a>(
    recipients: &'a RecipientInfos,
    cert: &Certificate,
) -> std::result::Result<&'a KeyTransRecipientInfo, String> {
    let ski = identity::subject_key_id(cert);
    let ktris: Vec<_> = recipients
        .0
        .iter()
        .filter_map(|ri| match ri {
            RecipientInfo::Ktri(ktri) => Some(ktri),
            _ => None,
        })
        .collect();

    let matching = ktris.iter().find(|ktri| match &ktri.rid {
        RecipientIdentifier::IssuerAndSerialNumber(ias) => {
            ias.issuer == cert.tbs_certificate.issuer
                && ias.serial_number == cert.tbs_certificate.serial_number
        }
        RecipientIdentifier::SubjectKeyIdentifier(id) => {
            ski.as_deref() == Some(id.0.as_bytes())
        }
    });
    match (matching, ktris.as_slice()) {
        (Some(ktri), _) => Ok(ktri),
        (None, [only]) => {
            warn!("no recipient matches the decryption certificate, trying the only one");
            Ok(only)
        }
        (None, []) => Err("no key transport recipient".into()),
        (None, _) => Err(format!("none of {} recipients matches the decryption certificate", ktris.len())),
    }
}

/// Converts BER to DER, including the implicitly tagged encryptedContent which
/// streaming encoders emit as a constructed [0] of OCTET STRING segments.
fn normalize(data: &[u8]) -> std::result::Result<Vec<u8>, ber::Error> {
    let mut root = Tlv::parse(ber::trim_padding(data))?;
    root.canonicalize()?;

    // ContentInfo -> [0] -> EnvelopedData -> EncryptedContentInfo -> [0]
    let eci = root
        .children_mut()
        .and_then(|c| c.get_mut(1))
        .and_then(Tlv::children_mut)
        .and_then(|c| c.get_mut(0))
        .and_then(Tlv::children_mut)
        .and_then(|c| c.iter_mut().find(|t| t.tag() == 0x30));
    if let Some(content) = eci
        .and_then(Tlv::children_mut)
        .and_then(|c| c.get_mut(2))
        .filter(|t| t.tag() == 0xa0)
    {
        content.flatten()?;
    }
    Ok(root.to_der())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, String>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|err| err.to_string())?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| "invalid padding".to_string())
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, String>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    Ok(cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|err| err.to_string())?
        .encrypt_padded_vec_mut::<Pkcs7>(data))
}
