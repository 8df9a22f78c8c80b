// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Algorithm registry mapping CMS object identifiers to canonical names.
//!
//! https://datatracker.ietf.org/doc/html/rfc5751#section-3.4.3.2
//! https://datatracker.ietf.org/doc/html/rfc3370

use const_oid::ObjectIdentifier;
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// OID for id-data: 1.2.840.113549.1.7.1
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");

/// OID for id-signedData: 1.2.840.113549.1.7.2
pub const ID_SIGNED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// OID for id-envelopedData: 1.2.840.113549.1.7.3
pub const ID_ENVELOPED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");

/// OID for id-ct-compressedData: 1.2.840.113549.1.9.16.1.9
pub const ID_COMPRESSED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.9");

/// OID for id-alg-zlibCompress: 1.2.840.113549.1.9.16.3.8
pub const ID_ALG_ZLIB_COMPRESS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.3.8");

/// OID for the contentType attribute: 1.2.840.113549.1.9.3
pub const ID_CONTENT_TYPE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");

/// OID for the messageDigest attribute: 1.2.840.113549.1.9.4
pub const ID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// OID for the signingTime attribute: 1.2.840.113549.1.9.5
pub const ID_SIGNING_TIME: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

/// OID for rsaEncryption: 1.2.840.113549.1.1.1
pub const RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

// PKCS#1 v1.5 signature OIDs some peers put into signatureAlgorithm instead
// of plain rsaEncryption.
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const SHA224_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.14");

const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const ID_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const ID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const ID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

const DES_EDE3_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.3.7");
const AES128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const AES192_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.22");
const AES256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

/// UnknownAlgorithm is returned when a name or OID is not in the registry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported {family} algorithm: {value}")]
pub struct UnknownAlgorithm {
    pub family: &'static str,
    pub value: String,
}

/// DigestAlgorithm is the set of message digests usable for signatures and
/// MICs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// All supported digests, weakest first.
    pub const ALL: [DigestAlgorithm; 5] = [
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// as_str returns the canonical identifier of the digest.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha224 => "sha224",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// micalg returns the RFC 5751 name used in the micalg parameter and in
    /// the Received-content-MIC field.
    pub fn micalg(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha224 => "sha-224",
            DigestAlgorithm::Sha256 => "sha-256",
            DigestAlgorithm::Sha384 => "sha-384",
            DigestAlgorithm::Sha512 => "sha-512",
        }
    }

    /// oid returns the object identifier of the digest.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => ID_SHA1,
            DigestAlgorithm::Sha224 => ID_SHA224,
            DigestAlgorithm::Sha256 => ID_SHA256,
            DigestAlgorithm::Sha384 => ID_SHA384,
            DigestAlgorithm::Sha512 => ID_SHA512,
        }
    }

    /// from_oid resolves a digest object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self, UnknownAlgorithm> {
        DigestAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or_else(|| UnknownAlgorithm {
                family: "digest",
                value: oid.to_string(),
            })
    }

    /// from_signature_oid resolves the digest implied by a PKCS#1 v1.5
    /// signature algorithm identifier. Plain rsaEncryption implies nothing.
    pub fn from_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            (SHA1_WITH_RSA, DigestAlgorithm::Sha1),
            (SHA224_WITH_RSA, DigestAlgorithm::Sha224),
            (SHA256_WITH_RSA, DigestAlgorithm::Sha256),
            (SHA384_WITH_RSA, DigestAlgorithm::Sha384),
            (SHA512_WITH_RSA, DigestAlgorithm::Sha512),
        ]
        .into_iter()
        .find(|(known, _)| known == oid)
        .map(|(_, alg)| alg)
    }

    /// digest hashes the data with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// pkcs1v15 returns the RSA PKCS#1 v1.5 signature scheme for this digest.
    pub(crate) fn pkcs1v15(&self) -> Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            DigestAlgorithm::Sha224 => Pkcs1v15Sign::new::<Sha224>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithm;

    /// Parses both the canonical names and the micalg spellings, with or
    /// without the dash and in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "");
        DigestAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == name)
            .ok_or_else(|| UnknownAlgorithm {
                family: "digest",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DigestAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// EncryptionAlgorithm is the set of content-encryption ciphers usable for
/// CMS EnvelopedData.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    TripleDes192Cbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl EncryptionAlgorithm {
    /// All supported ciphers.
    pub const ALL: [EncryptionAlgorithm; 4] = [
        EncryptionAlgorithm::TripleDes192Cbc,
        EncryptionAlgorithm::Aes128Cbc,
        EncryptionAlgorithm::Aes192Cbc,
        EncryptionAlgorithm::Aes256Cbc,
    ];

    /// as_str returns the canonical identifier of the cipher.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::TripleDes192Cbc => "tripledes_192_cbc",
            EncryptionAlgorithm::Aes128Cbc => "aes_128_cbc",
            EncryptionAlgorithm::Aes192Cbc => "aes_192_cbc",
            EncryptionAlgorithm::Aes256Cbc => "aes_256_cbc",
        }
    }

    /// oid returns the object identifier of the cipher.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            EncryptionAlgorithm::TripleDes192Cbc => DES_EDE3_CBC,
            EncryptionAlgorithm::Aes128Cbc => AES128_CBC,
            EncryptionAlgorithm::Aes192Cbc => AES192_CBC,
            EncryptionAlgorithm::Aes256Cbc => AES256_CBC,
        }
    }

    /// from_oid resolves a content-encryption object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self, UnknownAlgorithm> {
        EncryptionAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or_else(|| UnknownAlgorithm {
                family: "encryption",
                value: oid.to_string(),
            })
    }

    /// key_size returns the content-encryption key length in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            EncryptionAlgorithm::TripleDes192Cbc => 24,
            EncryptionAlgorithm::Aes128Cbc => 16,
            EncryptionAlgorithm::Aes192Cbc => 24,
            EncryptionAlgorithm::Aes256Cbc => 32,
        }
    }

    /// block_size returns the cipher block length in bytes, which is also the
    /// length of the CBC initialization vector.
    pub fn block_size(&self) -> usize {
        match self {
            EncryptionAlgorithm::TripleDes192Cbc => 8,
            _ => 16,
        }
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        EncryptionAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == name)
            .ok_or_else(|| UnknownAlgorithm {
                family: "encryption",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EncryptionAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EncryptionAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that every registered algorithm maps to its OID and back.
    #[test]
    fn test_oid_mapping() {
        for alg in DigestAlgorithm::ALL {
            assert_eq!(DigestAlgorithm::from_oid(&alg.oid()).unwrap(), alg);
        }
        for alg in EncryptionAlgorithm::ALL {
            assert_eq!(EncryptionAlgorithm::from_oid(&alg.oid()).unwrap(), alg);
        }
        assert_eq!(
            EncryptionAlgorithm::from_oid(&DES_EDE3_CBC).unwrap().as_str(),
            "tripledes_192_cbc"
        );
        assert_eq!(DigestAlgorithm::from_oid(&ID_SHA1).unwrap().as_str(), "sha1");

        let err = EncryptionAlgorithm::from_oid(&RSA_ENCRYPTION).unwrap_err();
        assert_eq!(err.value, "1.2.840.113549.1.1.1");
    }

    // Tests that micalg values are accepted in both the RFC 3851 and the
    // RFC 5751 spelling, and rendered in the latter.
    #[test]
    fn test_micalg_names() {
        let tests = [
            ("sha1", DigestAlgorithm::Sha1),
            ("SHA-1", DigestAlgorithm::Sha1),
            ("sha256", DigestAlgorithm::Sha256),
            ("sha-256", DigestAlgorithm::Sha256),
            ("sha-384", DigestAlgorithm::Sha384),
            ("Sha512", DigestAlgorithm::Sha512),
        ];
        for (name, alg) in tests {
            assert_eq!(name.parse::<DigestAlgorithm>().unwrap(), alg, "parsing {name}");
        }
        assert_eq!(DigestAlgorithm::Sha256.micalg(), "sha-256");
        assert_eq!(DigestAlgorithm::Sha1.micalg(), "sha1");
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }

    // Tests that the known digest outputs have the expected sizes and that
    // sha1 matches a published vector.
    #[test]
    fn test_digest() {
        assert_eq!(
            hex::encode(DigestAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        let sizes = [20, 28, 32, 48, 64];
        for (alg, size) in DigestAlgorithm::ALL.into_iter().zip(sizes) {
            assert_eq!(alg.digest(b"abc").len(), size);
        }
    }

    // Tests that the algorithms serialize as their canonical names so partner
    // profiles can be stored in configuration files.
    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&EncryptionAlgorithm::Aes256Cbc).unwrap();
        assert_eq!(json, "\"aes_256_cbc\"");

        let alg: DigestAlgorithm = serde_json::from_str("\"sha-256\"").unwrap();
        assert_eq!(alg, DigestAlgorithm::Sha256);

        assert!(serde_json::from_str::<EncryptionAlgorithm>("\"rc2_40_cbc\"").is_err());
    }
}
