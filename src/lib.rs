// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! AS2 (RFC 4130) message security: S/MIME signing, encryption and
//! compression of business documents, and the MDN receipts acknowledging them.

pub mod algorithm;
pub mod ber;
pub mod compress;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod mdn;
pub mod message;
pub mod mic;
pub mod mime;
pub mod pem;
pub mod signature;

pub use algorithm::{DigestAlgorithm, EncryptionAlgorithm};
pub use directory::{Directory, FnDirectory, StaticDirectory};
pub use error::{Error, LookupKind, Result};
pub use identity::{MdnMode, Organization, Partner, PartnerSettings};
pub use mdn::{Disposition, Mdn, MdnRequest};
pub use message::{BuildOptions, Message, Payload};
pub use mic::Mic;
