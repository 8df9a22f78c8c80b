// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Lookup of the organization and partner a message is exchanged between.

use crate::identity::{Organization, Partner};
use crate::mime::Headers;
use std::collections::HashMap;
use std::sync::Arc;

/// Directory resolves the local organization and the remote partner of an
/// inbound message from its transport headers. Each lookup is called exactly
/// once per parsed message, before any security layer is touched.
pub trait Directory {
    fn lookup_organization(&self, headers: &Headers) -> Option<Arc<Organization>>;
    fn lookup_partner(&self, headers: &Headers) -> Option<Arc<Partner>>;
}

/// StaticDirectory is an in-memory directory keyed by AS2 identifier: the
/// organization by AS2-To and the partner by AS2-From.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    organizations: HashMap<String, Arc<Organization>>,
    partners: HashMap<String, Arc<Partner>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// add_organization registers an organization under its AS2 identifier.
    pub fn add_organization(&mut self, org: Organization) -> Arc<Organization> {
        let org = Arc::new(org);
        self.organizations.insert(org.as2_id().to_string(), org.clone());
        org
    }

    /// add_partner registers a partner under its AS2 identifier.
    pub fn add_partner(&mut self, partner: Partner) -> Arc<Partner> {
        let partner = Arc::new(partner);
        self.partners.insert(partner.as2_id().to_string(), partner.clone());
        partner
    }

    pub fn organization(&self, as2_id: &str) -> Option<Arc<Organization>> {
        self.organizations.get(as2_id).cloned()
    }

    pub fn partner(&self, as2_id: &str) -> Option<Arc<Partner>> {
        self.partners.get(as2_id).cloned()
    }
}

impl Directory for StaticDirectory {
    fn lookup_organization(&self, headers: &Headers) -> Option<Arc<Organization>> {
        self.organization(unquote(headers.get("AS2-To")?))
    }

    fn lookup_partner(&self, headers: &Headers) -> Option<Arc<Partner>> {
        self.partner(unquote(headers.get("AS2-From")?))
    }
}

/// FnDirectory adapts a pair of closures into a directory.
pub struct FnDirectory<O, P> {
    organization: O,
    partner: P,
}

impl<O, P> FnDirectory<O, P>
where
    O: Fn(&Headers) -> Option<Arc<Organization>>,
    P: Fn(&Headers) -> Option<Arc<Partner>>,
{
    pub fn new(organization: O, partner: P) -> Self {
        Self {
            organization,
            partner,
        }
    }
}

impl<O, P> Directory for FnDirectory<O, P>
where
    O: Fn(&Headers) -> Option<Arc<Organization>>,
    P: Fn(&Headers) -> Option<Arc<Partner>>,
{
    fn lookup_organization(&self, headers: &Headers) -> Option<Arc<Organization>> {
        (self.organization)(headers)
    }

    fn lookup_partner(&self, headers: &Headers) -> Option<Arc<Partner>> {
        (self.partner)(headers)
    }
}

/// AS2 identifiers containing spaces travel as quoted strings.
pub(crate) fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
