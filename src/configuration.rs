//! Vendor-independent device configuration.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use serde::Serialize;

use crate::acl::{IpAccessList, NamedAcls};
use crate::error::{Error, ReferenceKind, Result};
use crate::ip_space::{IpSpace, NamedIpSpaces};

/// The parts of one device's configuration the analyses need.
///
/// Construction validates every reference, so analyses never see an undefined or cyclic name.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Configuration {
    hostname: String,
    acls: NamedAcls,
    ip_spaces: NamedIpSpaces,
    interfaces: BTreeSet<String>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search for undefined names and cycles in a reference graph.
fn check_references<'n>(
    kind: ReferenceKind,
    edges: &BTreeMap<&'n str, BTreeSet<String>>,
) -> Result<()> {
    fn visit<'n>(
        kind: ReferenceKind,
        name: &str,
        edges: &BTreeMap<&'n str, BTreeSet<String>>,
        marks: &mut BTreeMap<&'n str, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(Error::cyclic(kind, stack, name)),
            None => {}
        }
        let (&key, targets) = edges
            .get_key_value(name)
            .ok_or_else(|| Error::undefined(kind, name))?;
        marks.insert(key, Mark::Visiting);
        stack.push(name.to_string());
        for target in targets {
            visit(kind, target, edges, marks, stack)?;
        }
        stack.pop();
        marks.insert(key, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    for &name in edges.keys() {
        visit(kind, name, edges, &mut marks, &mut stack)?;
    }
    Ok(())
}

impl Configuration {
    pub fn new<S: Into<String>>(
        hostname: impl Into<String>,
        acls: impl IntoIterator<Item = IpAccessList>,
        ip_spaces: NamedIpSpaces,
        interfaces: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let hostname = hostname.into();
        let acls: NamedAcls = acls
            .into_iter()
            .map(|acl| (acl.name().to_string(), acl))
            .collect();
        let interfaces: BTreeSet<String> = interfaces.into_iter().map(Into::into).collect();

        let space_edges: BTreeMap<&str, BTreeSet<String>> = ip_spaces
            .iter()
            .map(|(name, space)| (name.as_str(), space.references()))
            .collect();
        check_references(ReferenceKind::IpSpace, &space_edges)?;

        let acl_edges: BTreeMap<&str, BTreeSet<String>> = acls
            .iter()
            .map(|(name, acl)| (name.as_str(), acl.referenced_acls()))
            .collect();
        check_references(ReferenceKind::Acl, &acl_edges)?;

        for acl in acls.values() {
            for line in acl.lines() {
                line.match_condition.validate()?;
            }
            for name in acl.referenced_ip_spaces() {
                if !ip_spaces.contains_key(&name) {
                    return Err(Error::undefined(ReferenceKind::IpSpace, name));
                }
            }
            for name in acl.referenced_interfaces() {
                if !interfaces.contains(&name) {
                    return Err(Error::undefined(ReferenceKind::Interface, name));
                }
            }
            if acl.lines().is_empty() {
                warn!("{}: ACL `{}` has no lines and denies everything", hostname, acl.name());
            }
        }

        debug!(
            "{}: {} ACLs, {} IP spaces, {} interfaces",
            hostname,
            acls.len(),
            ip_spaces.len(),
            interfaces.len()
        );
        Ok(Self {
            hostname,
            acls,
            ip_spaces,
            interfaces,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn acls(&self) -> &NamedAcls {
        &self.acls
    }

    pub fn ip_spaces(&self) -> &NamedIpSpaces {
        &self.ip_spaces
    }

    pub fn ip_space(&self, name: &str) -> Option<&IpSpace> {
        self.ip_spaces.get(name)
    }

    pub fn interfaces(&self) -> &BTreeSet<String> {
        &self.interfaces
    }

    pub fn acl(&self, name: &str) -> Result<&IpAccessList> {
        self.acls
            .get(name)
            .ok_or_else(|| Error::undefined(ReferenceKind::Acl, name))
    }
}
