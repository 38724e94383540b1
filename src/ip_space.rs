//! Sets of IPv4 addresses.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::acl::LineAction;
use crate::error::{Error, ReferenceKind, Result};
use crate::ip::{IpWildcard, Prefix};

/// Named IP spaces of one device.
pub type NamedIpSpaces = BTreeMap<String, IpSpace>;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum IpSpace {
    Ip(Ipv4Addr),
    Prefix(Prefix),
    Wildcard(IpWildcard),
    /// Ordered permit/deny lines; the first line containing the address decides, default deny.
    AclIpSpace(Vec<AclIpSpaceLine>),
    Union(Vec<IpSpace>),
    Universe,
    Empty,
    Reference(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AclIpSpaceLine {
    pub action: LineAction,
    pub space: IpSpace,
}

impl AclIpSpaceLine {
    pub fn permit(space: impl Into<IpSpace>) -> Self {
        Self {
            action: LineAction::Permit,
            space: space.into(),
        }
    }

    pub fn deny(space: impl Into<IpSpace>) -> Self {
        Self {
            action: LineAction::Deny,
            space: space.into(),
        }
    }
}

impl IpSpace {
    pub fn reference(name: impl Into<String>) -> Self {
        IpSpace::Reference(name.into())
    }

    pub fn union(spaces: impl IntoIterator<Item = IpSpace>) -> Self {
        IpSpace::Union(spaces.into_iter().collect())
    }

    /// Whether `ip` belongs to this space, resolving references through `named`.
    pub fn contains(&self, ip: Ipv4Addr, named: &NamedIpSpaces) -> Result<bool> {
        let mut stack = Vec::new();
        self.contains_(ip, named, &mut stack)
    }

    fn contains_(&self, ip: Ipv4Addr, named: &NamedIpSpaces, stack: &mut Vec<String>) -> Result<bool> {
        match self {
            IpSpace::Ip(x) => Ok(*x == ip),
            IpSpace::Prefix(p) => Ok(p.contains(ip)),
            IpSpace::Wildcard(w) => Ok(w.contains(ip)),
            IpSpace::AclIpSpace(lines) => {
                for line in lines {
                    if line.space.contains_(ip, named, stack)? {
                        return Ok(line.action == LineAction::Permit);
                    }
                }
                Ok(false)
            }
            IpSpace::Union(spaces) => {
                for space in spaces {
                    if space.contains_(ip, named, stack)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            IpSpace::Universe => Ok(true),
            IpSpace::Empty => Ok(false),
            IpSpace::Reference(name) => {
                if stack.contains(name) {
                    return Err(Error::cyclic(ReferenceKind::IpSpace, stack, name));
                }
                let space = named
                    .get(name)
                    .ok_or_else(|| Error::undefined(ReferenceKind::IpSpace, name))?;
                stack.push(name.clone());
                let res = space.contains_(ip, named, stack);
                stack.pop();
                res
            }
        }
    }

    /// Names referenced directly by this space (not following them).
    pub fn references(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        self.collect_references(&mut res);
        res
    }

    pub(crate) fn collect_references(&self, res: &mut BTreeSet<String>) {
        match self {
            IpSpace::AclIpSpace(lines) => {
                for line in lines {
                    line.space.collect_references(res);
                }
            }
            IpSpace::Union(spaces) => {
                for space in spaces {
                    space.collect_references(res);
                }
            }
            IpSpace::Reference(name) => {
                res.insert(name.clone());
            }
            _ => {}
        }
    }
}

impl From<Ipv4Addr> for IpSpace {
    fn from(ip: Ipv4Addr) -> Self {
        IpSpace::Ip(ip)
    }
}

impl From<Prefix> for IpSpace {
    fn from(prefix: Prefix) -> Self {
        IpSpace::Prefix(prefix)
    }
}

impl From<IpWildcard> for IpSpace {
    fn from(wildcard: IpWildcard) -> Self {
        IpSpace::Wildcard(wildcard)
    }
}
