//! Lowering of [`IpSpace`] to BDDs over one 32-bit address field.

use std::collections::HashMap;

use log::debug;

use crate::acl::LineAction;
use crate::bdd::Bdd;
use crate::error::{Error, ReferenceKind, Result};
use crate::ip::{IpWildcard, Prefix};
use crate::ip_space::{IpSpace, NamedIpSpaces};
use crate::packet::BddInteger;
use crate::reference::Ref;

pub struct IpSpaceToBdd<'a> {
    bdd: &'a Bdd,
    var: &'a BddInteger,
    named: &'a NamedIpSpaces,
    max_depth: usize,
    /// Compiled named spaces.
    cache: HashMap<String, Ref>,
    stack: Vec<String>,
}

impl<'a> IpSpaceToBdd<'a> {
    pub fn new(bdd: &'a Bdd, var: &'a BddInteger, named: &'a NamedIpSpaces, max_depth: usize) -> Self {
        Self {
            bdd,
            var,
            named,
            max_depth,
            cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn prefix(&self, prefix: &Prefix) -> Result<Ref> {
        self.var.first_bits_equal(
            self.bdd,
            u64::from(u32::from(prefix.network())),
            prefix.prefix_len() as usize,
        )
    }

    pub fn wildcard(&self, wildcard: &IpWildcard) -> Result<Ref> {
        self.var.masked(
            self.bdd,
            u64::from(u32::from(wildcard.ip())),
            u64::from(wildcard.wildcard()),
        )
    }

    pub fn compile(&mut self, space: &IpSpace) -> Result<Ref> {
        match space {
            IpSpace::Ip(ip) => self.var.value(self.bdd, u64::from(u32::from(*ip))),
            IpSpace::Prefix(prefix) => self.prefix(prefix),
            IpSpace::Wildcard(wildcard) => self.wildcard(wildcard),
            IpSpace::AclIpSpace(lines) => {
                // First match wins: fold from the last line up.
                let mut res = self.bdd.zero;
                for line in lines.iter().rev() {
                    let m = self.compile(&line.space)?;
                    let then = match line.action {
                        LineAction::Permit => self.bdd.one,
                        LineAction::Deny => self.bdd.zero,
                    };
                    res = self.bdd.apply_ite(m, then, res)?;
                }
                Ok(res)
            }
            IpSpace::Union(spaces) => {
                let mut res = self.bdd.zero;
                for space in spaces {
                    let x = self.compile(space)?;
                    res = self.bdd.apply_or(res, x)?;
                }
                Ok(res)
            }
            IpSpace::Universe => Ok(self.bdd.one),
            IpSpace::Empty => Ok(self.bdd.zero),
            IpSpace::Reference(name) => self.compile_named(name),
        }
    }

    fn compile_named(&mut self, name: &str) -> Result<Ref> {
        if let Some(&res) = self.cache.get(name) {
            return Ok(res);
        }
        if self.stack.iter().any(|s| s == name) {
            return Err(Error::cyclic(ReferenceKind::IpSpace, &self.stack, name));
        }
        if self.stack.len() >= self.max_depth {
            return Err(Error::LimitExceeded {
                what: format!("IP space `{}` reference depth", name),
                limit: self.max_depth,
                actual: self.stack.len() + 1,
            });
        }
        let named = self.named;
        let space = named
            .get(name)
            .ok_or_else(|| Error::undefined(ReferenceKind::IpSpace, name))?;

        debug!("compiling IP space `{}`", name);
        self.stack.push(name.to_string());
        let res = self.compile(space);
        self.stack.pop();
        let res = res?;
        self.cache.insert(name.to_string(), res);
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use test_log::test;

    use super::*;
    use crate::ip_space::AclIpSpaceLine;
    use crate::packet::BddPacket;
    use crate::settings::Settings;

    fn prefix(s: &str) -> IpSpace {
        IpSpace::Prefix(s.parse().unwrap())
    }

    /// Compiled space and concrete `contains` agree on a handful of addresses.
    fn check_agrees(space: &IpSpace, named: &NamedIpSpaces, ips: &[&str]) -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let bdd = packet.bdd();
        let mut compiler = IpSpaceToBdd::new(bdd, packet.dst_ip(), named, 8);
        let f = compiler.compile(space)?;
        for ip in ips {
            let ip: Ipv4Addr = ip.parse().unwrap();
            let point = packet.dst_ip().value(bdd, u64::from(u32::from(ip)))?;
            let symbolic = !bdd.is_zero(bdd.apply_and(f, point)?);
            assert_eq!(symbolic, space.contains(ip, named)?, "disagree on {}", ip);
        }
        Ok(())
    }

    #[test]
    fn test_literals() -> Result<()> {
        let named = NamedIpSpaces::new();
        let ips = ["1.1.1.1", "1.1.1.2", "10.1.2.3", "10.2.2.3", "0.0.0.0"];
        check_agrees(&IpSpace::Ip("1.1.1.1".parse().unwrap()), &named, &ips)?;
        check_agrees(&prefix("10.0.0.0/8"), &named, &ips)?;
        check_agrees(&prefix("0.0.0.0/0"), &named, &ips)?;
        check_agrees(
            &IpSpace::Wildcard("10.0.2.3:0.255.0.0".parse()?),
            &named,
            &ips,
        )?;
        Ok(())
    }

    #[test]
    fn test_acl_ip_space() -> Result<()> {
        let named = NamedIpSpaces::new();
        let space = IpSpace::AclIpSpace(vec![
            AclIpSpaceLine::deny(prefix("10.1.0.0/16")),
            AclIpSpaceLine::permit(prefix("10.0.0.0/8")),
            AclIpSpaceLine::permit(prefix("1.1.1.1/32")),
        ]);
        check_agrees(&space, &named, &["10.1.2.3", "10.2.2.3", "1.1.1.1", "1.1.1.2"])
    }

    #[test]
    fn test_named_cache_and_errors() -> Result<()> {
        let named = NamedIpSpaces::from([
            ("servers".to_string(), prefix("1.1.1.0/24")),
            ("loop".to_string(), IpSpace::reference("loop")),
        ]);
        let packet = BddPacket::new(&Settings::default())?;
        let mut compiler = IpSpaceToBdd::new(packet.bdd(), packet.dst_ip(), &named, 8);

        let x = compiler.compile(&IpSpace::reference("servers"))?;
        assert_eq!(x, compiler.compile(&prefix("1.1.1.0/24"))?);
        assert_eq!(compiler.cache.len(), 1);

        assert!(matches!(
            compiler.compile(&IpSpace::reference("missing")),
            Err(Error::UndefinedReference { .. })
        ));
        assert_eq!(
            compiler.compile(&IpSpace::reference("loop")),
            Err(Error::CyclicReference {
                kind: ReferenceKind::IpSpace,
                chain: vec!["loop".to_string(), "loop".to_string()],
            })
        );
        Ok(())
    }
}
