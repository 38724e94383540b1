//! Lowering of ACL match expressions and whole ACLs to BDDs.

use std::collections::HashMap;

use log::debug;

use crate::acl::{IpAccessList, LineAction, NamedAcls};
use crate::error::{Error, ReferenceKind, Result};
use crate::expr::AclLineMatchExpr;
use crate::header_space_to_bdd::HeaderSpaceToBdd;
use crate::ip_space::NamedIpSpaces;
use crate::packet::BddPacket;
use crate::reference::Ref;
use crate::settings::Settings;
use crate::source::SourceManager;

/// Compiled form of one ACL line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LineBdds {
    pub action: LineAction,
    /// Packets matched by the line condition, regardless of earlier lines.
    pub matches: Ref,
    /// Packets for which this line is the first match.
    pub effective: Ref,
}

/// Compiled form of an ACL.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AclBdds {
    /// Packets the ACL permits.
    pub permit: Ref,
    pub lines: Vec<LineBdds>,
    /// Packets matched by no line (and therefore denied).
    pub no_match: Ref,
}

impl AclBdds {
    /// Packets on which the ACL takes `action`.
    pub fn action(&self, action: LineAction) -> Ref {
        match action {
            LineAction::Permit => self.permit,
            LineAction::Deny => -self.permit,
        }
    }

    /// First-match regions: one per line, followed by the no-match region.
    pub fn regions(&self) -> impl Iterator<Item = (Option<usize>, LineAction, Ref)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| (Some(i), line.action, line.effective))
            .chain(std::iter::once((None, LineAction::Deny, self.no_match)))
    }
}

pub struct AclLineMatchExprToBdd<'a> {
    packet: &'a BddPacket,
    sources: &'a SourceManager,
    acls: &'a NamedAcls,
    settings: &'a Settings,
    header_space: HeaderSpaceToBdd<'a>,
    /// Permit BDDs of referenced ACLs.
    permit_cache: HashMap<String, Ref>,
    stack: Vec<String>,
}

impl<'a> AclLineMatchExprToBdd<'a> {
    pub fn new(
        packet: &'a BddPacket,
        sources: &'a SourceManager,
        acls: &'a NamedAcls,
        ip_spaces: &'a NamedIpSpaces,
        settings: &'a Settings,
    ) -> Self {
        Self {
            packet,
            sources,
            acls,
            settings,
            header_space: HeaderSpaceToBdd::new(packet, ip_spaces, settings.max_reference_depth),
            permit_cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn packet(&self) -> &'a BddPacket {
        self.packet
    }

    pub fn sources(&self) -> &'a SourceManager {
        self.sources
    }

    /// ACLs that `PermittedByAcl` resolves against.
    pub fn acls(&self) -> &'a NamedAcls {
        self.acls
    }

    pub fn header_space(&mut self) -> &mut HeaderSpaceToBdd<'a> {
        &mut self.header_space
    }

    pub fn to_bdd(&mut self, expr: &AclLineMatchExpr) -> Result<Ref> {
        use AclLineMatchExpr as E;

        let packet = self.packet;
        let bdd = packet.bdd();
        match expr {
            E::MatchHeaderSpace(hs) => self.header_space.to_bdd(hs),
            E::MatchSrcInterface(interfaces) => {
                expr.validate()?;
                self.sources.match_src_interface(packet, interfaces)
            }
            E::OriginatingFromDevice => self.sources.originating_from_device(packet),
            E::PermittedByAcl(name) => self.acl_permit(name),
            E::And(exprs) => {
                let mut res = bdd.one;
                for e in exprs {
                    let x = self.to_bdd(e)?;
                    res = bdd.apply_and(res, x)?;
                    if bdd.is_zero(res) {
                        break;
                    }
                }
                Ok(res)
            }
            E::Or(exprs) => {
                let mut res = bdd.zero;
                for e in exprs {
                    let x = self.to_bdd(e)?;
                    res = bdd.apply_or(res, x)?;
                    if bdd.is_one(res) {
                        break;
                    }
                }
                Ok(res)
            }
            E::Not(e) => Ok(-self.to_bdd(e)?),
            E::True => Ok(bdd.one),
            E::False => Ok(bdd.zero),
        }
    }

    /// Permit BDD of the named ACL, compiled once per compiler.
    pub fn acl_permit(&mut self, name: &str) -> Result<Ref> {
        if let Some(&res) = self.permit_cache.get(name) {
            return Ok(res);
        }
        if self.stack.len() >= self.settings.max_reference_depth {
            return Err(Error::LimitExceeded {
                what: format!("ACL `{}` reference depth", name),
                limit: self.settings.max_reference_depth,
                actual: self.stack.len() + 1,
            });
        }
        let acls = self.acls;
        let acl = acls
            .get(name)
            .ok_or_else(|| Error::undefined(ReferenceKind::Acl, name))?;
        let res = self.compile_acl(acl)?.permit;
        self.permit_cache.insert(name.to_string(), res);
        Ok(res)
    }

    /// Compile every line of `acl` under first-match semantics.
    pub fn compile_acl(&mut self, acl: &IpAccessList) -> Result<AclBdds> {
        let name = acl.name();
        if self.stack.iter().any(|s| s == name) {
            return Err(Error::cyclic(ReferenceKind::Acl, &self.stack, name));
        }
        self.settings.check_acl_lines(name, acl.lines().len())?;

        debug!("compiling ACL `{}` ({} lines)", name, acl.lines().len());
        self.stack.push(name.to_string());
        let res = self.compile_lines(acl);
        self.stack.pop();
        res
    }

    fn compile_lines(&mut self, acl: &IpAccessList) -> Result<AclBdds> {
        let bdd = self.packet.bdd();
        let mut permit = bdd.zero;
        let mut prior_unmatched = bdd.one;
        let mut lines = Vec::with_capacity(acl.lines().len());
        for line in acl.lines() {
            let matches = self.to_bdd(&line.match_condition)?;
            let effective = bdd.apply_and(matches, prior_unmatched)?;
            if line.action == LineAction::Permit {
                permit = bdd.apply_or(permit, effective)?;
            }
            prior_unmatched = bdd.apply_diff(prior_unmatched, matches)?;
            lines.push(LineBdds {
                action: line.action,
                matches,
                effective,
            });
        }
        Ok(AclBdds {
            permit,
            lines,
            no_match: prior_unmatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;
    use crate::acl::AclLine;
    use crate::ip_space::IpSpace;

    use AclLineMatchExpr as E;

    fn dst(s: &str) -> E {
        E::match_dst(IpSpace::Prefix(s.parse().unwrap()))
    }

    fn setup() -> Result<(BddPacket, SourceManager)> {
        let packet = BddPacket::new(&Settings::default())?;
        let sources = SourceManager::new(&packet, ["eth0", "eth1"])?;
        Ok((packet, sources))
    }

    #[test]
    fn test_compile_acl() -> Result<()> {
        let (packet, sources) = setup()?;
        let (acls, spaces, settings) = (NamedAcls::new(), NamedIpSpaces::new(), Settings::default());
        let mut compiler = AclLineMatchExprToBdd::new(&packet, &sources, &acls, &spaces, &settings);
        let bdd = packet.bdd();

        let acl = IpAccessList::new(
            "acl",
            vec![
                AclLine::deny(dst("1.1.1.1/32")),
                AclLine::permit(dst("1.1.1.0/24")),
                AclLine::permit(dst("1.1.1.128/25")),
            ],
        );
        let res = compiler.compile_acl(&acl)?;
        let host = compiler.to_bdd(&dst("1.1.1.1/32"))?;
        let net = compiler.to_bdd(&dst("1.1.1.0/24"))?;

        assert_eq!(res.permit, bdd.apply_diff(net, host)?);
        assert_eq!(res.lines[0].effective, host);
        assert_eq!(res.lines[2].effective, bdd.zero);
        assert_eq!(res.no_match, -net);
        assert_eq!(res.action(LineAction::Deny), -res.permit);

        // Regions partition the whole space.
        let all = bdd.apply_or_many(res.regions().map(|(_, _, r)| r))?;
        assert_eq!(all, bdd.one);
        Ok(())
    }

    #[test]
    fn test_permitted_by_acl() -> Result<()> {
        let (packet, sources) = setup()?;
        let acls = NamedAcls::from([(
            "inner".to_string(),
            IpAccessList::new("inner", vec![AclLine::permit(dst("10.0.0.0/8"))]),
        )]);
        let (spaces, settings) = (NamedIpSpaces::new(), Settings::default());
        let mut compiler = AclLineMatchExprToBdd::new(&packet, &sources, &acls, &spaces, &settings);

        let via_ref = compiler.to_bdd(&E::permitted_by_acl("inner"))?;
        assert_eq!(via_ref, compiler.to_bdd(&dst("10.0.0.0/8"))?);
        assert_eq!(compiler.permit_cache.len(), 1);

        assert_eq!(
            compiler.to_bdd(&E::permitted_by_acl("missing")),
            Err(Error::undefined(ReferenceKind::Acl, "missing"))
        );
        Ok(())
    }

    #[test]
    fn test_cyclic_acls() -> Result<()> {
        let (packet, sources) = setup()?;
        let acls = NamedAcls::from([
            (
                "a".to_string(),
                IpAccessList::new("a", vec![AclLine::permit(E::permitted_by_acl("b"))]),
            ),
            (
                "b".to_string(),
                IpAccessList::new("b", vec![AclLine::permit(E::permitted_by_acl("a"))]),
            ),
        ]);
        let (spaces, settings) = (NamedIpSpaces::new(), Settings::default());
        let mut compiler = AclLineMatchExprToBdd::new(&packet, &sources, &acls, &spaces, &settings);
        assert_eq!(
            compiler.acl_permit("a"),
            Err(Error::CyclicReference {
                kind: ReferenceKind::Acl,
                chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            })
        );
        Ok(())
    }

    #[test]
    fn test_interfaces_and_device() -> Result<()> {
        let (packet, sources) = setup()?;
        let (acls, spaces, settings) = (NamedAcls::new(), NamedIpSpaces::new(), Settings::default());
        let mut compiler = AclLineMatchExprToBdd::new(&packet, &sources, &acls, &spaces, &settings);
        let bdd = packet.bdd();

        let eth0 = compiler.to_bdd(&E::match_src_interface(["eth0"]))?;
        let device = compiler.to_bdd(&E::OriginatingFromDevice)?;
        assert_eq!(bdd.apply_and(eth0, device)?, bdd.zero);

        assert!(matches!(
            compiler.to_bdd(&E::MatchSrcInterface(BTreeSet::new())),
            Err(Error::EmptyMatch { .. })
        ));
        assert!(matches!(
            compiler.to_bdd(&E::match_src_interface(["eth7"])),
            Err(Error::UndefinedReference { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_line_limit() -> Result<()> {
        let (packet, sources) = setup()?;
        let (acls, spaces) = (NamedAcls::new(), NamedIpSpaces::new());
        let settings = Settings {
            max_acl_lines: Some(1),
            ..Settings::default()
        };
        let mut compiler = AclLineMatchExprToBdd::new(&packet, &sources, &acls, &spaces, &settings);
        let acl = IpAccessList::new("big", vec![AclLine::permit(E::True), AclLine::deny(E::True)]);
        assert!(matches!(
            compiler.compile_acl(&acl),
            Err(Error::LimitExceeded { limit: 1, actual: 2, .. })
        ));
        Ok(())
    }
}
