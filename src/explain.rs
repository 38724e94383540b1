//! Readable match expressions for what an ACL permits, simplified with BDDs.
//!
//! [`permit_expr`][crate::acl_to_expr::permit_expr] is purely syntactic: every permit line is
//! conjoined with the negation of every earlier line. Here each candidate conjunct and disjunct
//! is checked against its compiled BDD instead, and only the ones that change the set are kept:
//!
//! * earlier permit lines are never negated (the disjunction already covers them),
//! * a conjunct implied by the other conjuncts of its disjunct is dropped,
//! * a disjunct contained in another disjunct is dropped,
//! * lines with no packet left to decide contribute nothing.
//!
//! An *invariant* restricts the explanation to the packets it matches, and every kept conjunct
//! records the ACL lines it came from.

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::acl::{IpAccessList, LineAction};
use crate::acl_to_bdd::AclLineMatchExprToBdd;
use crate::acl_to_expr::ReferenceInliner;
use crate::bdd::Bdd;
use crate::error::{Error, Result};
use crate::expr::AclLineMatchExpr;
use crate::negate::negate;
use crate::reference::Ref;

/// Where a conjunct of an explanation comes from.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineSource {
    /// The invariant given by the caller.
    Invariant,
    Line { acl: String, index: usize },
}

impl LineSource {
    pub fn line(acl: impl Into<String>, index: usize) -> Self {
        LineSource::Line {
            acl: acl.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Provenance {
    pub expr: AclLineMatchExpr,
    pub lines: BTreeSet<LineSource>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Explanation {
    pub expr: AclLineMatchExpr,
    /// Lines behind every conjunct of `expr`, one entry per distinct conjunct.
    pub provenance: Vec<Provenance>,
}

impl Explanation {
    pub fn provenance_of(&self, expr: &AclLineMatchExpr) -> Option<&BTreeSet<LineSource>> {
        self.provenance
            .iter()
            .find(|p| p.expr == *expr)
            .map(|p| &p.lines)
    }
}

/// A condition with its BDD and the lines it was built from.
#[derive(Debug, Clone)]
struct Term {
    expr: AclLineMatchExpr,
    bdd: Ref,
    sources: BTreeSet<LineSource>,
}

impl Term {
    fn negated(&self) -> Term {
        Term {
            expr: negate(&self.expr),
            bdd: -self.bdd,
            sources: self.sources.clone(),
        }
    }
}

/// A line whose match condition is the conjunction of `terms`.
struct ScopedLine {
    action: LineAction,
    terms: Vec<Term>,
    bdd: Ref,
}

impl ScopedLine {
    fn single(action: LineAction, term: Term) -> Self {
        let bdd = term.bdd;
        Self {
            action,
            terms: vec![term],
            bdd,
        }
    }

    /// The match condition as one term.
    fn condition(&self) -> Term {
        match self.terms.as_slice() {
            [term] => term.clone(),
            terms => Term {
                expr: AclLineMatchExpr::and(terms.iter().map(|t| t.expr.clone())),
                bdd: self.bdd,
                sources: terms.iter().flat_map(|t| t.sources.iter().cloned()).collect(),
            },
        }
    }
}

/// Lines of `acl` with reference-free conditions and their BDDs.
fn scoped_lines(compiler: &mut AclLineMatchExprToBdd<'_>, acl: &IpAccessList) -> Result<Vec<ScopedLine>> {
    let compiled = compiler.compile_acl(acl)?;
    let mut inliner = ReferenceInliner::new(compiler.acls());
    acl.lines()
        .iter()
        .zip(&compiled.lines)
        .enumerate()
        .map(|(index, (line, bdds))| {
            let term = Term {
                expr: inliner.visit(&line.match_condition)?,
                bdd: bdds.matches,
                sources: BTreeSet::from([LineSource::line(acl.name(), index)]),
            };
            Ok(ScopedLine::single(line.action, term))
        })
        .collect()
}

fn invariant_term(compiler: &mut AclLineMatchExprToBdd<'_>, invariant: &AclLineMatchExpr) -> Result<Option<Term>> {
    if *invariant == AclLineMatchExpr::True {
        return Ok(None);
    }
    let mut inliner = ReferenceInliner::new(compiler.acls());
    Ok(Some(Term {
        expr: inliner.visit(invariant)?,
        bdd: compiler.to_bdd(invariant)?,
        sources: BTreeSet::from([LineSource::Invariant]),
    }))
}

/// Drop every conjunct implied by the remaining ones, scanning left to right.
fn prune_conjuncts(bdd: &Bdd, mut terms: Vec<Term>) -> Result<Vec<Term>> {
    let mut i = 0;
    while i < terms.len() {
        let others = bdd.apply_and_many(
            terms
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, t)| t.bdd),
        )?;
        if bdd.is_implies(others, terms[i].bdd) {
            terms.remove(i);
        } else {
            i += 1;
        }
    }
    Ok(terms)
}

/// Drop every disjunct contained in another one. Of two equal disjuncts the first is kept.
fn prune_disjuncts(bdd: &Bdd, mut disjuncts: Vec<(Vec<Term>, Ref)>) -> Vec<(Vec<Term>, Ref)> {
    let mut i = 0;
    while i < disjuncts.len() {
        let f = disjuncts[i].1;
        let subsumed = disjuncts
            .iter()
            .enumerate()
            .any(|(j, &(_, g))| j != i && bdd.is_implies(f, g) && (f != g || j < i));
        if subsumed {
            disjuncts.remove(i);
        } else {
            i += 1;
        }
    }
    disjuncts
}

/// First-match explanation of the packets `lines` permit within `invariant`.
fn explain_lines(bdd: &Bdd, lines: Vec<ScopedLine>, invariant: Option<Term>) -> Result<Explanation> {
    let scope = invariant.as_ref().map_or(bdd.one, |t| t.bdd);
    let mut prior_unmatched = scope;
    let mut denies: Vec<Term> = Vec::new();
    let mut disjuncts = Vec::new();

    for line in lines {
        if bdd.is_zero(prior_unmatched) {
            break;
        }
        let decided = bdd.apply_and(line.bdd, prior_unmatched)?;
        match line.action {
            LineAction::Permit if !bdd.is_zero(decided) => {
                let mut conjuncts = line.terms.clone();
                conjuncts.extend(invariant.iter().cloned());
                conjuncts.extend(denies.iter().map(Term::negated));
                let conjuncts = prune_conjuncts(bdd, conjuncts)?;
                let f = bdd.apply_and_many(conjuncts.iter().map(|t| t.bdd))?;
                disjuncts.push((conjuncts, f));
            }
            LineAction::Permit => {}
            LineAction::Deny => denies.push(line.condition()),
        }
        prior_unmatched = bdd.apply_diff(prior_unmatched, line.bdd)?;
    }

    let disjuncts = prune_disjuncts(bdd, disjuncts);
    debug!("explanation with {} disjuncts", disjuncts.len());

    let mut provenance: Vec<Provenance> = Vec::new();
    for term in disjuncts.iter().flat_map(|(terms, _)| terms) {
        match provenance.iter_mut().find(|p| p.expr == term.expr) {
            Some(p) => p.lines.extend(term.sources.iter().cloned()),
            None => provenance.push(Provenance {
                expr: term.expr.clone(),
                lines: term.sources.clone(),
            }),
        }
    }
    let expr = AclLineMatchExpr::or(
        disjuncts
            .into_iter()
            .map(|(terms, _)| AclLineMatchExpr::and(terms.into_iter().map(|t| t.expr))),
    );
    Ok(Explanation { expr, provenance })
}

/// Expression equivalent to "`acl` permits the packet", simplified against the compiled BDDs.
///
/// References to other ACLs are inlined.
pub fn to_match_expr(compiler: &mut AclLineMatchExprToBdd<'_>, acl: &IpAccessList) -> Result<AclLineMatchExpr> {
    Ok(explain(compiler, &AclLineMatchExpr::True, acl)?.expr)
}

/// Explain the packets matching `invariant` that `acl` permits.
pub fn explain(
    compiler: &mut AclLineMatchExprToBdd<'_>,
    invariant: &AclLineMatchExpr,
    acl: &IpAccessList,
) -> Result<Explanation> {
    let invariant = invariant_term(compiler, invariant)?;
    let lines = scoped_lines(compiler, acl)?;
    debug!("explaining ACL `{}`", acl.name());
    explain_lines(compiler.packet().bdd(), lines, invariant)
}

/// Explain the packets matching `invariant` that `deny_acl` denies and `permit_acl` permits.
///
/// Both compilers must share one packet universe. Provenance names lines by ACL name, so the
/// two ACLs are best told apart by name.
pub fn explain_differential(
    invariant: &AclLineMatchExpr,
    deny_compiler: &mut AclLineMatchExprToBdd<'_>,
    deny_acl: &IpAccessList,
    permit_compiler: &mut AclLineMatchExprToBdd<'_>,
    permit_acl: &IpAccessList,
) -> Result<Explanation> {
    if !std::ptr::eq(deny_compiler.packet(), permit_compiler.packet()) {
        return Err(Error::TypeMismatch {
            left: format!("ACL `{}` universe", deny_acl.name()),
            right: format!("ACL `{}` universe", permit_acl.name()),
        });
    }
    let bdd = permit_compiler.packet().bdd();

    let permitted = explain(permit_compiler, &AclLineMatchExpr::True, permit_acl)?;
    let permitted = Term {
        expr: permitted.expr,
        bdd: permit_compiler.compile_acl(permit_acl)?.permit,
        sources: permitted
            .provenance
            .into_iter()
            .flat_map(|p| p.lines)
            .collect(),
    };

    // First match over `deny_acl` with its actions flipped: a packet it denies through a line
    // falls back to `permit_acl` as a whole, one it matches nowhere continues into `permit_acl`.
    let mut lines = Vec::new();
    for line in scoped_lines(deny_compiler, deny_acl)? {
        match line.action {
            LineAction::Permit => lines.push(ScopedLine {
                action: LineAction::Deny,
                ..line
            }),
            LineAction::Deny => {
                let mut terms = line.terms;
                terms.push(permitted.clone());
                let conj = bdd.apply_and(line.bdd, permitted.bdd)?;
                lines.push(ScopedLine {
                    action: LineAction::Permit,
                    terms,
                    bdd: conj,
                });
            }
        }
    }
    lines.extend(scoped_lines(permit_compiler, permit_acl)?);

    let invariant = invariant_term(permit_compiler, invariant)?;
    debug!(
        "explaining packets denied by `{}` and permitted by `{}`",
        deny_acl.name(),
        permit_acl.name()
    );
    explain_lines(bdd, lines, invariant)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::acl::{AclLine, NamedAcls};
    use crate::ip_space::{IpSpace, NamedIpSpaces};
    use crate::packet::BddPacket;
    use crate::settings::Settings;
    use crate::source::SourceManager;

    use AclLineMatchExpr as E;

    fn dst(s: &str) -> E {
        E::match_dst(IpSpace::Prefix(s.parse().unwrap()))
    }

    fn src(s: &str) -> E {
        E::match_src(IpSpace::Prefix(s.parse().unwrap()))
    }

    fn lines(name: &str, lines: Vec<AclLine>) -> IpAccessList {
        IpAccessList::new(name, lines)
    }

    struct Setup {
        packet: BddPacket,
        sources: SourceManager,
        acls: NamedAcls,
        spaces: NamedIpSpaces,
        settings: Settings,
    }

    impl Setup {
        fn new(acls: NamedAcls) -> Result<Self> {
            let packet = BddPacket::new(&Settings::default())?;
            let sources = SourceManager::new(&packet, Vec::<String>::new())?;
            Ok(Self {
                packet,
                sources,
                acls,
                spaces: NamedIpSpaces::new(),
                settings: Settings::default(),
            })
        }

        fn compiler(&self) -> AclLineMatchExprToBdd<'_> {
            AclLineMatchExprToBdd::new(&self.packet, &self.sources, &self.acls, &self.spaces, &self.settings)
        }
    }

    fn sources(items: &[(&str, usize)]) -> BTreeSet<LineSource> {
        items.iter().map(|&(acl, i)| LineSource::line(acl, i)).collect()
    }

    #[test]
    fn test_disjoint_permits() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut compiler = setup.compiler();
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.1.1.1/32")), AclLine::permit(dst("2.2.2.2/32"))],
        );

        let res = explain(&mut compiler, &E::True, &acl)?;
        assert_eq!(res.expr, E::or([dst("1.1.1.1/32"), dst("2.2.2.2/32")]));
        assert_eq!(res.provenance.len(), 2);
        assert_eq!(res.provenance_of(&dst("1.1.1.1/32")), Some(&sources(&[("acl", 0)])));
        assert_eq!(res.provenance_of(&dst("2.2.2.2/32")), Some(&sources(&[("acl", 1)])));

        assert_eq!(to_match_expr(&mut compiler, &acl)?, res.expr);
        Ok(())
    }

    #[test]
    fn test_redundant_permit() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut compiler = setup.compiler();
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.2.3.4/32")), AclLine::permit(dst("1.2.3.0/24"))],
        );
        assert_eq!(to_match_expr(&mut compiler, &acl)?, dst("1.2.3.0/24"));

        // A permit fully shadowed by an earlier one contributes nothing.
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.2.3.0/24")), AclLine::permit(dst("1.2.3.4/32"))],
        );
        assert_eq!(to_match_expr(&mut compiler, &acl)?, dst("1.2.3.0/24"));
        Ok(())
    }

    #[test]
    fn test_redundant_deny() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut compiler = setup.compiler();
        let (src_ip, src_net) = (src("1.2.3.4/32"), src("1.2.3.0/24"));
        let (dst_ip, dst_net) = (dst("1.2.3.4/32"), dst("1.2.3.0/24"));

        let acl = lines(
            "acl",
            vec![
                AclLine::deny(src_ip.clone()),
                AclLine::permit(dst_ip.clone()),
                AclLine::deny(src_net.clone()),
                AclLine::permit(dst_net.clone()),
            ],
        );
        assert_eq!(
            to_match_expr(&mut compiler, &acl)?,
            E::or([
                E::and([dst_ip.clone(), E::not(src_ip.clone())]),
                E::and([dst_net.clone(), E::not(src_net.clone())]),
            ])
        );

        // With the wider deny first, the first disjunct is subsumed by the second.
        let acl = lines(
            "acl",
            vec![
                AclLine::deny(src_net.clone()),
                AclLine::permit(dst_ip),
                AclLine::deny(src_ip),
                AclLine::permit(dst_net.clone()),
            ],
        );
        assert_eq!(
            to_match_expr(&mut compiler, &acl)?,
            E::and([dst_net, E::not(src_net)])
        );
        Ok(())
    }

    #[test]
    fn test_invariant() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut compiler = setup.compiler();
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.1.1.1/32")), AclLine::permit(dst("2.2.2.2/32"))],
        );

        let res = explain(&mut compiler, &dst("2.0.0.0/8"), &acl)?;
        assert_eq!(res.expr, dst("2.2.2.2/32"));
        assert_eq!(res.provenance.len(), 1);
        assert_eq!(res.provenance_of(&dst("2.2.2.2/32")), Some(&sources(&[("acl", 1)])));

        // An invariant narrower than the line replaces it.
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.1.1.1/32")), AclLine::permit(dst("2.0.0.0/8"))],
        );
        let res = explain(&mut compiler, &dst("2.2.2.2/32"), &acl)?;
        assert_eq!(res.expr, dst("2.2.2.2/32"));
        assert_eq!(
            res.provenance_of(&dst("2.2.2.2/32")),
            Some(&BTreeSet::from([LineSource::Invariant]))
        );

        // Nothing permitted within the invariant.
        assert_eq!(explain(&mut compiler, &dst("3.0.0.0/8"), &acl)?.expr, E::False);
        Ok(())
    }

    #[test]
    fn test_references_are_inlined() -> Result<()> {
        let acl = lines(
            "acl",
            vec![AclLine::permit(dst("1.1.1.1/32")), AclLine::permit(dst("2.2.2.2/32"))],
        );
        let outer = lines("outer", vec![AclLine::permit(E::permitted_by_acl("acl"))]);
        let setup = Setup::new(NamedAcls::from([
            ("acl".to_string(), acl),
            ("outer".to_string(), outer.clone()),
        ]))?;
        let mut compiler = setup.compiler();

        let res = explain(&mut compiler, &E::True, &outer)?;
        assert_eq!(
            res.expr,
            E::or([dst("1.1.1.1/32"), E::and([E::not(dst("1.1.1.1/32")), dst("2.2.2.2/32")])])
        );
        assert_eq!(res.provenance.len(), 1);
        Ok(())
    }

    #[test]
    fn test_differential() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut deny_compiler = setup.compiler();
        let mut permit_compiler = setup.compiler();
        let (host, net) = (dst("1.2.3.4/32"), dst("1.2.3.0/24"));

        let deny = lines("deny", vec![AclLine::permit(host.clone())]);
        let permit = lines("permit", vec![AclLine::permit(net.clone())]);
        let res = explain_differential(&E::True, &mut deny_compiler, &deny, &mut permit_compiler, &permit)?;
        assert_eq!(res.expr, E::and([net.clone(), E::not(host.clone())]));
        assert_eq!(res.provenance_of(&net), Some(&sources(&[("permit", 0)])));
        assert_eq!(res.provenance_of(&E::not(host)), Some(&sources(&[("deny", 0)])));
        Ok(())
    }

    #[test]
    fn test_differential_reject() -> Result<()> {
        let setup = Setup::new(NamedAcls::new())?;
        let mut deny_compiler = setup.compiler();
        let mut permit_compiler = setup.compiler();
        let (host, net24, net16) = (dst("1.2.3.4/32"), dst("1.2.3.0/24"), dst("1.2.0.0/16"));

        let deny = lines(
            "deny",
            vec![AclLine::deny(host.clone()), AclLine::permit(net24.clone())],
        );
        let permit = lines("permit", vec![AclLine::permit(net16.clone())]);
        assert_eq!(
            explain_differential(&E::True, &mut deny_compiler, &deny, &mut permit_compiler, &permit)?.expr,
            E::or([host.clone(), E::and([net16.clone(), E::not(net24.clone())])])
        );

        // An invariant that contradicts the second disjunct.
        assert_eq!(
            explain_differential(&net24, &mut deny_compiler, &deny, &mut permit_compiler, &permit)?.expr,
            host
        );

        // Switched prefixes: the second disjunct is empty.
        let deny = lines("deny", vec![AclLine::deny(host.clone()), AclLine::permit(net16)]);
        let permit = lines("permit", vec![AclLine::permit(net24)]);
        assert_eq!(
            explain_differential(&E::True, &mut deny_compiler, &deny, &mut permit_compiler, &permit)?.expr,
            host
        );
        Ok(())
    }

    #[test]
    fn test_differential_needs_one_universe() -> Result<()> {
        let one = Setup::new(NamedAcls::new())?;
        let other = Setup::new(NamedAcls::new())?;
        let acl = lines("acl", vec![AclLine::permit(E::True)]);
        assert!(matches!(
            explain_differential(&E::True, &mut one.compiler(), &acl, &mut other.compiler(), &acl),
            Err(Error::TypeMismatch { .. })
        ));
        Ok(())
    }
}
