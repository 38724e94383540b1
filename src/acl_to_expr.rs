//! Closed-form match expressions for ACLs.
//!
//! An ACL permits a packet iff some permit line matches it and no earlier line does:
//! `or_i( and( not(m_0), ..., not(m_{i-1}), m_i ) )` over the permit lines `i`.

use std::collections::HashMap;

use log::debug;

use crate::acl::{AclLine, LineAction, NamedAcls};
use crate::error::{Error, ReferenceKind, Result};
use crate::expr::AclLineMatchExpr;

/// Expression matching exactly the packets permitted by `lines`.
///
/// Lines matching nothing (`False`) are skipped; nothing after a `True` line is reachable.
/// The result is syntactic. [`to_match_expr`][crate::explain::to_match_expr] simplifies it
/// against the compiled BDDs.
pub fn permit_expr(lines: &[AclLine]) -> AclLineMatchExpr {
    use AclLineMatchExpr as E;

    let mut earlier: Vec<AclLineMatchExpr> = Vec::new();
    let mut disjuncts = Vec::new();
    for line in lines {
        let m = &line.match_condition;
        if *m == E::False {
            continue;
        }
        if line.action == LineAction::Permit {
            let mut conjuncts: Vec<_> = earlier.iter().map(|e| E::not(e.clone())).collect();
            conjuncts.push(m.clone());
            disjuncts.push(E::and(conjuncts));
        }
        if *m == E::True {
            break;
        }
        earlier.push(m.clone());
    }
    E::or(disjuncts)
}

/// Replaces every `PermittedByAcl` with the referenced ACL's permit expression.
pub struct ReferenceInliner<'a> {
    acls: &'a NamedAcls,
    cache: HashMap<String, AclLineMatchExpr>,
    stack: Vec<String>,
}

impl<'a> ReferenceInliner<'a> {
    pub fn new(acls: &'a NamedAcls) -> Self {
        Self {
            acls,
            cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Inline references in `expr`. The result mentions no ACL by name.
    pub fn visit(&mut self, expr: &AclLineMatchExpr) -> Result<AclLineMatchExpr> {
        use AclLineMatchExpr as E;

        match expr {
            E::PermittedByAcl(name) => self.inline(name),
            E::And(exprs) => Ok(E::and(
                exprs.iter().map(|e| self.visit(e)).collect::<Result<Vec<_>>>()?,
            )),
            E::Or(exprs) => Ok(E::or(
                exprs.iter().map(|e| self.visit(e)).collect::<Result<Vec<_>>>()?,
            )),
            E::Not(e) => Ok(E::not(self.visit(e)?)),
            leaf => Ok(leaf.clone()),
        }
    }

    fn inline(&mut self, name: &str) -> Result<AclLineMatchExpr> {
        if let Some(res) = self.cache.get(name) {
            return Ok(res.clone());
        }
        if self.stack.iter().any(|s| s == name) {
            return Err(Error::cyclic(ReferenceKind::Acl, &self.stack, name));
        }
        let acls = self.acls;
        let acl = acls
            .get(name)
            .ok_or_else(|| Error::undefined(ReferenceKind::Acl, name))?;

        debug!("inlining ACL `{}`", name);
        self.stack.push(name.to_string());
        let res = self.visit(&permit_expr(acl.lines()));
        self.stack.pop();
        let res = res?;
        self.cache.insert(name.to_string(), res.clone());
        Ok(res)
    }
}
