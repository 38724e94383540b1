//! Concrete evaluation of match expressions and ACLs on a single flow.

use serde::Serialize;

use crate::acl::{IpAccessList, LineAction, NamedAcls};
use crate::error::{Error, ReferenceKind, Result};
use crate::expr::AclLineMatchExpr;
use crate::flow::Flow;
use crate::ip_space::NamedIpSpaces;

/// Outcome of running a flow through an ACL.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct FilterResult {
    pub action: LineAction,
    /// Index of the first matching line, `None` for the implicit deny.
    pub line: Option<usize>,
}

#[derive(Debug, Copy, Clone)]
pub struct Evaluator<'a> {
    acls: &'a NamedAcls,
    ip_spaces: &'a NamedIpSpaces,
}

impl<'a> Evaluator<'a> {
    pub fn new(acls: &'a NamedAcls, ip_spaces: &'a NamedIpSpaces) -> Self {
        Self { acls, ip_spaces }
    }

    pub fn acls(&self) -> &'a NamedAcls {
        self.acls
    }

    pub fn ip_spaces(&self) -> &'a NamedIpSpaces {
        self.ip_spaces
    }

    pub fn eval(&self, expr: &AclLineMatchExpr, flow: &Flow) -> Result<bool> {
        let mut stack = Vec::new();
        self.eval_(expr, flow, &mut stack)
    }

    /// First-match walk over the lines of `acl`.
    pub fn filter(&self, acl: &IpAccessList, flow: &Flow) -> Result<FilterResult> {
        let mut stack = Vec::new();
        self.filter_(acl, flow, &mut stack)
    }

    /// Whether the named ACL permits `flow`.
    pub fn permits(&self, name: &str, flow: &Flow) -> Result<bool> {
        let acl = self
            .acls
            .get(name)
            .ok_or_else(|| Error::undefined(ReferenceKind::Acl, name))?;
        Ok(self.filter(acl, flow)?.action == LineAction::Permit)
    }

    fn filter_(&self, acl: &IpAccessList, flow: &Flow, stack: &mut Vec<String>) -> Result<FilterResult> {
        if stack.iter().any(|s| s == acl.name()) {
            return Err(Error::cyclic(ReferenceKind::Acl, stack, acl.name()));
        }
        stack.push(acl.name().to_string());
        let res = self.first_match(acl, flow, stack);
        stack.pop();
        res
    }

    fn first_match(&self, acl: &IpAccessList, flow: &Flow, stack: &mut Vec<String>) -> Result<FilterResult> {
        for (i, line) in acl.lines().iter().enumerate() {
            if self.eval_(&line.match_condition, flow, stack)? {
                return Ok(FilterResult {
                    action: line.action,
                    line: Some(i),
                });
            }
        }
        Ok(FilterResult {
            action: LineAction::Deny,
            line: None,
        })
    }

    fn eval_(&self, expr: &AclLineMatchExpr, flow: &Flow, stack: &mut Vec<String>) -> Result<bool> {
        use AclLineMatchExpr as E;

        match expr {
            E::MatchHeaderSpace(hs) => hs.matches(flow, self.ip_spaces),
            E::MatchSrcInterface(interfaces) => {
                expr.validate()?;
                Ok(flow
                    .ingress_interface
                    .as_ref()
                    .is_some_and(|i| interfaces.contains(i)))
            }
            E::OriginatingFromDevice => Ok(flow.ingress_interface.is_none()),
            E::PermittedByAcl(name) => {
                let acl = self
                    .acls
                    .get(name)
                    .ok_or_else(|| Error::undefined(ReferenceKind::Acl, name))?;
                Ok(self.filter_(acl, flow, stack)?.action == LineAction::Permit)
            }
            E::And(exprs) => {
                for e in exprs {
                    if !self.eval_(e, flow, stack)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            E::Or(exprs) => {
                for e in exprs {
                    if self.eval_(e, flow, stack)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            E::Not(e) => Ok(!self.eval_(e, flow, stack)?),
            E::True => Ok(true),
            E::False => Ok(false),
        }
    }
}
