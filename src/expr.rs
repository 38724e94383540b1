//! ACL line match expressions.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header_space::HeaderSpace;
use crate::ip_space::IpSpace;

/// A boolean condition over a packet and the interface it arrived on.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AclLineMatchExpr {
    MatchHeaderSpace(HeaderSpace),
    /// The packet entered through one of these interfaces.
    MatchSrcInterface(BTreeSet<String>),
    /// The packet was generated by the device itself.
    OriginatingFromDevice,
    /// The named ACL permits the packet.
    PermittedByAcl(String),
    And(Vec<AclLineMatchExpr>),
    Or(Vec<AclLineMatchExpr>),
    Not(Box<AclLineMatchExpr>),
    True,
    False,
}

impl AclLineMatchExpr {
    /// Conjunction. `True` operands are dropped and any `False` operand absorbs the result.
    pub fn and(exprs: impl IntoIterator<Item = Self>) -> Self {
        let mut conjuncts = Vec::new();
        for expr in exprs {
            match expr {
                Self::True => {}
                Self::False => return Self::False,
                expr => conjuncts.push(expr),
            }
        }
        match conjuncts.len() {
            0 => Self::True,
            1 => conjuncts.remove(0),
            _ => Self::And(conjuncts),
        }
    }

    /// Disjunction. `False` operands are dropped and any `True` operand absorbs the result.
    pub fn or(exprs: impl IntoIterator<Item = Self>) -> Self {
        let mut disjuncts = Vec::new();
        for expr in exprs {
            match expr {
                Self::False => {}
                Self::True => return Self::True,
                expr => disjuncts.push(expr),
            }
        }
        match disjuncts.len() {
            0 => Self::False,
            1 => disjuncts.remove(0),
            _ => Self::Or(disjuncts),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Self) -> Self {
        Self::Not(Box::new(expr))
    }

    pub fn match_header_space(hs: HeaderSpace) -> Self {
        Self::MatchHeaderSpace(hs)
    }

    pub fn match_src(space: impl Into<IpSpace>) -> Self {
        Self::MatchHeaderSpace(HeaderSpace::new().with_src_ips(space))
    }

    pub fn match_dst(space: impl Into<IpSpace>) -> Self {
        Self::MatchHeaderSpace(HeaderSpace::new().with_dst_ips(space))
    }

    pub fn match_src_interface<S: Into<String>>(interfaces: impl IntoIterator<Item = S>) -> Self {
        Self::MatchSrcInterface(interfaces.into_iter().map(Into::into).collect())
    }

    pub fn permitted_by_acl(name: impl Into<String>) -> Self {
        Self::PermittedByAcl(name.into())
    }

    /// Reject conditions that cannot be compiled, such as a source-interface match over no interfaces.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::MatchSrcInterface(interfaces) if interfaces.is_empty() => Err(Error::EmptyMatch {
                context: "source interface match".to_string(),
            }),
            Self::And(exprs) | Self::Or(exprs) => exprs.iter().try_for_each(Self::validate),
            Self::Not(expr) => expr.validate(),
            _ => Ok(()),
        }
    }

    fn children(&self) -> &[AclLineMatchExpr] {
        match self {
            Self::And(exprs) | Self::Or(exprs) => exprs,
            Self::Not(expr) => std::slice::from_ref(expr.as_ref()),
            _ => &[],
        }
    }

    pub(crate) fn collect_acls(&self, res: &mut BTreeSet<String>) {
        if let Self::PermittedByAcl(name) = self {
            res.insert(name.clone());
        }
        for child in self.children() {
            child.collect_acls(res);
        }
    }

    pub(crate) fn collect_ip_spaces(&self, res: &mut BTreeSet<String>) {
        if let Self::MatchHeaderSpace(hs) = self {
            res.extend(hs.referenced_ip_spaces());
        }
        for child in self.children() {
            child.collect_ip_spaces(res);
        }
    }

    pub(crate) fn collect_interfaces(&self, res: &mut BTreeSet<String>) {
        if let Self::MatchSrcInterface(interfaces) = self {
            res.extend(interfaces.iter().cloned());
        }
        for child in self.children() {
            child.collect_interfaces(res);
        }
    }
}

impl Display for AclLineMatchExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MatchHeaderSpace(_) => write!(f, "match(..)"),
            Self::MatchSrcInterface(interfaces) => {
                write!(f, "src_interface({})", interfaces.iter().join(", "))
            }
            Self::OriginatingFromDevice => write!(f, "from_device"),
            Self::PermittedByAcl(name) => write!(f, "permitted_by({})", name),
            Self::And(exprs) => write!(f, "and({})", exprs.iter().join(", ")),
            Self::Or(exprs) => write!(f, "or({})", exprs.iter().join(", ")),
            Self::Not(expr) => write!(f, "not({})", expr),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
        }
    }
}
