//! Access control lists.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::AclLineMatchExpr;

/// ACLs of one device, by name.
pub type NamedAcls = BTreeMap<String, IpAccessList>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineAction {
    Permit,
    Deny,
}

impl Display for LineAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LineAction::Permit => write!(f, "PERMIT"),
            LineAction::Deny => write!(f, "DENY"),
        }
    }
}

/// One ACL line: an action taken when the match condition holds.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AclLine {
    pub action: LineAction,
    pub match_condition: AclLineMatchExpr,
    /// Original line text, if the vendor parser kept it.
    pub name: Option<String>,
}

impl AclLine {
    pub fn new(action: LineAction, match_condition: AclLineMatchExpr) -> Self {
        Self {
            action,
            match_condition,
            name: None,
        }
    }

    pub fn permit(match_condition: AclLineMatchExpr) -> Self {
        Self::new(LineAction::Permit, match_condition)
    }

    pub fn deny(match_condition: AclLineMatchExpr) -> Self {
        Self::new(LineAction::Deny, match_condition)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A named, ordered list of lines. The first matching line decides; no match means deny.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IpAccessList {
    name: String,
    lines: Vec<AclLine>,
}

impl IpAccessList {
    pub fn new(name: impl Into<String>, lines: Vec<AclLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[AclLine] {
        &self.lines
    }

    /// Names of the ACLs referenced by any line.
    pub fn referenced_acls(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        for line in &self.lines {
            line.match_condition.collect_acls(&mut res);
        }
        res
    }

    /// Names of the IP spaces referenced by any line.
    pub fn referenced_ip_spaces(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        for line in &self.lines {
            line.match_condition.collect_ip_spaces(&mut res);
        }
        res
    }

    /// Names of the interfaces referenced by any line.
    pub fn referenced_interfaces(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        for line in &self.lines {
            line.match_condition.collect_interfaces(&mut res);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_space::IpSpace;

    #[test]
    fn test_references() {
        let acl = IpAccessList::new(
            "acl",
            vec![
                AclLine::permit(AclLineMatchExpr::permitted_by_acl("other")),
                AclLine::deny(AclLineMatchExpr::match_dst(IpSpace::reference("servers"))),
                AclLine::permit(AclLineMatchExpr::match_src_interface(["eth0"])),
            ],
        );
        assert_eq!(acl.referenced_acls(), BTreeSet::from(["other".to_string()]));
        assert_eq!(
            acl.referenced_ip_spaces(),
            BTreeSet::from(["servers".to_string()])
        );
        assert_eq!(
            acl.referenced_interfaces(),
            BTreeSet::from(["eth0".to_string()])
        );
    }

    #[test]
    fn test_action_display() {
        assert_eq!(LineAction::Permit.to_string(), "PERMIT");
        assert_eq!(LineAction::Deny.to_string(), "DENY");
    }
}
