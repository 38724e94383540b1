//! Error types shared by the whole crate.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Kind of a named object that can be referenced from another object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ReferenceKind {
    Acl,
    IpSpace,
    Interface,
}

impl Display for ReferenceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::Acl => write!(f, "ACL"),
            ReferenceKind::IpSpace => write!(f, "IP space"),
            ReferenceKind::Interface => write!(f, "interface"),
        }
    }
}

/// Main error type.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// A named reference does not resolve.
    #[error("undefined {kind} reference `{name}`")]
    UndefinedReference { kind: ReferenceKind, name: String },
    /// A chain of named references loops back onto itself.
    #[error("cyclic {kind} reference: {}", .chain.join(" -> "))]
    CyclicReference {
        kind: ReferenceKind,
        chain: Vec<String>,
    },
    /// A prefix, wildcard or address literal could not be parsed.
    #[error("malformed literal `{literal}`: {reason}")]
    MalformedLiteral { literal: String, reason: String },
    /// A match condition that must select something selects nothing by construction.
    #[error("empty match in {context}")]
    EmptyMatch { context: String },
    /// The BDD node table reached its configured capacity.
    #[error("BDD node table exhausted (capacity {capacity} nodes)")]
    NodeTableExhausted { capacity: usize },
    /// Two operands of incompatible kinds were combined.
    #[error("type mismatch: cannot combine {left} with {right}")]
    TypeMismatch { left: String, right: String },
    /// An input exceeds a caller-imposed limit.
    #[error("{what} exceeds the configured limit ({actual} > {limit})")]
    LimitExceeded {
        what: String,
        limit: usize,
        actual: usize,
    },
    /// A rewrite pool contains no values.
    #[error("empty pool for {field}")]
    EmptyPool { field: String },
}

impl Error {
    pub(crate) fn undefined(kind: ReferenceKind, name: impl Into<String>) -> Self {
        Error::UndefinedReference {
            kind,
            name: name.into(),
        }
    }

    /// Cycle error for `name`, which is already on the reference `stack`.
    pub(crate) fn cyclic(kind: ReferenceKind, stack: &[String], name: &str) -> Self {
        let start = stack.iter().position(|s| s == name).unwrap_or(0);
        let mut chain = stack[start..].to_vec();
        chain.push(name.to_string());
        Error::CyclicReference { kind, chain }
    }

    pub(crate) fn malformed(literal: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedLiteral {
            literal: literal.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_message() {
        let err = Error::CyclicReference {
            kind: ReferenceKind::Acl,
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "cyclic ACL reference: a -> b -> a");
    }

    #[test]
    fn test_cyclic_chain_starts_at_repeated_name() {
        let stack = vec!["top".to_string(), "a".to_string(), "b".to_string()];
        let err = Error::cyclic(ReferenceKind::IpSpace, &stack, "a");
        assert_eq!(err.to_string(), "cyclic IP space reference: a -> b -> a");
    }

    #[test]
    fn test_type_mismatch_names_both_operands() {
        let err = Error::TypeMismatch {
            left: "field src_port".to_string(),
            right: "IP pool 10.0.0.1-10.0.0.9".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("src_port"));
        assert!(msg.contains("IP pool"));
    }
}
