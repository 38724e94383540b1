//! Structural negation of match expressions.
//!
//! Negation is pushed through `And`/`Or` with De Morgan's laws, double
//! negations cancel and constants flip. Every other node is wrapped in `Not`.
//!
//! The shape of the tree is kept: a single-operand or empty `And` becomes an
//! `Or` of the same arity, and constants inside a conjunction are flipped, not
//! folded. As a result `negate(&negate(&e)) == e` for every `e` in negation
//! normal form, i.e. where `Not` only wraps leaves. A `Not` over `And`/`Or` is
//! unwrapped on the first negation, so its double negation is the De Morgan
//! form of the same set rather than the original tree.

use crate::expr::AclLineMatchExpr;

pub fn negate(expr: &AclLineMatchExpr) -> AclLineMatchExpr {
    use AclLineMatchExpr as E;

    match expr {
        E::And(exprs) => E::Or(exprs.iter().map(negate).collect()),
        E::Or(exprs) => E::And(exprs.iter().map(negate).collect()),
        E::Not(inner) => inner.as_ref().clone(),
        E::True => E::False,
        E::False => E::True,
        leaf => E::not(leaf.clone()),
    }
}

/// Whether `Not` only appears directly above leaves.
pub fn is_negation_normal(expr: &AclLineMatchExpr) -> bool {
    use AclLineMatchExpr as E;

    match expr {
        E::And(exprs) | E::Or(exprs) => exprs.iter().all(is_negation_normal),
        E::Not(inner) => !matches!(
            inner.as_ref(),
            E::And(_) | E::Or(_) | E::Not(_) | E::True | E::False
        ),
        _ => true,
    }
}

/// Negate an optional expression. An absent expression stays absent.
pub fn negate_opt(expr: Option<&AclLineMatchExpr>) -> Option<AclLineMatchExpr> {
    expr.map(negate)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    use AclLineMatchExpr as E;

    fn a() -> E {
        E::permitted_by_acl("a")
    }
    fn b() -> E {
        E::match_src_interface(["eth0"])
    }

    #[test]
    fn test_constants() {
        assert_eq!(negate(&E::True), E::False);
        assert_eq!(negate(&E::False), E::True);
    }

    #[test]
    fn test_de_morgan() {
        assert_eq!(
            negate(&E::and([a(), b()])),
            E::or([E::not(a()), E::not(b())])
        );
        assert_eq!(
            negate(&E::or([a(), b()])),
            E::and([E::not(a()), E::not(b())])
        );
    }

    #[test]
    fn test_involution() {
        let exprs = [
            a(),
            E::not(a()),
            E::and([a(), E::not(b())]),
            E::or([E::and([a(), b()]), E::not(E::OriginatingFromDevice)]),
            E::True,
        ];
        for e in exprs {
            assert_eq!(negate(&negate(&e)), e, "negate is an involution on {}", e);
        }
    }

    #[test]
    fn test_involution_keeps_shape() {
        let exprs = [
            E::And(vec![a()]),
            E::Or(vec![E::not(b())]),
            E::And(vec![]),
            E::Or(vec![]),
            E::And(vec![E::True, a()]),
            E::Or(vec![E::And(vec![b()]), E::False]),
        ];
        for e in exprs {
            assert!(is_negation_normal(&e));
            assert_eq!(negate(&negate(&e)), e, "negate is an involution on {}", e);
        }
        assert_eq!(negate(&E::And(vec![a()])), E::Or(vec![E::not(a())]));
    }

    #[test]
    fn test_outside_negation_normal_form() {
        let e = E::not(E::and([a(), b()]));
        assert!(!is_negation_normal(&e));
        assert!(!is_negation_normal(&E::not(E::not(a()))));
        assert!(is_negation_normal(&negate(&e)));

        // The second negation yields the De Morgan form, not the original `Not`.
        assert_eq!(negate(&negate(&e)), E::or([E::not(a()), E::not(b())]));
    }

    #[test]
    fn test_negate_opt() {
        assert_eq!(negate_opt(None), None);
        assert_eq!(negate_opt(Some(&a())), Some(E::not(a())));
        assert_eq!(negate_opt(Some(&E::True)), Some(E::False));
    }
}
