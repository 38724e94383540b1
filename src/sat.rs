use std::collections::{BTreeMap, HashMap};

use num_bigint::BigUint;

use crate::bdd::Bdd;
use crate::reference::Ref;
use crate::types::{Lit, Var};

impl Bdd {
    /// Returns one satisfying assignment for the BDD, if any exists.
    ///
    /// The assignment is returned as a vector of literals along one path,
    /// preferring the high branch. Variables not on the path are don't-cares.
    ///
    /// Returns `None` if the BDD represents the constant false function.
    pub fn one_sat(&self, node: Ref) -> Option<Vec<Lit>> {
        if self.is_zero(node) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = node;

        while !self.is_one(current) {
            let var = Var::new(self.variable(current.index()));
            let high = self.high_node(current);
            let low = self.low_node(current);

            if !self.is_zero(high) {
                path.push(var.pos());
                current = high;
            } else {
                path.push(var.neg());
                current = low;
            }
        }

        Some(path)
    }

    /// Returns a total satisfying assignment over `vars`, if any exists.
    ///
    /// Walks down preferring the low branch and fixes every variable that is
    /// not on the path to `false`, so for MSB-first integer encodings the
    /// result is the smallest satisfying value of the topmost field.
    /// Variables on the path that are not in `vars` are included as well.
    pub fn full_sat_one(&self, node: Ref, vars: impl IntoIterator<Item = u32>) -> Option<Vec<Lit>> {
        if self.is_zero(node) {
            return None;
        }

        let mut assignment: BTreeMap<u32, bool> = vars.into_iter().map(|v| (v, false)).collect();
        let mut current = node;

        while !self.is_one(current) {
            let v = self.variable(current.index());
            let low = self.low_node(current);
            if !self.is_zero(low) {
                assignment.insert(v, false);
                current = low;
            } else {
                assignment.insert(v, true);
                current = self.high_node(current);
            }
        }

        Some(
            assignment
                .into_iter()
                .map(|(v, b)| {
                    let var = Var::new(v);
                    if b {
                        var.pos()
                    } else {
                        var.neg()
                    }
                })
                .collect(),
        )
    }

    /// Number of satisfying assignments over the first `num_vars` variables.
    pub fn sat_count(&self, node: Ref, num_vars: usize) -> BigUint {
        let mut cache = HashMap::new();
        let max = BigUint::from(1u32) << num_vars;
        self.sat_count_(node, &max, &mut cache)
    }

    fn sat_count_(&self, node: Ref, max: &BigUint, cache: &mut HashMap<Ref, BigUint>) -> BigUint {
        if self.is_zero(node) {
            return BigUint::ZERO;
        } else if self.is_one(node) {
            return max.clone();
        }

        if let Some(count) = cache.get(&node) {
            return count.clone();
        }

        let low = self.low(node.index());
        let high = self.high(node.index());

        let count_low = self.sat_count_(low, max, cache);
        let count_high = self.sat_count_(high, max, cache);

        let count: BigUint = (count_low + count_high) >> 1;
        let count = if node.is_negated() { max - count } else { count };

        cache.insert(node, count.clone());
        count
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::error::Result;

    fn lits(xs: &[i32]) -> Vec<Lit> {
        xs.iter().copied().map(Lit::from_dimacs).collect()
    }

    #[test]
    fn test_one_sat() -> Result<()> {
        let bdd = Bdd::default();

        let f = bdd.mk_cube(lits(&[1, -2, -3]))?;
        let model = bdd.one_sat(f);
        assert_eq!(model, Some(lits(&[1, -2, -3])));

        let g = bdd.apply_and(f, -bdd.mk_cube(lits(&[1, -2, -3]))?)?;
        assert_eq!(bdd.one_sat(g), None);
        Ok(())
    }

    #[test]
    fn test_one_sat_many() -> Result<()> {
        let bdd = Bdd::default();

        for &s1 in &[1, -1] {
            for &s2 in &[1, -1] {
                for &s3 in &[1, -1] {
                    let cube = lits(&[s1, 2 * s2, 3 * s3]);
                    let f = bdd.mk_cube(cube.clone())?;
                    assert_eq!(bdd.one_sat(f), Some(cube));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_full_sat_one_prefers_false() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        let x3 = bdd.mk_var(3)?;

        // x1 ∨ (x2 ∧ x3): the smallest model has x1 = 0.
        let f = bdd.apply_or(x1, bdd.apply_and(x2, x3)?)?;
        assert_eq!(bdd.full_sat_one(f, [1, 2, 3, 4]), Some(lits(&[-1, 2, 3, -4])));

        // Don't-cares are fixed to false.
        assert_eq!(bdd.full_sat_one(x2, [1, 2, 3]), Some(lits(&[-1, 2, -3])));
        assert_eq!(bdd.full_sat_one(bdd.one, [1, 2]), Some(lits(&[-1, -2])));
        assert_eq!(bdd.full_sat_one(bdd.zero, [1, 2]), None);
        Ok(())
    }

    #[test]
    fn test_sat_count_terminal() {
        let bdd = Bdd::default();

        assert_eq!(bdd.sat_count(bdd.zero, 3), BigUint::from(0u32));
        assert_eq!(bdd.sat_count(bdd.one, 1), BigUint::from(2u32));
        assert_eq!(bdd.sat_count(bdd.one, 3), BigUint::from(8u32));
    }

    #[test]
    fn test_sat_count_var() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        assert_eq!(bdd.sat_count(x1, 1), BigUint::from(1u32));
        assert_eq!(bdd.sat_count(x1, 3), BigUint::from(4u32));

        let x2 = bdd.mk_var(2)?;
        assert_eq!(bdd.sat_count(-x2, 2), BigUint::from(2u32));
        Ok(())
    }

    #[test]
    fn test_sat_count_cube_and_clause() -> Result<()> {
        let bdd = Bdd::default();

        let f = bdd.mk_cube(lits(&[1, 2]))?;
        assert_eq!(bdd.sat_count(f, 2), BigUint::from(1u32));
        assert_eq!(bdd.sat_count(f, 5), BigUint::from(8u32));

        // ¬(x1 ∧ x2) == ¬x1 ∨ ¬x2
        assert_eq!(bdd.sat_count(-f, 2), BigUint::from(3u32));
        assert_eq!(bdd.sat_count(-f, 4), BigUint::from(12u32));
        Ok(())
    }

    #[test]
    fn test_sat_count_wide() -> Result<()> {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1)?;
        // More than 64 variables still counts exactly.
        assert_eq!(bdd.sat_count(x, 100), BigUint::from(1u32) << 99usize);
        Ok(())
    }
}
