//! The BDD manager.
//!
//! A [`Bdd`] is one *universe*: it owns the unique table of nodes, the computed
//! table, the variable counter and the root reference counts. Every [`Ref`] it
//! hands out is canonical within this universe only.
//!
//! Nodes use complement edges: the sign of a [`Ref`] marks negation, there is a
//! single terminal node (`one`, index 1) and `zero == -one`. High edges are
//! never negated, which keeps the representation canonical.
//!
//! All node-allocating operations return [`Result`]: once the unique table is
//! full (see [`Settings::max_node_bits`]) they fail with
//! [`Error::NodeTableExhausted`][crate::error::Error::NodeTableExhausted].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Debug;

use log::{debug, warn};

use crate::cache::Cache;
use crate::error::Result;
use crate::reference::Ref;
use crate::settings::Settings;
use crate::table::Table;
use crate::types::Lit;
use crate::utils::{pairing3, MyHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

#[allow(clippy::derivable_impls)]
impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::positive(0),
            high: Ref::positive(0),
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing3(
            self.variable as u64,
            self.low.get() as u32 as u64,
            self.high.get() as u32 as u64,
        )
    }
}

type Storage = Table<Node>;

impl Storage {
    fn variable(&self, index: usize) -> u32 {
        self.value(index).variable
    }
    fn low(&self, index: usize) -> Ref {
        self.value(index).low
    }
    fn high(&self, index: usize) -> Ref {
        self.value(index).high
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OpKey {
    Ite(Ref, Ref, Ref),
}

pub struct Bdd {
    storage: RefCell<Storage>,
    cache: RefCell<Cache<OpKey, Ref>>,
    size_cache: RefCell<Cache<Ref, u64>>,
    roots: RefCell<HashMap<Ref, usize>>,
    num_vars: Cell<u32>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    pub fn new(settings: &Settings) -> Self {
        let bits = settings.initial_node_bits.clamp(1, 31);
        let max_bits = settings.max_node_bits.clamp(bits, 31);
        let cache_bits = bits.min(16);

        let mut storage = Storage::new(bits, max_bits);

        // Allocate the terminal node:
        let one = storage.alloc();
        assert_eq!(one, Ok(1), "Terminal node must be at index 1");
        let one = Ref::positive(1);
        let zero = -one;

        debug!(
            "Bdd::new(initial_node_bits = {}, max_node_bits = {})",
            bits, max_bits
        );

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(Cache::new(cache_bits)),
            size_cache: RefCell::new(Cache::new(cache_bits)),
            roots: RefCell::new(HashMap::new()),
            num_vars: Cell::new(0),
            zero,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(&Settings::default())
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("Bdd")
            .field("num_vars", &self.num_vars.get())
            .field("capacity", &storage.capacity())
            .field("size", &storage.size())
            .field("real_size", &storage.real_size())
            .finish()
    }
}

impl Bdd {
    /// The computed table of `apply_ite`, for inspecting hit rates and occupancy.
    pub fn cache(&self) -> std::cell::Ref<'_, Cache<OpKey, Ref>> {
        self.cache.borrow()
    }

    pub fn variable(&self, index: u32) -> u32 {
        self.storage.borrow().variable(index as usize)
    }
    pub fn low(&self, index: u32) -> Ref {
        self.storage.borrow().low(index as usize)
    }
    pub fn high(&self, index: u32) -> Ref {
        self.storage.borrow().high(index as usize)
    }

    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.low(node.index());
        if node.is_negated() {
            -low
        } else {
            low
        }
    }
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.high(node.index());
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        self.is_zero(node) || self.is_one(node)
    }

    /// Number of variables allocated so far with [`Bdd::new_var`].
    pub fn num_vars(&self) -> u32 {
        self.num_vars.get()
    }

    /// Number of live (allocated) nodes, including the terminal.
    pub fn node_count(&self) -> usize {
        self.storage.borrow().real_size()
    }

    /// Allocate the next variable (1-based) and return its positive literal.
    pub fn new_var(&self) -> Result<Ref> {
        let v = self.num_vars.get() + 1;
        let res = self.mk_var(v)?;
        self.num_vars.set(v);
        Ok(res)
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Result<Ref> {
        debug!("mk(v = {}, low = {}, high = {})", v, low, high);

        assert_ne!(v, 0, "Variable index should not be zero");

        // Handle canonicity
        if high.is_negated() {
            debug!("mk: restoring canonicity");
            return Ok(-self.mk_node(v, -low, -high)?);
        }

        // Handle duplicates
        if low == high {
            debug!("mk: duplicates {} == {}", low, high);
            return Ok(low);
        }

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
        })?;
        Ok(Ref::positive(i as u32))
    }

    pub fn mk_var(&self, v: u32) -> Result<Ref> {
        assert_ne!(v, 0, "Variable index should not be zero");
        self.mk_node(v, self.zero, self.one)
    }

    /// Conjunction of the given literals.
    pub fn mk_cube(&self, literals: impl IntoIterator<Item = Lit>) -> Result<Ref> {
        let mut literals = literals.into_iter().collect::<Vec<_>>();
        literals.sort_by_key(|lit| lit.var());
        debug!("cube(literals = {:?})", literals);
        let mut current = self.one;
        for lit in literals.into_iter().rev() {
            let v = lit.var().id();
            current = if lit.is_positive() {
                self.mk_node(v, self.zero, current)?
            } else {
                self.mk_node(v, current, self.zero)?
            };
        }
        Ok(current)
    }

    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        assert_ne!(v, 0, "Variable index should not be zero");

        let i = node.index();
        if self.is_terminal(node) || v < self.variable(i) {
            return (node, node);
        }
        assert_eq!(v, self.variable(i));
        if node.is_negated() {
            (-self.low(i), -self.high(i))
        } else {
            (self.low(i), self.high(i))
        }
    }

    /// Apply the ITE operation to the arguments.
    ///
    /// ```text
    /// ITE(x, y, z) = (x ∧ y) ∨ (¬x ∧ z)
    /// ```
    ///
    /// # Examples
    ///
    /// ```
    /// use acl_bdd::bdd::Bdd;
    ///
    /// # fn main() -> acl_bdd::error::Result<()> {
    /// let bdd = Bdd::default();
    /// let x = bdd.mk_var(1)?;
    /// let y = bdd.mk_var(2)?;
    /// let z = bdd.mk_var(3)?;
    /// let f = bdd.apply_ite(x, y, z)?;
    /// let x_and_y = bdd.apply_and(x, y)?;
    /// let not_x_and_z = bdd.apply_and(-x, z)?;
    /// assert_eq!(f, bdd.apply_or(x_and_y, not_x_and_z)?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Result<Ref> {
        debug!("apply_ite(f = {}, g = {}, h = {})", f, g, h);

        // Base cases:
        //   ite(1,G,H) => G
        //   ite(0,G,H) => H
        if self.is_one(f) {
            return Ok(g);
        }
        if self.is_zero(f) {
            return Ok(h);
        }

        // From now on, F is known not to be a constant
        assert!(!self.is_terminal(f));

        // More base cases:
        //   ite(F,G,G) => G
        //   ite(F,1,0) => F
        //   ite(F,0,1) => ~F
        //   ite(F,1,~F) => 1
        //   ite(F,F,1) => 1
        //   ite(F,~F,0) => 0
        //   ite(F,0,F) => F
        if g == h {
            return Ok(g);
        }
        if self.is_one(g) && self.is_zero(h) {
            return Ok(f);
        }
        if self.is_zero(g) && self.is_one(h) {
            return Ok(-f);
        }
        if self.is_one(g) && h == -f {
            return Ok(self.one);
        }
        if g == f && self.is_one(h) {
            return Ok(self.one);
        }
        if g == -f && self.is_zero(h) {
            return Ok(self.zero);
        }
        if self.is_zero(g) && h == f {
            return Ok(f);
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,~F) => ite(F,G,1)
        if g == f {
            debug!("ite(F,F,H) => ite(F,1,H)");
            return self.apply_ite(f, self.one, h);
        }
        if h == f {
            debug!("ite(F,G,F) => ite(F,G,0)");
            return self.apply_ite(f, g, self.zero);
        }
        if g == -f {
            debug!("ite(F,~F,H) => ite(F,0,H)");
            return self.apply_ite(f, self.zero, h);
        }
        if h == -f {
            debug!("ite(F,G,~F) => ite(F,G,1)");
            return self.apply_ite(f, g, self.one);
        }

        let i = self.variable(f.index());
        let j = self.variable(g.index());
        let k = self.variable(h.index());
        assert_ne!(i, 0);

        // Equivalent pairs (choose the one with the lowest top variable):
        //   ite(F,1,H) == ite(H,1,F) == F ∨ H
        //   ite(F,G,0) == ite(G,F,0) == F ∧ G
        //   ite(F,G,1) == ite(~G,~F,1) == F -> G
        //   ite(F,0,H) == ite(~H,0,~F) == ~F ∧ H
        //   ite(F,G,~G) == ite(G,F,~F)
        if self.is_one(g) && k < i {
            debug!("ite(F,1,H) => ite(H,1,F)");
            return self.apply_ite(h, self.one, f);
        }
        if self.is_zero(h) && j < i {
            debug!("ite(F,G,0) => ite(G,F,0)");
            return self.apply_ite(g, f, self.zero);
        }
        if self.is_one(h) && j < i {
            debug!("ite(F,G,1) => ite(~G,~F,1)");
            return self.apply_ite(-g, -f, self.one);
        }
        if self.is_zero(g) && k < i {
            debug!("ite(F,0,H) => ite(~H,0,~F)");
            return self.apply_ite(-h, self.zero, -f);
        }
        if g == -h && j < i {
            debug!("ite(F,G,~G) => ite(G,F,~F)");
            return self.apply_ite(g, f, -f);
        }

        // Make sure the first two pointers (f and g) are regular (not negated)
        let (mut f, mut g, mut h) = (f, g, h);

        // ite(~F,G,H) => ite(F,H,G)
        if f.is_negated() {
            f = -f;
            std::mem::swap(&mut g, &mut h);
        }

        // ite(F,~G,H) => ~ite(F,G,~H)
        let mut n = false;
        if g.is_negated() {
            n = true;
            g = -g;
            h = -h;
        }

        let (f, g, h) = (f, g, h); // make immutable

        let key = OpKey::Ite(f, g, h);
        let cached = self.cache.borrow().get(&key);
        if let Some(res) = cached {
            debug!("cache: apply_ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);
            return Ok(if n { -res } else { res });
        }

        // Determine the top variable:
        let mut m = i;
        if j != 0 {
            m = m.min(j);
        }
        if k != 0 {
            m = m.min(k);
        }
        assert_ne!(m, 0);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0)?;
        let t = self.apply_ite(f1, g1, h1)?;

        let res = self.mk_node(m, e, t)?;
        debug!("computed: apply_ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);
        self.cache.borrow_mut().insert(key, res);

        Ok(if n { -res } else { res })
    }

    fn maybe_constant(&self, node: Ref) -> Option<bool> {
        if self.is_zero(node) {
            Some(false)
        } else if self.is_one(node) {
            Some(true)
        } else {
            None
        }
    }

    /// Decide whether `ite(f, g, h)` is a constant without building it.
    pub fn ite_constant(&self, f: Ref, g: Ref, h: Ref) -> Option<bool> {
        debug!("ite_constant(f = {}, g = {}, h = {})", f, g, h);

        if self.is_one(f) {
            return self.maybe_constant(g);
        }
        if self.is_zero(f) {
            return self.maybe_constant(h);
        }

        if g == h {
            return self.maybe_constant(g);
        }
        if self.is_one(g) && self.is_zero(h) {
            return None;
        }
        if self.is_zero(g) && self.is_one(h) {
            return None;
        }
        if self.is_one(g) && h == -f {
            return Some(true);
        }
        if g == f && self.is_one(h) {
            return Some(true);
        }
        if g == -f && self.is_zero(h) {
            return Some(false);
        }
        if self.is_zero(g) && h == f {
            return None;
        }

        let key = OpKey::Ite(f, g, h);
        let cached = self.cache.borrow().get(&key);
        if let Some(res) = cached {
            return self.maybe_constant(res);
        }

        let i = self.variable(f.index());
        let j = self.variable(g.index());
        let k = self.variable(h.index());

        // Determine the top variable:
        let mut m = i;
        if j != 0 {
            m = m.min(j);
        }
        if k != 0 {
            m = m.min(k);
        }
        assert_ne!(m, 0);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let t = self.ite_constant(f1, g1, h1)?;
        let e = self.ite_constant(f0, g0, h0)?;
        if t == e {
            Some(t)
        } else {
            None
        }
    }

    /// Check whether `f` implies `g`, i.e. `f ⊆ g` as sets of assignments.
    pub fn is_implies(&self, f: Ref, g: Ref) -> bool {
        debug!("is_implies(f = {}, g = {})", f, g);
        self.ite_constant(f, g, self.one) == Some(true)
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_and(u = {}, v = {})", u, v);
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_or(u = {}, v = {})", u, v);
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_xor(u = {}, v = {})", u, v);
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_eq(u = {}, v = {})", u, v);
        self.apply_ite(u, v, -v)
    }

    pub fn apply_imply(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_imply(u = {}, v = {})", u, v);
        self.apply_ite(u, v, self.one)
    }

    /// Set difference: `u ∧ ¬v`.
    pub fn apply_diff(&self, u: Ref, v: Ref) -> Result<Ref> {
        debug!("apply_diff(u = {}, v = {})", u, v);
        self.apply_ite(u, -v, self.zero)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Result<Ref> {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_and(res, node)?;
            if self.is_zero(res) {
                break;
            }
        }
        Ok(res)
    }

    pub fn apply_or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Result<Ref> {
        let mut res = self.zero;
        for node in nodes {
            res = self.apply_or(res, node)?;
            if self.is_one(res) {
                break;
            }
        }
        Ok(res)
    }

    /// Cofactor `f|v<-b`.
    pub fn restrict(&self, f: Ref, v: u32, b: bool) -> Result<Ref> {
        let mut cache = HashMap::new();
        self.restrict_(f, v, b, &mut cache)
    }

    fn restrict_(&self, f: Ref, v: u32, b: bool, cache: &mut HashMap<Ref, Ref>) -> Result<Ref> {
        assert_ne!(v, 0, "Variable index should not be zero");

        if self.is_terminal(f) {
            return Ok(f);
        }

        let i = self.variable(f.index());

        if v < i {
            // 'f' does not depend on 'v'
            return Ok(f);
        }

        if v == i {
            return Ok(if b {
                self.high_node(f)
            } else {
                self.low_node(f)
            });
        }

        if let Some(&res) = cache.get(&f) {
            return Ok(res);
        }

        let low = self.restrict_(self.low_node(f), v, b, cache)?;
        let high = self.restrict_(self.high_node(f), v, b, cache)?;
        let res = self.mk_node(i, low, high)?;
        cache.insert(f, res);
        Ok(res)
    }

    /// Existential quantification of `f` over the given variables.
    pub fn exists(&self, f: Ref, vars: impl IntoIterator<Item = u32>) -> Result<Ref> {
        let vars: BTreeSet<u32> = vars.into_iter().collect();
        debug!("exists(f = {}, vars = {:?})", f, vars);
        let Some(&last) = vars.last() else {
            return Ok(f);
        };
        let mut cache = HashMap::new();
        self.exists_(f, &vars, last, &mut cache)
    }

    fn exists_(
        &self,
        f: Ref,
        vars: &BTreeSet<u32>,
        last: u32,
        cache: &mut HashMap<Ref, Ref>,
    ) -> Result<Ref> {
        if self.is_terminal(f) {
            return Ok(f);
        }

        let i = self.variable(f.index());
        if i > last {
            return Ok(f);
        }

        if let Some(&res) = cache.get(&f) {
            return Ok(res);
        }

        let low = self.exists_(self.low_node(f), vars, last, cache)?;
        let high = self.exists_(self.high_node(f), vars, last, cache)?;
        let res = if vars.contains(&i) {
            self.apply_or(low, high)?
        } else {
            self.mk_node(i, low, high)?
        };
        cache.insert(f, res);
        Ok(res)
    }

    pub fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<u32> {
        let mut visited = HashSet::new();
        visited.insert(self.one.index());
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(node) = queue.pop_front() {
            let i = node.index();
            if visited.insert(i) {
                queue.push_back(self.low(i));
                queue.push_back(self.high(i));
            }
        }

        visited
    }

    pub fn size(&self, f: Ref) -> u64 {
        let cached = self.size_cache.borrow().get(&f);
        if let Some(size) = cached {
            return size;
        }
        let size = self.descendants([f]).len() as u64;
        debug!("computed: size({}) -> {}", f, size);
        self.size_cache.borrow_mut().insert(f, size);
        size
    }

    /// Mark `f` as a root that survives [`Bdd::collect_garbage`].
    pub fn retain(&self, f: Ref) {
        if self.is_terminal(f) {
            return;
        }
        let key = Ref::positive(f.index());
        *self.roots.borrow_mut().entry(key).or_insert(0) += 1;
    }

    /// Drop one retention of `f`.
    pub fn release(&self, f: Ref) {
        if self.is_terminal(f) {
            return;
        }
        let key = Ref::positive(f.index());
        let mut roots = self.roots.borrow_mut();
        match roots.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                roots.remove(&key);
            }
            None => warn!("release of a node that was never retained: {}", f),
        }
    }

    /// Number of distinct retained roots.
    pub fn num_roots(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Free every node not reachable from a retained root or from `extra_roots`.
    ///
    /// Clears the computed tables. Returns the number of freed nodes.
    pub fn collect_garbage(&self, extra_roots: &[Ref]) -> usize {
        debug!("Collecting garbage...");

        self.cache.borrow_mut().clear();
        self.size_cache.borrow_mut().clear();

        let before = self.node_count();
        let roots: Vec<Ref> = self
            .roots
            .borrow()
            .keys()
            .copied()
            .chain(extra_roots.iter().copied())
            .collect();
        let alive = self.descendants(roots);
        debug!("Alive nodes: {}", alive.len());

        let n = self.storage.borrow().num_buckets();
        for i in 0..n {
            let mut index = self.storage.borrow().bucket(i);
            if index == 0 {
                continue;
            }

            while index != 0 && !alive.contains(&(index as u32)) {
                let next = self.storage.borrow().next(index);
                self.storage.borrow_mut().drop(index);
                index = next;
            }
            self.storage.borrow_mut().set_bucket(i, index);

            let mut prev = index;
            while prev != 0 {
                let mut cur = self.storage.borrow().next(prev);
                while cur != 0 && !alive.contains(&(cur as u32)) {
                    let next = self.storage.borrow().next(cur);
                    self.storage.borrow_mut().drop(cur);
                    cur = next;
                }
                let next_prev = self.storage.borrow().next(prev);
                if next_prev != cur {
                    self.storage.borrow_mut().set_next(prev, cur);
                }
                prev = cur;
            }
        }

        let freed = before - self.node_count();
        debug!("Freed {} nodes", freed);
        freed
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        } else if self.is_one(node) {
            return "(1)".to_string();
        }

        let v = self.variable(node.index());
        let low = self.low_node(node);
        let high = self.high_node(node);

        format!(
            "{}:(x{}, {}, {})",
            node,
            v,
            self.to_bracket_string(high),
            self.to_bracket_string(low)
        )
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::error::Error;

    fn lits(xs: &[i32]) -> Vec<Lit> {
        xs.iter().copied().map(Lit::from_dimacs).collect()
    }

    #[test]
    fn test_var() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;

        assert_eq!(bdd.variable(x.index()), 1);
        assert_eq!(bdd.high_node(x), bdd.one);
        assert_eq!(bdd.low_node(x), bdd.zero);
        Ok(())
    }

    #[test]
    fn test_not_var() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;
        let not_x = -x;

        assert_eq!(bdd.variable(not_x.index()), 1);
        assert_eq!(bdd.high_node(not_x), bdd.zero);
        assert_eq!(bdd.low_node(not_x), bdd.one);
        Ok(())
    }

    #[test]
    fn test_terminal() {
        let bdd = Bdd::default();

        assert!(bdd.is_terminal(bdd.zero));
        assert!(bdd.is_zero(bdd.zero));
        assert!(!bdd.is_one(bdd.zero));

        assert!(bdd.is_terminal(bdd.one));
        assert!(!bdd.is_zero(bdd.one));
        assert!(bdd.is_one(bdd.one));

        assert_eq!(bdd.variable(bdd.one.index()), 0);
    }

    #[test]
    fn test_new_var() -> Result<()> {
        let bdd = Bdd::default();
        let x1 = bdd.new_var()?;
        let x2 = bdd.new_var()?;
        assert_eq!(bdd.num_vars(), 2);
        assert_eq!(bdd.variable(x1.index()), 1);
        assert_eq!(bdd.variable(x2.index()), 2);
        assert_eq!(x1, bdd.mk_var(1)?);
        Ok(())
    }

    #[test]
    fn test_cube() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        let x3 = bdd.mk_var(3)?;

        let f = bdd.apply_and_many([x1, x2, x3])?;
        assert_eq!(f, bdd.mk_cube(lits(&[1, 2, 3]))?);

        let f = bdd.apply_and_many([x1, -x2, -x3])?;
        assert_eq!(f, bdd.mk_cube(lits(&[-3, 1, -2]))?);
        Ok(())
    }

    #[test]
    fn test_canonicity() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;
        let y = bdd.mk_var(2)?;
        let z = bdd.mk_var(3)?;

        // Same function built in different ways gives the same handle.
        let f = bdd.apply_and(bdd.apply_or(x, y)?, z)?;
        let g = bdd.apply_or(bdd.apply_and(z, y)?, bdd.apply_and(x, z)?)?;
        assert_eq!(f, g);

        // Building it again does not allocate new nodes.
        let before = bdd.node_count();
        let h = bdd.apply_and(z, bdd.apply_or(y, x)?)?;
        assert_eq!(h, f);
        assert_eq!(bdd.node_count(), before);
        Ok(())
    }

    #[test]
    fn test_de_morgan() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;
        let y = bdd.mk_var(2)?;

        assert_eq!(-bdd.apply_and(x, y)?, bdd.apply_or(-x, -y)?);
        assert_eq!(-bdd.apply_or(x, y)?, bdd.apply_and(-x, -y)?);
        Ok(())
    }

    #[test]
    fn test_xor() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;
        let y = bdd.mk_var(2)?;
        let f = bdd.apply_and(x, y)?;

        assert_eq!(bdd.apply_xor(f, f)?, bdd.zero);
        assert_eq!(bdd.apply_xor(f, -f)?, bdd.one);
        assert_eq!(bdd.apply_xor(x, -y)?, bdd.apply_eq(x, y)?);
        Ok(())
    }

    #[test]
    fn test_apply_ite() -> Result<()> {
        let bdd = Bdd::default();

        // Terminal cases
        let g = bdd.mk_var(2)?;
        let h = bdd.mk_var(3)?;
        assert_eq!(bdd.apply_ite(bdd.one, g, h)?, g);
        assert_eq!(bdd.apply_ite(bdd.zero, g, h)?, h);

        // Functions
        let f = bdd.mk_node(4, bdd.one, h)?;
        assert_eq!(bdd.apply_ite(f, f, h)?, bdd.apply_or(f, h)?);
        assert_eq!(bdd.apply_ite(f, g, f)?, bdd.apply_and(f, g)?);
        assert_eq!(bdd.apply_ite(f, -g, bdd.one)?, -bdd.apply_and(f, g)?);
        assert_eq!(bdd.apply_ite(f, bdd.zero, -h)?, -bdd.apply_or(f, h)?);

        // General case
        let f = bdd.mk_var(6)?;
        let g = bdd.mk_var(7)?;
        let h = bdd.mk_var(8)?;
        let result = bdd.mk_node(6, -h, -g)?;
        assert_eq!(bdd.apply_ite(f, -g, -h)?, result);
        Ok(())
    }

    #[test]
    fn test_diff_and_imply() -> Result<()> {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1)?;
        let y = bdd.mk_var(2)?;

        assert_eq!(bdd.apply_diff(x, y)?, bdd.apply_and(x, -y)?);
        assert_eq!(bdd.apply_imply(x, y)?, bdd.apply_or(-x, y)?);
        assert_eq!(bdd.apply_diff(x, x)?, bdd.zero);
        Ok(())
    }

    #[test]
    fn test_ite_constant() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;

        let f = bdd.apply_and(x1, x2)?;

        assert!(bdd.is_implies(f, x1));
        assert!(bdd.is_implies(f, x2));
        assert!(!bdd.is_implies(f, -x1));
        assert!(!bdd.is_implies(f, -x2));
        assert!(bdd.is_implies(f, bdd.apply_or(x1, x2)?));
        assert!(bdd.is_implies(x1, bdd.one));
        assert!(bdd.is_implies(bdd.zero, x1));
        assert!(!bdd.is_implies(bdd.apply_or(x1, x2)?, x1));
        assert!(bdd.is_implies(x2, bdd.apply_or(x1, x2)?));
        Ok(())
    }

    #[test]
    fn test_restrict() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        let x3 = bdd.mk_var(3)?;

        let f = bdd.apply_or(bdd.apply_eq(x1, x2)?, x3)?;
        let f_x2_zero = bdd.restrict(f, 2, false)?; // f|x2<-0
        let g = bdd.apply_or(-x1, x3)?;
        assert_eq!(f_x2_zero, g);
        Ok(())
    }

    #[test]
    fn test_exists() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        let x3 = bdd.mk_var(3)?;

        let f = bdd.apply_and_many([x1, -x2, x3])?;
        assert_eq!(bdd.exists(f, [2])?, bdd.apply_and(x1, x3)?);
        assert_eq!(bdd.exists(f, [1, 2, 3])?, bdd.one);
        assert_eq!(bdd.exists(f, [])?, f);
        assert_eq!(bdd.exists(bdd.zero, [1])?, bdd.zero);
        Ok(())
    }

    #[test]
    fn test_collect_garbage() -> Result<()> {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        let x3 = bdd.mk_var(3)?;

        let keep = bdd.apply_and(x1, x2)?;
        let _drop = bdd.apply_xor(bdd.apply_or(x1, x3)?, x2)?;
        bdd.retain(keep);

        let freed = bdd.collect_garbage(&[]);
        assert!(freed > 0);
        assert_eq!(bdd.node_count() as u64, bdd.size(keep));

        // The retained function is still usable and canonical.
        let x1 = bdd.mk_var(1)?;
        let x2 = bdd.mk_var(2)?;
        assert_eq!(bdd.apply_and(x2, x1)?, keep);

        bdd.release(keep);
        assert_eq!(bdd.num_roots(), 0);
        bdd.collect_garbage(&[]);
        assert_eq!(bdd.node_count(), 1);
        Ok(())
    }

    #[test]
    fn test_node_table_exhausted() {
        let settings = Settings {
            initial_node_bits: 2,
            max_node_bits: 3,
            ..Settings::default()
        };
        let bdd = Bdd::new(&settings);

        let mut result = Ok(bdd.one);
        for _ in 0..16 {
            result = bdd.new_var();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(Error::NodeTableExhausted { capacity: 8 }));
    }

    #[test]
    fn test_computed_table_is_bounded() -> Result<()> {
        let bdd = Bdd::new(&Settings {
            initial_node_bits: 4,
            ..Settings::default()
        });
        let vars: Vec<Ref> = (0..24).map(|_| bdd.new_var()).collect::<Result<_>>()?;
        let capacity = bdd.cache().capacity();

        let mut f = bdd.zero;
        for w in vars.windows(3) {
            let t = bdd.apply_and_many([w[0], -w[1], w[2]])?;
            f = bdd.apply_xor(f, t)?;
        }
        assert!(bdd.cache().misses() > capacity);
        assert!(bdd.cache().len() <= capacity);
        assert_eq!(bdd.cache().capacity(), capacity);

        // Evictions never change results.
        let mut g = bdd.zero;
        for w in vars.windows(3) {
            let t = bdd.apply_and_many([w[0], -w[1], w[2]])?;
            g = bdd.apply_xor(g, t)?;
        }
        assert_eq!(f, g);
        Ok(())
    }

    #[test]
    fn test_to_bracket_string() -> Result<()> {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1)?;
        assert_eq!(bdd.to_bracket_string(x), format!("{}:(x1, (1), (0))", x));
        Ok(())
    }
}
