//! Graphviz export of BDDs.
//!
//! Variable nodes are grouped by variable, so every packet field shows up as a band of
//! ranks from its most to its least significant bit. High edges are solid, low edges are
//! dashed and complemented edges end in a hollow circle.
//!
//! ```
//! use acl_bdd::packet::BddPacket;
//! use acl_bdd::settings::Settings;
//!
//! let packet = BddPacket::new(&Settings::default()).unwrap();
//! let f = packet.dst_port().value(packet.bdd(), 22).unwrap();
//! let dot = packet.to_dot(&[f]).unwrap();
//! assert!(dot.contains("dst_port15"));
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::bdd::Bdd;
use crate::packet::BddPacket;
use crate::reference::Ref;

#[derive(Debug, Clone)]
pub struct DotConfig {
    pub node_shape: &'static str,
    pub terminal_shape: &'static str,
    pub root_shape: &'static str,
    pub high_edge_style: &'static str,
    pub low_edge_style: &'static str,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            node_shape: "ellipse",
            terminal_shape: "square",
            root_shape: "rect",
            high_edge_style: "solid",
            low_edge_style: "dashed",
        }
    }
}

impl Bdd {
    /// DOT graph of `roots` with variables shown as `x<index>`.
    pub fn to_dot(&self, roots: &[Ref]) -> Result<String, std::fmt::Error> {
        self.to_dot_with_labels(roots, |v| format!("x{}", v), &DotConfig::default())
    }

    /// DOT graph of `roots`, naming variables with `label`.
    pub fn to_dot_with_labels(
        &self,
        roots: &[Ref],
        label: impl Fn(u32) -> String,
        config: &DotConfig,
    ) -> Result<String, std::fmt::Error> {
        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape={}];", config.node_shape)?;

        writeln!(dot, "{{ rank=sink")?;
        writeln!(dot, "1 [shape={}, label=\"1\"];", config.terminal_shape)?;
        writeln!(dot, "}}")?;

        let mut nodes: Vec<u32> = self
            .descendants(roots.iter().copied())
            .into_iter()
            .filter(|&id| id != 1)
            .collect();
        nodes.sort_unstable();

        let mut levels = BTreeMap::<u32, Vec<u32>>::new();
        for &id in &nodes {
            levels.entry(self.variable(id)).or_default().push(id);
        }
        for (&v, ids) in &levels {
            writeln!(dot, "{{ rank=same")?;
            for id in ids {
                writeln!(dot, "{} [label=\"{}\"];", id, label(v))?;
            }
            writeln!(dot, "}}")?;
        }

        for &id in &nodes {
            let high = self.high(id);
            writeln!(dot, "{} -> {} [style={}];", id, high.index(), config.high_edge_style)?;
            let low = self.low(id);
            let arrow = if low.is_negated() { ", arrowhead=odot" } else { "" };
            writeln!(
                dot,
                "{} -> {} [style={}{}];",
                id,
                low.index(),
                config.low_edge_style,
                arrow
            )?;
        }

        writeln!(dot, "{{ rank=source")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} [shape={}, label=\"{}\"];", i, config.root_shape, root)?;
        }
        writeln!(dot, "}}")?;
        for (i, root) in roots.iter().enumerate() {
            let arrow = if root.is_negated() { " [arrowhead=odot]" } else { "" };
            writeln!(dot, "r{} -> {}{};", i, root.index(), arrow)?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

impl BddPacket {
    /// DOT graph of `roots` with variables named after their packet field bits.
    pub fn to_dot(&self, roots: &[Ref]) -> Result<String, std::fmt::Error> {
        self.bdd()
            .to_dot_with_labels(roots, |v| self.var_name(v), &DotConfig::default())
    }
}
