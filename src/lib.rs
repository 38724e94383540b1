//! # acl-bdd: symbolic analysis of access-control lists
//!
//! **`acl-bdd`** compiles ACLs and header-space constraints into **Binary Decision Diagrams**
//! over a fixed encoding of packet headers, and answers structural questions about filters:
//! which lines can ever match, which earlier lines block them, and how an edited filter
//! differs from the one it replaces.
//!
//! ## Packet space
//!
//! A [`BddPacket`][crate::packet::BddPacket] owns one [`Bdd`][crate::bdd::Bdd] manager and
//! allocates a contiguous, MSB-first run of variables for every header field
//! (destination IP, source IP, ports, protocol, ICMP, TCP flags, DSCP, ECN, fragment offset,
//! packet length). Because the layout never changes, BDDs produced by different compilers
//! over the same packet are directly comparable: equal sets have equal [`Ref`][crate::reference::Ref]s.
//!
//! ## Basic usage
//!
//! ```rust
//! use acl_bdd::acl::{AclLine, IpAccessList};
//! use acl_bdd::configuration::Configuration;
//! use acl_bdd::expr::AclLineMatchExpr;
//! use acl_bdd::ip_space::{IpSpace, NamedIpSpaces};
//! use acl_bdd::reachability::line_reachability;
//! use acl_bdd::settings::Settings;
//!
//! let dst = |s: &str| AclLineMatchExpr::match_dst(IpSpace::Prefix(s.parse().unwrap()));
//! let acl = IpAccessList::new(
//!     "acl",
//!     vec![
//!         AclLine::permit(dst("1.1.0.0/16")),
//!         AclLine::deny(dst("1.1.1.0/24")),
//!     ],
//! );
//! let config = Configuration::new("A", [acl], NamedIpSpaces::new(), ["eth0"]).unwrap();
//!
//! let rows = line_reachability(&config, "acl", &Settings::default()).unwrap();
//! assert!(rows[0].reachable);
//! assert!(!rows[1].reachable);
//! assert_eq!(rows[1].explaining_line, Some(0));
//! ```
//!
//! ## Core components
//!
//! - **[`bdd`]**, **[`sat`]**: the BDD manager with complement edges, model extraction and counting.
//! - **[`packet`]**, **[`source`]**: the header-field encoding and the ingress-interface field.
//! - **[`ip_space_to_bdd`]**, **[`header_space_to_bdd`]**, **[`acl_to_bdd`]**: compilers to BDDs.
//! - **[`acl_to_expr`]**, **[`negate`]**, **[`evaluate`]**: expression-level rewriting and concrete evaluation.
//! - **[`reachability`]**, **[`filter_change`]**: the analyses.
//! - **[`explain`]**: BDD-simplified, invariant-scoped explanations of what an ACL permits.
//! - **[`transformation`]**: NAT rewrites applied to concrete flows.

pub mod acl;
pub mod acl_to_bdd;
pub mod acl_to_expr;
pub mod bdd;
pub mod cache;
pub mod configuration;
pub mod dot;
pub mod error;
pub mod evaluate;
pub mod explain;
pub mod expr;
pub mod filter_change;
pub mod flow;
pub mod header_space;
pub mod header_space_to_bdd;
pub mod ip;
pub mod ip_space;
pub mod ip_space_to_bdd;
pub mod negate;
pub mod packet;
pub mod reachability;
pub mod reference;
pub mod sat;
pub mod settings;
pub mod source;
pub mod table;
pub mod transformation;
pub mod types;
pub mod utils;
