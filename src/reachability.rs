//! Line reachability of a single ACL.
//!
//! A line is *unmatchable* when its condition matches no packet at all, and
//! *unreachable* when every packet it matches is already taken by earlier lines.
//! Unreachable lines are explained by the earliest reachable line that subsumes
//! them and by the set of earlier lines that block them.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::{debug, info};
use num_bigint::BigUint;
use serde::Serialize;

use crate::acl::LineAction;
use crate::acl_to_bdd::{AclBdds, AclLineMatchExprToBdd};
use crate::configuration::Configuration;
use crate::error::Result;
use crate::packet::BddPacket;
use crate::reference::Ref;
use crate::settings::Settings;
use crate::source::SourceManager;

/// Classification of one ACL line.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct LineReachability {
    pub index: usize,
    pub action: LineAction,
    /// Original line text, if any.
    pub name: Option<String>,
    pub reachable: bool,
    pub unmatchable: bool,
    /// Earliest reachable earlier line that covers everything this line could still match.
    pub explaining_line: Option<usize>,
    /// Earlier lines that together block this line.
    pub blocking_lines: BTreeSet<usize>,
    /// Some blocking line takes a different action than this line.
    pub different_action: bool,
}

impl LineReachability {
    fn reachable(index: usize, action: LineAction) -> Self {
        Self {
            index,
            action,
            name: None,
            reachable: true,
            unmatchable: false,
            explaining_line: None,
            blocking_lines: BTreeSet::new(),
            different_action: false,
        }
    }
}

/// Lines that block `blocked`, and whether any of them takes a different action.
///
/// Overlapping earlier lines are weighted by the number of packets they share with the
/// blocked line. The heaviest lines are picked until the blocked line is covered, plus
/// the heaviest line with a different action when there is one.
pub fn blocking_lines(
    packet: &BddPacket,
    matches: &[Ref],
    actions: &[LineAction],
    blocked: usize,
) -> Result<(BTreeSet<usize>, bool)> {
    let bdd = packet.bdd();
    let num_vars = bdd.num_vars() as usize;
    let blocked_match = matches[blocked];
    let blocked_action = actions[blocked];

    let mut weighted: Vec<(BigUint, usize)> = Vec::new();
    let mut rest = blocked_match;
    let mut diff_action = false;
    for j in 0..blocked {
        if bdd.is_zero(rest) {
            break;
        }
        if bdd.is_zero(bdd.apply_and(matches[j], rest)?) {
            continue;
        }
        let overlap = bdd.apply_and(matches[j], blocked_match)?;
        weighted.push((bdd.sat_count(overlap, num_vars), j));
        diff_action |= actions[j] != blocked_action;
        rest = bdd.apply_diff(rest, matches[j])?;
    }

    let mut res = BTreeSet::new();
    let mut rest = blocked_match;
    let mut need_diff_action = diff_action;
    for (_, j) in weighted
        .into_iter()
        .sorted_by(|(w1, j1), (w2, j2)| w2.cmp(w1).then(j1.cmp(j2)))
    {
        let cur_diff = actions[j] != blocked_action;
        if !bdd.is_zero(rest) || (need_diff_action && cur_diff) {
            rest = bdd.apply_diff(rest, matches[j])?;
            res.insert(j);
            need_diff_action = need_diff_action && !cur_diff;
        }
        if bdd.is_zero(rest) && !need_diff_action {
            break;
        }
    }
    Ok((res, diff_action))
}

/// Classify every line of a compiled ACL.
///
/// `sane` restricts the analysis to packets with a meaningful source.
pub fn analyze(packet: &BddPacket, sane: Ref, acl: &AclBdds) -> Result<Vec<LineReachability>> {
    let bdd = packet.bdd();
    let matches: Vec<Ref> = acl
        .lines
        .iter()
        .map(|line| bdd.apply_and(line.matches, sane))
        .collect::<Result<_>>()?;
    let actions: Vec<LineAction> = acl.lines.iter().map(|line| line.action).collect();

    let mut res: Vec<LineReachability> = Vec::with_capacity(matches.len());
    let mut unmatched = sane;
    for (i, &m) in matches.iter().enumerate() {
        let mut row = LineReachability::reachable(i, actions[i]);
        if bdd.is_zero(m) {
            debug!("line {} is unmatchable", i);
            row.reachable = false;
            row.unmatchable = true;
        } else if bdd.is_zero(bdd.apply_and(m, unmatched)?) {
            debug!("line {} is unreachable", i);
            row.reachable = false;
            row.explaining_line = explaining_line(packet, &matches, &res, i)?;
            let (blocking, different_action) = blocking_lines(packet, &matches, &actions, i)?;
            row.blocking_lines = blocking;
            row.different_action = different_action;
        }
        unmatched = bdd.apply_diff(unmatched, m)?;
        res.push(row);
    }
    Ok(res)
}

/// Smallest reachable `j < i` such that `m_i` minus the lines strictly between `j` and `i`
/// is nonempty and within `m_j`.
fn explaining_line(
    packet: &BddPacket,
    matches: &[Ref],
    rows: &[LineReachability],
    i: usize,
) -> Result<Option<usize>> {
    let bdd = packet.bdd();
    let mut between = bdd.zero;
    let mut res = None;
    for j in (0..i).rev() {
        if rows[j].reachable {
            let rest = bdd.apply_diff(matches[i], between)?;
            if !bdd.is_zero(rest) && bdd.is_implies(rest, matches[j]) {
                res = Some(j);
            }
        }
        between = bdd.apply_or(between, matches[j])?;
    }
    Ok(res)
}

/// Classify every line of the ACL `acl_name` in `config`, in a fresh universe.
pub fn line_reachability(
    config: &Configuration,
    acl_name: &str,
    settings: &Settings,
) -> Result<Vec<LineReachability>> {
    let acl = config.acl(acl_name)?;
    let packet = BddPacket::new(settings)?;
    let sources = SourceManager::new(&packet, config.interfaces())?;
    let mut compiler =
        AclLineMatchExprToBdd::new(&packet, &sources, config.acls(), config.ip_spaces(), settings);
    let compiled = compiler.compile_acl(acl)?;
    let sane = sources.is_sane(&packet)?;

    let mut rows = analyze(&packet, sane, &compiled)?;
    for (row, line) in rows.iter_mut().zip(acl.lines()) {
        row.name.clone_from(&line.name);
    }
    info!(
        "{}: ACL `{}` has {} lines, {} unreachable, {} unmatchable",
        config.hostname(),
        acl_name,
        rows.len(),
        rows.iter().filter(|r| !r.reachable).count(),
        rows.iter().filter(|r| r.unmatchable).count()
    );
    Ok(rows)
}
