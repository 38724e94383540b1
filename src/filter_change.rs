//! Differential analysis of one ACL across two snapshots.
//!
//! `base` carries the candidate (edited) filter and `delta` the filter it is compared with.
//! For a query space `C` and an intended action `A`:
//!
//! * *redundant* flows are in `C` and both filters already take `A` on them,
//! * *incorrect* flows are in `C` but the candidate does not take `A`,
//! * *collateral damage* flows are outside `C`, the candidate takes `A` and the other filter does not.
//!
//! Each group carries one representative flow per region of the filter its rows are labelled
//! with, so no two rows of a group name the same line.

use log::info;
use serde::Serialize;

use crate::acl::LineAction;
use crate::acl_to_bdd::{AclBdds, AclLineMatchExprToBdd};
use crate::configuration::Configuration;
use crate::error::Result;
use crate::flow::Flow;
use crate::header_space::HeaderSpace;
use crate::packet::BddPacket;
use crate::reference::Ref;
use crate::settings::Settings;
use crate::source::SourceManager;

/// What the edit was meant to do.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FilterChangeQuery {
    /// Flows the edit targets. `None` means every flow.
    ///
    /// Named IP spaces in it resolve against the `base` snapshot only.
    pub header_space: Option<HeaderSpace>,
    /// Intended action on those flows, permit when absent.
    pub action: Option<LineAction>,
}

impl FilterChangeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header_space(mut self, hs: HeaderSpace) -> Self {
        self.header_space = Some(hs);
        self
    }

    pub fn with_action(mut self, action: LineAction) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FilterChangeRow {
    pub flow: Flow,
    pub action: LineAction,
    /// `line:<index>` of the deciding line, or `no-match`.
    pub line: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CollateralRow {
    pub flow: Flow,
    pub base_action: LineAction,
    pub base_line: String,
    pub delta_action: LineAction,
    pub delta_line: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct FilterChangeAnswer {
    pub redundant: Vec<FilterChangeRow>,
    pub incorrect: Vec<FilterChangeRow>,
    pub collateral_damage: Vec<CollateralRow>,
}

impl FilterChangeAnswer {
    pub fn is_empty(&self) -> bool {
        self.redundant.is_empty() && self.incorrect.is_empty() && self.collateral_damage.is_empty()
    }
}

/// Text of the line deciding a region.
pub fn line_text(line: Option<usize>) -> String {
    match line {
        Some(i) => format!("line:{}", i),
        None => "no-match".to_string(),
    }
}

/// A representative flow of one line region, or of a pair of line regions.
struct Representative {
    flow: Flow,
    base: Option<(LineAction, Option<usize>)>,
    delta: Option<(LineAction, Option<usize>)>,
}

/// Which filters' line regions split a row group.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SplitBy {
    Base,
    Delta,
    Both,
}

/// Shared universe of one comparison.
struct Universe<'a> {
    packet: &'a BddPacket,
    sources: &'a SourceManager,
    hostname: &'a str,
    base: AclBdds,
    delta: AclBdds,
}

impl Universe<'_> {
    /// A representative flow for every nonempty line region (or pair of regions) within `space`.
    fn representatives(&self, space: Ref, split: SplitBy) -> Result<Vec<Representative>> {
        let bdd = self.packet.bdd();
        let mut res = Vec::new();
        if bdd.is_zero(space) {
            return Ok(res);
        }
        let one = [(None, LineAction::Deny, bdd.one)];
        let (base_regions, delta_regions): (Vec<_>, Vec<_>) = match split {
            SplitBy::Base => (self.base.regions().collect(), one.to_vec()),
            SplitBy::Delta => (one.to_vec(), self.delta.regions().collect()),
            SplitBy::Both => (self.base.regions().collect(), self.delta.regions().collect()),
        };
        for &(base_line, base_action, base_region) in &base_regions {
            let x = bdd.apply_and(space, base_region)?;
            if bdd.is_zero(x) {
                continue;
            }
            for &(delta_line, delta_action, delta_region) in &delta_regions {
                let y = bdd.apply_and(x, delta_region)?;
                let Some(model) = self.packet.model(y) else {
                    continue;
                };
                let interface = self.sources.source_of(&model).into_interface();
                res.push(Representative {
                    flow: self.packet.flow_from_model(&model, self.hostname, interface),
                    base: (split != SplitBy::Delta).then_some((base_action, base_line)),
                    delta: (split != SplitBy::Base).then_some((delta_action, delta_line)),
                });
            }
        }
        Ok(res)
    }
}

pub struct FilterChangeAnalyzer<'a> {
    settings: &'a Settings,
}

impl<'a> FilterChangeAnalyzer<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Compare the ACL `acl_name` of `base` against the one in `delta`.
    ///
    /// Redundant rows are split by the line of `delta` that decides them and incorrect rows
    /// by the line of `base`; collateral rows by the pair of both.
    ///
    /// A missing ACL or an unresolvable reference in either snapshot is an error, and so is
    /// a query naming an IP space that `base` does not define.
    pub fn analyze(
        &self,
        base: &Configuration,
        delta: &Configuration,
        acl_name: &str,
        query: &FilterChangeQuery,
    ) -> Result<FilterChangeAnswer> {
        let base_acl = base.acl(acl_name)?;
        let delta_acl = delta.acl(acl_name)?;

        let packet = BddPacket::new(self.settings)?;
        let bdd = packet.bdd();
        let sources = SourceManager::new(&packet, base.interfaces().iter().chain(delta.interfaces()))?;

        let mut base_compiler =
            AclLineMatchExprToBdd::new(&packet, &sources, base.acls(), base.ip_spaces(), self.settings);
        let mut delta_compiler =
            AclLineMatchExprToBdd::new(&packet, &sources, delta.acls(), delta.ip_spaces(), self.settings);
        let base_bdds = base_compiler.compile_acl(base_acl)?;
        let delta_bdds = delta_compiler.compile_acl(delta_acl)?;

        let sane = sources.is_sane(&packet)?;
        let constraint = match &query.header_space {
            Some(hs) => base_compiler.header_space().to_bdd(hs)?,
            None => bdd.one,
        };
        let c = bdd.apply_and(constraint, sane)?;
        let action = query.action.unwrap_or(LineAction::Permit);
        let base_takes = base_bdds.action(action);
        let delta_takes = delta_bdds.action(action);

        let redundant = bdd.apply_and_many([c, base_takes, delta_takes])?;
        let incorrect = bdd.apply_diff(c, base_takes)?;
        let outside = bdd.apply_diff(sane, c)?;
        let collateral = bdd.apply_and_many([outside, base_takes, -delta_takes])?;

        let universe = Universe {
            packet: &packet,
            sources: &sources,
            hostname: base.hostname(),
            base: base_bdds,
            delta: delta_bdds,
        };

        let mut answer = FilterChangeAnswer::default();
        for rep in universe.representatives(redundant, SplitBy::Delta)? {
            if let Some((action, line)) = rep.delta {
                answer.redundant.push(FilterChangeRow {
                    flow: rep.flow,
                    action,
                    line: line_text(line),
                });
            }
        }
        for rep in universe.representatives(incorrect, SplitBy::Base)? {
            if let Some((action, line)) = rep.base {
                answer.incorrect.push(FilterChangeRow {
                    flow: rep.flow,
                    action,
                    line: line_text(line),
                });
            }
        }
        for rep in universe.representatives(collateral, SplitBy::Both)? {
            if let (Some((base_action, base_line)), Some((delta_action, delta_line))) = (rep.base, rep.delta) {
                answer.collateral_damage.push(CollateralRow {
                    flow: rep.flow,
                    base_action,
                    base_line: line_text(base_line),
                    delta_action,
                    delta_line: line_text(delta_line),
                });
            }
        }

        info!(
            "{}: ACL `{}` change: {} redundant, {} incorrect, {} collateral",
            base.hostname(),
            acl_name,
            answer.redundant.len(),
            answer.incorrect.len(),
            answer.collateral_damage.len()
        );
        Ok(answer)
    }
}
