//! Guarded, branching packet rewrites (NAT) applied to concrete flows.

use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::evaluate::Evaluator;
use crate::expr::AclLineMatchExpr;
use crate::flow::Flow;
use crate::header_space::SubRange;
use crate::ip::{IpRange, Prefix};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    DestNat,
    SourceNat,
    StaticNat,
}

/// Flow fields a step may rewrite.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowField {
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
}

impl FlowField {
    fn is_ip(self) -> bool {
        matches!(self, FlowField::SrcIp | FlowField::DstIp)
    }

    fn ip(self, flow: &Flow) -> Ipv4Addr {
        match self {
            FlowField::SrcIp => flow.src_ip,
            _ => flow.dst_ip,
        }
    }

    fn set_ip(self, flow: &mut Flow, ip: Ipv4Addr) {
        match self {
            FlowField::SrcIp => flow.src_ip = ip,
            _ => flow.dst_ip = ip,
        }
    }

    fn port(self, flow: &Flow) -> u16 {
        match self {
            FlowField::SrcPort => flow.src_port,
            _ => flow.dst_port,
        }
    }

    fn set_port(self, flow: &mut Flow, port: u16) {
        match self {
            FlowField::SrcPort => flow.src_port = port,
            _ => flow.dst_port = port,
        }
    }

    /// Current value of this field in `flow`, rendered for traces.
    fn value(self, flow: &Flow) -> String {
        if self.is_ip() {
            self.ip(flow).to_string()
        } else {
            self.port(flow).to_string()
        }
    }
}

impl Display for FlowField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowField::SrcIp => write!(f, "src_ip"),
            FlowField::DstIp => write!(f, "dst_ip"),
            FlowField::SrcPort => write!(f, "src_port"),
            FlowField::DstPort => write!(f, "dst_port"),
        }
    }
}

/// Values a field can be rewritten to.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Pool {
    Ips(Vec<IpRange>),
    Ports(Vec<SubRange>),
}

impl Pool {
    fn kind(&self) -> &'static str {
        match self {
            Pool::Ips(_) => "IP pool",
            Pool::Ports(_) => "port pool",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransformationStep {
    /// Rewrite `field` to the lowest value of `pool`.
    AssignFromPool {
        transformation_type: TransformationType,
        field: FlowField,
        pool: Pool,
    },
    /// Keep the host bits of `field` and take the network bits from `subnet`.
    ShiftIpIntoSubnet {
        transformation_type: TransformationType,
        field: FlowField,
        subnet: Prefix,
    },
    Noop {
        transformation_type: TransformationType,
    },
}

/// One field changed by a step.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FlowDiff {
    pub transformation_type: TransformationType,
    pub field: FlowField,
    pub old_value: String,
    pub new_value: String,
}

fn mismatch(what: &str, field: FlowField) -> Error {
    Error::TypeMismatch {
        left: what.to_string(),
        right: format!("field {}", field),
    }
}

impl TransformationStep {
    pub fn assign_from_pool(transformation_type: TransformationType, field: FlowField, pool: Pool) -> Self {
        TransformationStep::AssignFromPool {
            transformation_type,
            field,
            pool,
        }
    }

    pub fn shift_ip_into_subnet(transformation_type: TransformationType, field: FlowField, subnet: Prefix) -> Self {
        TransformationStep::ShiftIpIntoSubnet {
            transformation_type,
            field,
            subnet,
        }
    }

    pub fn noop(transformation_type: TransformationType) -> Self {
        TransformationStep::Noop { transformation_type }
    }

    pub fn transformation_type(&self) -> TransformationType {
        match self {
            TransformationStep::AssignFromPool {
                transformation_type, ..
            }
            | TransformationStep::ShiftIpIntoSubnet {
                transformation_type, ..
            }
            | TransformationStep::Noop { transformation_type } => *transformation_type,
        }
    }

    /// Apply this step to `flow`, returning the changed field if any.
    fn apply(&self, flow: &mut Flow) -> Result<Option<FlowDiff>> {
        let (field, old_value) = match self {
            TransformationStep::AssignFromPool { field, pool, .. } => {
                let old_value = field.value(flow);
                match (pool, field.is_ip()) {
                    (Pool::Ips(ranges), true) => {
                        let ip = ranges
                            .iter()
                            .map(|r| r.start)
                            .min()
                            .ok_or_else(|| Error::EmptyPool {
                                field: field.to_string(),
                            })?;
                        field.set_ip(flow, ip);
                    }
                    (Pool::Ports(ranges), false) => {
                        let port = ranges
                            .iter()
                            .map(|r| r.start)
                            .min()
                            .ok_or_else(|| Error::EmptyPool {
                                field: field.to_string(),
                            })?;
                        let port = u16::try_from(port).map_err(|_| Error::LimitExceeded {
                            what: format!("{} pool value", field),
                            limit: usize::from(u16::MAX),
                            actual: port as usize,
                        })?;
                        field.set_port(flow, port);
                    }
                    _ => return Err(mismatch(pool.kind(), *field)),
                }
                (*field, old_value)
            }
            TransformationStep::ShiftIpIntoSubnet { field, subnet, .. } => {
                if !field.is_ip() {
                    return Err(mismatch("subnet shift", *field));
                }
                let old = field.ip(flow);
                let mask = subnet.mask();
                let shifted = (u32::from(old) & !mask) | u32::from(subnet.network());
                field.set_ip(flow, Ipv4Addr::from(shifted));
                (*field, old.to_string())
            }
            TransformationStep::Noop { .. } => return Ok(None),
        };

        let new_value = field.value(flow);
        if new_value == old_value {
            return Ok(None);
        }
        Ok(Some(FlowDiff {
            transformation_type: self.transformation_type(),
            field,
            old_value,
            new_value,
        }))
    }
}

/// Steps applied when `guard` matches, followed by `and_then`; otherwise `or_else`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Transformation {
    pub guard: AclLineMatchExpr,
    pub steps: Vec<TransformationStep>,
    pub and_then: Option<Box<Transformation>>,
    pub or_else: Option<Box<Transformation>>,
}

impl Transformation {
    pub fn when(guard: AclLineMatchExpr) -> Self {
        Self {
            guard,
            steps: Vec::new(),
            and_then: None,
            or_else: None,
        }
    }

    pub fn always() -> Self {
        Self::when(AclLineMatchExpr::True)
    }

    pub fn apply(mut self, steps: impl IntoIterator<Item = TransformationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn set_and_then(mut self, next: Transformation) -> Self {
        self.and_then = Some(Box::new(next));
        self
    }

    pub fn set_or_else(mut self, next: Transformation) -> Self {
        self.or_else = Some(Box::new(next));
        self
    }

    pub fn eval(&self, flow: &Flow, evaluator: &Evaluator<'_>) -> Result<Flow> {
        Ok(self.eval_traced(flow, evaluator)?.0)
    }

    /// Evaluate on `flow`, also returning every field change in order.
    pub fn eval_traced(&self, flow: &Flow, evaluator: &Evaluator<'_>) -> Result<(Flow, Vec<FlowDiff>)> {
        let mut flow = flow.clone();
        let mut diffs = Vec::new();
        let mut current = Some(self);
        while let Some(t) = current {
            if evaluator.eval(&t.guard, &flow)? {
                for step in &t.steps {
                    if let Some(diff) = step.apply(&mut flow)? {
                        debug!("{}: {} {} -> {}", flow.ingress_node, diff.field, diff.old_value, diff.new_value);
                        diffs.push(diff);
                    }
                }
                current = t.and_then.as_deref();
            } else {
                current = t.or_else.as_deref();
            }
        }
        Ok((flow, diffs))
    }
}
