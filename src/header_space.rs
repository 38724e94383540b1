//! Conjunctions of per-field packet header constraints.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::flow::{Flow, IpProtocol, TcpFlags};
use crate::ip_space::{IpSpace, NamedIpSpaces};

/// Inclusive range of unsigned values.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SubRange {
    pub start: u32,
    pub end: u32,
}

impl SubRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn singleton(value: u32) -> Self {
        Self::new(value, value)
    }

    pub fn contains(&self, value: u32) -> bool {
        self.start <= value && value <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Display for SubRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Flags selected by `mask` must equal the same flags of `value`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TcpFlagsMatch {
    pub value: TcpFlags,
    pub mask: TcpFlags,
}

impl TcpFlagsMatch {
    /// Every flag in `flags` is set; others are don't-care.
    pub fn set(flags: TcpFlags) -> Self {
        Self {
            value: flags,
            mask: flags,
        }
    }

    /// Every flag in `flags` is clear; others are don't-care.
    pub fn not_set(flags: TcpFlags) -> Self {
        Self {
            value: TcpFlags::empty(),
            mask: flags,
        }
    }

    pub fn matches(&self, flags: TcpFlags) -> bool {
        flags & self.mask == self.value & self.mask
    }
}

/// A conjunction of header constraints. Empty lists and `None` are unconstrained.
///
/// `not_*` fields exclude what they name; `negate` complements the whole space.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSpace {
    pub src_ips: Option<IpSpace>,
    pub not_src_ips: Option<IpSpace>,
    pub dst_ips: Option<IpSpace>,
    pub not_dst_ips: Option<IpSpace>,
    pub src_or_dst_ips: Option<IpSpace>,
    pub src_ports: Vec<SubRange>,
    pub not_src_ports: Vec<SubRange>,
    pub dst_ports: Vec<SubRange>,
    pub not_dst_ports: Vec<SubRange>,
    pub src_or_dst_ports: Vec<SubRange>,
    pub ip_protocols: Vec<IpProtocol>,
    pub not_ip_protocols: Vec<IpProtocol>,
    pub icmp_types: Vec<SubRange>,
    pub not_icmp_types: Vec<SubRange>,
    pub icmp_codes: Vec<SubRange>,
    pub not_icmp_codes: Vec<SubRange>,
    pub tcp_flags: Vec<TcpFlagsMatch>,
    pub dscps: Vec<u8>,
    pub not_dscps: Vec<u8>,
    pub ecns: Vec<u8>,
    pub not_ecns: Vec<u8>,
    pub fragment_offsets: Vec<SubRange>,
    pub not_fragment_offsets: Vec<SubRange>,
    pub packet_lengths: Vec<SubRange>,
    pub not_packet_lengths: Vec<SubRange>,
    pub negate: bool,
}

fn any_contains(ranges: &[SubRange], value: u32) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

/// Unconstrained if empty, otherwise `value` must be in one of `ranges`.
fn allowed(ranges: &[SubRange], value: u32) -> bool {
    ranges.is_empty() || any_contains(ranges, value)
}

impl HeaderSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_src_ips(mut self, space: impl Into<IpSpace>) -> Self {
        self.src_ips = Some(space.into());
        self
    }
    pub fn with_not_src_ips(mut self, space: impl Into<IpSpace>) -> Self {
        self.not_src_ips = Some(space.into());
        self
    }
    pub fn with_dst_ips(mut self, space: impl Into<IpSpace>) -> Self {
        self.dst_ips = Some(space.into());
        self
    }
    pub fn with_not_dst_ips(mut self, space: impl Into<IpSpace>) -> Self {
        self.not_dst_ips = Some(space.into());
        self
    }
    pub fn with_src_or_dst_ips(mut self, space: impl Into<IpSpace>) -> Self {
        self.src_or_dst_ips = Some(space.into());
        self
    }
    pub fn with_src_ports(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.src_ports = ranges.into_iter().collect();
        self
    }
    pub fn with_not_src_ports(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.not_src_ports = ranges.into_iter().collect();
        self
    }
    pub fn with_dst_ports(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.dst_ports = ranges.into_iter().collect();
        self
    }
    pub fn with_not_dst_ports(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.not_dst_ports = ranges.into_iter().collect();
        self
    }
    pub fn with_src_or_dst_ports(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.src_or_dst_ports = ranges.into_iter().collect();
        self
    }
    pub fn with_ip_protocols(mut self, protocols: impl IntoIterator<Item = IpProtocol>) -> Self {
        self.ip_protocols = protocols.into_iter().collect();
        self
    }
    pub fn with_not_ip_protocols(mut self, protocols: impl IntoIterator<Item = IpProtocol>) -> Self {
        self.not_ip_protocols = protocols.into_iter().collect();
        self
    }
    pub fn with_icmp_types(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.icmp_types = ranges.into_iter().collect();
        self
    }
    pub fn with_icmp_codes(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.icmp_codes = ranges.into_iter().collect();
        self
    }
    pub fn with_tcp_flags(mut self, matches: impl IntoIterator<Item = TcpFlagsMatch>) -> Self {
        self.tcp_flags = matches.into_iter().collect();
        self
    }
    pub fn with_dscps(mut self, dscps: impl IntoIterator<Item = u8>) -> Self {
        self.dscps = dscps.into_iter().collect();
        self
    }
    pub fn with_ecns(mut self, ecns: impl IntoIterator<Item = u8>) -> Self {
        self.ecns = ecns.into_iter().collect();
        self
    }
    pub fn with_fragment_offsets(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.fragment_offsets = ranges.into_iter().collect();
        self
    }
    pub fn with_packet_lengths(mut self, ranges: impl IntoIterator<Item = SubRange>) -> Self {
        self.packet_lengths = ranges.into_iter().collect();
        self
    }
    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    fn ip_spaces(&self) -> impl Iterator<Item = &IpSpace> {
        [
            &self.src_ips,
            &self.not_src_ips,
            &self.dst_ips,
            &self.not_dst_ips,
            &self.src_or_dst_ips,
        ]
        .into_iter()
        .flatten()
    }

    /// Names of the IP spaces referenced by any IP constraint.
    pub fn referenced_ip_spaces(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        for space in self.ip_spaces() {
            space.collect_references(&mut res);
        }
        res
    }

    /// Concrete membership test, resolving IP space references through `named`.
    pub fn matches(&self, flow: &Flow, named: &NamedIpSpaces) -> Result<bool> {
        Ok(self.matches_unnegated(flow, named)? != self.negate)
    }

    fn matches_unnegated(&self, flow: &Flow, named: &NamedIpSpaces) -> Result<bool> {
        let contains = |space: &Option<IpSpace>, ip: Ipv4Addr| match space {
            Some(space) => space.contains(ip, named).map(Some),
            None => Ok(None),
        };

        if contains(&self.src_ips, flow.src_ip)? == Some(false)
            || contains(&self.not_src_ips, flow.src_ip)? == Some(true)
            || contains(&self.dst_ips, flow.dst_ip)? == Some(false)
            || contains(&self.not_dst_ips, flow.dst_ip)? == Some(true)
        {
            return Ok(false);
        }
        if let Some(space) = &self.src_or_dst_ips {
            if !space.contains(flow.src_ip, named)? && !space.contains(flow.dst_ip, named)? {
                return Ok(false);
            }
        }

        let src_port = u32::from(flow.src_port);
        let dst_port = u32::from(flow.dst_port);
        if !allowed(&self.src_ports, src_port)
            || any_contains(&self.not_src_ports, src_port)
            || !allowed(&self.dst_ports, dst_port)
            || any_contains(&self.not_dst_ports, dst_port)
        {
            return Ok(false);
        }
        if !self.src_or_dst_ports.is_empty()
            && !any_contains(&self.src_or_dst_ports, src_port)
            && !any_contains(&self.src_or_dst_ports, dst_port)
        {
            return Ok(false);
        }

        if (!self.ip_protocols.is_empty() && !self.ip_protocols.contains(&flow.ip_protocol))
            || self.not_ip_protocols.contains(&flow.ip_protocol)
        {
            return Ok(false);
        }

        let icmp_type = u32::from(flow.icmp_type);
        let icmp_code = u32::from(flow.icmp_code);
        if !allowed(&self.icmp_types, icmp_type)
            || any_contains(&self.not_icmp_types, icmp_type)
            || !allowed(&self.icmp_codes, icmp_code)
            || any_contains(&self.not_icmp_codes, icmp_code)
        {
            return Ok(false);
        }

        if !self.tcp_flags.is_empty() && !self.tcp_flags.iter().any(|m| m.matches(flow.tcp_flags)) {
            return Ok(false);
        }

        if (!self.dscps.is_empty() && !self.dscps.contains(&flow.dscp))
            || self.not_dscps.contains(&flow.dscp)
            || (!self.ecns.is_empty() && !self.ecns.contains(&flow.ecn))
            || self.not_ecns.contains(&flow.ecn)
        {
            return Ok(false);
        }

        let fragment_offset = u32::from(flow.fragment_offset);
        let packet_length = u32::from(flow.packet_length);
        Ok(allowed(&self.fragment_offsets, fragment_offset)
            && !any_contains(&self.not_fragment_offsets, fragment_offset)
            && allowed(&self.packet_lengths, packet_length)
            && !any_contains(&self.not_packet_lengths, packet_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::Prefix;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    fn web_flow() -> Flow {
        Flow::new("A")
            .with_src_ip(Ipv4Addr::new(10, 0, 0, 1))
            .with_dst_ip(Ipv4Addr::new(1, 1, 1, 1))
            .with_ip_protocol(IpProtocol::TCP)
            .with_src_port(40000)
            .with_dst_port(80)
            .with_tcp_flags(TcpFlags::SYN)
    }

    #[test]
    fn test_unconstrained() -> Result<()> {
        let named = NamedIpSpaces::new();
        assert!(HeaderSpace::new().matches(&web_flow(), &named)?);
        assert!(!HeaderSpace::new().with_negate(true).matches(&web_flow(), &named)?);
        Ok(())
    }

    #[test]
    fn test_field_constraints() -> Result<()> {
        let named = NamedIpSpaces::new();
        let flow = web_flow();

        let hs = HeaderSpace::new()
            .with_dst_ips(prefix("1.1.1.0/24"))
            .with_ip_protocols([IpProtocol::TCP])
            .with_dst_ports([SubRange::new(80, 80), SubRange::new(443, 443)]);
        assert!(hs.matches(&flow, &named)?);

        let hs = hs.with_not_src_ips(prefix("10.0.0.0/8"));
        assert!(!hs.matches(&flow, &named)?);

        let hs = HeaderSpace::new().with_src_or_dst_ports([SubRange::new(40000, 40010)]);
        assert!(hs.matches(&flow, &named)?);

        let hs = HeaderSpace::new().with_ip_protocols([IpProtocol::UDP]);
        assert!(!hs.matches(&flow, &named)?);
        Ok(())
    }

    #[test]
    fn test_tcp_flags_match() -> Result<()> {
        let named = NamedIpSpaces::new();
        let flow = web_flow();

        let syn = HeaderSpace::new().with_tcp_flags([TcpFlagsMatch::set(TcpFlags::SYN)]);
        assert!(syn.matches(&flow, &named)?);

        let established = HeaderSpace::new().with_tcp_flags([
            TcpFlagsMatch::set(TcpFlags::ACK),
            TcpFlagsMatch::set(TcpFlags::RST),
        ]);
        assert!(!established.matches(&flow, &named)?);

        let no_ack = HeaderSpace::new().with_tcp_flags([TcpFlagsMatch::not_set(TcpFlags::ACK)]);
        assert!(no_ack.matches(&flow, &named)?);
        Ok(())
    }

    #[test]
    fn test_referenced_ip_spaces() {
        let hs = HeaderSpace::new()
            .with_src_ips(IpSpace::reference("clients"))
            .with_dst_ips(IpSpace::union([IpSpace::reference("servers")]));
        assert_eq!(
            hs.referenced_ip_spaces(),
            BTreeSet::from(["clients".to_string(), "servers".to_string()])
        );
    }
}
