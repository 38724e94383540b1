//! Lowering of [`HeaderSpace`] to BDDs over a [`BddPacket`].

use crate::error::Result;
use crate::flow::IpProtocol;
use crate::header_space::{HeaderSpace, SubRange};
use crate::ip_space::{IpSpace, NamedIpSpaces};
use crate::ip_space_to_bdd::IpSpaceToBdd;
use crate::packet::{BddInteger, BddPacket};
use crate::reference::Ref;

pub struct HeaderSpaceToBdd<'a> {
    packet: &'a BddPacket,
    src_ip: IpSpaceToBdd<'a>,
    dst_ip: IpSpaceToBdd<'a>,
}

impl<'a> HeaderSpaceToBdd<'a> {
    pub fn new(packet: &'a BddPacket, named: &'a NamedIpSpaces, max_depth: usize) -> Self {
        Self {
            packet,
            src_ip: IpSpaceToBdd::new(packet.bdd(), packet.src_ip(), named, max_depth),
            dst_ip: IpSpaceToBdd::new(packet.bdd(), packet.dst_ip(), named, max_depth),
        }
    }

    pub fn src_ip_space(&mut self, space: &IpSpace) -> Result<Ref> {
        self.src_ip.compile(space)
    }

    pub fn dst_ip_space(&mut self, space: &IpSpace) -> Result<Ref> {
        self.dst_ip.compile(space)
    }

    fn ranges(&self, var: &BddInteger, ranges: &[SubRange]) -> Result<Ref> {
        let bdd = self.packet.bdd();
        let mut res = bdd.zero;
        for r in ranges {
            let x = var.range(bdd, u64::from(r.start), u64::from(r.end))?;
            res = bdd.apply_or(res, x)?;
        }
        Ok(res)
    }

    fn values(&self, var: &BddInteger, values: impl IntoIterator<Item = u64>) -> Result<Ref> {
        let bdd = self.packet.bdd();
        let mut res = bdd.zero;
        for v in values {
            let x = var.value(bdd, v)?;
            res = bdd.apply_or(res, x)?;
        }
        Ok(res)
    }

    pub fn to_bdd(&mut self, hs: &HeaderSpace) -> Result<Ref> {
        let packet = self.packet;
        let bdd = packet.bdd();

        let mut constraints: Vec<Ref> = Vec::new();
        // `(positive, negative)` pairs of constraint lists over one field.
        let mut add = |positive: Option<Ref>, negative: Option<Ref>| {
            if let Some(x) = positive {
                constraints.push(x);
            }
            if let Some(x) = negative {
                constraints.push(-x);
            }
        };

        let src_ips = hs.src_ips.as_ref().map(|s| self.src_ip.compile(s)).transpose()?;
        let not_src_ips = hs.not_src_ips.as_ref().map(|s| self.src_ip.compile(s)).transpose()?;
        add(src_ips, not_src_ips);
        let dst_ips = hs.dst_ips.as_ref().map(|s| self.dst_ip.compile(s)).transpose()?;
        let not_dst_ips = hs.not_dst_ips.as_ref().map(|s| self.dst_ip.compile(s)).transpose()?;
        add(dst_ips, not_dst_ips);
        if let Some(space) = &hs.src_or_dst_ips {
            let src = self.src_ip.compile(space)?;
            let dst = self.dst_ip.compile(space)?;
            add(Some(bdd.apply_or(src, dst)?), None);
        }

        let this = &*self;
        let ranges = |var: &BddInteger, ranges: &[SubRange]| -> Result<Option<Ref>> {
            if ranges.is_empty() {
                Ok(None)
            } else {
                this.ranges(var, ranges).map(Some)
            }
        };

        add(
            ranges(packet.src_port(), &hs.src_ports)?,
            ranges(packet.src_port(), &hs.not_src_ports)?,
        );
        add(
            ranges(packet.dst_port(), &hs.dst_ports)?,
            ranges(packet.dst_port(), &hs.not_dst_ports)?,
        );
        if !hs.src_or_dst_ports.is_empty() {
            let src = this.ranges(packet.src_port(), &hs.src_or_dst_ports)?;
            let dst = this.ranges(packet.dst_port(), &hs.src_or_dst_ports)?;
            add(Some(bdd.apply_or(src, dst)?), None);
        }
        add(
            ranges(packet.icmp_type(), &hs.icmp_types)?,
            ranges(packet.icmp_type(), &hs.not_icmp_types)?,
        );
        add(
            ranges(packet.icmp_code(), &hs.icmp_codes)?,
            ranges(packet.icmp_code(), &hs.not_icmp_codes)?,
        );
        add(
            ranges(packet.fragment_offset(), &hs.fragment_offsets)?,
            ranges(packet.fragment_offset(), &hs.not_fragment_offsets)?,
        );
        add(
            ranges(packet.packet_length(), &hs.packet_lengths)?,
            ranges(packet.packet_length(), &hs.not_packet_lengths)?,
        );

        let values = |var: &BddInteger, values: Vec<u64>| -> Result<Option<Ref>> {
            if values.is_empty() {
                Ok(None)
            } else {
                this.values(var, values).map(Some)
            }
        };

        let protocol = |ps: &[IpProtocol]| -> Vec<u64> { ps.iter().map(|p| u64::from(p.0)).collect() };
        add(
            values(packet.ip_protocol(), protocol(&hs.ip_protocols))?,
            values(packet.ip_protocol(), protocol(&hs.not_ip_protocols))?,
        );
        let bytes = |xs: &[u8]| -> Vec<u64> { xs.iter().map(|&x| u64::from(x)).collect() };
        add(
            values(packet.dscp(), bytes(&hs.dscps))?,
            values(packet.dscp(), bytes(&hs.not_dscps))?,
        );
        add(
            values(packet.ecn(), bytes(&hs.ecns))?,
            values(packet.ecn(), bytes(&hs.not_ecns))?,
        );

        if !hs.tcp_flags.is_empty() {
            let var = packet.tcp_flags();
            let mut any = bdd.zero;
            for m in &hs.tcp_flags {
                let dont_care = var.max_value() & !u64::from(m.mask.bits());
                let x = var.masked(bdd, u64::from(m.value.bits()), dont_care)?;
                any = bdd.apply_or(any, x)?;
            }
            add(Some(any), None);
        }

        let res = bdd.apply_and_many(constraints)?;
        Ok(if hs.negate { -res } else { res })
    }
}
