//! Symbolic packet headers.
//!
//! [`BddPacket`] owns one [`Bdd`] universe and allocates a fixed run of
//! variables per header field, most significant bit first. A field keeps the
//! same variables for the lifetime of the universe.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::debug;

use crate::bdd::Bdd;
use crate::error::{Error, Result};
use crate::flow::{Flow, IpProtocol, TcpFlags};
use crate::reference::Ref;
use crate::settings::Settings;

/// Total assignment of variables, as produced by [`BddPacket::model`].
pub type Model = HashMap<u32, bool>;

/// An unsigned integer encoded over a run of BDD variables, MSB first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BddInteger {
    vars: Vec<u32>,
}

impl BddInteger {
    /// Allocate `width` fresh variables in `bdd`.
    pub fn new(bdd: &Bdd, width: usize) -> Result<Self> {
        assert!(width <= 64, "BddInteger supports at most 64 bits");
        let vars = (0..width)
            .map(|_| bdd.new_var().map(|x| bdd.variable(x.index())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { vars })
    }

    pub fn width(&self) -> usize {
        self.vars.len()
    }

    /// Variables of this integer, most significant first.
    pub fn vars(&self) -> &[u32] {
        &self.vars
    }

    pub fn max_value(&self) -> u64 {
        if self.width() == 64 {
            u64::MAX
        } else {
            (1u64 << self.width()) - 1
        }
    }

    fn bit(&self, value: u64, i: usize) -> bool {
        (value >> (self.width() - 1 - i)) & 1 == 1
    }

    /// Variable for bit `i`, counting from the most significant bit.
    pub fn var(&self, i: usize) -> u32 {
        self.vars[i]
    }

    /// `x == value`.
    pub fn value(&self, bdd: &Bdd, value: u64) -> Result<Ref> {
        self.masked(bdd, value, 0)
    }

    /// `x` agrees with `value` on every bit that is clear in `dont_care`.
    ///
    /// A cared-for bit above the width of the integer can never agree, so the result is empty.
    pub fn masked(&self, bdd: &Bdd, value: u64, dont_care: u64) -> Result<Ref> {
        if value & !dont_care & !self.max_value() != 0 {
            return Ok(bdd.zero);
        }
        let mut res = bdd.one;
        for (i, &v) in self.vars.iter().enumerate().rev() {
            if self.bit(dont_care, i) {
                continue;
            }
            res = if self.bit(value, i) {
                bdd.mk_node(v, bdd.zero, res)?
            } else {
                bdd.mk_node(v, res, bdd.zero)?
            };
        }
        Ok(res)
    }

    /// The first `len` bits of `x` equal the first `len` bits of `value`.
    pub fn first_bits_equal(&self, bdd: &Bdd, value: u64, len: usize) -> Result<Ref> {
        assert!(len <= self.width(), "Prefix longer than the integer");
        let dont_care = if len == 0 {
            self.max_value()
        } else {
            self.max_value() >> len
        };
        self.masked(bdd, value, dont_care)
    }

    /// `x <= value`.
    pub fn leq(&self, bdd: &Bdd, value: u64) -> Result<Ref> {
        if value >= self.max_value() {
            return Ok(bdd.one);
        }
        let mut res = bdd.one;
        for (i, &v) in self.vars.iter().enumerate().rev() {
            res = if self.bit(value, i) {
                bdd.mk_node(v, bdd.one, res)?
            } else {
                bdd.mk_node(v, res, bdd.zero)?
            };
        }
        Ok(res)
    }

    /// `x >= value`.
    pub fn geq(&self, bdd: &Bdd, value: u64) -> Result<Ref> {
        if value == 0 {
            return Ok(bdd.one);
        }
        if value > self.max_value() {
            return Ok(bdd.zero);
        }
        let mut res = bdd.one;
        for (i, &v) in self.vars.iter().enumerate().rev() {
            res = if self.bit(value, i) {
                bdd.mk_node(v, bdd.zero, res)?
            } else {
                bdd.mk_node(v, res, bdd.one)?
            };
        }
        Ok(res)
    }

    /// `lo <= x <= hi`; empty when `lo > hi`. Bounds past the maximum value are clamped.
    pub fn range(&self, bdd: &Bdd, lo: u64, hi: u64) -> Result<Ref> {
        let hi = hi.min(self.max_value());
        if lo > hi {
            return Ok(bdd.zero);
        }
        if lo == hi {
            return self.value(bdd, lo);
        }
        let geq = self.geq(bdd, lo)?;
        let leq = self.leq(bdd, hi)?;
        bdd.apply_and(geq, leq)
    }

    /// Read the value of this integer from a model. Missing variables read as 0.
    pub fn value_of(&self, model: &Model) -> u64 {
        self.vars.iter().fold(0u64, |acc, v| {
            (acc << 1) | u64::from(model.get(v).copied().unwrap_or(false))
        })
    }
}

/// Variables of every packet header field, in one BDD universe.
pub struct BddPacket {
    bdd: Bdd,
    dst_ip: BddInteger,
    src_ip: BddInteger,
    dst_port: BddInteger,
    src_port: BddInteger,
    ip_protocol: BddInteger,
    icmp_code: BddInteger,
    icmp_type: BddInteger,
    tcp_flags: BddInteger,
    dscp: BddInteger,
    ecn: BddInteger,
    fragment_offset: BddInteger,
    packet_length: BddInteger,
    num_packet_vars: u32,
}

impl BddPacket {
    pub const IP_LENGTH: usize = 32;
    pub const PORT_LENGTH: usize = 16;
    pub const IP_PROTOCOL_LENGTH: usize = 8;
    pub const ICMP_CODE_LENGTH: usize = 8;
    pub const ICMP_TYPE_LENGTH: usize = 8;
    pub const TCP_FLAGS_LENGTH: usize = 8;
    pub const DSCP_LENGTH: usize = 6;
    pub const ECN_LENGTH: usize = 2;
    pub const FRAGMENT_OFFSET_LENGTH: usize = 13;
    pub const PACKET_LENGTH_LENGTH: usize = 16;

    pub fn new(settings: &Settings) -> Result<Self> {
        let bdd = Bdd::new(settings);
        let dst_ip = BddInteger::new(&bdd, Self::IP_LENGTH)?;
        let src_ip = BddInteger::new(&bdd, Self::IP_LENGTH)?;
        let dst_port = BddInteger::new(&bdd, Self::PORT_LENGTH)?;
        let src_port = BddInteger::new(&bdd, Self::PORT_LENGTH)?;
        let ip_protocol = BddInteger::new(&bdd, Self::IP_PROTOCOL_LENGTH)?;
        let icmp_code = BddInteger::new(&bdd, Self::ICMP_CODE_LENGTH)?;
        let icmp_type = BddInteger::new(&bdd, Self::ICMP_TYPE_LENGTH)?;
        let tcp_flags = BddInteger::new(&bdd, Self::TCP_FLAGS_LENGTH)?;
        let dscp = BddInteger::new(&bdd, Self::DSCP_LENGTH)?;
        let ecn = BddInteger::new(&bdd, Self::ECN_LENGTH)?;
        let fragment_offset = BddInteger::new(&bdd, Self::FRAGMENT_OFFSET_LENGTH)?;
        let packet_length = BddInteger::new(&bdd, Self::PACKET_LENGTH_LENGTH)?;
        let num_packet_vars = bdd.num_vars();
        debug!("BddPacket: allocated {} header variables", num_packet_vars);

        Ok(Self {
            bdd,
            dst_ip,
            src_ip,
            dst_port,
            src_port,
            ip_protocol,
            icmp_code,
            icmp_type,
            tcp_flags,
            dscp,
            ecn,
            fragment_offset,
            packet_length,
            num_packet_vars,
        })
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    pub fn dst_ip(&self) -> &BddInteger {
        &self.dst_ip
    }
    pub fn src_ip(&self) -> &BddInteger {
        &self.src_ip
    }
    pub fn dst_port(&self) -> &BddInteger {
        &self.dst_port
    }
    pub fn src_port(&self) -> &BddInteger {
        &self.src_port
    }
    pub fn ip_protocol(&self) -> &BddInteger {
        &self.ip_protocol
    }
    pub fn icmp_code(&self) -> &BddInteger {
        &self.icmp_code
    }
    pub fn icmp_type(&self) -> &BddInteger {
        &self.icmp_type
    }
    pub fn tcp_flags(&self) -> &BddInteger {
        &self.tcp_flags
    }
    pub fn dscp(&self) -> &BddInteger {
        &self.dscp
    }
    pub fn ecn(&self) -> &BddInteger {
        &self.ecn
    }
    pub fn fragment_offset(&self) -> &BddInteger {
        &self.fragment_offset
    }
    pub fn packet_length(&self) -> &BddInteger {
        &self.packet_length
    }

    /// Number of variables taken by the header fields (extra fields come after).
    pub fn num_packet_vars(&self) -> u32 {
        self.num_packet_vars
    }

    /// Allocate an extra integer field after every variable allocated so far.
    pub fn alloc_integer(&self, width: usize) -> Result<BddInteger> {
        BddInteger::new(&self.bdd, width)
    }

    /// BDD for a single TCP flag being set.
    pub fn tcp_flag(&self, flag: TcpFlags) -> Result<Ref> {
        let bits = u64::from(flag.bits());
        self.tcp_flags
            .masked(&self.bdd, bits, self.tcp_flags.max_value() & !bits)
    }

    /// Human-readable name of a variable, e.g. `dst_ip0` for the most significant destination bit.
    pub fn var_name(&self, v: u32) -> String {
        let fields: [(&str, &BddInteger); 12] = [
            ("dst_ip", &self.dst_ip),
            ("src_ip", &self.src_ip),
            ("dst_port", &self.dst_port),
            ("src_port", &self.src_port),
            ("ip_protocol", &self.ip_protocol),
            ("icmp_code", &self.icmp_code),
            ("icmp_type", &self.icmp_type),
            ("tcp_flags", &self.tcp_flags),
            ("dscp", &self.dscp),
            ("ecn", &self.ecn),
            ("fragment_offset", &self.fragment_offset),
            ("packet_length", &self.packet_length),
        ];
        fields
            .iter()
            .find_map(|(name, field)| {
                field
                    .vars()
                    .iter()
                    .position(|&x| x == v)
                    .map(|i| format!("{}{}", name, i))
            })
            .unwrap_or_else(|| format!("x{}", v))
    }

    /// A total model of `f` over every allocated variable, preferring small field values.
    pub fn model(&self, f: Ref) -> Option<Model> {
        let lits = self.bdd.full_sat_one(f, 1..=self.bdd.num_vars())?;
        Some(
            lits.into_iter()
                .map(|lit| (lit.var().id(), lit.is_positive()))
                .collect(),
        )
    }

    /// Build the concrete flow described by `model`.
    pub fn flow_from_model(
        &self,
        model: &Model,
        ingress_node: &str,
        ingress_interface: Option<String>,
    ) -> Flow {
        Flow {
            ingress_node: ingress_node.to_string(),
            ingress_interface,
            src_ip: Ipv4Addr::from(self.src_ip.value_of(model) as u32),
            dst_ip: Ipv4Addr::from(self.dst_ip.value_of(model) as u32),
            ip_protocol: IpProtocol(self.ip_protocol.value_of(model) as u8),
            src_port: self.src_port.value_of(model) as u16,
            dst_port: self.dst_port.value_of(model) as u16,
            icmp_type: self.icmp_type.value_of(model) as u8,
            icmp_code: self.icmp_code.value_of(model) as u8,
            tcp_flags: TcpFlags::from_bits_retain(self.tcp_flags.value_of(model) as u8),
            dscp: self.dscp.value_of(model) as u8,
            ecn: self.ecn.value_of(model) as u8,
            fragment_offset: self.fragment_offset.value_of(model) as u16,
            packet_length: self.packet_length.value_of(model) as u16,
        }
    }

    /// The single point set `{flow}` (header fields only).
    ///
    /// A flow carrying a value wider than its field (e.g. DSCP 64) is rejected.
    pub fn flow_bdd(&self, flow: &Flow) -> Result<Ref> {
        let bdd = &self.bdd;
        let point = |name: &str, field: &BddInteger, value: u64| -> Result<Ref> {
            if value > field.max_value() {
                return Err(Error::malformed(
                    value.to_string(),
                    format!("{} is {} bits wide", name, field.width()),
                ));
            }
            field.value(bdd, value)
        };
        bdd.apply_and_many([
            point("dst_ip", &self.dst_ip, u64::from(u32::from(flow.dst_ip)))?,
            point("src_ip", &self.src_ip, u64::from(u32::from(flow.src_ip)))?,
            point("dst_port", &self.dst_port, u64::from(flow.dst_port))?,
            point("src_port", &self.src_port, u64::from(flow.src_port))?,
            point("ip_protocol", &self.ip_protocol, u64::from(flow.ip_protocol.0))?,
            point("icmp_code", &self.icmp_code, u64::from(flow.icmp_code))?,
            point("icmp_type", &self.icmp_type, u64::from(flow.icmp_type))?,
            point("tcp_flags", &self.tcp_flags, u64::from(flow.tcp_flags.bits()))?,
            point("dscp", &self.dscp, u64::from(flow.dscp))?,
            point("ecn", &self.ecn, u64::from(flow.ecn))?,
            point("fragment_offset", &self.fragment_offset, u64::from(flow.fragment_offset))?,
            point("packet_length", &self.packet_length, u64::from(flow.packet_length))?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use num_bigint::BigUint;

    fn integer(width: usize) -> Result<(Bdd, BddInteger)> {
        let bdd = Bdd::default();
        let x = BddInteger::new(&bdd, width)?;
        Ok((bdd, x))
    }

    fn count(bdd: &Bdd, f: Ref) -> BigUint {
        bdd.sat_count(f, bdd.num_vars() as usize)
    }

    #[test]
    fn test_field_layout() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        assert_eq!(packet.dst_ip().vars()[0], 1);
        assert_eq!(packet.src_ip().vars()[0], 33);
        assert_eq!(packet.dst_port().vars()[0], 65);
        assert_eq!(packet.tcp_flags().width(), 8);
        assert_eq!(packet.num_packet_vars(), 165);
        assert_eq!(packet.var_name(1), "dst_ip0");
        assert_eq!(packet.var_name(34), "src_ip1");
        assert_eq!(packet.var_name(1000), "x1000");
        Ok(())
    }

    #[test]
    fn test_value_and_range() -> Result<()> {
        let (bdd, x) = integer(4)?;

        assert_eq!(count(&bdd, x.value(&bdd, 5)?), BigUint::from(1u32));
        assert_eq!(count(&bdd, x.leq(&bdd, 5)?), BigUint::from(6u32));
        assert_eq!(count(&bdd, x.geq(&bdd, 5)?), BigUint::from(11u32));
        assert_eq!(count(&bdd, x.range(&bdd, 3, 9)?), BigUint::from(7u32));
        assert_eq!(x.range(&bdd, 9, 3)?, bdd.zero);
        assert_eq!(x.range(&bdd, 0, 15)?, bdd.one);
        assert_eq!(x.range(&bdd, 4, 4)?, x.value(&bdd, 4)?);
        Ok(())
    }

    #[test]
    fn test_values_wider_than_field() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let bdd = packet.bdd();

        // 16 bits: 70000 must not wrap to 4464.
        let port = packet.dst_port();
        assert_eq!(port.value(bdd, 70000)?, bdd.zero);
        assert_eq!(port.range(bdd, 70000, 70000)?, bdd.zero);
        assert_eq!(port.range(bdd, 65535, 70000)?, port.value(bdd, 65535)?);
        assert_eq!(port.range(bdd, 0, 1 << 20)?, bdd.one);

        // 6 bits: 64 must not wrap to 0.
        let dscp = packet.dscp();
        assert_eq!(dscp.value(bdd, 64)?, bdd.zero);
        assert_eq!(dscp.masked(bdd, 64, 0b11_1111)?, bdd.zero);
        assert_eq!(dscp.range(bdd, 60, 100)?, dscp.range(bdd, 60, 63)?);

        // 2 bits: 4 must not wrap to 0.
        let ecn = packet.ecn();
        assert_eq!(ecn.value(bdd, 4)?, bdd.zero);
        assert_eq!(ecn.range(bdd, 4, 7)?, bdd.zero);
        assert_eq!(ecn.value(bdd, 3)?, ecn.range(bdd, 3, 3)?);
        Ok(())
    }

    #[test]
    fn test_flow_wider_than_field() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let flow = Flow::new("A").with_dscp(64);
        assert!(matches!(
            packet.flow_bdd(&flow),
            Err(Error::MalformedLiteral { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_prefix_and_mask() -> Result<()> {
        let (bdd, x) = integer(8)?;

        // 1010_xxxx
        let p = x.first_bits_equal(&bdd, 0b1010_0000, 4)?;
        assert_eq!(count(&bdd, p), BigUint::from(16u32));
        assert_eq!(p, x.range(&bdd, 0b1010_0000, 0b1010_1111)?);
        assert_eq!(x.first_bits_equal(&bdd, 0, 0)?, bdd.one);

        // x1x1_xxxx
        let m = x.masked(&bdd, 0b0101_0000, 0b1010_1111)?;
        assert_eq!(count(&bdd, m), BigUint::from(64u32));
        Ok(())
    }

    #[test]
    fn test_value_of() -> Result<()> {
        let (bdd, x) = integer(16)?;
        let f = x.value(&bdd, 8080)?;
        let lits = bdd.full_sat_one(f, x.vars().iter().copied()).unwrap();
        let model: Model = lits
            .into_iter()
            .map(|lit| (lit.var().id(), lit.is_positive()))
            .collect();
        assert_eq!(x.value_of(&model), 8080);
        Ok(())
    }

    #[test]
    fn test_flow_round_trip() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let flow = Flow::new("A")
            .with_src_ip(Ipv4Addr::new(10, 0, 0, 1))
            .with_dst_ip(Ipv4Addr::new(1, 1, 1, 1))
            .with_ip_protocol(IpProtocol::TCP)
            .with_dst_port(443)
            .with_tcp_flags(TcpFlags::SYN)
            .with_packet_length(512);
        let f = packet.flow_bdd(&flow)?;
        let model = packet.model(f).unwrap();
        assert_eq!(packet.flow_from_model(&model, "A", None), flow);
        Ok(())
    }

    #[test]
    fn test_tcp_flag() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let bdd = packet.bdd();
        let syn = packet.tcp_flag(TcpFlags::SYN)?;
        let var = packet.tcp_flags().var(6);
        assert_eq!(syn, bdd.mk_var(var)?);
        Ok(())
    }
}
