//! Concrete packets.

use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// TCP flags, laid out as in the TCP header byte (CWR is the most significant bit).
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct TcpFlags: u8 {
        const CWR = 0x80;
        const ECE = 0x40;
        const URG = 0x20;
        const ACK = 0x10;
        const PSH = 0x08;
        const RST = 0x04;
        const SYN = 0x02;
        const FIN = 0x01;
    }
}

/// IP protocol number.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const ICMP: Self = Self(1);
    pub const TCP: Self = Self(6);
    pub const UDP: Self = Self(17);

    /// Whether flows of this protocol carry port numbers.
    pub fn has_ports(self) -> bool {
        matches!(self, Self::TCP | Self::UDP)
    }
}

impl Display for IpProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::ICMP => write!(f, "ICMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self(n) => write!(f, "{}", n),
        }
    }
}

/// A fully concrete packet entering a device.
///
/// `ingress_interface == None` means the packet originates from the device itself.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Flow {
    pub ingress_node: String,
    pub ingress_interface: Option<String>,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub ip_protocol: IpProtocol,
    pub src_port: u16,
    pub dst_port: u16,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub tcp_flags: TcpFlags,
    pub dscp: u8,
    pub ecn: u8,
    pub fragment_offset: u16,
    pub packet_length: u16,
}

impl Flow {
    /// A flow with every header field zeroed, originating from `ingress_node`.
    pub fn new(ingress_node: impl Into<String>) -> Self {
        Self {
            ingress_node: ingress_node.into(),
            ingress_interface: None,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            ip_protocol: IpProtocol::default(),
            src_port: 0,
            dst_port: 0,
            icmp_type: 0,
            icmp_code: 0,
            tcp_flags: TcpFlags::empty(),
            dscp: 0,
            ecn: 0,
            fragment_offset: 0,
            packet_length: 0,
        }
    }

    pub fn with_ingress_interface(mut self, interface: impl Into<String>) -> Self {
        self.ingress_interface = Some(interface.into());
        self
    }
    pub fn with_src_ip(mut self, ip: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self
    }
    pub fn with_dst_ip(mut self, ip: Ipv4Addr) -> Self {
        self.dst_ip = ip;
        self
    }
    pub fn with_ip_protocol(mut self, protocol: IpProtocol) -> Self {
        self.ip_protocol = protocol;
        self
    }
    pub fn with_src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }
    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }
    pub fn with_icmp(mut self, icmp_type: u8, icmp_code: u8) -> Self {
        self.icmp_type = icmp_type;
        self.icmp_code = icmp_code;
        self
    }
    pub fn with_tcp_flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags = flags;
        self
    }
    pub fn with_dscp(mut self, dscp: u8) -> Self {
        self.dscp = dscp;
        self
    }
    pub fn with_ecn(mut self, ecn: u8) -> Self {
        self.ecn = ecn;
        self
    }
    pub fn with_fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset;
        self
    }
    pub fn with_packet_length(mut self, length: u16) -> Self {
        self.packet_length = length;
        self
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] {} {}",
            self.ingress_node,
            self.ingress_interface.as_deref().unwrap_or("<device>"),
            self.ip_protocol,
            self.src_ip,
        )?;
        if self.ip_protocol.has_ports() {
            write!(f, ":{}", self.src_port)?;
        }
        write!(f, " -> {}", self.dst_ip)?;
        if self.ip_protocol.has_ports() {
            write!(f, ":{}", self.dst_port)?;
        }
        if self.ip_protocol == IpProtocol::ICMP {
            write!(f, " (type {}, code {})", self.icmp_type, self.icmp_code)?;
        }
        Ok(())
    }
}
