//! IPv4 literals: prefixes, wildcards and ranges.

use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An IPv4 prefix. Host bits are always cleared.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Prefix(Ipv4Network);

impl Prefix {
    pub fn new(ip: Ipv4Addr, len: u8) -> Result<Self> {
        let network = Ipv4Network::new(ip, len)
            .map_err(|e| Error::malformed(format!("{}/{}", ip, len), e.to_string()))?;
        Ok(Self::normalized(network))
    }

    fn normalized(network: Ipv4Network) -> Self {
        // Cannot fail: the length was accepted above.
        match Ipv4Network::new(network.network(), network.prefix()) {
            Ok(n) => Self(n),
            Err(_) => Self(network),
        }
    }

    /// Single-host prefix (`/32`).
    pub fn host(ip: Ipv4Addr) -> Self {
        Self::normalized(Ipv4Network::from(ip))
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix()
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.0.contains(ip)
    }

    /// Netmask as a `u32`, e.g. `0xFFFF_FF00` for a `/24`.
    pub fn mask(&self) -> u32 {
        u32::from(self.0.mask())
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.contains('/') {
            return Err(Error::malformed(s, "no '/' found"));
        }
        let network: Ipv4Network = s.parse().map_err(|e| Error::malformed(s, format!("{}", e)))?;
        Ok(Self::normalized(network))
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len())
    }
}

/// An IPv4 address with a wildcard mask: set bits in `wildcard` are don't-care.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IpWildcard {
    ip: Ipv4Addr,
    wildcard: u32,
}

impl IpWildcard {
    pub fn new(ip: Ipv4Addr, wildcard: u32) -> Self {
        let ip = Ipv4Addr::from(u32::from(ip) & !wildcard);
        Self { ip, wildcard }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn wildcard(&self) -> u32 {
        self.wildcard
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & !self.wildcard) == u32::from(self.ip)
    }

    /// The equivalent prefix, if the wildcard covers a contiguous run of low bits.
    pub fn to_prefix(&self) -> Option<Prefix> {
        let w = self.wildcard;
        if w.wrapping_add(1) & w != 0 {
            return None;
        }
        let len = 32 - w.count_ones() as u8;
        Prefix::new(self.ip, len).ok()
    }
}

impl From<Prefix> for IpWildcard {
    fn from(prefix: Prefix) -> Self {
        Self::new(prefix.network(), !prefix.mask())
    }
}

impl From<Ipv4Addr> for IpWildcard {
    fn from(ip: Ipv4Addr) -> Self {
        Self::new(ip, 0)
    }
}

impl FromStr for IpWildcard {
    type Err = Error;

    /// Accepts `a.b.c.d:w.x.y.z`, `a.b.c.d/len` or a plain `a.b.c.d`.
    fn from_str(s: &str) -> Result<Self> {
        if let Some((ip_s, wildcard_s)) = s.split_once(':') {
            let ip: Ipv4Addr = ip_s
                .parse()
                .map_err(|e| Error::malformed(s, format!("bad IP: {}", e)))?;
            let wildcard: Ipv4Addr = wildcard_s
                .parse()
                .map_err(|e| Error::malformed(s, format!("bad wildcard: {}", e)))?;
            Ok(Self::new(ip, u32::from(wildcard)))
        } else if s.contains('/') {
            Ok(s.parse::<Prefix>()?.into())
        } else {
            let ip: Ipv4Addr = s
                .parse()
                .map_err(|e| Error::malformed(s, format!("bad IP: {}", e)))?;
            Ok(ip.into())
        }
    }
}

impl Display for IpWildcard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_prefix() {
            Some(prefix) if prefix.prefix_len() == 32 => write!(f, "{}", self.ip),
            Some(prefix) => write!(f, "{}", prefix),
            None => write!(f, "{}:{}", self.ip, Ipv4Addr::from(self.wildcard)),
        }
    }
}

/// An inclusive range of IPv4 addresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        if start > end {
            return Err(Error::malformed(
                format!("{}-{}", start, end),
                "range start is after its end",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn single(ip: Ipv4Addr) -> Self {
        Self { start: ip, end: ip }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start <= ip && ip <= self.end
    }
}

impl Display for IpRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_parse() -> Result<()> {
        let p: Prefix = "1.1.1.7/24".parse()?;
        assert_eq!(p.network(), Ipv4Addr::new(1, 1, 1, 0));
        assert_eq!(p.prefix_len(), 24);
        assert_eq!(p.to_string(), "1.1.1.0/24");
        assert!(p.contains(Ipv4Addr::new(1, 1, 1, 200)));
        assert!(!p.contains(Ipv4Addr::new(1, 1, 2, 0)));
        assert_eq!(p.mask(), 0xFFFF_FF00);
        Ok(())
    }

    #[test]
    fn test_prefix_malformed() {
        assert!(matches!(
            "1.1.1.0/33".parse::<Prefix>(),
            Err(Error::MalformedLiteral { .. })
        ));
        assert!(matches!(
            "1.1.1.0".parse::<Prefix>(),
            Err(Error::MalformedLiteral { .. })
        ));
        assert!("300.1.1.0/8".parse::<Prefix>().is_err());
    }

    #[test]
    fn test_wildcard() -> Result<()> {
        let w: IpWildcard = "10.0.0.1:0.255.0.0".parse()?;
        assert!(w.contains(Ipv4Addr::new(10, 77, 0, 1)));
        assert!(!w.contains(Ipv4Addr::new(10, 77, 0, 2)));
        assert_eq!(w.to_prefix(), None);
        assert_eq!(w.to_string(), "10.0.0.1:0.255.0.0");

        let w: IpWildcard = "10.0.0.0/8".parse()?;
        assert_eq!(w.wildcard(), 0x00FF_FFFF);
        assert_eq!(w.to_prefix(), Some("10.0.0.0/8".parse()?));
        assert_eq!(w.to_string(), "10.0.0.0/8");

        let w: IpWildcard = "10.0.0.1".parse()?;
        assert_eq!(w.wildcard(), 0);
        assert_eq!(w.to_string(), "10.0.0.1");

        assert!("10.0.0.1:x".parse::<IpWildcard>().is_err());
        Ok(())
    }

    #[test]
    fn test_range() -> Result<()> {
        let r = IpRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 9))?;
        assert!(r.contains(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!r.contains(Ipv4Addr::new(10, 0, 0, 10)));
        assert_eq!(r.to_string(), "10.0.0.1-10.0.0.9");
        assert!(IpRange::new(r.end, r.start).is_err());
        Ok(())
    }
}
