//! Symbolic encoding of where a packet comes from.
//!
//! Source values: `0` means the packet originates from the device, `1..=n`
//! are the known interfaces in sorted order, and `n + 1` stands for any other
//! interface. Larger values are not meaningful and are excluded by
//! [`SourceManager::is_sane`].

use std::collections::BTreeSet;

use log::debug;

use crate::error::{Error, ReferenceKind, Result};
use crate::packet::{BddInteger, BddPacket, Model};
use crate::reference::Ref;

/// Name used for packets that enter through an interface the manager does not know.
pub const OTHER_INTERFACE: &str = "<other>";

/// The ingress point of a packet.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Source {
    Device,
    Interface(String),
}

pub struct SourceManager {
    interfaces: Vec<String>,
    var: BddInteger,
}

impl SourceManager {
    /// Allocate the source field in `packet` for the given interface names.
    pub fn new<S: Into<String>>(packet: &BddPacket, interfaces: impl IntoIterator<Item = S>) -> Result<Self> {
        let interfaces: BTreeSet<String> = interfaces.into_iter().map(Into::into).collect();
        let interfaces: Vec<String> = interfaces.into_iter().collect();
        // Values 0..=n+1 must fit.
        let values = interfaces.len() as u64 + 2;
        let width = (64 - (values - 1).leading_zeros()) as usize;
        let var = packet.alloc_integer(width.max(1))?;
        debug!(
            "SourceManager: {} interfaces over {} variables",
            interfaces.len(),
            var.width()
        );
        Ok(Self { interfaces, var })
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn var(&self) -> &BddInteger {
        &self.var
    }

    fn other_value(&self) -> u64 {
        self.interfaces.len() as u64 + 1
    }

    fn value_of_interface(&self, name: &str) -> Result<u64> {
        self.interfaces
            .binary_search_by(|s| s.as_str().cmp(name))
            .map(|i| i as u64 + 1)
            .map_err(|_| Error::undefined(ReferenceKind::Interface, name))
    }

    /// Source values that correspond to a real ingress point.
    pub fn is_sane(&self, packet: &BddPacket) -> Result<Ref> {
        self.var.leq(packet.bdd(), self.other_value())
    }

    pub fn originating_from_device(&self, packet: &BddPacket) -> Result<Ref> {
        self.var.value(packet.bdd(), 0)
    }

    /// Packets entering through any of `interfaces`. Unknown names are an error.
    pub fn match_src_interface<'s>(
        &self,
        packet: &BddPacket,
        interfaces: impl IntoIterator<Item = &'s String>,
    ) -> Result<Ref> {
        let bdd = packet.bdd();
        let mut res = bdd.zero;
        for name in interfaces {
            let value = self.value_of_interface(name)?;
            let x = self.var.value(bdd, value)?;
            res = bdd.apply_or(res, x)?;
        }
        Ok(res)
    }

    /// The single source value of a concrete flow.
    pub fn source_bdd(&self, packet: &BddPacket, source: &Source) -> Result<Ref> {
        let value = match source {
            Source::Device => 0,
            Source::Interface(name) => self
                .value_of_interface(name)
                .unwrap_or_else(|_| self.other_value()),
        };
        self.var.value(packet.bdd(), value)
    }

    /// Read the source from a model. Out-of-range values read as "other".
    pub fn source_of(&self, model: &Model) -> Source {
        match self.var.value_of(model) {
            0 => Source::Device,
            v if v as usize <= self.interfaces.len() => {
                Source::Interface(self.interfaces[v as usize - 1].clone())
            }
            _ => Source::Interface(OTHER_INTERFACE.to_string()),
        }
    }
}

impl Source {
    pub fn from_interface(interface: Option<&str>) -> Self {
        match interface {
            None => Source::Device,
            Some(name) => Source::Interface(name.to_string()),
        }
    }

    pub fn into_interface(self) -> Option<String> {
        match self {
            Source::Device => None,
            Source::Interface(name) => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::settings::Settings;
    use num_bigint::BigUint;

    /// Number of source values in `f`, which must not depend on header variables.
    fn count(packet: &BddPacket, f: Ref) -> BigUint {
        let bdd = packet.bdd();
        bdd.sat_count(f, bdd.num_vars() as usize) >> packet.num_packet_vars() as usize
    }

    #[test]
    fn test_width() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let none = SourceManager::new(&packet, Vec::<String>::new())?;
        assert_eq!(none.var().width(), 1);
        let two = SourceManager::new(&packet, ["eth1", "eth0"])?;
        assert_eq!(two.var().width(), 2);
        assert_eq!(two.interfaces(), ["eth0".to_string(), "eth1".to_string()]);
        let three = SourceManager::new(&packet, ["a", "b", "c"])?;
        assert_eq!(three.var().width(), 3);
        Ok(())
    }

    #[test]
    fn test_sanity_and_matches() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let sources = SourceManager::new(&packet, ["eth0", "eth1", "eth2"])?;
        let bdd = packet.bdd();

        let sane = sources.is_sane(&packet)?;
        // device, eth0, eth1, eth2, other
        assert_eq!(count(&packet, sane), BigUint::from(5u32));

        let device = sources.originating_from_device(&packet)?;
        let eth = sources.match_src_interface(&packet, &["eth0".to_string(), "eth2".to_string()])?;
        assert_eq!(bdd.apply_and(device, eth)?, bdd.zero);
        assert!(bdd.is_implies(eth, sane));
        assert_eq!(count(&packet, eth), BigUint::from(2u32));

        assert_eq!(
            sources.match_src_interface(&packet, &["eth9".to_string()]),
            Err(Error::undefined(ReferenceKind::Interface, "eth9"))
        );
        Ok(())
    }

    #[test]
    fn test_source_of_model() -> Result<()> {
        let packet = BddPacket::new(&Settings::default())?;
        let sources = SourceManager::new(&packet, ["eth0", "eth1"])?;

        for source in [
            Source::Device,
            Source::Interface("eth1".to_string()),
            Source::Interface(OTHER_INTERFACE.to_string()),
        ] {
            let f = sources.source_bdd(&packet, &source)?;
            let model = packet.model(f).unwrap();
            assert_eq!(sources.source_of(&model), source);
        }
        Ok(())
    }
}
