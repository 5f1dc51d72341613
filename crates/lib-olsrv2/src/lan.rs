use std::collections::BTreeMap;
use std::str::FromStr;

use wisp_core::addr::NetAddr;
use wisp_nhdp::domain::MAX_DOMAINS;

use crate::error::Olsrv2Error;

/// Per-domain advertisement parameters of one locally attached network.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanDomainData {
    pub outgoing_metric: u32,
    pub distance: u8,
    pub active: bool,
}

/// One prefix this router injects into the topology without it being
/// part of the mesh.
#[derive(Debug, Default)]
pub struct LanEntry {
    pub data: [LanDomainData; MAX_DOMAINS],
}

#[derive(Default)]
pub struct LanDb {
    entries: BTreeMap<NetAddr, LanEntry>,
}

impl LanDb {
    pub fn new() -> LanDb {
        LanDb::default()
    }

    pub fn add(&mut self, domain_index: usize, prefix: NetAddr, metric: u32, distance: u8) {
        let entry = self.entries.entry(prefix).or_default();
        entry.data[domain_index] = LanDomainData {
            outgoing_metric: metric,
            distance,
            active: true,
        };
    }

    pub fn remove(&mut self, domain_index: usize, prefix: &NetAddr) {
        if let Some(entry) = self.entries.get_mut(prefix) {
            entry.data[domain_index].active = false;
            if entry.data.iter().all(|d| !d.active) {
                self.entries.remove(prefix);
            }
        }
    }

    pub fn get(&self, prefix: &NetAddr) -> Option<&LanEntry> {
        self.entries.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NetAddr, &LanEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One parsed `lan` configuration value:
/// `<prefix> [metric=N] [domain=N] [dist=N]`.
///
/// Defaults: metric 0 (minimum), domain extension 0, distance 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanConfig {
    pub prefix: NetAddr,
    pub metric: u32,
    pub domain_ext: u8,
    pub distance: u8,
}

impl FromStr for LanConfig {
    type Err = Olsrv2Error;

    fn from_str(s: &str) -> Result<LanConfig, Olsrv2Error> {
        let mut words = s.split_whitespace();
        let prefix = words
            .next()
            .ok_or_else(|| Olsrv2Error::BadLan("missing prefix".into()))?;
        let prefix: NetAddr = prefix
            .parse()
            .map_err(|_| Olsrv2Error::BadLan(format!("bad prefix '{prefix}'")))?;

        let mut lan = LanConfig {
            prefix,
            metric: 0,
            domain_ext: 0,
            distance: 2,
        };

        for word in words {
            if let Some(value) = word.strip_prefix("metric=") {
                lan.metric = value
                    .parse()
                    .map_err(|_| Olsrv2Error::BadLan(format!("bad metric '{value}'")))?;
            } else if let Some(value) = word.strip_prefix("domain=") {
                lan.domain_ext = value
                    .parse()
                    .map_err(|_| Olsrv2Error::BadLan(format!("bad domain '{value}'")))?;
            } else if let Some(value) = word.strip_prefix("dist=") {
                lan.distance = value
                    .parse()
                    .map_err(|_| Olsrv2Error::BadLan(format!("bad distance '{value}'")))?;
            } else {
                return Err(Olsrv2Error::BadLan(format!("unknown parameter '{word}'")));
            }
        }
        Ok(lan)
    }
}
