use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use wisp_core::acl::AddrAcl;
use wisp_core::addr::NetAddr;
use wisp_nhdp::interfaces::{IfaceMode, IfaceTiming};
use wisp_olsrv2::{default_routable, LanConfig, Olsrv2Config};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// On-disk configuration, all times in seconds.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub nhdp: NhdpSection,
    #[serde(default)]
    pub interface: Vec<InterfaceSection>,
    #[serde(default)]
    pub domain: Vec<DomainSection>,
    #[serde(default)]
    pub olsrv2: Olsrv2Section,
    #[serde(default)]
    pub etx: EtxSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NhdpSection {
    pub hello_interval: f64,
    pub hello_validity: f64,
    pub willingness: u8,
}

impl Default for NhdpSection {
    fn default() -> Self {
        NhdpSection {
            hello_interval: 2.0,
            hello_validity: 6.0,
            willingness: 7,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSection {
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub accept: Vec<String>,
    #[serde(default)]
    pub reject: Vec<String>,
}

fn default_mode() -> String {
    "dual".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainSection {
    pub ext: u8,
    #[serde(default = "default_metric_name")]
    pub metric: String,
}

fn default_metric_name() -> String {
    "etx".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Olsrv2Section {
    pub tc_interval: f64,
    pub tc_validity: f64,
    pub forward_hold_time: f64,
    pub processing_hold_time: f64,
    pub originator_hold_time: f64,
    pub originator_v4: Option<String>,
    pub originator_v6: Option<String>,
    #[serde(default)]
    pub routable_accept: Vec<String>,
    #[serde(default)]
    pub routable_reject: Vec<String>,
    #[serde(default)]
    pub lan: Vec<String>,
}

impl Default for Olsrv2Section {
    fn default() -> Self {
        Olsrv2Section {
            tc_interval: 5.0,
            tc_validity: 15.0,
            forward_hold_time: 300.0,
            processing_hold_time: 300.0,
            originator_hold_time: 30.0,
            originator_v4: None,
            originator_v6: None,
            routable_accept: Vec::new(),
            routable_reject: Vec::new(),
            lan: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtxSection {
    pub interval: f64,
    pub window: usize,
    pub start_window: usize,
}

impl Default for EtxSection {
    fn default() -> Self {
        EtxSection {
            interval: 1.0,
            window: 64,
            start_window: 4,
        }
    }
}

fn seconds(value: f64, key: &'static str) -> Result<u64, ConfigError> {
    if !value.is_finite() || value < 0.1 {
        return Err(invalid(key, format!("{value} is below 0.1 seconds")));
    }
    Ok((value * 1000.0) as u64)
}

fn parse_addrs(values: &[String], key: &'static str) -> Result<Vec<NetAddr>, ConfigError> {
    values
        .iter()
        .map(|v| v.parse().map_err(|e| invalid(key, format!("{e}"))))
        .collect()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// All validation happens here, before any runtime state exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.nhdp_timing()?;
        self.olsrv2_config()?;
        for iface in &self.interface {
            self.iface_mode(iface)?;
            self.iface_filter(iface)?;
        }
        for lan in &self.olsrv2.lan {
            lan.parse::<LanConfig>()
                .map_err(|e| invalid("olsrv2.lan", format!("{e}")))?;
        }
        if self.etx.start_window == 0 || self.etx.start_window > self.etx.window {
            return Err(invalid(
                "etx.start_window",
                "must be between 1 and the window size",
            ));
        }
        seconds(self.etx.interval, "etx.interval")?;
        if self.domain.len() > wisp_nhdp::MAX_DOMAINS {
            return Err(invalid(
                "domain",
                format!("at most {} domains", wisp_nhdp::MAX_DOMAINS),
            ));
        }
        Ok(())
    }

    pub fn nhdp_timing(&self) -> Result<IfaceTiming, ConfigError> {
        let refresh = seconds(self.nhdp.hello_interval, "nhdp.hello_interval")?;
        let hold = seconds(self.nhdp.hello_validity, "nhdp.hello_validity")?;
        if hold < refresh {
            return Err(invalid(
                "nhdp.hello_validity",
                "validity below the hello interval",
            ));
        }
        Ok(IfaceTiming {
            refresh_interval: refresh,
            h_hold: hold,
            l_hold: hold,
            n_hold: hold,
            i_hold: hold,
        })
    }

    pub fn iface_mode(&self, iface: &InterfaceSection) -> Result<IfaceMode, ConfigError> {
        match iface.mode.as_str() {
            "ipv4" => Ok(IfaceMode::Ipv4),
            "ipv6" => Ok(IfaceMode::Ipv6),
            "dual" => Ok(IfaceMode::Dual),
            other => Err(invalid(
                "interface.mode",
                format!("'{other}' is not ipv4, ipv6 or dual"),
            )),
        }
    }

    pub fn iface_filter(&self, iface: &InterfaceSection) -> Result<AddrAcl, ConfigError> {
        let mut acl = AddrAcl::new(true);
        for addr in parse_addrs(&iface.accept, "interface.accept")? {
            acl = acl.accept(addr);
        }
        for addr in parse_addrs(&iface.reject, "interface.reject")? {
            acl = acl.reject(addr);
        }
        Ok(acl)
    }

    pub fn olsrv2_config(&self) -> Result<Olsrv2Config, ConfigError> {
        let mut routable = AddrAcl::new(true);
        for addr in parse_addrs(&self.olsrv2.routable_accept, "olsrv2.routable_accept")? {
            routable = routable.accept(addr);
        }
        for addr in parse_addrs(&self.olsrv2.routable_reject, "olsrv2.routable_reject")? {
            routable = routable.reject(addr);
        }
        let routable = if self.olsrv2.routable_accept.is_empty()
            && self.olsrv2.routable_reject.is_empty()
        {
            default_routable()
        } else {
            routable
        };

        Ok(Olsrv2Config {
            tc_interval: seconds(self.olsrv2.tc_interval, "olsrv2.tc_interval")?,
            tc_validity: seconds(self.olsrv2.tc_validity, "olsrv2.tc_validity")?,
            forward_hold_time: seconds(
                self.olsrv2.forward_hold_time,
                "olsrv2.forward_hold_time",
            )?,
            processing_hold_time: seconds(
                self.olsrv2.processing_hold_time,
                "olsrv2.processing_hold_time",
            )?,
            originator_hold_time: seconds(
                self.olsrv2.originator_hold_time,
                "olsrv2.originator_hold_time",
            )?,
            routable,
        })
    }

    pub fn originator(&self, key: &'static str) -> Result<Option<NetAddr>, ConfigError> {
        let value = match key {
            "originator_v4" => &self.olsrv2.originator_v4,
            _ => &self.olsrv2.originator_v6,
        };
        value
            .as_ref()
            .map(|v| v.parse().map_err(|e| invalid("olsrv2.originator", format!("{e}"))))
            .transpose()
    }

    pub fn lans(&self) -> Vec<LanConfig> {
        // validated beforehand
        self.olsrv2
            .lan
            .iter()
            .filter_map(|l| l.parse().ok())
            .collect()
    }
}
