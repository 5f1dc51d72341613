use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("invalid binary address length {0}")]
    InvalidLength(usize),

    #[error("prefix length {prefix} too long for {family:?}")]
    InvalidPrefix { family: AddrFamily, prefix: u8 },

    #[error("cannot parse address '{0}'")]
    Malformed(String),
}

/// Address family tag. The discriminants are ordered so that the derived
/// ordering of [`NetAddr`] stays stable across families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AddrFamily {
    #[default]
    Unspec,
    Ipv4,
    Ipv6,
    Mac48,
    Eui64,
}

impl AddrFamily {
    /// Number of meaningful leading bytes in the 16-byte address buffer.
    pub fn addr_len(&self) -> usize {
        match self {
            AddrFamily::Unspec => 0,
            AddrFamily::Ipv4 => 4,
            AddrFamily::Ipv6 => 16,
            AddrFamily::Mac48 => 6,
            AddrFamily::Eui64 => 8,
        }
    }

    /// Maximum prefix length of this family in bits.
    pub fn max_prefix(&self) -> u8 {
        (self.addr_len() * 8) as u8
    }

    pub fn from_addr_len(len: usize) -> Option<AddrFamily> {
        match len {
            4 => Some(AddrFamily::Ipv4),
            16 => Some(AddrFamily::Ipv6),
            6 => Some(AddrFamily::Mac48),
            8 => Some(AddrFamily::Eui64),
            _ => None,
        }
    }
}

/// A network address with family tag and prefix length.
///
/// Shorter families occupy the leading bytes of the fixed buffer, the rest
/// stays zero. Comparison is derived over (bytes, family, prefix) which
/// makes the ordering a plain byte-wise comparison over the whole record,
/// deterministic across address families. Every ordered index in the
/// protocol databases relies on this.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NetAddr {
    bytes: [u8; 16],
    family: AddrFamily,
    prefix_len: u8,
}

/// The 96-bit prefix of IPv4-compatible IPv6 addresses (`::a.b.c.d`).
const IPV4_COMPAT_PREFIX: [u8; 12] = [0; 12];

impl NetAddr {
    pub const UNSPEC: NetAddr = NetAddr {
        bytes: [0; 16],
        family: AddrFamily::Unspec,
        prefix_len: 0,
    };

    /// Build an address from its on-wire binary form. `len` selects the
    /// family; the prefix length defaults to the family maximum.
    pub fn from_binary(bin: &[u8]) -> Result<NetAddr, AddrError> {
        let family =
            AddrFamily::from_addr_len(bin.len()).ok_or(AddrError::InvalidLength(bin.len()))?;
        let mut bytes = [0u8; 16];
        bytes[..bin.len()].copy_from_slice(bin);
        Ok(NetAddr {
            bytes,
            family,
            prefix_len: family.max_prefix(),
        })
    }

    pub fn with_prefix(mut self, prefix_len: u8) -> Result<NetAddr, AddrError> {
        if prefix_len > self.family.max_prefix() {
            return Err(AddrError::InvalidPrefix {
                family: self.family,
                prefix: prefix_len,
            });
        }
        self.prefix_len = prefix_len;
        Ok(self)
    }

    pub fn family(&self) -> AddrFamily {
        self.family
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// True if the prefix length covers the whole address.
    pub fn is_host(&self) -> bool {
        self.prefix_len == self.family.max_prefix()
    }

    pub fn is_unspec(&self) -> bool {
        self.family == AddrFamily::Unspec
    }

    /// The meaningful bytes of the address.
    pub fn octets(&self) -> &[u8] {
        &self.bytes[..self.family.addr_len()]
    }

    pub fn to_ip(&self) -> Option<IpAddr> {
        match self.family {
            AddrFamily::Ipv4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.bytes[..4]);
                Some(IpAddr::V4(Ipv4Addr::from(o)))
            }
            AddrFamily::Ipv6 => Some(IpAddr::V6(Ipv6Addr::from(self.bytes))),
            _ => None,
        }
    }

    /// True if `addr` lies within the prefix described by `self`.
    pub fn contains(&self, addr: &NetAddr) -> bool {
        if self.family != addr.family {
            return false;
        }
        let bits = self.prefix_len as usize;
        let full = bits / 8;
        if self.bytes[..full] != addr.bytes[..full] {
            return false;
        }
        let rest = bits % 8;
        if rest == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rest);
        (self.bytes[full] ^ addr.bytes[full]) & mask == 0
    }

    /// True for an IPv6 address carrying an IPv4 address in its last four
    /// bytes (the `::0.0.0.0/96` compatibility block).
    pub fn is_ipv4_compatible(&self) -> bool {
        self.family == AddrFamily::Ipv6
            && self.bytes[..12] == IPV4_COMPAT_PREFIX
            && self.bytes[12..16] != [0, 0, 0, 0]
    }

    /// Embed an IPv4 address into its IPv4-compatible IPv6 form.
    pub fn embed_ipv4_compatible(&self) -> NetAddr {
        debug_assert_eq!(self.family, AddrFamily::Ipv4);
        let mut bytes = [0u8; 16];
        bytes[12..16].copy_from_slice(&self.bytes[..4]);
        NetAddr {
            bytes,
            family: AddrFamily::Ipv6,
            prefix_len: 96 + self.prefix_len,
        }
    }

    /// Extract the IPv4 address out of an IPv4-compatible IPv6 address.
    pub fn extract_ipv4_compatible(&self) -> NetAddr {
        debug_assert!(self.is_ipv4_compatible());
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&self.bytes[12..16]);
        NetAddr {
            bytes,
            family: AddrFamily::Ipv4,
            prefix_len: self.prefix_len.saturating_sub(96).min(32),
        }
    }
}

impl From<Ipv4Addr> for NetAddr {
    fn from(ip: Ipv4Addr) -> NetAddr {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&ip.octets());
        NetAddr {
            bytes,
            family: AddrFamily::Ipv4,
            prefix_len: 32,
        }
    }
}

impl From<Ipv6Addr> for NetAddr {
    fn from(ip: Ipv6Addr) -> NetAddr {
        NetAddr {
            bytes: ip.octets(),
            family: AddrFamily::Ipv6,
            prefix_len: 128,
        }
    }
}

impl From<IpAddr> for NetAddr {
    fn from(ip: IpAddr) -> NetAddr {
        match ip {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(sock: SocketAddr) -> NetAddr {
        sock.ip().into()
    }
}

impl FromStr for NetAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<NetAddr, AddrError> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        let addr: NetAddr = addr_part
            .parse::<IpAddr>()
            .map(NetAddr::from)
            .map_err(|_| AddrError::Malformed(s.to_string()))?;

        match prefix_part {
            None => Ok(addr),
            Some(p) => {
                let prefix: u8 = p.parse().map_err(|_| AddrError::Malformed(s.to_string()))?;
                addr.with_prefix(prefix)
            }
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddrFamily::Unspec => write!(f, "-"),
            AddrFamily::Ipv4 | AddrFamily::Ipv6 => {
                write!(f, "{}", self.to_ip().unwrap())?;
                if !self.is_host() {
                    write!(f, "/{}", self.prefix_len)?;
                }
                Ok(())
            }
            AddrFamily::Mac48 | AddrFamily::Eui64 => {
                let octets = self.octets();
                for (i, b) in octets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let a: NetAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(a.family(), AddrFamily::Ipv4);
        assert_eq!(a.prefix_len(), 32);
        assert_eq!(a.to_string(), "10.0.0.1");

        let p: NetAddr = "10.0.0.0/8".parse().unwrap();
        assert_eq!(p.prefix_len(), 8);
        assert_eq!(p.to_string(), "10.0.0.0/8");

        let v6: NetAddr = "fe80::1/64".parse().unwrap();
        assert_eq!(v6.family(), AddrFamily::Ipv6);
        assert_eq!(v6.prefix_len(), 64);

        assert!("10.0.0.0/33".parse::<NetAddr>().is_err());
        assert!("300.0.0.1".parse::<NetAddr>().is_err());
    }

    #[test]
    fn binary_roundtrip() {
        let a = NetAddr::from_binary(&[10, 1, 2, 3]).unwrap();
        assert_eq!(a.family(), AddrFamily::Ipv4);
        assert_eq!(a.octets(), &[10, 1, 2, 3]);

        let mac = NetAddr::from_binary(&[0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mac.family(), AddrFamily::Mac48);
        assert_eq!(mac.to_string(), "00:01:02:03:04:05");

        assert!(NetAddr::from_binary(&[1, 2, 3]).is_err());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a: NetAddr = "10.0.0.1".parse().unwrap();
        let b: NetAddr = "10.0.0.2".parse().unwrap();
        assert!(a < b);

        // same bytes, different family: v4 sorts before v6 because the
        // trailing buffer bytes are zero and the family tag breaks the tie
        let v4 = NetAddr::from_binary(&[0, 0, 0, 1]).unwrap();
        let v6 = NetAddr::from_binary(&[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(v4 < v6);
    }

    #[test]
    fn subnet_matching() {
        let net: NetAddr = "10.0.0.0/9".parse().unwrap();
        assert!(net.contains(&"10.100.0.1".parse().unwrap()));
        assert!(!net.contains(&"10.200.0.1".parse().unwrap()));
        assert!(!net.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!net.contains(&"fe80::1".parse().unwrap()));
    }

    #[test]
    fn ipv4_compatible_embedding() {
        let v4: NetAddr = "192.168.1.5".parse().unwrap();
        let embedded = v4.embed_ipv4_compatible();
        assert_eq!(embedded.family(), AddrFamily::Ipv6);
        assert!(embedded.is_ipv4_compatible());
        assert_eq!(embedded.prefix_len(), 128);
        assert_eq!(embedded.extract_ipv4_compatible(), v4);

        let plain_v6: NetAddr = "fe80::1".parse().unwrap();
        assert!(!plain_v6.is_ipv4_compatible());
    }
}
