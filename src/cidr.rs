//! IPv4/IPv6 prefixes for [crate::resource::Network].
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Formatter},
    net::IpAddr,
    str::FromStr,
};

use crate::error::ValidationError;

/// A network prefix with all host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cidr {
    addr: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Cidr, ValidationError> {
        let max = max_prefix(&addr);
        if prefix_len > max {
            return Err(ValidationError::field(
                "cidr",
                format!("Prefix length {prefix_len} exceeds {max} for {addr}."),
            ));
        }
        let cidr = Cidr { addr, prefix_len };
        if cidr.bits() & !cidr.mask() != 0 {
            return Err(ValidationError::field(
                "cidr",
                format!("{addr}/{prefix_len} has host bits set."),
            ));
        }
        Ok(cidr)
    }

    pub fn network_address(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// True if `other` lies inside this prefix. A prefix contains itself.
    pub fn contains(&self, other: &Cidr) -> bool {
        self.addr.is_ipv4() == other.addr.is_ipv4()
            && other.prefix_len >= self.prefix_len
            && other.bits() & self.mask() == self.bits()
    }

    /// Strictly larger prefix that contains `other`.
    pub fn is_supernet_of(&self, other: &Cidr) -> bool {
        self != other && self.contains(other)
    }

    fn bits(&self) -> u128 {
        match self.addr {
            IpAddr::V4(v4) => u32::from(v4) as u128,
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    fn mask(&self) -> u128 {
        let width = max_prefix(&self.addr) as u32;
        if self.prefix_len == 0 {
            return 0;
        }
        let ones = (!0u128) >> (128 - width);
        (ones << (width - self.prefix_len as u32)) & ones
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for Cidr {
    type Err = ValidationError;

    fn from_str(src: &str) -> Result<Cidr, ValidationError> {
        let invalid = || ValidationError::field("cidr", format!("Invalid CIDR: {src:?}."));
        let (addr, prefix) = match src.split_once('/') {
            Some((addr, prefix)) => {
                let addr = IpAddr::from_str(addr.trim()).map_err(|_| invalid())?;
                let prefix = prefix.trim().parse::<u8>().map_err(|_| invalid())?;
                (addr, prefix)
            }
            None => {
                let addr = IpAddr::from_str(src.trim()).map_err(|_| invalid())?;
                (addr, max_prefix(&addr))
            }
        };
        Cidr::new(addr, prefix)
    }
}

impl Display for Cidr {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Cidr, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Cidr::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
