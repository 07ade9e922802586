// ── Address and prefix pools ──
//
// Kea pools come as `first - last` ranges or CIDR blocks; delegated-prefix
// pools as (prefix, prefix-len, delegated-len). Containment checks feed the
// out-of-pool correction of utilisation statistics.

use std::net::IpAddr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPool {
    pub lower: IpAddr,
    pub upper: IpAddr,
}

impl AddressPool {
    /// Parse `a - b` or `net/len`.
    pub fn parse(text: &str) -> Result<Self> {
        if let Some((lo, hi)) = text.split_once('-') {
            let lower = parse_ip(lo)?;
            let upper = parse_ip(hi)?;
            if lower.is_ipv4() != upper.is_ipv4() {
                return Err(CoreError::Parse {
                    message: format!("pool {text} mixes address families"),
                });
            }
            return Ok(Self { lower, upper });
        }
        let (net, len) = text.split_once('/').ok_or_else(|| CoreError::Parse {
            message: format!("invalid pool {text}"),
        })?;
        let net = parse_ip(net)?;
        let len: u32 = len.trim().parse().map_err(|_| CoreError::Parse {
            message: format!("invalid prefix length in pool {text}"),
        })?;
        let (lower, upper) = cidr_bounds(net, len).ok_or_else(|| CoreError::Parse {
            message: format!("prefix length out of range in pool {text}"),
        })?;
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.lower, self.upper, addr) {
            (IpAddr::V4(lo), IpAddr::V4(hi), IpAddr::V4(a)) => {
                (u32::from(lo)..=u32::from(hi)).contains(&u32::from(a))
            }
            (IpAddr::V6(lo), IpAddr::V6(hi), IpAddr::V6(a)) => {
                (u128::from(lo)..=u128::from(hi)).contains(&u128::from(a))
            }
            _ => false,
        }
    }

    /// Number of addresses in the pool.
    pub fn size(&self) -> BigUint {
        match (self.lower, self.upper) {
            (IpAddr::V4(lo), IpAddr::V4(hi)) => {
                BigUint::from(u32::from(hi).saturating_sub(u32::from(lo))) + 1u32
            }
            (IpAddr::V6(lo), IpAddr::V6(hi)) => {
                BigUint::from(u128::from(hi).saturating_sub(u128::from(lo))) + 1u32
            }
            _ => BigUint::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPool {
    pub prefix: IpAddr,
    pub prefix_len: u8,
    pub delegated_len: u8,
}

impl PrefixPool {
    /// Whether a delegated prefix `addr/len` lies inside the pool.
    pub fn contains(&self, addr: IpAddr, len: u8) -> bool {
        let (IpAddr::V6(pool), IpAddr::V6(addr)) = (self.prefix, addr) else {
            return false;
        };
        if len < self.prefix_len {
            return false;
        }
        let mask = prefix_mask_v6(u32::from(self.prefix_len));
        (u128::from(pool) & mask) == (u128::from(addr) & mask)
    }
}

fn parse_ip(text: &str) -> Result<IpAddr> {
    text.trim().parse().map_err(|_| CoreError::Parse {
        message: format!("invalid address {}", text.trim()),
    })
}

fn prefix_mask_v6(len: u32) -> u128 {
    if len == 0 { 0 } else { u128::MAX << (128 - len.min(128)) }
}

fn cidr_bounds(net: IpAddr, len: u32) -> Option<(IpAddr, IpAddr)> {
    match net {
        IpAddr::V4(v4) if len <= 32 => {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            let lo = u32::from(v4) & mask;
            Some((IpAddr::V4(lo.into()), IpAddr::V4((lo | !mask).into())))
        }
        IpAddr::V6(v6) if len <= 128 => {
            let mask = prefix_mask_v6(len);
            let lo = u128::from(v6) & mask;
            Some((IpAddr::V6(lo.into()), IpAddr::V6((lo | !mask).into())))
        }
        _ => None,
    }
}

/// Split `addr/len` into its parts.
pub fn parse_prefix(text: &str) -> Option<(IpAddr, u8)> {
    let (addr, len) = text.split_once('/')?;
    Some((addr.trim().parse().ok()?, len.trim().parse().ok()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn range_pool() {
        let pool = AddressPool::parse("192.0.2.10 - 192.0.2.20").unwrap();
        assert!(pool.contains("192.0.2.15".parse().unwrap()));
        assert!(!pool.contains("192.0.2.21".parse().unwrap()));
        assert_eq!(pool.size(), BigUint::from(11u32));
    }

    #[test]
    fn cidr_pool() {
        let pool = AddressPool::parse("192.0.2.0/28").unwrap();
        assert_eq!(pool.lower, "192.0.2.0".parse::<IpAddr>().unwrap());
        assert_eq!(pool.upper, "192.0.2.15".parse::<IpAddr>().unwrap());

        let v6 = AddressPool::parse("2001:db8::/120").unwrap();
        assert!(v6.contains("2001:db8::ff".parse().unwrap()));
        assert!(!v6.contains("2001:db8::1:0".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(AddressPool::parse("foo").is_err());
        assert!(AddressPool::parse("192.0.2.1 - 2001:db8::1").is_err());
        assert!(AddressPool::parse("192.0.2.0/33").is_err());
    }

    #[test]
    fn prefix_pool_containment() {
        let pool = PrefixPool {
            prefix: "3000::".parse().unwrap(),
            prefix_len: 48,
            delegated_len: 64,
        };
        assert!(pool.contains("3000:0:0:5::".parse().unwrap(), 64));
        assert!(!pool.contains("3001::".parse().unwrap(), 64));
        assert!(!pool.contains("3000::".parse().unwrap(), 32));
    }
}
