//! API key usage restrictions: permitted client IPs and referers.
//!
//! Both are carried as claims on the key (`permittedIP`, `permittedReferer`).
//! Each restriction that is present must be satisfied. Claims are parsed
//! and compiled once into [`KeyRestrictions`].

use crate::context::RequestContext;
use crate::error::AuthError;
use regex::RegexSet;
use std::net::IpAddr;
use tracing::{debug, warn};

/// An IP address or CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Parse `a.b.c.d`, `a.b.c.d/n`, or the IPv6 equivalents.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, bits)) => (addr.trim(), Some(bits.trim().parse::<u8>().ok()?)),
            None => (s, None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return None;
        }
        Some(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Whether `client_ip` matches any entry of a comma-separated IP/CIDR list.
pub fn ip_permitted(permitted: &str, client_ip: &str) -> bool {
    let ranges = parse_ranges(permitted);
    ip_in_ranges(&ranges, client_ip)
}

/// Whether `referer` matches any entry of a comma-separated pattern list.
/// `*` matches any run of non-space characters; the whole referer must match.
pub fn referer_permitted(permitted: &str, referer: &str) -> bool {
    compile_referers(permitted).is_match(referer)
}

fn parse_ranges(permitted: &str) -> Vec<IpRange> {
    permitted.split(',').filter_map(IpRange::parse).collect()
}

fn ip_in_ranges(ranges: &[IpRange], client_ip: &str) -> bool {
    let Ok(ip) = client_ip.trim().parse::<IpAddr>() else {
        return false;
    };
    ranges.iter().any(|range| range.contains(ip))
}

fn compile_referers(permitted: &str) -> RegexSet {
    let patterns: Vec<String> = permitted
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("^{}$", regex::escape(p).replace(r"\*", "[^ ]*")))
        .collect();
    RegexSet::new(&patterns).unwrap_or_else(|e| {
        warn!(error = %e, "referer restriction does not compile, denying all referers");
        RegexSet::empty()
    })
}

/// The restrictions carried by one key, parsed and compiled.
#[derive(Debug, Clone, Default)]
pub struct KeyRestrictions {
    ips: Option<Vec<IpRange>>,
    referers: Option<RegexSet>,
}

impl KeyRestrictions {
    /// Blank claims impose no restriction.
    pub fn parse(permitted_ip: Option<&str>, permitted_referer: Option<&str>) -> Self {
        Self {
            ips: permitted_ip
                .filter(|p| !p.trim().is_empty())
                .map(parse_ranges),
            referers: permitted_referer
                .filter(|p| !p.trim().is_empty())
                .map(compile_referers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_none() && self.referers.is_none()
    }

    /// Enforce these restrictions against the request.
    pub fn check(&self, req: &RequestContext) -> Result<(), AuthError> {
        if let Some(ranges) = &self.ips {
            let client_ip = req.client_ip().unwrap_or_default();
            if !ip_in_ranges(ranges, &client_ip) {
                debug!(client_ip = %client_ip, "client IP not permitted for API key");
                return Err(AuthError::resource_forbidden(&req.resource.path));
            }
        }
        if let Some(referers) = &self.referers {
            let referer = req.header("referer");
            if !referer.is_some_and(|r| referers.is_match(r)) {
                debug!(referer = ?referer, "referer not permitted for API key");
                return Err(AuthError::resource_forbidden(&req.resource.path));
            }
        }
        Ok(())
    }
}
