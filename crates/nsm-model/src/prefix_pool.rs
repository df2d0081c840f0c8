//! CIDR prefix allocation for address-handing endpoints.
//!
//! The pool hands out a point-to-point subnet (src/dst addresses) per
//! connection plus any extra prefixes the request asks for, splitting larger
//! prefixes on demand and merging siblings back together on release. The
//! split keeps the right-hand halves in most-specific-first order so that
//! subsequent extractions reuse the smallest leftover pieces.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::context::{ExtraPrefixRequest, IpFamily};

/// Errors from prefix pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixPoolError {
    #[error("invalid CIDR prefix: {prefix}")]
    InvalidPrefix { prefix: String },

    #[error("no room for a /{prefix_len} prefix in the pool")]
    NoSpace { prefix_len: u32 },

    #[error("overflowed CIDR while incrementing IP")]
    Overflow,

    #[error("no connection with id {connection_id} in the pool")]
    UnknownConnection { connection_id: String },

    #[error("invalid extra prefix request: {reason}")]
    InvalidRequest { reason: String },
}

/// Addresses and extra prefixes allocated for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixAllocation {
    /// Source address in CIDR notation, e.g. "10.20.1.1/30".
    pub src_ip_addr: String,
    /// Destination address in CIDR notation, e.g. "10.20.1.2/30".
    pub dst_ip_addr: String,
    /// Prefixes allocated for the request's extra prefix requests.
    pub extra_prefixes: Vec<String>,
}

/// A parsed CIDR network, normalized to its network address.
///
/// IPv4 addresses live in the low 32 bits of `addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CidrNet {
    bits: u32,
    prefix_len: u32,
    addr: u128,
}

impl CidrNet {
    fn parse(prefix: &str) -> Result<Self, PrefixPoolError> {
        let invalid = || PrefixPoolError::InvalidPrefix {
            prefix: prefix.to_string(),
        };
        let (ip_part, len_part) = prefix.split_once('/').ok_or_else(invalid)?;
        let ip: IpAddr = ip_part.parse().map_err(|_| invalid())?;
        let prefix_len: u32 = len_part.parse().map_err(|_| invalid())?;
        let (addr, bits) = match ip {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32),
            IpAddr::V6(v6) => (u128::from(v6), 128),
        };
        if prefix_len > bits {
            return Err(invalid());
        }
        let net = CidrNet {
            bits,
            prefix_len,
            addr: addr & mask(prefix_len, bits),
        };
        Ok(net)
    }

    fn ip(&self) -> IpAddr {
        match self.bits {
            32 => IpAddr::V4(Ipv4Addr::from(self.addr as u32)),
            _ => IpAddr::V6(Ipv6Addr::from(self.addr)),
        }
    }

    fn contains(&self, addr: u128) -> bool {
        addr & mask(self.prefix_len, self.bits) == self.addr
    }

    /// Splits off the numbered half (0 or 1) one prefix length deeper.
    fn subnet(&self, index: u128) -> Result<CidrNet, PrefixPoolError> {
        if self.prefix_len >= self.bits {
            return Err(PrefixPoolError::NoSpace {
                prefix_len: self.prefix_len + 1,
            });
        }
        let child_len = self.prefix_len + 1;
        Ok(CidrNet {
            bits: self.bits,
            prefix_len: child_len,
            addr: self.addr | (index << (self.bits - child_len)),
        })
    }
}

impl std::fmt::Display for CidrNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ip(), self.prefix_len)
    }
}

fn mask(prefix_len: u32, bits: u32) -> u128 {
    if prefix_len == 0 {
        return 0;
    }
    let low = if bits == 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };
    (u128::MAX << (bits - prefix_len)) & low
}

/// Extracts one prefix of exactly `prefix_len` from `prefixes`, splitting the
/// tightest-fitting larger prefix when no exact match exists.
///
/// Returns the extracted prefix and the remaining pool. Splitting keeps the
/// produced right halves ordered most-specific-first in place of the prefix
/// that was split.
pub fn extract_prefix(
    prefixes: &[String],
    prefix_len: u32,
) -> Result<(String, Vec<String>), PrefixPoolError> {
    let mut best_len = 0;
    let mut best_idx: Option<usize> = None;

    for (idx, prefix) in prefixes.iter().enumerate() {
        let net = match CidrNet::parse(prefix) {
            Ok(net) => net,
            Err(_) => continue,
        };
        if net.prefix_len == prefix_len {
            let mut remaining = prefixes.to_vec();
            let found = remaining.remove(idx);
            return Ok((found, remaining));
        }
        if net.prefix_len < prefix_len && (net.prefix_len > best_len || best_len == 0) {
            best_len = net.prefix_len;
            best_idx = Some(idx);
        }
    }

    let idx = best_idx.ok_or(PrefixPoolError::NoSpace { prefix_len })?;
    let mut root = CidrNet::parse(&prefixes[idx])?;
    let mut right_parts = Vec::new();
    while root.prefix_len != prefix_len {
        let lower = root.subnet(0)?;
        let upper = root.subnet(1)?;
        right_parts.push(upper.to_string());
        root = lower;
    }

    let mut remaining = prefixes[..idx].to_vec();
    remaining.extend(right_parts.into_iter().rev());
    remaining.extend_from_slice(&prefixes[idx + 1..]);
    Ok((root.to_string(), remaining))
}

/// Extracts prefixes to satisfy `requests` from `prefixes`.
///
/// Required numbers must all be satisfied; requested numbers beyond required
/// are filled best effort. Returns the extracted prefixes and the remaining
/// pool; on failure the pool is untouched.
pub fn extract_prefixes(
    prefixes: &[String],
    requests: &[ExtraPrefixRequest],
) -> Result<(Vec<String>, Vec<String>), PrefixPoolError> {
    for request in requests {
        request
            .validate()
            .map_err(|e| PrefixPoolError::InvalidRequest {
                reason: e.to_string(),
            })?;
    }

    let mut result = Vec::new();
    let mut remaining = prefixes.to_vec();

    for request in requests {
        for _ in 0..request.required_number {
            let (prefix, left) = extract_prefix(&remaining, request.prefix_len)?;
            result.push(prefix);
            remaining = left;
        }
    }
    for request in requests {
        for _ in request.required_number..request.requested_number {
            // Best effort beyond the required count.
            match extract_prefix(&remaining, request.prefix_len) {
                Ok((prefix, left)) => {
                    result.push(prefix);
                    remaining = left;
                }
                Err(_) => break,
            }
        }
    }

    if result.is_empty() {
        return Err(PrefixPoolError::NoSpace { prefix_len: 0 });
    }
    Ok((result, remaining))
}

/// Returns `prefixes` with `released` folded back in, merging sibling
/// prefixes into their parents until no further merge is possible.
pub fn release_prefixes(
    prefixes: &[String],
    released: &[String],
) -> Result<Vec<String>, PrefixPoolError> {
    if released.is_empty() {
        return Ok(prefixes.to_vec());
    }

    let mut by_len: BTreeMap<u32, Vec<CidrNet>> = BTreeMap::new();
    let mut seen: Vec<CidrNet> = Vec::new();
    for prefix in prefixes.iter().chain(released.iter()) {
        let net = CidrNet::parse(prefix)?;
        if !seen.contains(&net) {
            seen.push(net);
            by_len.entry(net.prefix_len).or_default().push(net);
        }
    }

    loop {
        let mut next: BTreeMap<u32, Vec<CidrNet>> = BTreeMap::new();
        let mut changes = 0;

        for (len, nets) in by_len {
            let mut level = next.remove(&len).unwrap_or_default();
            level.extend(nets);
            if level.len() < 2 || len == 0 {
                next.entry(len).or_default().extend(level);
                continue;
            }

            // Two prefixes that differ only in the bit below their common
            // parent are siblings; join them one level up.
            let mut base: BTreeMap<(u32, u128), CidrNet> = BTreeMap::new();
            let mut parents = Vec::new();
            for net in level {
                let sibling_bit = 1u128 << (net.bits - len);
                let base_addr = net.addr & !sibling_bit;
                let key = (net.bits, base_addr);
                if base.remove(&key).is_some() {
                    parents.push(CidrNet {
                        bits: net.bits,
                        prefix_len: len - 1,
                        addr: base_addr,
                    });
                    changes += 1;
                } else {
                    base.insert(key, net);
                }
            }
            next.entry(len).or_default().extend(base.into_values());
            next.entry(len - 1).or_default().extend(parents);
        }

        if changes == 0 {
            let mut result: Vec<CidrNet> = next.into_values().flatten().collect();
            result.sort();
            return Ok(result.iter().map(CidrNet::to_string).collect());
        }
        by_len = next;
    }
}

/// Removes the intersection of `excluded` from `prefixes`, splitting pool
/// prefixes as needed so only the excluded ranges come out.
///
/// Returns the removed pieces and the remaining pool. The removed pieces can
/// be folded back in with [`release_prefixes`] once allocation is done.
pub fn exclude_prefixes(
    prefixes: &[String],
    excluded: &[String],
) -> Result<(Vec<String>, Vec<String>), PrefixPoolError> {
    let mut remaining: Vec<String> = prefixes.to_vec();
    let mut removed = Vec::new();

    for exc in excluded {
        let exc_net = CidrNet::parse(exc)?;
        let mut next = Vec::new();
        for prefix in &remaining {
            let net = CidrNet::parse(prefix)?;
            if net.bits == exc_net.bits
                && exc_net.prefix_len <= net.prefix_len
                && exc_net.contains(net.addr)
            {
                // The exclusion shadows this prefix entirely.
                removed.push(prefix.clone());
            } else if net.bits == exc_net.bits
                && net.prefix_len < exc_net.prefix_len
                && net.contains(exc_net.addr)
            {
                // Split down to the excluded range, keeping the halves that
                // do not contain it.
                let mut current = net;
                while current.prefix_len < exc_net.prefix_len {
                    let lower = current.subnet(0)?;
                    let upper = current.subnet(1)?;
                    if lower.contains(exc_net.addr) {
                        next.push(upper.to_string());
                        current = lower;
                    } else {
                        next.push(lower.to_string());
                        current = upper;
                    }
                }
                removed.push(current.to_string());
            } else {
                next.push(prefix.clone());
            }
        }
        remaining = next;
    }
    Ok((removed, remaining))
}

/// Total number of addresses covered by `prefixes`.
pub fn address_count(prefixes: &[String]) -> u128 {
    prefixes
        .iter()
        .filter_map(|p| CidrNet::parse(p).ok())
        .map(|net| 1u128 << (net.bits - net.prefix_len))
        .sum()
}

#[derive(Debug, Clone)]
struct ConnectionRecord {
    ip_net: String,
    prefixes: Vec<String>,
}

#[derive(Debug, Default)]
struct PoolState {
    prefixes: Vec<String>,
    connections: HashMap<String, ConnectionRecord>,
}

/// Thread-safe prefix pool tracking per-connection allocations.
#[derive(Debug)]
pub struct PrefixPool {
    state: Mutex<PoolState>,
}

impl PrefixPool {
    /// Creates a pool over the given CIDR prefixes.
    pub fn new<I, S>(prefixes: I) -> Result<Self, PrefixPoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        for prefix in &prefixes {
            CidrNet::parse(prefix)?;
        }
        Ok(Self {
            state: Mutex::new(PoolState {
                prefixes,
                connections: HashMap::new(),
            }),
        })
    }

    /// Current free list.
    pub fn prefixes(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prefixes
            .clone()
    }

    /// Allocates point-to-point addresses (and any extra prefixes) for a
    /// connection.
    ///
    /// The point-to-point subnet is a /30 for IPv4 (/126 for IPv6): network
    /// address, src, dst, broadcast. Extra prefixes are carved from what
    /// remains after the point-to-point extraction.
    pub fn extract(
        &self,
        connection_id: &str,
        family: IpFamily,
        requests: &[ExtraPrefixRequest],
    ) -> Result<PrefixAllocation, PrefixPoolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let prefix_len = match family {
            IpFamily::Ipv4 => 30,
            IpFamily::Ipv6 => 126,
        };
        let p2p_request = ExtraPrefixRequest {
            addr_family: family,
            prefix_len,
            required_number: 1,
            requested_number: 1,
        };
        let (result, mut remaining) = extract_prefixes(&state.prefixes, &[p2p_request])?;
        let net = CidrNet::parse(&result[0])?;

        let src = increment_within(net.addr, &net)?;
        let dst = increment_within(src, &net)?;

        let mut requested = Vec::new();
        if !requests.is_empty() {
            let (extra, left) = extract_prefixes(&remaining, requests)?;
            requested = extra;
            remaining = left;
        }

        state.prefixes = remaining;
        state.connections.insert(
            connection_id.to_string(),
            ConnectionRecord {
                ip_net: net.to_string(),
                prefixes: requested.clone(),
            },
        );

        Ok(PrefixAllocation {
            src_ip_addr: format_addr(src, &net),
            dst_ip_addr: format_addr(dst, &net),
            extra_prefixes: requested,
        })
    }

    /// Withholds the given ranges from the free list so subsequent
    /// extractions cannot land inside them. Returns the withheld pieces for
    /// [`PrefixPool::release_excluded_prefixes`].
    pub fn exclude_prefixes(&self, excluded: &[String]) -> Result<Vec<String>, PrefixPoolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (removed, remaining) = exclude_prefixes(&state.prefixes, excluded)?;
        state.prefixes = remaining;
        Ok(removed)
    }

    /// Returns previously withheld ranges to the free list.
    pub fn release_excluded_prefixes(&self, removed: &[String]) -> Result<(), PrefixPoolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prefixes = release_prefixes(&state.prefixes, removed)?;
        Ok(())
    }

    /// Returns a connection's allocations to the free list.
    pub fn release(&self, connection_id: &str) -> Result<(), PrefixPoolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let record = state.connections.remove(connection_id).ok_or_else(|| {
            PrefixPoolError::UnknownConnection {
                connection_id: connection_id.to_string(),
            }
        })?;

        let remaining = release_prefixes(&state.prefixes, &record.prefixes)?;
        let remaining = release_prefixes(&remaining, std::slice::from_ref(&record.ip_net))?;
        state.prefixes = remaining;
        Ok(())
    }

    /// Returns the point-to-point subnet and extra prefixes held by a
    /// connection.
    pub fn connection_information(
        &self,
        connection_id: &str,
    ) -> Result<(String, Vec<String>), PrefixPoolError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let record = state.connections.get(connection_id).ok_or_else(|| {
            PrefixPoolError::UnknownConnection {
                connection_id: connection_id.to_string(),
            }
        })?;
        Ok((record.ip_net.clone(), record.prefixes.clone()))
    }
}

fn increment_within(addr: u128, net: &CidrNet) -> Result<u128, PrefixPoolError> {
    let next = addr.checked_add(1).ok_or(PrefixPoolError::Overflow)?;
    if !net.contains(next) {
        return Err(PrefixPoolError::Overflow);
    }
    Ok(next)
}

fn format_addr(addr: u128, net: &CidrNet) -> String {
    let ip = CidrNet {
        addr,
        prefix_len: net.prefix_len,
        bits: net.bits,
    };
    // Display keeps the host bits, so format via IpAddr directly.
    match net.bits {
        32 => format!("{}/{}", Ipv4Addr::from(addr as u32), net.prefix_len),
        _ => format!("{}/{}", Ipv6Addr::from(ip.addr), net.prefix_len),
    }
}
