//! Client identity resolution for per-client rate limiting.
//!
//! # Resolution Order
//!
//! 1. First entry of `X-Forwarded-For` (trimmed)
//! 2. `X-Real-IP` (trimmed)
//! 3. Remote socket address, port stripped
//! 4. [`UNKNOWN_IP`]
//!
//! Empty or whitespace-only header values are skipped.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarded headers carry no proof of origin. A client that reaches this
//! service directly can put any address in `X-Forwarded-For` and rotate it to
//! escape its bucket, or name someone else's address to exhaust theirs.
//! Identities derived here are good enough for abuse mitigation, never for
//! authentication.
//!
//! Configure `TRUSTED_PROXIES` with the CIDR ranges of your reverse proxies to
//! close the gap: forwarded headers are then ignored unless the socket peer
//! lies inside one of the ranges.
//!
//! ```text
//!   request ──► peer in TRUSTED_PROXIES? ──no──► socket address
//!                     │ (or none configured)
//!                    yes
//!                     ▼
//!   X-Forwarded-For ─► X-Real-IP ─► socket address ─► "unknown"
//! ```
//!
//! # The "unknown" Fallback
//!
//! Requests with no usable header and no socket address share the `"unknown"`
//! key and therefore a single bucket. In a normal deployment the socket
//! address is always present (see [`ConnectInfo`]), so high "unknown" traffic
//! means the router was served without connect info.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Fallback identity when nothing identifies the client.
pub const UNKNOWN_IP: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

// =============================================================================
// Resolution
// =============================================================================

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    ForwardedFor,
    RealIp,
    RemoteAddr,
    Unknown,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::ForwardedFor => "x-forwarded-for",
            IdentitySource::RealIp => "x-real-ip",
            IdentitySource::RemoteAddr => "remote-addr",
            IdentitySource::Unknown => "unknown",
        }
    }
}

/// Core resolution shared by the public entry points.
///
/// Borrows from the inputs where possible; only port stripping allocates.
fn resolve<'a>(
    forwarded_for: Option<&'a str>,
    real_ip: Option<&'a str>,
    remote_addr: Option<&'a str>,
) -> (Cow<'a, str>, IdentitySource) {
    if let Some(ip) = forwarded_for.and_then(first_forwarded) {
        return (Cow::Borrowed(ip), IdentitySource::ForwardedFor);
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        return (Cow::Borrowed(ip), IdentitySource::RealIp);
    }

    if let Some(remote) = remote_addr.map(str::trim).filter(|addr| !addr.is_empty()) {
        return (strip_port(remote), IdentitySource::RemoteAddr);
    }

    (Cow::Borrowed(UNKNOWN_IP), IdentitySource::Unknown)
}

/// `"client, proxy1, proxy2"` → `"client"`.
fn first_forwarded(value: &str) -> Option<&str> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// Drop the port from a `host:port` socket address.
///
/// Addresses that are not `host:port` are returned unchanged.
fn strip_port(remote: &str) -> Cow<'_, str> {
    if let Ok(addr) = remote.parse::<SocketAddr>() {
        return Cow::Owned(addr.ip().to_string());
    }

    // Hostnames ("localhost:8080"); bare IPv6 addresses contain more colons
    match remote.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && !host.contains(':')
                && !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Cow::Borrowed(host)
        }
        _ => Cow::Borrowed(remote),
    }
}

/// Derive a stable identity string from raw request inputs.
///
/// # Example
///
/// ```rust
/// use edge_layer::middleware::resolve_client_identity;
///
/// assert_eq!(resolve_client_identity(Some("1.1.1.1, 2.2.2.2"), None, None), "1.1.1.1");
/// assert_eq!(resolve_client_identity(None, Some("1.1.1.1"), None), "1.1.1.1");
/// assert_eq!(resolve_client_identity(None, None, Some("1.1.1.1:1234")), "1.1.1.1");
/// assert_eq!(resolve_client_identity(None, None, None), "unknown");
/// ```
pub fn resolve_client_identity(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: Option<&str>,
) -> String {
    resolve(forwarded_for, real_ip, remote_addr).0.into_owned()
}

/// Resolve the identity of the client that sent `req`.
///
/// The socket address is read from the [`ConnectInfo<SocketAddr>`] extension,
/// which axum inserts when the router is served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn extract_client_ip<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let peer_ip = peer.map(|addr| addr.ip().to_string());

    let (forwarded_for, real_ip) = if trusted_proxies.accepts_forwarded_from(peer.map(|a| a.ip())) {
        (header_str(req, X_FORWARDED_FOR), header_str(req, X_REAL_IP))
    } else {
        if req.headers().contains_key(X_FORWARDED_FOR) || req.headers().contains_key(X_REAL_IP) {
            debug!(
                peer = ?peer,
                "Ignoring forwarded headers from peer outside TRUSTED_PROXIES"
            );
        }
        (None, None)
    };

    let (identity, source) = resolve(forwarded_for, real_ip, peer_ip.as_deref());
    if source == IdentitySource::Unknown {
        debug!("No client address available - request shares the \"unknown\" bucket");
    } else {
        trace!(client_ip = %identity, source = source.as_str(), "Resolved client identity");
    }

    identity.into_owned()
}

fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// A CIDR string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid CIDR range: {0:?}")]
pub struct InvalidCidr(pub String);

/// Parsed CIDR network range, e.g. `10.0.0.0/8` or `::1/128`.
///
/// A bare address parses as a single-host range (`/32` or `/128`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `ip` lies inside this range. Address families never match.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for CidrRange {
    type Err = InvalidCidr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || InvalidCidr(s.to_string());

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(prefix) => prefix.parse::<u8>().map_err(|_| invalid())?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return Err(invalid());
        }

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

/// CIDR ranges of reverse proxies allowed to supply forwarded headers.
///
/// With no ranges configured every peer is trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Parse CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse() {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(error = %e, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                    None
                }
            })
            .collect();

        if !ranges.is_empty() {
            debug!(
                count = ranges.len(),
                "Trusted proxy validation enabled"
            );
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether forwarded headers from `peer` should be honored.
    ///
    /// An unknown peer cannot be checked and is given the benefit of the doubt.
    pub fn accepts_forwarded_from(&self, peer: Option<IpAddr>) -> bool {
        match peer {
            Some(ip) if self.is_enabled() => self.ranges.iter().any(|range| range.contains(&ip)),
            _ => true,
        }
    }
}
