//! Client key derivation for per-client middleware.
//!
//! Rate limiting and auth-failure throttling both key their state by client.
//! The key is the first address in `X-Forwarded-For`, else `X-Real-IP`, else
//! the IP of the connected peer.
//!
//! # IP Spoofing
//!
//! Forwarding headers are client-controlled. When trusted proxy ranges are
//! configured, the headers are honored only if the peer itself sits inside
//! one of those ranges; otherwise the peer IP is used. With no ranges
//! configured every peer is trusted, which is only safe behind a proxy that
//! overwrites these headers.

use std::borrow::Cow;
use std::net::IpAddr;

use tracing::{debug, warn};

use crate::context::Context;

/// Key shared by requests whose client cannot be identified.
pub const UNKNOWN_IP: &str = "unknown";

/// Which source a client key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers(ctx: &Context) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2"
    if let Some(value) = ctx.header("x-forwarded-for")
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(value) = ctx.header("x-real-ip").map(str::trim)
        && !value.is_empty()
    {
        return ExtractedIp::FromRealIp(value);
    }

    ExtractedIp::NotFound
}

/// Derive the client key for `ctx`.
///
/// Returns `Cow::Borrowed` only for the [`UNKNOWN_IP`] fallback.
pub fn client_key(ctx: &Context, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer_ip = ctx.peer_addr().map(|addr| addr.ip());
    let headers_trusted = match peer_ip {
        Some(ip) => trusted_proxies.is_trusted_ip(&ip),
        None => !trusted_proxies.is_enabled(),
    };

    if headers_trusted {
        match extract_ip_from_headers(ctx) {
            ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => {
                return Cow::Owned(ip.to_string());
            }
            ExtractedIp::NotFound => {}
        }
    } else if extract_ip_from_headers(ctx) != ExtractedIp::NotFound {
        debug!(
            peer = ?peer_ip,
            "Ignoring forwarding headers from untrusted peer"
        );
    }

    match peer_ip {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"`, or a bare address (full-length prefix).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (ip, prefix) = match cidr.split_once('/') {
            Some((ip, prefix)) => (ip.parse::<IpAddr>().ok()?, Some(prefix)),
            None => (cidr.parse::<IpAddr>().ok()?, None),
        };

        let max_prefix = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Proxy networks whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Parse CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// `true` when `ip` is inside a configured range, or when none are configured.
    pub fn is_trusted_ip(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }

    /// String form of [`is_trusted_ip`](Self::is_trusted_ip). Unparseable input
    /// is untrusted unless no ranges are configured.
    pub fn is_trusted(&self, ip_str: &str) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        ip_str
            .parse::<IpAddr>()
            .is_ok_and(|ip| self.is_trusted_ip(&ip))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Bytes;
    use axum::http::Request;

    use super::*;

    fn ctx_with(headers: &[(&str, &str)], peer: Option<&str>) -> Context {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let peer = peer.map(|p| p.parse::<SocketAddr>().unwrap());
        Context::new(builder.body(Bytes::new()).unwrap(), peer)
    }

    #[test]
    fn test_xff_first_entry() {
        let ctx = ctx_with(&[("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")], None);
        assert_eq!(client_key(&ctx, &TrustedProxyConfig::default()), "192.168.1.1");
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        let ctx = ctx_with(
            &[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "192.168.1.1")],
            None,
        );
        assert_eq!(client_key(&ctx, &TrustedProxyConfig::default()), "10.0.0.1");
    }

    #[test]
    fn test_real_ip_used_without_xff() {
        let ctx = ctx_with(&[("x-real-ip", "::1")], None);
        assert_eq!(client_key(&ctx, &TrustedProxyConfig::default()), "::1");
    }

    #[test]
    fn test_empty_xff_falls_back_to_peer() {
        let ctx = ctx_with(&[("x-forwarded-for", "   ")], Some("127.0.0.1:8080"));
        assert_eq!(client_key(&ctx, &TrustedProxyConfig::default()), "127.0.0.1");
    }

    #[test]
    fn test_peer_ip_without_port() {
        let ctx = ctx_with(&[], Some("203.0.113.9:51234"));
        assert_eq!(client_key(&ctx, &TrustedProxyConfig::default()), "203.0.113.9");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let ctx = ctx_with(&[], None);
        let key = client_key(&ctx, &TrustedProxyConfig::default());
        assert_eq!(key, UNKNOWN_IP);
        assert!(matches!(key, Cow::Borrowed(_)));
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let proxies = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let ctx = ctx_with(&[("x-forwarded-for", "1.2.3.4")], Some("8.8.8.8:443"));
        assert_eq!(client_key(&ctx, &proxies), "8.8.8.8");
    }

    #[test]
    fn test_trusted_peer_headers_honored() {
        let proxies = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let ctx = ctx_with(&[("x-forwarded-for", "1.2.3.4")], Some("10.1.2.3:443"));
        assert_eq!(client_key(&ctx, &proxies), "1.2.3.4");
    }

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = CidrRange::parse("192.168.1.0/24").unwrap();
        assert!(cidr.contains(&"192.168.1.254".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_strings() {
        let config = TrustedProxyConfig::new(&["10.0.0.0/8".to_string(), "bogus".to_string()]);
        assert!(config.is_enabled());
        assert!(config.is_trusted("10.9.9.9"));
        assert!(!config.is_trusted("8.8.8.8"));
        assert!(!config.is_trusted("invalid"));
        assert!(TrustedProxyConfig::default().is_trusted("invalid"));
    }
}
