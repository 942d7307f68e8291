// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`guard_url`]: rejects webhook URLs whose resolved host is loopback, link-local, private,
//! multicast, or the unspecified address (§4.12). Resolution happens twice: once here at
//! validation time, and again immediately before the socket connects in the sender, so a
//! DNS answer that changes between the two (rebinding) is still caught — the sender must bind
//! to the exact IP it resolved at send time, never re-resolving mid-TLS-handshake.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use thiserror::Error;

/// Why a URL or resolved address failed the SSRF guard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SsrfGuardError {
    /// URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Scheme other than http/https.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// Host did not resolve to any address.
    #[error("host did not resolve: {0}")]
    ResolutionFailed(String),
    /// Resolved (or literal) address falls in a disallowed range.
    #[error("address {0} is not allowed")]
    DisallowedAddress(IpAddr),
}

/// True if `addr` is loopback, link-local, private, multicast, or unspecified.
#[must_use]
pub fn is_disallowed(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local (fc00::/7)
        }
    }
}

/// Validate a webhook destination URL: scheme must be http/https, and every address the host
/// resolves to must pass [`is_disallowed`] (none of them may be disallowed).
pub fn guard_url(url: &str) -> Result<(), SsrfGuardError> {
    guard_and_resolve(url).map(|_| ())
}

/// Resolved, SSRF-validated destination: the hostname and port exactly as parsed from the URL,
/// plus the first resolved address that passed [`is_disallowed`]. Callers that connect to a
/// remote host must bind the socket to this exact `SocketAddr` rather than re-resolving the
/// hostname themselves, or a DNS answer that changes between validation and connection
/// (rebinding) would bypass the guard entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// Hostname as parsed from the URL, for SNI/Host header purposes.
    pub host: String,
    /// Resolved, validated address to connect to.
    pub addr: SocketAddr,
}

/// Parse, validate the scheme, resolve the host, and confirm every resolved address is
/// allowed. Returns the first validated address for the caller to pin its connection to.
/// Called once before a request is built, and again immediately at send time, so resolution
/// happens twice and a rebinding attempt between the two calls is still caught.
pub fn guard_and_resolve(url: &str) -> Result<ResolvedDestination, SsrfGuardError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| SsrfGuardError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SsrfGuardError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    let host = parsed.host_str().ok_or_else(|| SsrfGuardError::InvalidUrl(url.to_string()))?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| SsrfGuardError::ResolutionFailed(e.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(SsrfGuardError::ResolutionFailed(host.to_string()));
    }
    for addr in &addrs {
        if is_disallowed(addr.ip()) {
            return Err(SsrfGuardError::DisallowedAddress(addr.ip()));
        }
    }
    Ok(ResolvedDestination {
        host: host.to_string(),
        addr: addrs[0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn rejects_loopback() {
        assert!(is_disallowed(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(is_disallowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert!(is_disallowed(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 5))));
        assert!(is_disallowed(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn rejects_link_local() {
        assert!(is_disallowed(IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))));
    }

    #[test]
    fn allows_public_address() {
        assert!(!is_disallowed(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[test]
    fn guard_and_resolve_rejects_private_address() {
        assert_eq!(
            guard_and_resolve("http://127.0.0.1:9/hook").unwrap_err(),
            SsrfGuardError::DisallowedAddress(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
        );
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert_eq!(
            guard_url("ftp://example.com/hook"),
            Err(SsrfGuardError::UnsupportedScheme("ftp".to_string()))
        );
    }
}
