//! External asset resolution with SSRF protections.
//!
//! The renderer dereferences URLs it finds in untrusted HTML (image `src`,
//! `@font-face src`). Every fetch goes through [`AssetResolver`], which
//! enforces a scheme whitelist, a configurable domain allow-list, and a
//! private-network block before any connection is opened.
//!
//! A failed fetch is not an error: the resolver degrades to an empty byte
//! stream and the render continues with a visible gap, exactly as a browser
//! treats a broken resource link.

pub mod optimizer;

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::{ArkivError, Result};

/// Resolves external resource URLs to bytes under strict network policy.
///
/// Stateless with respect to requests; a single instance is shared across
/// all conversions and may be used concurrently.
pub struct AssetResolver {
    allowed_domains: Vec<String>,
    max_bytes: u64,
    client: reqwest::blocking::Client,
}

impl AssetResolver {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.asset_timeout_ms);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ArkivError::ResourceLoad(format!("asset HTTP client: {e}")))?;
        Ok(Self {
            allowed_domains: config
                .asset_allowed_domains
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            max_bytes: config.asset_max_bytes,
            client,
        })
    }

    /// Fetch the resource at `raw_url`.
    ///
    /// Returns an empty vec on every failure path — validation, network,
    /// timeout, oversize. Never errors: a missing image or font must not
    /// fail the whole conversion.
    pub fn resolve(&self, raw_url: &str) -> Vec<u8> {
        match self.fetch(raw_url) {
            Ok(bytes) => {
                debug!(url = raw_url, size = bytes.len(), "asset fetched");
                bytes
            }
            Err(reason) => {
                warn!(url = raw_url, reason, "asset fetch degraded to empty");
                Vec::new()
            }
        }
    }

    fn fetch(&self, raw_url: &str) -> std::result::Result<Vec<u8>, String> {
        let url = Url::parse(raw_url).map_err(|e| format!("unparsable URL: {e}"))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("scheme '{other}' is not allowed")),
        }

        let host = url
            .host_str()
            .ok_or_else(|| "URL has no host".to_string())?
            .to_ascii_lowercase();

        if !self.allowed_domains.iter().any(|d| *d == host) {
            return Err(format!("host '{host}' is not on the allow-list"));
        }

        // Resolve every address for the host up front; one private target is
        // enough to reject the whole fetch (DNS-rebinding / direct-IP SSRF).
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs: Vec<_> = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| format!("host resolution failed: {e}"))?
            .collect();
        if addrs.is_empty() {
            return Err("host resolved to no addresses".to_string());
        }
        for addr in &addrs {
            if is_blocked_address(&addr.ip()) {
                return Err(format!("host resolves to blocked address {}", addr.ip()));
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("unexpected status {}", response.status()));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(format!(
                    "declared size {declared} exceeds limit {}",
                    self.max_bytes
                ));
            }
        }

        // The Content-Length header may be missing or lying; cap the actual
        // body read regardless.
        let mut body = Vec::new();
        response
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| format!("body read failed: {e}"))?;
        if body.len() as u64 > self.max_bytes {
            return Err(format!("body exceeds limit {}", self.max_bytes));
        }

        Ok(body)
    }
}

/// Addresses the resolver refuses to contact: loopback, private ranges,
/// link-local, and the wildcard address, for both IP families.
fn is_blocked_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_v4(&mapped);
            }
            is_blocked_v6(v6)
        }
    }
}

fn is_blocked_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_blocked_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique-local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_allowing(domains: &[&str]) -> AssetResolver {
        let config = ServiceConfig {
            asset_allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..ServiceConfig::default()
        };
        AssetResolver::new(&config).unwrap()
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        let resolver = resolver_allowing(&["example.com"]);
        assert!(resolver.resolve("file:///etc/passwd").is_empty());
        assert!(resolver.resolve("javascript:alert(1)").is_empty());
        assert!(resolver.resolve("ftp://example.com/logo.png").is_empty());
        assert!(resolver.resolve("not a url").is_empty());
    }

    #[test]
    fn test_rejects_host_outside_allow_list() {
        let resolver = resolver_allowing(&["cdn.example.com"]);
        assert!(resolver.resolve("https://evil.example.net/logo.png").is_empty());
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let resolver = resolver_allowing(&[]);
        assert!(resolver.resolve("https://example.com/logo.png").is_empty());
    }

    #[test]
    fn test_allow_list_is_case_insensitive_but_still_blocks_loopback() {
        // localhost passes the allow-list, then fails address screening.
        let resolver = resolver_allowing(&["LOCALHOST"]);
        assert!(resolver.resolve("http://localhost/logo.png").is_empty());
        assert!(resolver.resolve("http://LocalHost:8080/logo.png").is_empty());
    }

    #[test]
    fn test_direct_ip_targets_are_blocked() {
        let resolver = resolver_allowing(&["127.0.0.1", "10.0.0.8", "169.254.1.1", "0.0.0.0"]);
        assert!(resolver.resolve("http://127.0.0.1/secret").is_empty());
        assert!(resolver.resolve("http://10.0.0.8/metadata").is_empty());
        assert!(resolver.resolve("http://169.254.1.1/latest").is_empty());
        assert!(resolver.resolve("http://0.0.0.0/").is_empty());
    }

    #[test]
    fn test_blocked_address_classification() {
        let blocked = [
            "127.0.0.1",
            "127.8.8.8",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "::1",
            "::",
            "fc00::1",
            "fd12::1",
            "fe80::1",
            "::ffff:127.0.0.1",
            "::ffff:192.168.0.1",
        ];
        for raw in blocked {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(is_blocked_address(&ip), "{raw} should be blocked");
        }

        let permitted = ["93.184.216.34", "2606:2800:220:1::1", "8.8.8.8"];
        for raw in permitted {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(!is_blocked_address(&ip), "{raw} should be permitted");
        }
    }
}
