//! URL validation and server-side request forgery (SSRF) guards.
//!
//! A feed URL passes three gates before any bytes are requested:
//!
//! 1. [`validate_url`]: grammar only (length, characters, scheme, host).
//! 2. [`check_target`]: hostname blocklist, literal private IPs and blocked ports.
//! 3. [`resolve_public`]: every address the host resolves to must be public.
//!
//! The HTTP client applies the same gates to each redirect hop through
//! [`redirect_policy`] and resolves hosts through [`GuardedResolver`], so a
//! redirect or a DNS answer cannot steer a request into a private network.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect;
use tracing::warn;
use url::{Host, Url};

use crate::error::{PkgNewsError, Result};
use crate::logging::SECURITY_TARGET;

/// Maximum accepted URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Ports used by well-known non-HTTP services.
pub const BLOCKED_PORTS: &[u16] = &[
    22, 23, 25, 53, 135, 139, 445, 1433, 1521, 3306, 3389, 5432, 6379,
];

/// Check URL grammar and return the parsed URL.
pub fn validate_url(url: &str) -> Result<Url> {
    if url.is_empty() {
        return Err(PkgNewsError::Validation("URL is empty".to_string()));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(PkgNewsError::Validation(format!(
            "URL too long: {} characters (max {})",
            url.len(),
            MAX_URL_LENGTH
        )));
    }
    if let Some(bad) = url
        .chars()
        .find(|c| matches!(c, '<' | '>' | '"' | '\'' | '\\') || c.is_control())
    {
        return Err(PkgNewsError::Validation(format!(
            "URL contains forbidden character {:?}",
            bad
        )));
    }

    let parsed = Url::parse(url)
        .map_err(|e| PkgNewsError::Validation(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(PkgNewsError::Validation(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    match parsed.host() {
        None => return Err(PkgNewsError::Validation("URL has no host".to_string())),
        Some(Host::Domain(domain)) if !is_well_formed_domain(domain) => {
            return Err(PkgNewsError::Validation(format!(
                "malformed host: {}",
                domain
            )));
        }
        Some(_) => {}
    }

    Ok(parsed)
}

/// Labels of letters, digits and inner hyphens, each at most 63 bytes.
fn is_well_formed_domain(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Reject hosts and ports that must never be fetched.
pub fn check_target(url: &Url) -> Result<()> {
    match url.host() {
        Some(Host::Domain(domain)) => {
            if is_forbidden_hostname(domain) {
                return Err(PkgNewsError::Network(format!(
                    "private network access not allowed: {}",
                    domain
                )));
            }
        }
        Some(Host::Ipv4(ipv4)) => reject_private(IpAddr::V4(ipv4))?,
        Some(Host::Ipv6(ipv6)) => reject_private(IpAddr::V6(ipv6))?,
        None => return Err(PkgNewsError::Validation("URL has no host".to_string())),
    }

    if let Some(port) = url.port() {
        if BLOCKED_PORTS.contains(&port) {
            return Err(PkgNewsError::Network(format!("port {} not allowed", port)));
        }
    }

    Ok(())
}

fn reject_private(ip: IpAddr) -> Result<()> {
    if is_private_ip(&ip) {
        return Err(PkgNewsError::Network(format!(
            "private IP address not allowed: {}",
            ip
        )));
    }
    Ok(())
}

/// Resolve `host` and require every address to be public.
pub async fn resolve_public(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| PkgNewsError::Network(format!("DNS resolution failed for {}: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(PkgNewsError::Network(format!(
            "DNS resolution returned no addresses for {}",
            host
        )));
    }

    if let Some(private) = addrs.iter().find(|addr| is_private_ip(&addr.ip())) {
        warn!(
            target: SECURITY_TARGET,
            event = "ssrf_blocked",
            host = host,
            address = %private.ip(),
            "Host resolves to a private address"
        );
        return Err(PkgNewsError::Network(format!(
            "private network access not allowed: {} resolves to {}",
            host,
            private.ip()
        )));
    }

    Ok(addrs)
}

/// Check if a hostname is forbidden.
pub(crate) fn is_forbidden_hostname(host: &str) -> bool {
    let host_lower = host.trim_end_matches('.').to_lowercase();

    if host_lower == "localhost" {
        return true;
    }

    let forbidden_suffixes = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    forbidden_suffixes
        .iter()
        .any(|suffix| host_lower.ends_with(suffix))
}

/// Check if an IP address is private, loopback, link-local or otherwise
/// not a public unicast address.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => {
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_private_ipv4(&mapped);
            }
            is_private_ipv6(ipv6)
        }
    }
}

fn is_private_ipv4(ipv4: &Ipv4Addr) -> bool {
    let octets = ipv4.octets();

    ipv4.is_loopback()
        || ipv4.is_private()
        || ipv4.is_link_local()
        || ipv4.is_broadcast()
        || ipv4.is_unspecified()
        || ipv4.is_multicast()
        // "This network": 0.0.0.0/8
        || octets[0] == 0
        // Shared address space: 100.64.0.0/10
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        // Documentation: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

fn is_private_ipv6(ipv6: &Ipv6Addr) -> bool {
    let segments = ipv6.segments();

    ipv6.is_loopback()
        || ipv6.is_unspecified()
        || ipv6.is_multicast()
        // Unique local: fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local: fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
}

/// Redirect policy that caps hops and re-checks each target.
pub fn redirect_policy(max_redirects: usize) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(PkgNewsError::Network(format!(
                "too many redirects (max {})",
                max_redirects
            )));
        }

        let checked = validate_url(attempt.url().as_str()).and_then(|url| check_target(&url));
        match checked {
            Ok(()) => attempt.follow(),
            Err(e) => {
                warn!(
                    target: SECURITY_TARGET,
                    event = "redirect_blocked",
                    url = %attempt.url(),
                    reason = %e,
                    "Redirect target rejected"
                );
                attempt.error(e)
            }
        }
    })
}

/// DNS resolver for the HTTP client that refuses private addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardedResolver;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            match resolve_public(&host, 0).await {
                Ok(addrs) => Ok(Box::new(addrs.into_iter()) as Addrs),
                Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            }
        })
    }
}
