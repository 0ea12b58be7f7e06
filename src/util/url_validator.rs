use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Which hosts a fetched URL may point at.
///
/// Source and target endpoints are operator-configured, but image URLs are
/// lifted out of remote post bodies, so they are checked against
/// [`HostPolicy::PublicOnly`] unless the operator opts out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPolicy {
    /// Reject localhost and private/link-local addresses.
    PublicOnly,
    /// Accept any host with an http(s) scheme.
    AllowPrivate,
}

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a URL string before the crate issues a request to it.
///
/// Always requires an `http` or `https` scheme. Under
/// [`HostPolicy::PublicOnly`] it additionally rejects:
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// # Examples
///
/// ```
/// use autosync::util::{validate_url, HostPolicy};
///
/// let url = validate_url("https://example.com/a.jpg", HostPolicy::PublicOnly).unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://192.168.1.1/a.jpg", HostPolicy::PublicOnly).is_err());
/// assert!(validate_url("http://192.168.1.1/a.jpg", HostPolicy::AllowPrivate).is_ok());
/// assert!(validate_url("file:///etc/passwd", HostPolicy::AllowPrivate).is_err());
/// ```
pub fn validate_url(url_str: &str, policy: HostPolicy) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if policy == HostPolicy::AllowPrivate {
        return Ok(url);
    }

    if let Some(host) = url.host_str() {
        if host.eq_ignore_ascii_case("localhost") {
            return Err(UrlValidationError::Localhost);
        }

        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // fc00::/7
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // fe80::/10
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_image_urls_accepted() {
        assert!(validate_url("https://cdn.example.com/a.jpg", HostPolicy::PublicOnly).is_ok());
        assert!(validate_url("http://news.example.org/x.png", HostPolicy::PublicOnly).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_tolerated() {
        let url = validate_url("  https://example.com/a.jpg \n", HostPolicy::PublicOnly).unwrap();
        assert_eq!(url.path(), "/a.jpg");
    }

    #[test]
    fn test_non_http_schemes_rejected_under_both_policies() {
        for policy in [HostPolicy::PublicOnly, HostPolicy::AllowPrivate] {
            assert!(matches!(
                validate_url("file:///etc/passwd", policy),
                Err(UrlValidationError::UnsupportedScheme(_))
            ));
            assert!(validate_url("data:image/png;base64,AAAA", policy).is_err());
        }
    }

    #[test]
    fn test_localhost_rejected_when_public_only() {
        assert!(matches!(
            validate_url("http://localhost/a.jpg", HostPolicy::PublicOnly),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_url("http://127.0.0.1/a.jpg", HostPolicy::PublicOnly).is_err());
        assert!(validate_url("http://[::1]/a.jpg", HostPolicy::PublicOnly).is_err());
    }

    #[test]
    fn test_private_ranges_rejected_when_public_only() {
        for url in [
            "http://192.168.1.1/a.jpg",
            "http://10.0.0.1:8080/a.jpg",
            "http://172.16.0.1/a.jpg",
            "http://169.254.1.1/a.jpg",
            "http://0.0.0.0/a.jpg",
            "http://[fe80::1]/a.jpg",
            "http://[fd00::1]/a.jpg",
        ] {
            assert!(
                validate_url(url, HostPolicy::PublicOnly).is_err(),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_allow_private_accepts_loopback() {
        assert!(validate_url("http://127.0.0.1:9999/a.jpg", HostPolicy::AllowPrivate).is_ok());
        assert!(validate_url("http://localhost/a.jpg", HostPolicy::AllowPrivate).is_ok());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            validate_url("not a url", HostPolicy::AllowPrivate),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }
}
