//! Proxy URL validation
//!
//! Accepts `scheme://[user:pass@]host:port` for the socks5, http and https
//! schemes. Bracketed IPv6 hosts are accepted. Validation has no side effects.

use fleet_types::{ProxyIdentity, ProxyScheme, ValidationError};

/// Parse and validate a raw proxy URL
pub fn validate(raw: &str) -> Result<ProxyIdentity, ValidationError> {
    let input = raw.trim();
    let (scheme_part, rest) = input
        .split_once("://")
        .ok_or_else(|| ValidationError::malformed_proxy(raw, "missing scheme separator"))?;

    let scheme = ProxyScheme::parse(scheme_part)
        .ok_or_else(|| ValidationError::UnsupportedScheme(scheme_part.to_string()))?;

    // A single trailing slash is tolerated; any other path is not.
    let authority = rest.strip_suffix('/').unwrap_or(rest);
    if authority.contains('/') || authority.contains('?') || authority.contains('#') {
        return Err(ValidationError::malformed_proxy(
            raw,
            "proxy URL must not carry a path or query",
        ));
    }

    let (credentials, host_port) = match authority.rfind('@') {
        Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
        None => (None, authority),
    };

    let (host, port) = split_host_port(raw, host_port)?;
    let mut identity = ProxyIdentity::new(scheme, host, port);

    if let Some(creds) = credentials {
        let (user, pass) = creds.split_once(':').unwrap_or((creds, ""));
        if user.is_empty() {
            return Err(ValidationError::malformed_proxy(raw, "empty username"));
        }
        identity = identity.with_credentials(user, pass);
    }

    Ok(identity)
}

fn split_host_port<'a>(raw: &str, host_port: &'a str) -> Result<(&'a str, u16), ValidationError> {
    let (host, port_str) = if let Some(stripped) = host_port.strip_prefix('[') {
        let close = stripped
            .find(']')
            .ok_or_else(|| ValidationError::malformed_proxy(raw, "unterminated IPv6 host"))?;
        let host = &stripped[..close];
        let port = stripped[close + 1..]
            .strip_prefix(':')
            .ok_or_else(|| ValidationError::malformed_proxy(raw, "missing port"))?;
        (host, port)
    } else {
        host_port
            .rsplit_once(':')
            .ok_or_else(|| ValidationError::malformed_proxy(raw, "missing port"))?
    };

    if host.is_empty() {
        return Err(ValidationError::malformed_proxy(raw, "empty host"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '@') {
        return Err(ValidationError::malformed_proxy(raw, "invalid host"));
    }

    let port: u16 = port_str
        .parse()
        .map_err(|_| ValidationError::malformed_proxy(raw, "port is not a number in 1..=65535"))?;
    if port == 0 {
        return Err(ValidationError::malformed_proxy(
            raw,
            "port is not a number in 1..=65535",
        ));
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_supported_forms() {
        let plain = validate("socks5://10.0.0.1:1080").unwrap();
        assert_eq!(plain.scheme, ProxyScheme::Socks5);
        assert_eq!(plain.host, "10.0.0.1");
        assert_eq!(plain.port, 1080);
        assert!(plain.credentials.is_none());

        let authed = validate("HTTP://bob:p@ss@proxy.example.com:8080/").unwrap();
        assert_eq!(authed.scheme, ProxyScheme::Http);
        assert_eq!(authed.host, "proxy.example.com");
        let creds = authed.credentials.unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password, "p@ss");

        let v6 = validate("https://[2001:db8::1]:443").unwrap();
        assert_eq!(v6.host, "2001:db8::1");
        assert_eq!(v6.port, 443);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(
            validate("ftp://h:21"),
            Err(ValidationError::UnsupportedScheme(_))
        ));
        for bad in [
            "",
            "10.0.0.1:1080",
            "socks5://:1080",
            "socks5://host",
            "socks5://host:0",
            "socks5://host:65536",
            "socks5://host:port",
            "socks5://:pw@host:1080",
            "http://host:8080/path",
            "https://[::1",
        ] {
            assert!(validate(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_url_round_trips_through_validate() {
        let identity = validate("socks5://u:p@h:9050").unwrap();
        assert_eq!(validate(&identity.to_url()).unwrap(), identity);
    }
}
