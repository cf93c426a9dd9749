// Address-space classification for flow endpoints

use std::net::Ipv4Addr;

/// Remove a trailing `/<n>` CIDR suffix, if any.
pub fn strip_prefix(ip: &str) -> &str {
    match ip.rsplit_once('/') {
        Some((addr, len)) if !len.is_empty() && len.bytes().all(|b| b.is_ascii_digit()) => addr,
        _ => ip,
    }
}

fn parse_v4(ip: &str) -> Option<Ipv4Addr> {
    strip_prefix(ip.trim()).parse().ok()
}

/// RFC 1918 space plus loopback. Anything that is not an IPv4 address is
/// reported as not private.
pub fn is_private(ip: &str) -> bool {
    match parse_v4(ip) {
        Some(addr) => addr.is_private() || addr.is_loopback(),
        None => false,
    }
}

/// An IPv4 address outside private space; only these are worth a reverse lookup.
pub fn is_public(ip: &str) -> bool {
    parse_v4(ip).is_some() && !is_private(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges() {
        assert!(is_private("10.0.0.1"));
        assert!(is_private("10.255.255.255"));
        assert!(is_private("172.16.0.1"));
        assert!(is_private("172.31.255.255"));
        assert!(is_private("192.168.1.1"));
        assert!(is_private("127.0.0.1"));
    }

    #[test]
    fn test_public_addresses() {
        assert!(!is_private("8.8.8.8"));
        assert!(!is_private("172.15.0.1"));
        assert!(!is_private("172.32.0.1"));
        assert!(!is_private("192.169.0.1"));
        assert!(is_public("8.8.8.8"));
        assert!(!is_public("192.168.1.1"));
    }

    #[test]
    fn test_non_ipv4_fails_open() {
        assert!(!is_private("not-an-ip"));
        assert!(!is_private(""));
        assert!(!is_private("fd00::1"));
        assert!(!is_private("10.0.0"));
        assert!(!is_public("laptop.local"));
    }

    #[test]
    fn test_prefix_is_ignored_for_classification() {
        assert!(is_private("192.168.0.0/16"));
        assert!(is_public("8.8.8.8/32"));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("10.0.0.1/32"), "10.0.0.1");
        assert_eq!(strip_prefix("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_prefix("fd00::/8"), "fd00::");
        assert_eq!(strip_prefix("weird/"), "weird/");
        assert_eq!(strip_prefix(""), "");
    }
}
