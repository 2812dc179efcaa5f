//! Endpoint type and its `"[addr%netif]:port"` string syntax.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use crate::error::{tcp_error, TcpErrorKind};

/// Longest textual IPv6 address, including the terminating nul the reference parser budgeted
/// for. Addresses longer than this are rejected outright rather than silently truncated.
pub const IPV6_ADDR_MAX_STR_LEN: usize = 46;

/// An immutable `{family, address, port, netif}` tuple identifying one side of a connection.
///
/// Only the IPv6 address family is supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: Ipv6Addr,
    port: u16,
    netif: Option<u32>,
}

impl Endpoint {
    pub fn new(addr: Ipv6Addr, port: u16) -> Self {
        Self {
            addr,
            port,
            netif: None,
        }
    }

    pub fn with_netif(addr: Ipv6Addr, port: u16, netif: u32) -> Self {
        Self {
            addr,
            port,
            netif: Some(netif),
        }
    }

    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn netif(&self) -> Option<u32> {
        self.netif
    }

    pub fn is_unspecified(&self) -> bool {
        self.addr.is_unspecified()
    }
}

/// The four-tuple identifying a connection. Listeners key on `local` alone with `remote`
/// left unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.netif {
            Some(netif) => write!(f, "[{}%{}]:{}", self.addr, netif, self.port),
            None => write!(f, "[{}]:{}", self.addr, self.port),
        }
    }
}

/// Parses `"[<ipv6-addr>[%<netif>]]:<port>"`.
///
/// Brackets are mandatory; `%<netif>` and `:<port>` are each independently optional. Numeric
/// overflow in either the port or the interface id is rejected explicitly rather than silently
/// wrapping on oversized input.
pub fn ep_from_str(s: &str) -> Result<Endpoint, std::io::Error> {
    let invalid = || tcp_error(TcpErrorKind::InvalidArg);

    let s = s.trim();
    if !s.starts_with('[') {
        return Err(invalid());
    }
    let close = s.find(']').ok_or_else(invalid)?;
    let inside = &s[1..close];
    if inside.contains('[') {
        return Err(invalid());
    }

    let rest = &s[close + 1..];

    let (addr_part, netif_part) = match inside.find('%') {
        Some(i) => (&inside[..i], Some(&inside[i + 1..])),
        None => (inside, None),
    };

    if addr_part.is_empty() || addr_part.len() > IPV6_ADDR_MAX_STR_LEN - 1 {
        return Err(invalid());
    }
    let addr = Ipv6Addr::from_str(addr_part).map_err(|_| invalid())?;

    let netif = match netif_part {
        Some(n) => {
            if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            Some(n.parse::<u32>().map_err(|_| invalid())?)
        }
        None => None,
    };

    let port = if rest.is_empty() {
        0
    } else {
        let digits = rest.strip_prefix(':').ok_or_else(invalid)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.parse::<u16>().map_err(|_| invalid())?
    };

    Ok(Endpoint {
        addr,
        port,
        netif,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_well_formed_endpoints() {
        let cases = [
            Endpoint::new(Ipv6Addr::LOCALHOST, 1234),
            Endpoint::new(Ipv6Addr::UNSPECIFIED, 0),
            Endpoint::with_netif(Ipv6Addr::LOCALHOST, 80, 3),
        ];
        for ep in cases {
            let s = ep.to_string();
            assert_eq!(ep_from_str(&s).unwrap(), ep, "round-trip of {s}");
        }
    }

    #[test]
    fn rejects_missing_brackets() {
        assert!(ep_from_str("::1:1234").is_err());
    }

    #[test]
    fn rejects_port_overflow() {
        assert!(ep_from_str("[::1]:70000").is_err());
    }

    #[test]
    fn rejects_empty_netif() {
        assert!(ep_from_str("[::1%]:80").is_err());
    }

    #[test]
    fn rejects_non_decimal_digits() {
        assert!(ep_from_str("[::1]:8a").is_err());
        assert!(ep_from_str("[::1%a]:80").is_err());
    }

    #[test]
    fn rejects_multiple_brackets() {
        assert!(ep_from_str("[[::1]]:80").is_err());
    }

    #[test]
    fn rejects_oversized_address() {
        let huge = "1:2:3:4:5:6:7:8".to_string() + &"0".repeat(64);
        let s = format!("[{huge}]:80");
        assert!(ep_from_str(&s).is_err());
    }

    #[test]
    fn accepts_netif_without_port() {
        let ep = ep_from_str("[fe80::1%2]").unwrap();
        assert_eq!(ep.netif(), Some(2));
        assert_eq!(ep.port(), 0);
    }
}
