//! Multi-homed address model.
//!
//! An SCTP endpoint may advertise several IP addresses sharing one port. The
//! textual form lists the hosts separated by `/` and carries the port once, at
//! the end:
//!
//! - `127.0.0.1:5555`
//! - `[::1]:5555`, `[fe80::1%eth0]:5555` (IPv6, optionally zoned)
//! - `10.0.0.1/10.0.1.1:5555` (multi-homed)
//! - `::1%lo/127.0.0.1:5555` (IPv6 endpoint with an extra IPv4 path)
//!
//! Host order is preserved; the first host is the one handed to the kernel
//! first when binding or connecting.

use smallvec::SmallVec;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

/// IP family of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4 only.
    Ipv4,
    /// IPv6, optionally with IPv4 hosts as additional paths.
    Ipv6,
}

impl AddressFamily {
    /// Family of a single IP.
    #[must_use]
    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Short name used in logs (`ip4` / `ip6`).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "ip4",
            Self::Ipv6 => "ip6",
        }
    }

    /// Raw `AF_*` constant for this family.
    #[must_use]
    pub const fn to_raw(self) -> i32 {
        match self {
            Self::Ipv4 => libc::AF_INET,
            Self::Ipv6 => libc::AF_INET6,
        }
    }

    /// Unspecified address of this family (`0.0.0.0` or `::`).
    #[must_use]
    pub const fn unspecified(self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One host of a multi-homed address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    pub ip: IpAddr,
    /// RFC 4007 zone (`%eth0`, `%2`); only meaningful for IPv6.
    pub zone: Option<String>,
}

impl HostAddr {
    pub const fn new(ip: IpAddr) -> Self {
        Self { ip, zone: None }
    }

    pub fn with_zone(ip: IpAddr, zone: impl Into<String>) -> Self {
        Self {
            ip,
            zone: Some(zone.into()),
        }
    }

    pub const fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }

    fn parse(raw: &str) -> Result<Self, AddressError> {
        let inner = match raw.strip_prefix('[') {
            Some(rest) => rest
                .strip_suffix(']')
                .ok_or_else(|| AddressError::InvalidHost(raw.to_string()))?,
            None => raw,
        };

        let (ip_part, zone) = match inner.split_once('%') {
            Some((ip, zone)) if zone.is_empty() => {
                return Err(AddressError::InvalidHost(format!("{ip}% (empty zone)")))
            }
            Some((ip, zone)) => (ip, Some(zone.to_string())),
            None => (inner, None),
        };

        let ip: IpAddr = ip_part
            .parse()
            .map_err(|_| AddressError::InvalidHost(raw.to_string()))?;

        if zone.is_some() && ip.is_ipv4() {
            return Err(AddressError::InvalidHost(format!(
                "{raw} (zones are only valid on IPv6 hosts)"
            )));
        }

        Ok(Self { ip, zone })
    }
}

impl From<IpAddr> for HostAddr {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => write!(f, "{}%{}", self.ip, zone),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// A (possibly multi-homed) SCTP endpoint address.
///
/// Always holds at least one host. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    family: AddressFamily,
    hosts: SmallVec<[HostAddr; 2]>,
    port: u16,
}

impl Address {
    /// Build an address from already-parsed hosts, enforcing the family rules.
    pub fn new<I>(family: AddressFamily, hosts: I, port: u16) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = HostAddr>,
    {
        let hosts: SmallVec<[HostAddr; 2]> = hosts.into_iter().collect();
        check_family(family, &hosts)?;
        Ok(Self {
            family,
            hosts,
            port,
        })
    }

    /// The unspecified address of `family` on `port`.
    #[must_use]
    pub fn wildcard(family: AddressFamily, port: u16) -> Self {
        let mut hosts = SmallVec::new();
        hosts.push(HostAddr::new(family.unspecified()));
        Self {
            family,
            hosts,
            port,
        }
    }

    /// Build an address from socket addresses reported by the kernel.
    ///
    /// The port is taken from the first entry and IPv6 scope ids become
    /// numeric zones.
    pub fn from_socket_addrs(addrs: &[SocketAddr]) -> Result<Self, AddressError> {
        let first = addrs.first().ok_or(AddressError::EmptyHostList)?;
        let hosts = addrs.iter().map(|sa| match sa {
            SocketAddr::V6(v6) if v6.scope_id() != 0 => {
                HostAddr::with_zone(IpAddr::V6(*v6.ip()), v6.scope_id().to_string())
            }
            other => HostAddr::new(other.ip()),
        });
        Self::new(AddressFamily::of(&first.ip()), hosts, first.port())
    }

    /// Parse a literal, inferring the family from its first host.
    ///
    /// # Examples
    ///
    /// ```
    /// use polystream_core::address::{Address, AddressFamily};
    ///
    /// let addr = Address::parse("10.0.0.1/10.0.1.1:5555").unwrap();
    /// assert_eq!(addr.family(), AddressFamily::Ipv4);
    /// assert_eq!(addr.hosts().len(), 2);
    /// assert_eq!(addr.port(), 5555);
    /// assert_eq!(addr.to_string(), "10.0.0.1/10.0.1.1:5555");
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        Self::parse_inner(None, s)
    }

    /// Parse a literal for a pinned family.
    ///
    /// An IPv6 request accepts IPv4 hosts only next to at least one IPv6 host.
    pub fn parse_with_family(family: AddressFamily, s: &str) -> Result<Self, AddressError> {
        Self::parse_inner(Some(family), s)
    }

    fn parse_inner(family: Option<AddressFamily>, s: &str) -> Result<Self, AddressError> {
        let (hosts_part, port) = split_port(s)?;
        if hosts_part.is_empty() {
            return Err(AddressError::EmptyHostList);
        }

        let hosts = hosts_part
            .split('/')
            .map(HostAddr::parse)
            .collect::<Result<SmallVec<[HostAddr; 2]>, _>>()?;

        let family = family.unwrap_or_else(|| hosts[0].family());
        check_family(family, &hosts)?;

        Ok(Self {
            family,
            hosts,
            port,
        })
    }

    pub const fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn hosts(&self) -> &[HostAddr] {
        &self.hosts
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// First host; the primary-address hint on bind.
    pub fn primary(&self) -> &HostAddr {
        &self.hosts[0]
    }

    /// Zone of the first host, if any.
    pub fn zone(&self) -> Option<&str> {
        self.hosts[0].zone.as_deref()
    }

    pub fn is_multi_homed(&self) -> bool {
        self.hosts.len() > 1
    }

    /// Socket addresses in host order, resolving zones with `resolve_zone`.
    ///
    /// Numeric zones are used as scope ids directly; any other zone is
    /// handed to `resolve_zone` (typically an interface-name lookup).
    pub fn socket_addrs_with<F>(&self, mut resolve_zone: F) -> Result<Vec<SocketAddr>, AddressError>
    where
        F: FnMut(&str) -> Option<u32>,
    {
        self.hosts
            .iter()
            .map(|host| {
                let scope_id = match host.zone.as_deref() {
                    None => 0,
                    Some(zone) => match zone.parse::<u32>() {
                        Ok(id) => id,
                        Err(_) => resolve_zone(zone)
                            .ok_or_else(|| AddressError::UnknownZone(zone.to_string()))?,
                    },
                };
                Ok(match host.ip {
                    IpAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(v4, self.port)),
                    IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, self.port, 0, scope_id)),
                })
            })
            .collect()
    }

    /// Socket addresses in host order; only numeric zones are accepted.
    pub fn socket_addrs(&self) -> Result<Vec<SocketAddr>, AddressError> {
        self.socket_addrs_with(|_| None)
    }

    /// Same hosts on a different port.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hosts format as canonical RFC 5952 text (lowercase hex, longest zero run
/// compressed), so a literal written in another IPv6 spelling formats
/// differently. Zones are kept as written.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let single = self.hosts.len() == 1;
        for (n, host) in self.hosts.iter().enumerate() {
            if n > 0 {
                f.write_str("/")?;
            }
            if single && host.ip.is_ipv6() {
                write!(f, "[{host}]")?;
            } else {
                write!(f, "{host}")?;
            }
        }
        write!(f, ":{}", self.port)
    }
}

/// Split `hosts:port`, honouring a bracketed last host.
fn split_port(s: &str) -> Result<(&str, u16), AddressError> {
    let last_start = s.rfind('/').map_or(0, |i| i + 1);
    let last = &s[last_start..];

    let port_str = if last.starts_with('[') {
        let close = last
            .find(']')
            .ok_or_else(|| AddressError::InvalidHost(last.to_string()))?;
        match &last[close + 1..] {
            "" => return Err(AddressError::MissingPort(s.to_string())),
            rest => rest
                .strip_prefix(':')
                .ok_or_else(|| AddressError::InvalidHost(last.to_string()))?,
        }
    } else {
        match last.rsplit_once(':') {
            Some((_, port)) => port,
            None => return Err(AddressError::MissingPort(s.to_string())),
        }
    };

    let hosts_end = s.len() - port_str.len() - 1;
    Ok((&s[..hosts_end], parse_port(port_str)?))
}

fn parse_port(s: &str) -> Result<u16, AddressError> {
    if s.is_empty() {
        return Err(AddressError::MissingPort(s.to_string()));
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidPort(s.to_string()));
    }
    s.parse::<u16>()
        .map_err(|_| AddressError::PortOutOfRange(s.to_string()))
}

fn check_family(family: AddressFamily, hosts: &[HostAddr]) -> Result<(), AddressError> {
    if hosts.is_empty() {
        return Err(AddressError::EmptyHostList);
    }
    match family {
        AddressFamily::Ipv4 => {
            if let Some(host) = hosts.iter().find(|h| h.ip.is_ipv6()) {
                return Err(AddressError::FamilyMismatch {
                    expected: family,
                    host: host.to_string(),
                });
            }
        }
        AddressFamily::Ipv6 => {
            if !hosts.iter().any(|h| h.ip.is_ipv6()) {
                return Err(AddressError::FamilyMismatch {
                    expected: family,
                    host: hosts[0].to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Errors that can occur when parsing or building an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Missing port in address: {0}")]
    MissingPort(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Port out of range (0-65535): {0}")]
    PortOutOfRange(String),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Address has no hosts")]
    EmptyHostList,

    #[error("Host {host} does not match requested family {expected}")]
    FamilyMismatch {
        expected: AddressFamily,
        host: String,
    },

    #[error("Unknown zone: {0}")]
    UnknownZone(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOP4: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const LOOP6: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);

    fn table() -> Vec<(AddressFamily, &'static str, Address)> {
        use AddressFamily::{Ipv4, Ipv6};
        let a = |family, hosts: Vec<HostAddr>, port| Address::new(family, hosts, port).unwrap();
        vec![
            (Ipv4, "127.0.0.1:0", a(Ipv4, vec![LOOP4.into()], 0)),
            (Ipv4, "127.0.0.1:65535", a(Ipv4, vec![LOOP4.into()], 65535)),
            (Ipv6, "[::1]:0", a(Ipv6, vec![LOOP6.into()], 0)),
            (Ipv6, "[::1]:65535", a(Ipv6, vec![LOOP6.into()], 65535)),
            (Ipv6, "[::1%lo0]:0", a(Ipv6, vec![HostAddr::with_zone(LOOP6, "lo0")], 0)),
            (
                Ipv6,
                "[::1%lo0]:65535",
                a(Ipv6, vec![HostAddr::with_zone(LOOP6, "lo0")], 65535),
            ),
            (
                Ipv4,
                "0.0.0.0:12345",
                a(Ipv4, vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED).into()], 12345),
            ),
            (
                Ipv4,
                "127.0.0.1/10.0.0.1:0",
                a(
                    Ipv4,
                    vec![LOOP4.into(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)).into()],
                    0,
                ),
            ),
            (
                Ipv4,
                "127.0.0.1/10.0.0.1:65535",
                a(
                    Ipv4,
                    vec![LOOP4.into(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)).into()],
                    65535,
                ),
            ),
            (
                Ipv6,
                "::1%lo0/127.0.0.1:1234",
                a(Ipv6, vec![HostAddr::with_zone(LOOP6, "lo0"), LOOP4.into()], 1234),
            ),
        ]
    }

    #[test]
    fn test_format_matches_literal() {
        for (_, literal, addr) in table() {
            assert_eq!(addr.to_string(), literal);
        }
    }

    #[test]
    fn test_parse_table() {
        for (family, literal, expected) in table() {
            let parsed = Address::parse_with_family(family, literal).unwrap();
            assert_eq!(parsed, expected, "parsing {literal}");

            let reparsed =
                Address::parse_with_family(parsed.family(), &parsed.to_string()).unwrap();
            assert_eq!(reparsed, expected, "re-parsing {literal}");
        }
    }

    #[test]
    fn test_family_inferred_from_first_host() {
        assert_eq!(Address::parse("127.0.0.1:80").unwrap().family(), AddressFamily::Ipv4);
        assert_eq!(Address::parse("[::1]:80").unwrap().family(), AddressFamily::Ipv6);
        assert_eq!(
            Address::parse("::1/127.0.0.1:80").unwrap().family(),
            AddressFamily::Ipv6
        );
        assert!(matches!(
            Address::parse("127.0.0.1/::1:80"),
            Err(AddressError::FamilyMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_port() {
        assert!(matches!(
            Address::parse("1.2.3.4"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            Address::parse("[::1]"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            Address::parse("1.2.3.4:"),
            Err(AddressError::MissingPort(_))
        ));
    }

    #[test]
    fn test_rejects_port_out_of_range() {
        assert!(matches!(
            Address::parse("1.2.3.4:70000"),
            Err(AddressError::PortOutOfRange(_))
        ));
        assert!(matches!(
            Address::parse("1.2.3.4:+80"),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_rejects_bad_hosts() {
        assert!(matches!(
            Address::parse("not-an-ip:80"),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            Address::parse("127.0.0.1//10.0.0.1:80"),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            Address::parse("127.0.0.1%eth0:80"),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            Address::parse("[::1%]:80"),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(Address::parse(":80"), Err(AddressError::EmptyHostList)));
    }

    #[test]
    fn test_family_pinning() {
        assert!(matches!(
            Address::parse_with_family(AddressFamily::Ipv4, "[::1]:80"),
            Err(AddressError::FamilyMismatch { .. })
        ));
        // IPv4 alone cannot satisfy an IPv6 request...
        assert!(matches!(
            Address::parse_with_family(AddressFamily::Ipv6, "127.0.0.1:80"),
            Err(AddressError::FamilyMismatch { .. })
        ));
        // ...but is fine as an extra path.
        let addr = Address::parse_with_family(AddressFamily::Ipv6, "127.0.0.1/::1:80").unwrap();
        assert_eq!(addr.family(), AddressFamily::Ipv6);
        assert_eq!(addr.to_string(), "127.0.0.1/::1:80");
    }

    #[test]
    fn test_unbracketed_single_ipv6_normalizes() {
        let addr = Address::parse("::1:80").unwrap();
        assert_eq!(addr.primary().ip, LOOP6);
        assert_eq!(addr.port(), 80);
        assert_eq!(addr.to_string(), "[::1]:80");
    }

    #[test]
    fn test_non_canonical_ipv6_formats_canonically() {
        for (literal, canonical) in [
            ("[0:0::1]:80", "[::1]:80"),
            ("[2001:DB8:0:0:0:0:0:1]:5000", "[2001:db8::1]:5000"),
            ("[FE80::1%eth0]:9", "[fe80::1%eth0]:9"),
            ("2001:db8:0::1/10.0.0.1:7", "2001:db8::1/10.0.0.1:7"),
        ] {
            let addr = Address::parse(literal).unwrap();
            assert_eq!(addr.to_string(), canonical, "{literal}");
        }

        // Whatever the spelling, the formatted text parses back to the same
        // address and is a fixed point of format(parse(_))
        for literal in ["[::FFFF:1]:80", "[0:0::1]:80", "[::ffff:10.1.2.3]:80"] {
            let addr = Address::parse(literal).unwrap();
            let formatted = addr.to_string();
            assert_eq!(formatted, formatted.to_lowercase());
            let reparsed = Address::parse(&formatted).unwrap();
            assert_eq!(reparsed, addr, "{literal}");
            assert_eq!(reparsed.to_string(), formatted);
        }
    }

    #[test]
    fn test_from_socket_addrs() {
        let addrs = [
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 9000, 0, 1)),
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000)),
        ];
        let addr = Address::from_socket_addrs(&addrs).unwrap();
        assert_eq!(addr.family(), AddressFamily::Ipv6);
        assert_eq!(addr.zone(), Some("1"));
        assert_eq!(addr.to_string(), "::1%1/127.0.0.1:9000");
        assert!(addr.is_multi_homed());

        assert_eq!(
            Address::from_socket_addrs(&[]),
            Err(AddressError::EmptyHostList)
        );
    }

    #[test]
    fn test_socket_addrs_resolve_zones() {
        let addr = Address::parse("fe80::1%3/10.0.0.1:5000").unwrap();
        let addrs = addr.socket_addrs().unwrap();
        assert_eq!(
            addrs,
            vec![
                SocketAddr::V6(SocketAddrV6::new("fe80::1".parse().unwrap(), 5000, 0, 3)),
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000)),
            ]
        );

        let named = Address::parse("[fe80::1%eth7]:5000").unwrap();
        assert_eq!(
            named.socket_addrs(),
            Err(AddressError::UnknownZone("eth7".to_string()))
        );
        let resolved = named
            .socket_addrs_with(|zone| (zone == "eth7").then_some(7))
            .unwrap();
        assert!(matches!(resolved[0], SocketAddr::V6(v6) if v6.scope_id() == 7));
    }

    #[test]
    fn test_wildcard() {
        let addr = Address::wildcard(AddressFamily::Ipv6, 7777);
        assert_eq!(addr.to_string(), "[::]:7777");
        assert_eq!(addr.with_port(1).port(), 1);
    }
}
