//! Classification of IP literals against the reserved ranges an outbound
//! fetch must never reach.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::Serialize;

/// Which reserved block an address fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivateRange {
    Loopback,
    Rfc1918,
    /// Link-local, including the cloud metadata endpoint `169.254.169.254`.
    LinkLocal,
    CarrierNat,
    Benchmarking,
    UniqueLocal,
    Unspecified,
    /// IPv4-mapped IPv6 (`::ffff:a.b.c.d`) wrapping a non-public IPv4 address.
    Ipv4Mapped,
}

impl PrivateRange {
    pub fn as_str(self) -> &'static str {
        match self {
            PrivateRange::Loopback => "loopback",
            PrivateRange::Rfc1918 => "rfc1918",
            PrivateRange::LinkLocal => "link-local",
            PrivateRange::CarrierNat => "carrier-nat",
            PrivateRange::Benchmarking => "benchmarking",
            PrivateRange::UniqueLocal => "unique-local",
            PrivateRange::Unspecified => "unspecified",
            PrivateRange::Ipv4Mapped => "ipv4-mapped",
        }
    }
}

impl fmt::Display for PrivateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "class", content = "range", rename_all = "kebab-case")]
pub enum AddressClass {
    Public,
    Private(PrivateRange),
}

impl AddressClass {
    pub fn is_public(self) -> bool {
        matches!(self, AddressClass::Public)
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressClass::Public => f.write_str("public"),
            AddressClass::Private(range) => write!(f, "private ({range})"),
        }
    }
}

const IPV4_RESERVED: &[(Ipv4Net, PrivateRange)] = &[
    (v4net(0, 0, 8), PrivateRange::Unspecified),
    (v4net(10, 0, 8), PrivateRange::Rfc1918),
    (v4net(100, 64, 10), PrivateRange::CarrierNat),
    (v4net(127, 0, 8), PrivateRange::Loopback),
    (v4net(169, 254, 16), PrivateRange::LinkLocal),
    (v4net(172, 16, 12), PrivateRange::Rfc1918),
    (v4net(192, 168, 16), PrivateRange::Rfc1918),
    (v4net(198, 18, 15), PrivateRange::Benchmarking),
];

const IPV6_RESERVED: &[(Ipv6Net, PrivateRange)] = &[
    (Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 128), PrivateRange::Unspecified),
    (Ipv6Net::new_assert(Ipv6Addr::LOCALHOST, 128), PrivateRange::Loopback),
    (
        Ipv6Net::new_assert(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
        PrivateRange::UniqueLocal,
    ),
    (
        Ipv6Net::new_assert(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
        PrivateRange::LinkLocal,
    ),
];

const fn v4net(a: u8, b: u8, prefix: u8) -> Ipv4Net {
    Ipv4Net::new_assert(Ipv4Addr::new(a, b, 0, 0), prefix)
}

pub fn classify(ip: IpAddr) -> AddressClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

/// Parses `text` as an IP literal (brackets allowed) and classifies it.
/// Returns `None` when the text is not an IP literal at all.
pub fn classify_literal(text: &str) -> Option<AddressClass> {
    parse_ip_literal(text).map(classify)
}

pub(crate) fn parse_ip_literal(text: &str) -> Option<IpAddr> {
    let bare = text
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(text);
    bare.parse().ok()
}

fn classify_v4(v4: Ipv4Addr) -> AddressClass {
    IPV4_RESERVED
        .iter()
        .find(|(net, _)| net.contains(&v4))
        .map_or(AddressClass::Public, |&(_, range)| AddressClass::Private(range))
}

fn classify_v6(v6: Ipv6Addr) -> AddressClass {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return match classify_v4(v4) {
            AddressClass::Public => AddressClass::Public,
            AddressClass::Private(_) => AddressClass::Private(PrivateRange::Ipv4Mapped),
        };
    }
    IPV6_RESERVED
        .iter()
        .find(|(net, _)| net.contains(&v6))
        .map_or(AddressClass::Public, |&(_, range)| AddressClass::Private(range))
}
