//! The type registry: a closed set of value types with per-type scan,
//! print, compare, and check behavior.
//!
//! Every type has a fixed wire-size budget used for event capacity
//! accounting, a canonical textual form ([`PrintMode::Wire`]) that
//! [`TypeCode::scan`] round-trips, and a human variant
//! ([`PrintMode::Pretty`]).
//!
//! Comparison is richer than a total order: several types form **nested
//! ranges** (an address inside a prefix, a host under a domain, a path
//! under a directory, a risk range overlapping another), so [`Comparison`]
//! carries an intersection bit alongside the ordering.

use std::cmp::Ordering;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use chrono::{TimeZone, Utc};
use ipnet::Ipv4Net;

use crate::error::{ProtoError, Result};
use crate::risk::Risk;

/// Upper bound on any single type's wire-size budget.
pub const MAX_PAYLOAD: usize = 1024;

// ---------------------------------------------------------------------------
// Type codes
// ---------------------------------------------------------------------------

/// The closed enumeration of value types.
///
/// `Null` is the reserved zero code: it never carries a value and every
/// append path rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum TypeCode {
    Null = 0,
    String = 1,
    Integer = 2,
    Uid = 3,
    Gid = 4,
    Pid = 5,
    Flag = 6,
    Risk = 7,
    Errno = 8,
    Time = 9,
    Host = 10,
    Ip4Addr = 11,
    IpPort = 12,
    File = 13,
    SockAddr = 14,
}

/// Every registered type, in code order. `Null` is deliberately absent.
pub const TYPES: &[TypeCode] = &[
    TypeCode::String,
    TypeCode::Integer,
    TypeCode::Uid,
    TypeCode::Gid,
    TypeCode::Pid,
    TypeCode::Flag,
    TypeCode::Risk,
    TypeCode::Errno,
    TypeCode::Time,
    TypeCode::Host,
    TypeCode::Ip4Addr,
    TypeCode::IpPort,
    TypeCode::File,
    TypeCode::SockAddr,
];

impl TypeCode {
    /// Look up a type by its numeric code. Unknown codes yield `None`,
    /// never a default descriptor.
    pub fn from_code(code: u16) -> Option<TypeCode> {
        TYPES.iter().copied().find(|t| *t as u16 == code)
    }

    /// Look up a type by its canonical name. `"null"` does not resolve.
    pub fn from_name(name: &str) -> Option<TypeCode> {
        TYPES.iter().copied().find(|t| t.name() == name)
    }

    /// The canonical type name used in wire records and rule text.
    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Null => "null",
            TypeCode::String => "string",
            TypeCode::Integer => "integer",
            TypeCode::Uid => "uid",
            TypeCode::Gid => "gid",
            TypeCode::Pid => "pid",
            TypeCode::Flag => "flag",
            TypeCode::Risk => "risk",
            TypeCode::Errno => "errno",
            TypeCode::Time => "time",
            TypeCode::Host => "host",
            TypeCode::Ip4Addr => "ip4addr",
            TypeCode::IpPort => "ipport",
            TypeCode::File => "file",
            TypeCode::SockAddr => "sockaddr",
        }
    }

    /// Fixed per-type wire-size budget, bounded by [`MAX_PAYLOAD`].
    pub fn wire_size(self) -> usize {
        match self {
            TypeCode::Null => 0,
            TypeCode::String | TypeCode::File => 256,
            TypeCode::Host | TypeCode::SockAddr => 128,
            TypeCode::Time => 8,
            TypeCode::Ip4Addr | TypeCode::IpPort => 8,
            TypeCode::Integer
            | TypeCode::Uid
            | TypeCode::Gid
            | TypeCode::Pid
            | TypeCode::Flag
            | TypeCode::Risk
            | TypeCode::Errno => 4,
        }
    }

    /// The zero value of this type. Panics on `Null`, which no caller can
    /// reach: every construction path rejects `Null` first.
    pub fn default_value(self) -> Value {
        match self {
            TypeCode::Null => unreachable!("null type carries no value"),
            TypeCode::String => Value::String(String::new()),
            TypeCode::Integer => Value::Integer(0),
            TypeCode::Uid => Value::Uid(0),
            TypeCode::Gid => Value::Gid(0),
            TypeCode::Pid => Value::Pid(0),
            TypeCode::Flag => Value::Flag(false),
            TypeCode::Risk => Value::Risk(Risk::NONE),
            TypeCode::Errno => Value::Errno(0),
            TypeCode::Time => Value::Time(0),
            TypeCode::Host => Value::Host(String::new()),
            TypeCode::Ip4Addr => {
                Value::Ip4Addr(Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).unwrap())
            }
            TypeCode::IpPort => Value::IpPort(IpPort {
                proto: Proto::Any,
                port: 0,
            }),
            TypeCode::File => Value::File(String::new()),
            TypeCode::SockAddr => Value::SockAddr(SockAddr::Unspec),
        }
    }

    /// Parse a human string into a value of this type.
    ///
    /// Scanning is total for every registered type: it always yields a
    /// value plus an error count. Oversized strings are truncated with a
    /// visible `...` marker rather than rejected; unparseable numerics
    /// yield the type's default. Only the reserved `Null` code is refused.
    pub fn scan(self, text: &str) -> Result<(Value, u32)> {
        let mut errors = 0u32;
        let value = match self {
            TypeCode::Null => return Err(ProtoError::UnknownTypeCode(0)),
            TypeCode::String => Value::String(bounded_text(text, self.wire_size() - 1, &mut errors)),
            TypeCode::File => Value::File(bounded_text(text, self.wire_size() - 1, &mut errors)),
            TypeCode::Host => Value::Host(
                bounded_text(text, self.wire_size() - 1, &mut errors).to_ascii_lowercase(),
            ),
            TypeCode::Integer => Value::Integer(scan_num(text, &mut errors)),
            TypeCode::Uid => Value::Uid(scan_num(text, &mut errors)),
            TypeCode::Gid => Value::Gid(scan_num(text, &mut errors)),
            TypeCode::Pid => Value::Pid(scan_num(text, &mut errors)),
            TypeCode::Errno => Value::Errno(scan_num(text, &mut errors)),
            TypeCode::Flag => Value::Flag(match text {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    errors += 1;
                    false
                }
            }),
            TypeCode::Risk => Value::Risk(Risk::parse(text).unwrap_or_else(|_| {
                errors += 1;
                Risk::NONE
            })),
            TypeCode::Time => Value::Time(scan_time(text, &mut errors)),
            TypeCode::Ip4Addr => Value::Ip4Addr(scan_ip4(text, &mut errors)),
            TypeCode::IpPort => Value::IpPort(IpPort::scan(text, &mut errors)),
            TypeCode::SockAddr => Value::SockAddr(SockAddr::scan(text, &mut errors)),
        };
        Ok((value, errors))
    }
}

// ---------------------------------------------------------------------------
// Scan helpers
// ---------------------------------------------------------------------------

/// Truncate `text` to at most `max` bytes on a character boundary, marking
/// the cut with a visible `...` and counting it as one scan error.
fn bounded_text(text: &str, max: usize, errors: &mut u32) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    *errors += 1;
    let keep = max.saturating_sub(3);
    let mut cut = keep;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&text[..cut]);
    out.push_str("...");
    out
}

fn scan_num<T: std::str::FromStr + Default>(text: &str, errors: &mut u32) -> T {
    text.trim().parse().unwrap_or_else(|_| {
        *errors += 1;
        T::default()
    })
}

fn scan_time(text: &str, errors: &mut u32) -> i64 {
    if let Ok(secs) = text.trim().parse::<i64>() {
        return secs;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text.trim()) {
        return dt.timestamp();
    }
    *errors += 1;
    0
}

fn scan_ip4(text: &str, errors: &mut u32) -> Ipv4Net {
    let text = text.trim();
    if let Ok(net) = text.parse::<Ipv4Net>() {
        return net;
    }
    if let Ok(addr) = text.parse::<Ipv4Addr>() {
        return Ipv4Net::new(addr, 32).unwrap();
    }
    *errors += 1;
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Compound payload types
// ---------------------------------------------------------------------------

/// Transport selector for [`IpPort`]. `Any` intersects both concrete
/// protocols at the same port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Proto {
    Any,
    Tcp,
    Udp,
}

impl Proto {
    fn name(self) -> &'static str {
        match self {
            Proto::Any => "any",
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        }
    }

    fn from_name(name: &str) -> Option<Proto> {
        match name {
            "any" | "*" => Some(Proto::Any),
            "tcp" => Some(Proto::Tcp),
            "udp" => Some(Proto::Udp),
            _ => None,
        }
    }
}

/// A protocol/port pair (`tcp/80`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPort {
    pub proto: Proto,
    pub port: u16,
}

/// Well-known service names accepted by scan and emitted in pretty mode.
const SERVICES: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
    ("syslog", 514),
];

fn service_port(name: &str) -> Option<u16> {
    SERVICES.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
}

fn service_name(port: u16) -> Option<&'static str> {
    SERVICES.iter().find(|(_, p)| *p == port).map(|(n, _)| *n)
}

impl IpPort {
    /// Accepts `80`, `http`, `tcp/80`, and `tcp/http` forms.
    fn scan(text: &str, errors: &mut u32) -> IpPort {
        let text = text.trim();
        let (proto, port_text) = match text.split_once('/') {
            Some((p, rest)) => match Proto::from_name(p) {
                Some(proto) => (proto, rest),
                None => {
                    *errors += 1;
                    return IpPort {
                        proto: Proto::Any,
                        port: 0,
                    };
                }
            },
            None => (Proto::Any, text),
        };
        let port = port_text
            .parse::<u16>()
            .ok()
            .or_else(|| service_port(port_text))
            .unwrap_or_else(|| {
                *errors += 1;
                0
            });
        IpPort { proto, port }
    }
}

/// A socket address, possibly downgraded to `Unspec` by a trust-boundary
/// check when the peer supplied an unknown address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockAddr {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Unspec,
}

impl SockAddr {
    fn scan(text: &str, errors: &mut u32) -> SockAddr {
        let text = text.trim();
        if text == "unspec" || text.is_empty() {
            return SockAddr::Unspec;
        }
        match text.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(a)) => SockAddr::V4(a),
            Ok(SocketAddr::V6(a)) => SockAddr::V6(a),
            Err(_) => {
                *errors += 1;
                SockAddr::Unspec
            }
        }
    }

    fn print(self) -> String {
        match self {
            SockAddr::V4(a) => a.to_string(),
            SockAddr::V6(a) => a.to_string(),
            SockAddr::Unspec => "unspec".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Output variant selector for [`Value::print`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Canonical text that [`TypeCode::scan`] parses back to the same value.
    Wire,
    /// Human-oriented variant: resolved service names, RFC 3339 times,
    /// symbolic errno descriptions, escaped strings.
    Pretty,
}

/// The result of comparing two values: an ordering plus a set-relation bit.
///
/// `intersects` reports whether the two values' ranges overlap — equal
/// values always intersect, and for nested-range types a more specific
/// value intersects the less specific one that contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub order: Ordering,
    pub intersects: bool,
}

impl Comparison {
    fn point(order: Ordering) -> Comparison {
        Comparison {
            order,
            intersects: order == Ordering::Equal,
        }
    }

    /// Equal, or overlapping ranges. The relation the default module's `=`
    /// comparator uses.
    pub fn satisfies(self) -> bool {
        self.order == Ordering::Equal || self.intersects
    }
}

/// A typed payload. Values are plain data: cloning duplicates the bytes
/// and no aliasing occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Integer(u32),
    Uid(u32),
    Gid(u32),
    Pid(u32),
    Flag(bool),
    Risk(Risk),
    Errno(i32),
    Time(i64),
    Host(String),
    Ip4Addr(Ipv4Net),
    IpPort(IpPort),
    File(String),
    SockAddr(SockAddr),
}

impl Value {
    /// The type this value belongs to.
    pub fn code(&self) -> TypeCode {
        match self {
            Value::String(_) => TypeCode::String,
            Value::Integer(_) => TypeCode::Integer,
            Value::Uid(_) => TypeCode::Uid,
            Value::Gid(_) => TypeCode::Gid,
            Value::Pid(_) => TypeCode::Pid,
            Value::Flag(_) => TypeCode::Flag,
            Value::Risk(_) => TypeCode::Risk,
            Value::Errno(_) => TypeCode::Errno,
            Value::Time(_) => TypeCode::Time,
            Value::Host(_) => TypeCode::Host,
            Value::Ip4Addr(_) => TypeCode::Ip4Addr,
            Value::IpPort(_) => TypeCode::IpPort,
            Value::File(_) => TypeCode::File,
            Value::SockAddr(_) => TypeCode::SockAddr,
        }
    }

    /// Render to text, honoring the mode.
    pub fn print(&self, mode: PrintMode) -> String {
        match self {
            Value::String(s) | Value::Host(s) | Value::File(s) => match mode {
                PrintMode::Wire => s.clone(),
                PrintMode::Pretty => s.escape_default().to_string(),
            },
            Value::Integer(n) | Value::Uid(n) | Value::Gid(n) | Value::Pid(n) => n.to_string(),
            Value::Flag(b) => match mode {
                PrintMode::Wire => (if *b { "1" } else { "0" }).to_string(),
                PrintMode::Pretty => b.to_string(),
            },
            Value::Risk(r) => r.put(),
            Value::Errno(n) => match mode {
                PrintMode::Wire => n.to_string(),
                PrintMode::Pretty => std::io::Error::from_raw_os_error(*n).to_string(),
            },
            Value::Time(secs) => match mode {
                PrintMode::Wire => secs.to_string(),
                PrintMode::Pretty => Utc
                    .timestamp_opt(*secs, 0)
                    .single()
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| secs.to_string()),
            },
            Value::Ip4Addr(net) => {
                if net.prefix_len() == 32 {
                    net.addr().to_string()
                } else {
                    net.to_string()
                }
            }
            Value::IpPort(pp) => match mode {
                PrintMode::Wire => format!("{}/{}", pp.proto.name(), pp.port),
                PrintMode::Pretty => match service_name(pp.port) {
                    Some(svc) => format!("{}/{}", pp.proto.name(), svc),
                    None => format!("{}/{}", pp.proto.name(), pp.port),
                },
            },
            Value::SockAddr(sa) => sa.print(),
        }
    }

    /// Render into `buf` without ever exceeding `max` bytes; returns the
    /// rendered length, or `None` if the rendering does not fit (nothing
    /// is written in that case).
    pub fn print_into(&self, buf: &mut String, max: usize, mode: PrintMode) -> Option<usize> {
        let text = self.print(mode);
        if text.len() > max {
            return None;
        }
        buf.push_str(&text);
        Some(text.len())
    }

    /// Compare two values of the same type; values of different types
    /// order by type code and never intersect.
    pub fn compare(&self, other: &Value) -> Comparison {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Comparison::point(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b))
            | (Value::Uid(a), Value::Uid(b))
            | (Value::Gid(a), Value::Gid(b))
            | (Value::Pid(a), Value::Pid(b)) => Comparison::point(a.cmp(b)),
            (Value::Flag(a), Value::Flag(b)) => Comparison::point(a.cmp(b)),
            (Value::Risk(a), Value::Risk(b)) => a.compare(*b),
            (Value::Errno(a), Value::Errno(b)) => Comparison::point(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Comparison::point(a.cmp(b)),
            (Value::Host(a), Value::Host(b)) => compare_host(a, b),
            (Value::Ip4Addr(a), Value::Ip4Addr(b)) => compare_ip4(a, b),
            (Value::IpPort(a), Value::IpPort(b)) => compare_ipport(*a, *b),
            (Value::File(a), Value::File(b)) => compare_file(a, b),
            (Value::SockAddr(a), Value::SockAddr(b)) => compare_sockaddr(*a, *b),
            _ => Comparison {
                order: self.code().cmp(&other.code()),
                intersects: false,
            },
        }
    }

    /// Conservative fix-up of a value that crossed a trust boundary.
    /// Returns the number of repairs applied.
    pub fn check(&mut self) -> u32 {
        let max = self.code().wire_size() - 1;
        match self {
            Value::String(s) | Value::Host(s) | Value::File(s) => {
                let mut repairs = 0;
                if s.contains('\0') {
                    s.retain(|c| c != '\0');
                    repairs += 1;
                }
                if s.len() > max {
                    *s = bounded_text(s, max, &mut repairs);
                }
                repairs
            }
            // Fixed-width payloads cannot hold out-of-range bits.
            _ => 0,
        }
    }

    /// Numeric view, where one exists.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Integer(n) | Value::Uid(n) | Value::Gid(n) | Value::Pid(n) => Some(*n),
            Value::Flag(b) => Some(*b as u32),
            Value::Errno(n) => Some(*n as u32),
            Value::Risk(r) => Some(r.bits()),
            _ => None,
        }
    }

    /// Overwrite from a numeric, keeping the type. Returns `false` when
    /// the type has no numeric view.
    pub fn set_u32(&mut self, v: u32) -> bool {
        match self {
            Value::Integer(n) | Value::Uid(n) | Value::Gid(n) | Value::Pid(n) => *n = v,
            Value::Flag(b) => *b = v != 0,
            Value::Errno(n) => *n = v as i32,
            Value::Risk(r) => *r = Risk::from_bits(v),
            _ => return false,
        }
        true
    }

    /// Borrow the textual payload, where one exists.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Host(s) | Value::File(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Nested-range comparisons
// ---------------------------------------------------------------------------

/// Hosts intersect when one is a domain suffix of the other:
/// `www.example.com` satisfies `example.com`.
fn compare_host(a: &str, b: &str) -> Comparison {
    let order = a.cmp(b);
    let suffix = |longer: &str, shorter: &str| {
        longer.len() > shorter.len()
            && longer.ends_with(shorter)
            && longer.as_bytes()[longer.len() - shorter.len() - 1] == b'.'
    };
    Comparison {
        order,
        intersects: order == Ordering::Equal || suffix(a, b) || suffix(b, a),
    }
}

/// Paths intersect when one is a directory prefix of the other at a `/`
/// boundary: `/var/log/messages` satisfies `/var/log`.
fn compare_file(a: &str, b: &str) -> Comparison {
    let order = a.cmp(b);
    let prefix = |longer: &str, shorter: &str| {
        longer.len() > shorter.len()
            && longer.starts_with(shorter)
            && (shorter.ends_with('/') || longer.as_bytes()[shorter.len()] == b'/')
    };
    Comparison {
        order,
        intersects: order == Ordering::Equal || prefix(a, b) || prefix(b, a),
    }
}

/// Networks intersect when one contains the other.
fn compare_ip4(a: &Ipv4Net, b: &Ipv4Net) -> Comparison {
    let order = a
        .network()
        .cmp(&b.network())
        .then(a.prefix_len().cmp(&b.prefix_len()));
    Comparison {
        order,
        intersects: a.contains(b) || b.contains(a),
    }
}

/// Same port intersects when either side leaves the protocol open.
fn compare_ipport(a: IpPort, b: IpPort) -> Comparison {
    let order = a.port.cmp(&b.port).then(a.proto.cmp(&b.proto));
    let proto_overlap = a.proto == b.proto || a.proto == Proto::Any || b.proto == Proto::Any;
    Comparison {
        order,
        intersects: a.port == b.port && proto_overlap,
    }
}

/// `Unspec` acts as the widest range and intersects every address.
fn compare_sockaddr(a: SockAddr, b: SockAddr) -> Comparison {
    let order = a.print().cmp(&b.print());
    Comparison {
        order,
        intersects: order == Ordering::Equal
            || matches!(a, SockAddr::Unspec)
            || matches!(b, SockAddr::Unspec),
    }
}
