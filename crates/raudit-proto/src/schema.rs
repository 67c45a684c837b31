//! The protocol schema: reserved request/reply fields.
//!
//! Every well-formed request starts with the same 12 units, in table
//! order; every reply starts with the `deny` flag. The table is the one
//! source of truth — builders, validation, and the engine's reply
//! plumbing all index into it.

use crate::error::{ProtoError, Result};
use crate::event::{Event, EventKind};
use crate::risk::Risk;
use crate::types::{TypeCode, Value};

/// Reserved field identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedCode {
    Pid,
    Uid,
    Gid,
    Time,
    Service,
    Host,
    Name,
    Scheme,
    Honour,
    Arisk,
    Crisk,
    Irisk,
    Deny,
}

/// One row of the protocol schema.
#[derive(Debug, Clone, Copy)]
pub struct ReservedField {
    pub code: ReservedCode,
    pub name: &'static str,
    pub ty: TypeCode,
    /// Position in a request event, if the field appears there.
    pub request_pos: Option<usize>,
    /// Position in a reply event, if the field appears there.
    pub reply_pos: Option<usize>,
}

/// The full schema, request fields first, in wire order.
pub const RESERVED: &[ReservedField] = &[
    ReservedField { code: ReservedCode::Pid,     name: "pid",     ty: TypeCode::Pid,    request_pos: Some(0),  reply_pos: None },
    ReservedField { code: ReservedCode::Uid,     name: "uid",     ty: TypeCode::Uid,    request_pos: Some(1),  reply_pos: None },
    ReservedField { code: ReservedCode::Gid,     name: "gid",     ty: TypeCode::Gid,    request_pos: Some(2),  reply_pos: None },
    ReservedField { code: ReservedCode::Time,    name: "time",    ty: TypeCode::Time,   request_pos: Some(3),  reply_pos: None },
    ReservedField { code: ReservedCode::Service, name: "service", ty: TypeCode::String, request_pos: Some(4),  reply_pos: None },
    ReservedField { code: ReservedCode::Host,    name: "host",    ty: TypeCode::Host,   request_pos: Some(5),  reply_pos: None },
    ReservedField { code: ReservedCode::Name,    name: "name",    ty: TypeCode::String, request_pos: Some(6),  reply_pos: None },
    ReservedField { code: ReservedCode::Scheme,  name: "scheme",  ty: TypeCode::String, request_pos: Some(7),  reply_pos: None },
    ReservedField { code: ReservedCode::Honour,  name: "honour",  ty: TypeCode::Flag,   request_pos: Some(8),  reply_pos: None },
    ReservedField { code: ReservedCode::Arisk,   name: "arisk",   ty: TypeCode::Risk,   request_pos: Some(9),  reply_pos: None },
    ReservedField { code: ReservedCode::Crisk,   name: "crisk",   ty: TypeCode::Risk,   request_pos: Some(10), reply_pos: None },
    ReservedField { code: ReservedCode::Irisk,   name: "irisk",   ty: TypeCode::Risk,   request_pos: Some(11), reply_pos: None },
    ReservedField { code: ReservedCode::Deny,    name: "deny",    ty: TypeCode::Flag,   request_pos: None,     reply_pos: Some(0) },
];

/// Number of reserved request fields.
pub const REQUEST_FIELDS: usize = 12;

/// Number of reserved reply fields.
pub const REPLY_FIELDS: usize = 1;

impl ReservedField {
    pub fn by_code(code: ReservedCode) -> &'static ReservedField {
        RESERVED.iter().find(|f| f.code == code).unwrap()
    }

    pub fn by_name(name: &str) -> Option<&'static ReservedField> {
        RESERVED.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// The identity and risk metadata a producer stamps on every request.
/// `to_event` lays the reserved fields down in schema order.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub time: i64,
    pub service: String,
    pub host: String,
    pub name: String,
    pub scheme: String,
    pub honour: bool,
    pub arisk: Risk,
    pub crisk: Risk,
    pub irisk: Risk,
}

impl RequestInfo {
    pub fn to_event(&self) -> Result<Event> {
        let mut ev = Event::new(EventKind::Request);
        ev.set_units(&[
            ("pid", Value::Pid(self.pid)),
            ("uid", Value::Uid(self.uid)),
            ("gid", Value::Gid(self.gid)),
            ("time", Value::Time(self.time)),
            ("service", Value::String(self.service.clone())),
            ("host", Value::Host(self.host.to_ascii_lowercase())),
            ("name", Value::String(self.name.clone())),
            ("scheme", Value::String(self.scheme.clone())),
            ("honour", Value::Flag(self.honour)),
            ("arisk", Value::Risk(self.arisk)),
            ("crisk", Value::Risk(self.crisk)),
            ("irisk", Value::Risk(self.irisk)),
        ])?;
        Ok(ev)
    }
}

impl Default for RequestInfo {
    fn default() -> Self {
        RequestInfo {
            pid: 0,
            uid: 0,
            gid: 0,
            time: 0,
            service: String::new(),
            host: String::new(),
            name: String::new(),
            scheme: String::new(),
            honour: false,
            arisk: Risk::NONE,
            crisk: Risk::NONE,
            irisk: Risk::NONE,
        }
    }
}

/// A fresh reply event: `deny` present and cleared.
pub fn reply_template() -> Event {
    let mut ev = Event::new(EventKind::Reply);
    ev.append_unit("deny", Value::Flag(false))
        .expect("reply template fits an empty event");
    ev
}

/// Read the deny verdict off a reply. A missing or mistyped `deny` unit
/// reads as denied: the reply path fails closed.
pub fn reply_denied(reply: &Event) -> bool {
    match reply.unit_by_name("deny") {
        Some(unit) => match unit.value() {
            Value::Flag(b) => *b,
            _ => true,
        },
        None => true,
    }
}

/// Set the deny verdict on a reply, overwriting the reserved unit or
/// appending a shadowing one if a peer omitted it.
pub fn reply_set_deny(reply: &mut Event, deny: bool) -> Result<()> {
    if let Some(unit) = reply.unit_by_name_mut("deny")
        && unit.set_value(Value::Flag(deny))
    {
        return Ok(());
    }
    reply.append_unit("deny", Value::Flag(deny))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Verify that the first units of `event` exactly match the reserved
/// table for its kind, in order and type.
pub fn validate(event: &Event) -> Result<()> {
    let expect = |pos: Option<usize>| pos.is_some();
    let (want, select): (usize, fn(&ReservedField) -> Option<usize>) = match event.kind() {
        EventKind::Request => (REQUEST_FIELDS, |f| f.request_pos),
        EventKind::Reply => (REPLY_FIELDS, |f| f.reply_pos),
    };

    if event.count() < want {
        return Err(ProtoError::Schema(format!(
            "expected at least {want} reserved units, have {}",
            event.count()
        )));
    }

    for field in RESERVED.iter().filter(|f| expect(select(f))) {
        let pos = select(field).unwrap();
        let unit = event.unit_by_number(pos).unwrap();
        if unit.name() != field.name || unit.code() != field.ty {
            return Err(ProtoError::Schema(format!(
                "unit {pos}: expected {}:{}, have {}:{}",
                field.name,
                field.ty.name(),
                unit.name(),
                unit.code().name()
            )));
        }
    }
    Ok(())
}
