//! Events: ordered, bounded collections of units.
//!
//! An event models one audit record: a request travelling producer to
//! policy engine, or the reply coming back. Capacity is accounted the way
//! the wire format is laid out — every unit costs an index entry, a fixed
//! header, and its type's payload budget against [`EVENT_CAPACITY`] — so
//! an event that fits in memory is guaranteed to fit a wire record.
//!
//! Name lookup runs **backward** from the last-appended unit: appending a
//! second `uid` unit shadows the first. The daemon side relies on this to
//! override peer-claimed credentials with kernel-verified ones without
//! rewriting the record.

use crate::error::{ProtoError, Result};
use crate::types::{TypeCode, Value};
use crate::unit::Unit;

/// Total capacity budget of one event, in accounted bytes.
pub const EVENT_CAPACITY: usize = 4096;

/// Per-unit reverse-index entry cost in the capacity accounting.
pub const INDEX_ENTRY: usize = 4;

/// Discriminates the two record kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Request,
    Reply,
}

impl EventKind {
    /// The one-byte wire magic: `?` for requests, `!` for replies.
    pub fn magic(self) -> u8 {
        match self {
            EventKind::Request => b'?',
            EventKind::Reply => b'!',
        }
    }

    pub fn from_magic(byte: u8) -> Option<EventKind> {
        match byte {
            b'?' => Some(EventKind::Request),
            b'!' => Some(EventKind::Reply),
            _ => None,
        }
    }
}

/// An ordered, bounded record of named typed units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    units: Vec<Unit>,
    used: usize,
}

impl Event {
    pub fn new(kind: EventKind) -> Event {
        Event {
            kind,
            units: Vec::new(),
            used: 0,
        }
    }

    /// Reset to an empty event of the given kind, reusing the allocation.
    pub fn clear(&mut self, kind: EventKind) {
        self.kind = kind;
        self.units.clear();
        self.used = 0;
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn count(&self) -> usize {
        self.units.len()
    }

    /// Accounted bytes in use.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Accounted bytes still available.
    pub fn remaining(&self) -> usize {
        EVENT_CAPACITY - self.used
    }

    /// Append a zero-valued unit of the given type with an empty name.
    ///
    /// Fails — returning `None` and leaving the event untouched — when the
    /// type is `Null` or the unit's full cost (index entry + header +
    /// payload budget) exceeds the remaining capacity.
    pub fn append(&mut self, code: TypeCode) -> Option<&mut Unit> {
        if code == TypeCode::Null {
            return None;
        }
        let cost = INDEX_ENTRY + crate::unit::UNIT_HEADER + code.wire_size();
        if cost > self.remaining() {
            return None;
        }
        self.used += cost;
        self.units.push(Unit::new(code.default_value()));
        self.units.last_mut()
    }

    /// Append a named unit carrying `value`.
    pub fn append_unit(&mut self, name: &str, value: Value) -> Result<()> {
        let unit = self.append(value.code()).ok_or(ProtoError::Capacity)?;
        unit.set_name(name);
        unit.set_value(value);
        Ok(())
    }

    /// Scan `text` as `code` and append the result under `name`.
    /// Returns the scan error count (truncations and substitutions).
    pub fn append_scanned(&mut self, name: &str, code: TypeCode, text: &str) -> Result<u32> {
        let (value, errors) = code.scan(text)?;
        self.append_unit(name, value)?;
        Ok(errors)
    }

    /// Append several named values in one call.
    pub fn set_units(&mut self, fields: &[(&str, Value)]) -> Result<()> {
        for (name, value) in fields {
            self.append_unit(name, value.clone())?;
        }
        Ok(())
    }

    /// Find a unit by name, scanning from the last-appended unit backward
    /// so later same-named appends shadow earlier ones.
    pub fn unit_by_name(&self, name: &str) -> Option<&Unit> {
        self.units.iter().rev().find(|u| u.name() == name)
    }

    /// Mutable variant of [`Event::unit_by_name`].
    pub fn unit_by_name_mut(&mut self, name: &str) -> Option<&mut Unit> {
        self.units.iter_mut().rev().find(|u| u.name() == name)
    }

    /// Positional lookup.
    pub fn unit_by_number(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Conservatively re-validate an event that arrived from an untrusted
    /// peer: walk units front to back, repair what can be repaired (NUL
    /// bytes, oversized names and strings, unknown address families), and
    /// truncate the event at the first unit whose accounted cost no longer
    /// fits. Returns the number of repairs plus truncations.
    ///
    /// Never inspects anything beyond the event's own unit list, whatever
    /// the peer claimed.
    pub fn check(&mut self) -> u32 {
        let mut errors = 0u32;
        let mut used = 0usize;
        let mut good = self.units.len();

        for (i, unit) in self.units.iter_mut().enumerate() {
            let cost = INDEX_ENTRY + unit.occupancy();
            if used + cost > EVENT_CAPACITY {
                good = i;
                errors += 1;
                break;
            }
            used += cost;

            if unit.name().contains('\0') {
                let cleaned: String = unit.name().chars().filter(|c| *c != '\0').collect();
                unit.set_name(&cleaned);
                errors += 1;
            }
            errors += unit.value_mut().check();
        }

        if good < self.units.len() {
            self.units.truncate(good);
        }
        self.used = self
            .units
            .iter()
            .map(|u| INDEX_ENTRY + u.occupancy())
            .sum();
        errors
    }

    // -- credential overrides ------------------------------------------------
    //
    // Applied by the daemon after accepting a peer record: the shadowing
    // append wins over whatever the peer claimed.

    pub fn set_pid(&mut self, pid: u32) -> Result<()> {
        self.append_unit("pid", Value::Pid(pid))
    }

    pub fn set_uid(&mut self, uid: u32) -> Result<()> {
        self.append_unit("uid", Value::Uid(uid))
    }

    pub fn set_gid(&mut self, gid: u32) -> Result<()> {
        self.append_unit("gid", Value::Gid(gid))
    }

    pub fn set_host(&mut self, host: &str) -> Result<()> {
        let (value, _) = TypeCode::Host.scan(host)?;
        self.append_unit("host", value)
    }

    pub fn set_time(&mut self, secs: i64) -> Result<()> {
        self.append_unit("time", Value::Time(secs))
    }
}
