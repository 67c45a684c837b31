//! # raudit-proto
//!
//! The record model for the raudit event bus: typed, bounded audit
//! records ("events") exchanged between producer shims and the policy
//! engine, plus the wire codec that carries them over a local transport.
//!
//! ## Architecture
//!
//! - **Type registry** ([`types`]): a closed set of value types with
//!   per-type scan/print/compare/check behavior and fixed wire-size
//!   budgets. Comparison carries an intersection bit so nested-range
//!   types (address prefixes, domain suffixes, path prefixes, risk
//!   ranges) can say "contains" as well as "equal".
//! - **Units and events** ([`unit`], [`event`]): an event is an ordered,
//!   capacity-bounded collection of named typed units with shadowing
//!   name lookup (last append wins).
//! - **Wire codec** ([`wire`]): a self-delimiting single-line record
//!   format with strict decoding and an explicit "incomplete, need more
//!   bytes" result for stream reassembly.
//! - **Schema** ([`schema`]): the reserved request/reply field table
//!   every conforming record leads with.
//! - **Risk** ([`risk`]): fixed-point (severity, confidence) codes with
//!   range-overlap comparison.
//!
//! ## Quick Start
//!
//! ```rust
//! use raudit_proto::{Event, EventKind, Value, wire};
//!
//! let mut request = Event::new(EventKind::Request);
//! request
//!     .append_unit("method", Value::String("DELETE".into()))
//!     .unwrap();
//!
//! let mut buf = Vec::new();
//! wire::to_buffer(&request, &mut buf).unwrap();
//!
//! match wire::from_buffer(&buf).unwrap() {
//!     wire::Decoded::Complete { event, .. } => assert_eq!(event, request),
//!     wire::Decoded::Incomplete => unreachable!(),
//! }
//! ```

pub mod error;
pub mod event;
pub mod risk;
pub mod schema;
pub mod types;
pub mod unit;
pub mod wire;

// Re-export the most commonly used types at crate root
pub use error::{ProtoError, Result};
pub use event::{EVENT_CAPACITY, Event, EventKind, INDEX_ENTRY};
pub use risk::{PX, Risk};
pub use schema::{REQUEST_FIELDS, RESERVED, RequestInfo, ReservedCode, ReservedField};
pub use types::{Comparison, IpPort, PrintMode, Proto, SockAddr, TypeCode, Value};
pub use unit::{MAX_NAME, UNIT_HEADER, Unit};
pub use wire::{Decoded, MAX_RECORD};
