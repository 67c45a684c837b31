//! # raudit-rules
//!
//! The policy engine for the raudit event bus: compile rule text into a
//! shared decision DAG once, then evaluate request events against it and
//! mutate a reply with the verdict.
//!
//! ## Architecture
//!
//! - **Tokenizer** ([`token`]): fully-buffered, rewindable token stream
//!   over rule text from a string, reader, or file.
//! - **Module contract** ([`module`]): named hook tables supplying test
//!   predicates and actions, validated all-or-nothing per capability
//!   group; built-ins in [`modules`], dynamic resolution through the
//!   [`module::ModuleLoader`] seam.
//! - **Graph** ([`graph`]): arena of refcounted nodes; rule chaining
//!   grafts the next rule's root onto the previous rule's frontier, so
//!   shared subgraphs are counted, not copied.
//! - **Parser** (via [`RuleChain::parse`]): recursive descent,
//!   continuation-passing emission, instance deduplication via the
//!   module cache protocol, all-or-nothing failure.
//! - **Evaluator** ([`eval`]): walks the immutable graph with a
//!   per-evaluation [`RuleLocal`] cursor; deny/drop are sticky along the
//!   traversal.
//!
//! ## Quick Start
//!
//! ```rust
//! use raudit_proto::{Event, EventKind, Value, schema};
//! use raudit_rules::{ModuleRegistry, RuleChain, RuleLocal};
//!
//! let registry = ModuleRegistry::new();
//! let mut sink = Event::new(EventKind::Reply);
//! let chain = RuleChain::parse(
//!     "%default method:string = \"DELETE\" : deny",
//!     &registry,
//!     &mut sink,
//! )
//! .unwrap();
//!
//! let mut request = Event::new(EventKind::Request);
//! request
//!     .append_unit("method", Value::String("DELETE".into()))
//!     .unwrap();
//!
//! let mut reply = schema::reply_template();
//! let mut local = RuleLocal::new();
//! chain.run(&mut local, &request, &mut reply);
//! assert!(schema::reply_denied(&reply));
//! ```

pub mod chain;
pub mod error;
pub mod eval;
pub mod graph;
pub mod module;
pub mod modules;
mod parser;
pub mod token;

// Re-export the most commonly used types at crate root
pub use chain::{BodyInfo, NodeInfo, RuleChain};
pub use error::{Result, RuleError};
pub use eval::{Outcome, RuleLocal};
pub use graph::{ActionId, NodeId, TestId};
pub use module::{Module, ModuleHooks, ModuleLoader, ModuleRegistry, State};
pub use token::{Keyword, Token, TokenError, TokenKind, Tokenizer};
