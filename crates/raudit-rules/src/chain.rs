//! Rule chains: ownership and lifecycle of a compiled decision graph.
//!
//! A chain owns the node arena, the deduplicated test/action instances,
//! and the modules they came from. It is built once by the parser from a
//! token stream — all-or-nothing, with the first diagnostic written to a
//! caller-supplied sink event — evaluated any number of times (see
//! [`crate::eval`]), and torn down in dependency order: nodes first,
//! then instance stops, then module global stops.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use raudit_proto::{Event, TypeCode, Value};

use crate::error::{Result, RuleError};
use crate::graph::{NodeArena, NodeId, RuleBody};
use crate::module::{Global, Module, ModuleRegistry, State};
use crate::parser;
use crate::token::Tokenizer;

/// A module registered on a chain, with its started global state.
pub(crate) struct LoadedModule {
    pub module: Module,
    pub global: Option<Global>,
}

/// One deduplicated test instance.
pub(crate) struct TestInstance {
    pub module: usize,
    pub state: Mutex<State>,
}

/// One deduplicated action instance.
pub(crate) struct ActionInstance {
    pub module: usize,
    pub state: Mutex<State>,
}

/// Everything a chain owns. Shared between the parser (which builds it)
/// and the chain (which drives and finally tears it down).
#[derive(Default)]
pub(crate) struct ChainCore {
    pub arena: NodeArena,
    pub root: Option<NodeId>,
    pub modules: Vec<LoadedModule>,
    pub tests: Vec<TestInstance>,
    pub actions: Vec<ActionInstance>,
}

impl ChainCore {
    /// Release in dependency order: graph nodes, then test/action
    /// instances, then module globals.
    pub(crate) fn teardown(&mut self) {
        if let Some(root) = self.root.take() {
            self.arena.decref(root);
        }
        // A parse abandoned halfway leaves unattached nodes; refcounts no
        // longer describe reachability there, so drop the arena wholesale.
        self.arena.clear();

        for inst in self.tests.drain(..) {
            let owner = &self.modules[inst.module];
            if let Some(stop) = &owner.module.hooks.test_stop {
                let state = inst.state.into_inner().unwrap_or_else(|p| p.into_inner());
                stop(state, owner.global.as_ref());
            }
        }
        for inst in self.actions.drain(..) {
            let owner = &self.modules[inst.module];
            if let Some(stop) = &owner.module.hooks.action_stop {
                let state = inst.state.into_inner().unwrap_or_else(|p| p.into_inner());
                stop(state, owner.global.as_ref());
            }
        }
        for loaded in self.modules.drain(..) {
            let LoadedModule { module, global } = loaded;
            if let (Some(stop), Some(global)) = (&module.hooks.global_stop, global) {
                stop(global.into_inner().unwrap_or_else(|p| p.into_inner()));
            }
        }
    }
}

/// A compiled, immutable rule chain.
pub struct RuleChain {
    pub(crate) core: ChainCore,
    pub(crate) error: AtomicBool,
}

impl std::fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleChain")
            .field("tests", &self.core.tests.len())
            .field("actions", &self.core.actions.len())
            .field("modules", &self.core.modules.len())
            .field("error", &self.error.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

impl RuleChain {
    /// Parse rule text into a chain.
    ///
    /// All-or-nothing: on any error the first diagnostic is recorded in
    /// `sink` (one record only — an already-written sink is left alone),
    /// everything built so far is torn down, and `Err` is returned.
    pub fn parse(source: &str, registry: &ModuleRegistry, sink: &mut Event) -> Result<RuleChain> {
        let tokens = match Tokenizer::from_source(source) {
            Ok(tokens) => tokens,
            Err(e) => {
                let e = RuleError::from(e);
                write_sink(sink, &e);
                return Err(e);
            }
        };
        Self::parse_tokens(tokens, registry, sink)
    }

    /// Parse a rule file into a chain.
    pub fn parse_path(
        path: impl AsRef<Path>,
        registry: &ModuleRegistry,
        sink: &mut Event,
    ) -> Result<RuleChain> {
        let tokens = match Tokenizer::from_path(path) {
            Ok(tokens) => tokens,
            Err(e) => {
                let e = RuleError::from(e);
                write_sink(sink, &e);
                return Err(e);
            }
        };
        Self::parse_tokens(tokens, registry, sink)
    }

    /// Parse an already-built token stream into a chain.
    pub fn parse_tokens(
        tokens: Tokenizer,
        registry: &ModuleRegistry,
        sink: &mut Event,
    ) -> Result<RuleChain> {
        match parser::build(tokens, registry) {
            Ok(core) => {
                log::debug!(
                    "chain compiled: {} nodes, {} tests, {} actions, {} modules",
                    core.arena.live(),
                    core.tests.len(),
                    core.actions.len(),
                    core.modules.len()
                );
                Ok(RuleChain {
                    core,
                    error: AtomicBool::new(false),
                })
            }
            Err(e) => {
                write_sink(sink, &e);
                Err(e)
            }
        }
    }

    /// The entry node, if the chain has any rules at all.
    pub fn root(&self) -> Option<NodeId> {
        self.core.root
    }

    /// Live decision nodes.
    pub fn node_count(&self) -> usize {
        self.core.arena.live()
    }

    /// Deduplicated test instances.
    pub fn test_count(&self) -> usize {
        self.core.tests.len()
    }

    /// Deduplicated action instances.
    pub fn action_count(&self) -> usize {
        self.core.actions.len()
    }

    /// Modules registered on this chain.
    pub fn module_count(&self) -> usize {
        self.core.modules.len()
    }

    /// Whether any evaluation since compile reported a failing action.
    pub fn had_error(&self) -> bool {
        self.error.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn note_error(&self) {
        self.error.store(true, AtomicOrdering::Relaxed);
    }

    /// Structural view of one node, for debugging and tests.
    pub fn info(&self, id: NodeId) -> NodeInfo {
        let node = self.core.arena.get(id);
        NodeInfo {
            has_test: node.test.is_some(),
            on_true: node.on_true,
            on_false: node.on_false,
            jump: node.jump,
            refs: self.core.arena.refs(id),
            body: node.body.as_ref().map(|b: &RuleBody| BodyInfo {
                deny: b.deny,
                drop: b.drop,
                cont: b.cont,
                actions: b.actions.len(),
            }),
        }
    }
}

impl Drop for RuleChain {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

/// Structural summary of a node (see [`RuleChain::info`]).
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    pub has_test: bool,
    pub on_true: Option<NodeId>,
    pub on_false: Option<NodeId>,
    pub jump: Option<NodeId>,
    pub refs: u32,
    pub body: Option<BodyInfo>,
}

/// Structural summary of a rule body.
#[derive(Debug, Clone, Copy)]
pub struct BodyInfo {
    pub deny: bool,
    pub drop: bool,
    pub cont: bool,
    pub actions: usize,
}

/// Record the first diagnostic on the sink event; a sink that already
/// carries one stays fresh for its caller.
fn write_sink(sink: &mut Event, error: &RuleError) {
    if sink.unit_by_name("error").is_some() {
        return;
    }
    let line = match error {
        RuleError::Usage { line, .. } => *line,
        _ => 0,
    };
    // Capacity failures here leave the sink short, nothing more.
    let _ = sink.append_scanned("error", TypeCode::String, &error.to_string());
    let _ = sink.append_unit("line", Value::Integer(line));
    let _ = sink.append_scanned("kind", TypeCode::String, kind_of(error));
}

fn kind_of(error: &RuleError) -> &'static str {
    match error {
        RuleError::Usage { .. } => "usage",
        RuleError::System(_) => "system",
        RuleError::Protocol(_) => "protocol",
        RuleError::Unhandled(_) => "unhandled",
        RuleError::Internal(_) | RuleError::Broken { .. } | RuleError::Useless(_) => "internal",
    }
}
