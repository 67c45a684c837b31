//! The rule-chain evaluator.
//!
//! Evaluation walks the compiled graph once per request: at each node the
//! body (if any) is applied — deny/drop are sticky for the rest of the
//! traversal, actions run strictly in parse order — then the node's test
//! picks the true or false branch, a leaf's graft edge continues into the
//! next rule, and a node with neither terminates the walk. The reply's
//! `deny` flag is written from the sticky verdict at the end.
//!
//! The compiled graph is never mutated; everything mutable lives in the
//! caller's [`RuleLocal`] cursor and the reply event, which is what makes
//! concurrent evaluations of one chain safe (each with its own local and
//! events — instance state is mutex-guarded per instance).

use serde::Serialize;

use raudit_proto::{Event, schema};

use crate::chain::RuleChain;
use crate::graph::{ActionId, NodeId, TestId};

/// How an evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Normal termination.
    Ok,
    /// Reserved for future interleaved evaluation; never returned today.
    Again,
    /// Some traversed body asked for the connection to be dropped.
    Drop,
}

/// The per-evaluation cursor: the only mutable evaluation state.
///
/// One local serves one evaluation at a time; reuse across sequential
/// evaluations is fine (`run` resets it), concurrent evaluations need a
/// local each.
#[derive(Debug, Default)]
pub struct RuleLocal {
    node: Option<NodeId>,
    deny: bool,
    drop: bool,
}

impl RuleLocal {
    pub fn new() -> RuleLocal {
        RuleLocal::default()
    }

    pub fn reset(&mut self) {
        *self = RuleLocal::default();
    }

    /// The node the walk last stood on (diagnostics).
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Sticky deny verdict of the last evaluation.
    pub fn denied(&self) -> bool {
        self.deny
    }

    /// Sticky drop request of the last evaluation.
    pub fn dropped(&self) -> bool {
        self.drop
    }
}

impl RuleChain {
    /// Evaluate one request, mutating `reply` and `local` only.
    pub fn run(&self, local: &mut RuleLocal, request: &Event, reply: &mut Event) -> Outcome {
        local.reset();

        let mut cursor = self.core.root;
        while let Some(id) = cursor {
            local.node = Some(id);
            let node = self.core.arena.get(id);

            if let Some(body) = &node.body {
                local.deny |= body.deny;
                local.drop |= body.drop;
                for action in &body.actions {
                    self.run_action(*action, request, reply);
                }
            }

            cursor = match node.test {
                Some(test) => {
                    if self.run_test(test, request) {
                        node.on_true
                    } else {
                        node.on_false
                    }
                }
                None => node.jump,
            };
        }

        if let Err(e) = schema::reply_set_deny(reply, local.deny) {
            log::warn!("cannot record verdict on reply: {e}");
            self.note_error();
        }

        if local.drop { Outcome::Drop } else { Outcome::Ok }
    }

    /// Run one test instance. A broken instance answers `false`: a test
    /// that cannot run does not match.
    fn run_test(&self, id: TestId, request: &Event) -> bool {
        let instance = &self.core.tests[id.0 as usize];
        let owner = &self.core.modules[instance.module];
        let run = owner
            .module
            .hooks
            .test_run
            .as_ref()
            .expect("validated module");
        let mut state = instance.state.lock().unwrap_or_else(|p| p.into_inner());
        run(&mut state, owner.global.as_ref(), request)
    }

    /// Run one action instance. Failure is a no-op with the error flag
    /// raised for visibility; it never aborts the traversal.
    fn run_action(&self, id: ActionId, request: &Event, reply: &mut Event) {
        let instance = &self.core.actions[id.0 as usize];
        let owner = &self.core.modules[instance.module];
        let run = owner
            .module
            .hooks
            .action_run
            .as_ref()
            .expect("validated module");
        let mut state = instance.state.lock().unwrap_or_else(|p| p.into_inner());
        if !run(&mut state, owner.global.as_ref(), request, reply) {
            log::warn!(
                "action {} of module '{}' failed",
                id.0,
                owner.module.name()
            );
            self.note_error();
        }
    }
}
