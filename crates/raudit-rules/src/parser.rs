//! The rule parser: recursive descent over the token stream, emitting a
//! refcounted decision DAG.
//!
//! Grammar:
//!
//! ```text
//! chain  := rule*
//! rule   := or_expr ':' action_list
//! or     := and ('|' or)?
//! and    := term ('&' and)?
//! term   := '!' term | '(' or ')' | test
//! test   := ['%' module] module-args...          (bare tests use 'default')
//! action := 'allow' | 'deny' | 'continue' | 'drop'
//!         | ['%'] module module-args...          (';'-separated)
//! ```
//!
//! Each boolean production is emitted continuation-passing: handed a
//! `(true_target, false_target)` pair of node ids, it wires its branches
//! to them, so `a & b` shares one false target and `a | b` shares one
//! true target — the sharing that makes the graph a DAG.
//!
//! Rule chaining: every rule gets a true leaf (carrying its body) and a
//! false leaf. The next rule's root is grafted onto the previous rule's
//! false leaf — no match falls through — and, when the body set
//! `continue`, onto its true leaf as well, so a match goes on to
//! evaluate the next rule too.
//!
//! Instance deduplication: before starting a new test or action the
//! parser lets every existing instance of the module order-compare its
//! arguments against the stream (`cache`); on a hit the instance is
//! reused with the arguments consumed, otherwise the stream is rewound
//! and the next candidate tried.
//!
//! Failure is all-or-nothing: the first error aborts the parse and the
//! half-built chain is torn down before the caller sees `Err`.

use std::cmp::Ordering;
use std::sync::Mutex;

use crate::chain::{ActionInstance, ChainCore, TestInstance};
use crate::error::{Result, RuleError};
use crate::graph::{ActionId, NodeId, RuleBody, RuleNode, TestId};
use crate::module::ModuleRegistry;
use crate::token::{Keyword, Tokenizer};

/// Build a chain core from a token stream. On error the partial build is
/// torn down before returning.
pub(crate) fn build(tokens: Tokenizer, registry: &ModuleRegistry) -> Result<ChainCore> {
    let mut parser = Parser {
        tokens,
        registry,
        core: ChainCore::default(),
    };
    match parser.parse_chain() {
        Ok(()) => Ok(parser.core),
        Err(e) => {
            parser.core.teardown();
            Err(e)
        }
    }
}

/// Transient boolean expression, with test instances already resolved in
/// textual order. Wiring into nodes happens in [`Parser::emit`].
enum TermExpr {
    Test(TestId),
    Not(Box<TermExpr>),
    And(Box<TermExpr>, Box<TermExpr>),
    Or(Box<TermExpr>, Box<TermExpr>),
}

struct ParsedRule {
    root: NodeId,
    true_leaf: NodeId,
    false_leaf: NodeId,
    cont: bool,
}

struct Parser<'a> {
    tokens: Tokenizer,
    registry: &'a ModuleRegistry,
    core: ChainCore,
}

impl Parser<'_> {
    fn parse_chain(&mut self) -> Result<()> {
        // Frontier leaves awaiting the next rule's root.
        let mut pending: Vec<NodeId> = Vec::new();

        while self.tokens.peek().is_some() {
            let rule = self.parse_rule()?;
            match self.core.root {
                None => {
                    self.core.root = Some(rule.root);
                    self.core.arena.incref(rule.root);
                }
                Some(_) => {
                    for leaf in pending.drain(..) {
                        self.core.arena.graft(leaf, rule.root);
                    }
                }
            }
            pending.push(rule.false_leaf);
            if rule.cont {
                pending.push(rule.true_leaf);
            }
        }
        Ok(())
    }

    fn parse_rule(&mut self) -> Result<ParsedRule> {
        let expr = self.parse_or_expr()?;
        self.expect_key(':', "between tests and actions")?;
        let body = self.parse_body()?;
        let cont = body.cont;

        let true_leaf = self.core.arena.alloc_leaf();
        self.core.arena.get_mut(true_leaf).body = Some(body);
        let false_leaf = self.core.arena.alloc_leaf();
        let root = self.emit(&expr, true_leaf, false_leaf);

        Ok(ParsedRule {
            root,
            true_leaf,
            false_leaf,
            cont,
        })
    }

    /// Wire an expression into nodes, continuation-passing: the returned
    /// root branches to `t` on overall truth and `f` otherwise.
    fn emit(&mut self, expr: &TermExpr, t: NodeId, f: NodeId) -> NodeId {
        match expr {
            TermExpr::Test(id) => {
                let node = self.core.arena.alloc(RuleNode {
                    test: Some(*id),
                    on_true: Some(t),
                    on_false: Some(f),
                    ..Default::default()
                });
                self.core.arena.incref(t);
                self.core.arena.incref(f);
                node
            }
            TermExpr::Not(inner) => self.emit(inner, f, t),
            TermExpr::And(a, b) => {
                let b_root = self.emit(b, t, f);
                self.emit(a, b_root, f)
            }
            TermExpr::Or(a, b) => {
                let b_root = self.emit(b, t, f);
                self.emit(a, t, b_root)
            }
        }
    }

    // -- boolean expression ------------------------------------------------

    fn parse_or_expr(&mut self) -> Result<TermExpr> {
        let left = self.parse_and_expr()?;
        if self.eat_key('|') {
            let right = self.parse_or_expr()?;
            return Ok(TermExpr::Or(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<TermExpr> {
        let left = self.parse_term()?;
        if self.eat_key('&') {
            let right = self.parse_and_expr()?;
            return Ok(TermExpr::And(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<TermExpr> {
        let line = self.tokens.line();
        let Some(token) = self.tokens.peek() else {
            return Err(RuleError::usage(line, "expected a test"));
        };

        if token.is_key('!') {
            self.tokens.get();
            return Ok(TermExpr::Not(Box::new(self.parse_term()?)));
        }
        if token.is_key('(') {
            self.tokens.get();
            let inner = self.parse_or_expr()?;
            self.expect_key(')', "after grouped tests")?;
            return Ok(inner);
        }
        if token.is_key('%') {
            self.tokens.get();
            let name = self.expect_word("module name")?;
            return self.parse_test(&name);
        }
        if token.is_text() {
            // A bare test belongs to the default module, which consumes
            // the stream from the field name on.
            return self.parse_test("default");
        }
        let token = token.clone();
        Err(RuleError::usage(
            token.line,
            format!("unexpected '{token}' where a test should start"),
        ))
    }

    fn parse_test(&mut self, module: &str) -> Result<TermExpr> {
        let line = self.tokens.line();
        let idx = self.resolve_module(module)?;
        if !self.core.modules[idx].module.has_test() {
            return Err(RuleError::usage(
                line,
                format!("module '{module}' has no test capability"),
            ));
        }
        let id = self.find_or_start_test(idx)?;
        Ok(TermExpr::Test(id))
    }

    // -- rule body ---------------------------------------------------------

    fn parse_body(&mut self) -> Result<RuleBody> {
        let mut body = RuleBody::default();
        loop {
            let line = self.tokens.line();
            let Some(token) = self.tokens.get() else {
                return Err(RuleError::usage(line, "expected an action"));
            };

            match token.keyword {
                Some(Keyword::Allow) => {}
                Some(Keyword::Deny) => body.deny = true,
                Some(Keyword::Continue) => body.cont = true,
                Some(Keyword::Drop) => body.drop = true,
                None => {
                    let name = if token.is_key('%') {
                        self.expect_word("module name")?
                    } else if token.is_text() {
                        token.text
                    } else {
                        return Err(RuleError::usage(
                            token.line,
                            format!("unexpected '{token}' where an action should start"),
                        ));
                    };
                    let idx = self.resolve_module(&name)?;
                    if !self.core.modules[idx].module.has_action() {
                        return Err(RuleError::usage(
                            line,
                            format!("module '{name}' has no action capability"),
                        ));
                    }
                    let id = self.find_or_start_action(idx)?;
                    body.actions.push(id);
                }
            }

            if self.eat_key(';') {
                continue;
            }
            return Ok(body);
        }
    }

    // -- modules and instances ----------------------------------------------

    /// Find a module already registered on this chain, or resolve, start
    /// its global state, and register it.
    fn resolve_module(&mut self, name: &str) -> Result<usize> {
        if let Some(idx) = self
            .core
            .modules
            .iter()
            .position(|m| m.module.name() == name)
        {
            return Ok(idx);
        }
        let module = self.registry.resolve(name)?;
        let global = match &module.hooks.global_start {
            Some(start) => Some(Mutex::new(start()?)),
            None => None,
        };
        self.core.modules.push(crate::chain::LoadedModule { module, global });
        Ok(self.core.modules.len() - 1)
    }

    /// The cache protocol: let each existing instance of the module
    /// order-compare its arguments against the stream; reuse on a hit
    /// (arguments stay consumed), rewind and try the next otherwise.
    fn find_or_start_test(&mut self, idx: usize) -> Result<TestId> {
        for i in 0..self.core.tests.len() {
            if self.core.tests[i].module != idx {
                continue;
            }
            let mark = self.tokens.mark();
            let verdict = {
                let cache = self.core.modules[idx]
                    .module
                    .hooks
                    .test_cache
                    .as_ref()
                    .expect("validated module");
                let state = self.core.tests[i]
                    .state
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                cache(&state, &mut self.tokens)
            };
            if verdict == Ordering::Equal {
                log::debug!("test instance {i} reused");
                return Ok(TestId(i as u32));
            }
            self.tokens.rewind(mark);
        }

        let state = {
            let start = self.core.modules[idx]
                .module
                .hooks
                .test_start
                .as_ref()
                .expect("validated module");
            start(&mut self.tokens, self.core.modules[idx].global.as_ref())?
        };
        self.core.tests.push(TestInstance {
            module: idx,
            state: Mutex::new(state),
        });
        Ok(TestId((self.core.tests.len() - 1) as u32))
    }

    fn find_or_start_action(&mut self, idx: usize) -> Result<ActionId> {
        for i in 0..self.core.actions.len() {
            if self.core.actions[i].module != idx {
                continue;
            }
            let mark = self.tokens.mark();
            let verdict = {
                let cache = self.core.modules[idx]
                    .module
                    .hooks
                    .action_cache
                    .as_ref()
                    .expect("validated module");
                let state = self.core.actions[i]
                    .state
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                cache(&state, &mut self.tokens)
            };
            if verdict == Ordering::Equal {
                log::debug!("action instance {i} reused");
                return Ok(ActionId(i as u32));
            }
            self.tokens.rewind(mark);
        }

        let state = {
            let start = self.core.modules[idx]
                .module
                .hooks
                .action_start
                .as_ref()
                .expect("validated module");
            start(&mut self.tokens, self.core.modules[idx].global.as_ref())?
        };
        self.core.actions.push(ActionInstance {
            module: idx,
            state: Mutex::new(state),
        });
        Ok(ActionId((self.core.actions.len() - 1) as u32))
    }

    // -- token helpers -----------------------------------------------------

    fn eat_key(&mut self, ch: char) -> bool {
        if self.tokens.peek().is_some_and(|t| t.is_key(ch)) {
            self.tokens.get();
            return true;
        }
        false
    }

    fn expect_key(&mut self, ch: char, what: &str) -> Result<()> {
        let line = self.tokens.line();
        match self.tokens.get() {
            Some(token) if token.is_key(ch) => Ok(()),
            Some(token) => Err(RuleError::usage(
                token.line,
                format!("expected '{ch}' {what}, found '{token}'"),
            )),
            None => Err(RuleError::usage(
                line,
                format!("expected '{ch}' {what}, found end of input"),
            )),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        let line = self.tokens.line();
        match self.tokens.get() {
            Some(token) if token.is_text() => Ok(token.text),
            Some(token) => Err(RuleError::usage(
                token.line,
                format!("expected {what}, found '{token}'"),
            )),
            None => Err(RuleError::usage(
                line,
                format!("expected {what}, found end of input"),
            )),
        }
    }
}
