//! The module plugin contract.
//!
//! A module is a named table of lifecycle hooks over opaque state — the
//! seam through which test predicates and side-effecting actions are
//! supplied. Three capability groups exist:
//!
//! - **global**: per-chain state shared by every instance the module
//!   spawns (`start`/`stop`);
//! - **test**: boolean predicates (`start`/`cache`/`run`/`stop`);
//! - **action**: reply-mutating operations (`start`/`cache`/`run`/`stop`).
//!
//! Within the test group and within the action group the hooks are
//! all-or-nothing: a module supplying one to three of the four is
//! rejected as *broken* at registration, and a module supplying no
//! capability at all is rejected as *useless*.
//!
//! `start` consumes the instance's arguments from the token stream;
//! `cache` re-parses a would-be instance's arguments and order-compares
//! them against an existing instance, which is how the parser
//! deduplicates identical tests and actions across rules.
//!
//! Instance and global state are `Mutex`-wrapped by the engine, so one
//! compiled chain can serve concurrent evaluations; anything a module
//! shares *across* instances beyond its global slot is its own problem
//! to synchronize.

use std::any::Any;
use std::cmp::Ordering;
use std::sync::Mutex;

use raudit_proto::Event;

use crate::error::{Result, RuleError};
use crate::token::Tokenizer;

/// Opaque per-module state, downcast by the owning module's hooks.
pub type State = Box<dyn Any + Send>;

/// Global state slot handed to test/action hooks.
pub type Global = Mutex<State>;

pub type GlobalStartFn = Box<dyn Fn() -> Result<State> + Send + Sync>;
pub type GlobalStopFn = Box<dyn Fn(State) + Send + Sync>;

pub type TestStartFn = Box<dyn Fn(&mut Tokenizer, Option<&Global>) -> Result<State> + Send + Sync>;
pub type TestCacheFn = Box<dyn Fn(&State, &mut Tokenizer) -> Ordering + Send + Sync>;
pub type TestRunFn = Box<dyn Fn(&mut State, Option<&Global>, &Event) -> bool + Send + Sync>;
pub type TestStopFn = Box<dyn Fn(State, Option<&Global>) + Send + Sync>;

pub type ActionStartFn =
    Box<dyn Fn(&mut Tokenizer, Option<&Global>) -> Result<State> + Send + Sync>;
pub type ActionCacheFn = Box<dyn Fn(&State, &mut Tokenizer) -> Ordering + Send + Sync>;
pub type ActionRunFn =
    Box<dyn Fn(&mut State, Option<&Global>, &Event, &mut Event) -> bool + Send + Sync>;
pub type ActionStopFn = Box<dyn Fn(State, Option<&Global>) + Send + Sync>;

/// The hook table. Every field is optional; [`Module::validate`]
/// enforces group consistency.
#[derive(Default)]
pub struct ModuleHooks {
    pub global_start: Option<GlobalStartFn>,
    pub global_stop: Option<GlobalStopFn>,

    pub test_start: Option<TestStartFn>,
    pub test_cache: Option<TestCacheFn>,
    pub test_run: Option<TestRunFn>,
    pub test_stop: Option<TestStopFn>,

    pub action_start: Option<ActionStartFn>,
    pub action_cache: Option<ActionCacheFn>,
    pub action_run: Option<ActionRunFn>,
    pub action_stop: Option<ActionStopFn>,
}

/// A named, versioned module.
pub struct Module {
    name: String,
    version: String,
    pub(crate) hooks: ModuleHooks,
}

impl Module {
    pub fn new(name: impl Into<String>, version: impl Into<String>, hooks: ModuleHooks) -> Module {
        Module {
            name: name.into(),
            version: version.into(),
            hooks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn has_global(&self) -> bool {
        self.hooks.global_start.is_some()
    }

    pub fn has_test(&self) -> bool {
        self.hooks.test_start.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.hooks.action_start.is_some()
    }

    /// Enforce the registration consistency rules: each capability group
    /// is all-or-nothing, and at least one capability must exist.
    pub fn validate(&self) -> Result<()> {
        let broken = |group: &str| RuleError::Broken {
            module: self.name.clone(),
            group: group.to_string(),
        };

        let global = [
            self.hooks.global_start.is_some(),
            self.hooks.global_stop.is_some(),
        ];
        if global.iter().any(|p| *p) && !global.iter().all(|p| *p) {
            return Err(broken("global"));
        }

        let test = [
            self.hooks.test_start.is_some(),
            self.hooks.test_cache.is_some(),
            self.hooks.test_run.is_some(),
            self.hooks.test_stop.is_some(),
        ];
        if test.iter().any(|p| *p) && !test.iter().all(|p| *p) {
            return Err(broken("test"));
        }

        let action = [
            self.hooks.action_start.is_some(),
            self.hooks.action_cache.is_some(),
            self.hooks.action_run.is_some(),
            self.hooks.action_stop.is_some(),
        ];
        if action.iter().any(|p| *p) && !action.iter().all(|p| *p) {
            return Err(broken("action"));
        }

        if !self.has_global() && !self.has_test() && !self.has_action() {
            return Err(RuleError::Useless(self.name.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("global", &self.has_global())
            .field("test", &self.has_test())
            .field("action", &self.has_action())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The seam where dynamic loading would plug in: resolve a module by
/// name after the built-in table misses.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Module>;
}

/// Resolves module names for the parser: the static built-in table
/// first, then an optional loader hook. A miss is an internal error,
/// never a crash.
#[derive(Default)]
pub struct ModuleRegistry {
    loader: Option<Box<dyn ModuleLoader>>,
}

impl ModuleRegistry {
    /// A registry over the built-in modules only.
    pub fn new() -> ModuleRegistry {
        ModuleRegistry { loader: None }
    }

    /// A registry that falls back to `loader` for unknown names.
    pub fn with_loader(loader: Box<dyn ModuleLoader>) -> ModuleRegistry {
        ModuleRegistry {
            loader: Some(loader),
        }
    }

    /// Resolve and validate a module. Every returned module has passed
    /// [`Module::validate`].
    pub fn resolve(&self, name: &str) -> Result<Module> {
        let module = match crate::modules::builtin(name) {
            Some(module) => module,
            None => match &self.loader {
                Some(loader) => loader.load(name)?,
                None => {
                    return Err(RuleError::Internal(format!("no such module '{name}'")));
                }
            },
        };
        module.validate()?;
        log::debug!(
            "resolved module '{}' version {} (global={} test={} action={})",
            module.name(),
            module.version(),
            module.has_global(),
            module.has_test(),
            module.has_action()
        );
        Ok(module)
    }
}
