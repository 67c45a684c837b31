//! The `reply` module: an action that sets a unit on the reply event.
//!
//! Argument form: `field : type value`. An existing same-typed unit is
//! overwritten in place; otherwise a shadowing unit is appended. An
//! append that no longer fits fails closed to a no-op.

use std::cmp::Ordering;

use raudit_proto::{Event, PrintMode, TypeCode, Value};

use crate::error::{Result, RuleError};
use crate::module::{Module, ModuleHooks, State};
use crate::token::Tokenizer;

use super::{expect_key, expect_text};

#[derive(Debug)]
struct ReplyAction {
    field: String,
    value: Value,
}

impl ReplyAction {
    fn key(&self) -> (String, u16, String) {
        (
            self.field.clone(),
            self.value.code() as u16,
            self.value.print(PrintMode::Wire),
        )
    }
}

fn parse_args(tokens: &mut Tokenizer) -> Result<ReplyAction> {
    let field = expect_text(tokens, "field name")?;
    expect_key(tokens, ':', "after field name")?;
    let type_token = expect_text(tokens, "type name")?;
    let code = TypeCode::from_name(&type_token.text).ok_or_else(|| {
        RuleError::usage(
            type_token.line,
            format!("unknown type '{}'", type_token.text),
        )
    })?;
    let value_token = expect_text(tokens, "value")?;
    let (value, errors) = code
        .scan(&value_token.text)
        .map_err(|e| RuleError::usage(value_token.line, e.to_string()))?;
    if errors > 0 {
        return Err(RuleError::usage(
            value_token.line,
            format!("bad {} value '{}'", type_token.text, value_token.text),
        ));
    }
    Ok(ReplyAction {
        field: field.text,
        value,
    })
}

fn run(state: &mut State, reply: &mut Event) -> bool {
    let Some(action) = state.downcast_ref::<ReplyAction>() else {
        return false;
    };
    if let Some(unit) = reply.unit_by_name_mut(&action.field)
        && unit.set_value(action.value.clone())
    {
        return true;
    }
    if reply
        .append_unit(&action.field, action.value.clone())
        .is_err()
    {
        log::warn!("reply action: no room for unit '{}'", action.field);
        return false;
    }
    true
}

pub(super) fn module() -> Module {
    let hooks = ModuleHooks {
        action_start: Some(Box::new(|tokens, _| {
            parse_args(tokens).map(|a| Box::new(a) as State)
        })),
        action_cache: Some(Box::new(|state, tokens| {
            let Some(existing) = state.downcast_ref::<ReplyAction>() else {
                return Ordering::Less;
            };
            match parse_args(tokens) {
                Ok(candidate) => existing.key().cmp(&candidate.key()),
                Err(_) => Ordering::Greater,
            }
        })),
        action_run: Some(Box::new(|state, _, _request, reply| run(state, reply))),
        action_stop: Some(Box::new(|_, _| {})),
        ..Default::default()
    };
    Module::new("reply", "1.0", hooks)
}
