//! The `constant` module: a test that always answers `true` or `false`.
//! Mostly useful for wiring, testing, and benchmarking chains.

use std::cmp::Ordering;

use crate::error::{Result, RuleError};
use crate::module::{Module, ModuleHooks, State};
use crate::token::Tokenizer;

use super::expect_text;

fn parse_args(tokens: &mut Tokenizer) -> Result<bool> {
    let token = expect_text(tokens, "'true' or 'false'")?;
    match token.text.as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(RuleError::usage(
            token.line,
            format!("expected 'true' or 'false', found '{other}'"),
        )),
    }
}

pub(super) fn module() -> Module {
    let hooks = ModuleHooks {
        test_start: Some(Box::new(|tokens, _| {
            parse_args(tokens).map(|v| Box::new(v) as State)
        })),
        test_cache: Some(Box::new(|state, tokens| {
            let Some(existing) = state.downcast_ref::<bool>() else {
                return Ordering::Less;
            };
            match parse_args(tokens) {
                Ok(candidate) => existing.cmp(&candidate),
                Err(_) => Ordering::Greater,
            }
        })),
        test_run: Some(Box::new(|state, _, _| {
            state.downcast_ref::<bool>().copied().unwrap_or(false)
        })),
        test_stop: Some(Box::new(|_, _| {})),
        ..Default::default()
    };
    Module::new("constant", "1.0", hooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mut t = Tokenizer::from_source("true false 1 0 maybe").unwrap();
        assert_eq!(parse_args(&mut t).unwrap(), true);
        assert_eq!(parse_args(&mut t).unwrap(), false);
        assert_eq!(parse_args(&mut t).unwrap(), true);
        assert_eq!(parse_args(&mut t).unwrap(), false);
        assert!(parse_args(&mut t).is_err());
    }
}
