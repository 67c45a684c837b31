//! The `regex` module: match a unit's canonical rendering against a
//! compiled pattern.
//!
//! Argument form: `field pattern`. The pattern compiles once at rule
//! load; an invalid pattern is a usage error that aborts the parse.

use std::cmp::Ordering;

use raudit_proto::{Event, PrintMode};
use regex::Regex;

use crate::error::{Result, RuleError};
use crate::module::{Module, ModuleHooks, State};
use crate::token::Tokenizer;

use super::expect_text;

#[derive(Debug)]
struct RegexTest {
    field: String,
    pattern: String,
    re: Regex,
}

fn parse_args(tokens: &mut Tokenizer) -> Result<RegexTest> {
    let field = expect_text(tokens, "field name")?;
    let pattern = expect_text(tokens, "pattern")?;
    let re = Regex::new(&pattern.text)
        .map_err(|e| RuleError::usage(pattern.line, format!("bad pattern: {e}")))?;
    Ok(RegexTest {
        field: field.text,
        pattern: pattern.text,
        re,
    })
}

fn run(state: &mut State, request: &Event) -> bool {
    let Some(test) = state.downcast_ref::<RegexTest>() else {
        return false;
    };
    match request.unit_by_name(&test.field) {
        Some(unit) => test.re.is_match(&unit.value().print(PrintMode::Wire)),
        None => false,
    }
}

pub(super) fn module() -> Module {
    let hooks = ModuleHooks {
        test_start: Some(Box::new(|tokens, _| {
            parse_args(tokens).map(|t| Box::new(t) as State)
        })),
        test_cache: Some(Box::new(|state, tokens| {
            let Some(existing) = state.downcast_ref::<RegexTest>() else {
                return Ordering::Less;
            };
            match parse_args(tokens) {
                Ok(candidate) => (existing.field.as_str(), existing.pattern.as_str())
                    .cmp(&(candidate.field.as_str(), candidate.pattern.as_str())),
                Err(_) => Ordering::Greater,
            }
        })),
        test_run: Some(Box::new(|state, _, request| run(state, request))),
        test_stop: Some(Box::new(|_, _| {})),
        ..Default::default()
    };
    Module::new("regex", "1.0", hooks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raudit_proto::{EventKind, Value};

    #[test]
    fn test_match_and_miss() {
        let mut tokens = Tokenizer::from_source(r#"agent "^curl/""#).unwrap();
        let mut state: State = Box::new(parse_args(&mut tokens).unwrap());

        let mut ev = Event::new(EventKind::Request);
        ev.append_unit("agent", Value::String("curl/8.5".into()))
            .unwrap();
        assert!(run(&mut state, &ev));

        let mut ev = Event::new(EventKind::Request);
        ev.append_unit("agent", Value::String("wget/1.21".into()))
            .unwrap();
        assert!(!run(&mut state, &ev));
    }

    #[test]
    fn test_bad_pattern_is_usage_error() {
        let mut tokens = Tokenizer::from_source(r#"agent "(unclosed""#).unwrap();
        assert!(matches!(
            parse_args(&mut tokens),
            Err(RuleError::Usage { .. })
        ));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let mut tokens = Tokenizer::from_source("agent x").unwrap();
        let mut state: State = Box::new(parse_args(&mut tokens).unwrap());
        let ev = Event::new(EventKind::Request);
        assert!(!run(&mut state, &ev));
    }
}
