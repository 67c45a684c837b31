//! The `default` module: compare a named request unit against a literal.
//!
//! Argument form: `field : type [op] value` with `op` one of
//! `= == eq ne lt le gt ge` (missing op means `=`). Equality follows the
//! type registry's nested-range semantics: a request host inside a rule's
//! domain, an address inside a prefix, or a path under a directory all
//! satisfy `=`.

use std::cmp::Ordering;

use raudit_proto::{Event, TypeCode, Value};

use crate::error::{Result, RuleError};
use crate::module::{Module, ModuleHooks, State};
use crate::token::{Tokenizer, TokenKind};

use super::{expect_key, expect_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn from_word(word: &str) -> Option<CmpOp> {
        match word {
            "=" | "==" | "eq" => Some(CmpOp::Eq),
            "ne" | "!=" => Some(CmpOp::Ne),
            "lt" | "<" => Some(CmpOp::Lt),
            "le" | "<=" => Some(CmpOp::Le),
            "gt" | ">" => Some(CmpOp::Gt),
            "ge" | ">=" => Some(CmpOp::Ge),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct DefaultTest {
    field: String,
    code: TypeCode,
    op: CmpOp,
    value: Value,
}

impl DefaultTest {
    /// Canonical ordering key for the cache protocol.
    fn key(&self) -> (String, u16, CmpOp, String) {
        (
            self.field.clone(),
            self.code as u16,
            self.op,
            self.value.print(raudit_proto::PrintMode::Wire),
        )
    }
}

fn parse_args(tokens: &mut Tokenizer) -> Result<DefaultTest> {
    let field = expect_text(tokens, "field name")?;
    expect_key(tokens, ':', "after field name")?;
    let type_token = expect_text(tokens, "type name")?;
    let code = TypeCode::from_name(&type_token.text).ok_or_else(|| {
        RuleError::usage(
            type_token.line,
            format!("unknown type '{}'", type_token.text),
        )
    })?;

    let op = match tokens.peek() {
        Some(t) if t.kind == TokenKind::Word && CmpOp::from_word(&t.text).is_some() => {
            let t = tokens.get().unwrap();
            CmpOp::from_word(&t.text).unwrap()
        }
        _ => CmpOp::Eq,
    };

    let value_token = expect_text(tokens, "comparison value")?;
    let (value, errors) = code
        .scan(&value_token.text)
        .map_err(|e| RuleError::usage(value_token.line, e.to_string()))?;
    if errors > 0 {
        return Err(RuleError::usage(
            value_token.line,
            format!(
                "bad {} value '{}'",
                type_token.text, value_token.text
            ),
        ));
    }

    Ok(DefaultTest {
        field: field.text,
        code,
        op,
        value,
    })
}

fn cache(state: &State, tokens: &mut Tokenizer) -> Ordering {
    let Some(existing) = state.downcast_ref::<DefaultTest>() else {
        return Ordering::Less;
    };
    match parse_args(tokens) {
        Ok(candidate) => existing.key().cmp(&candidate.key()),
        // Unparseable arguments cannot match; start will report them.
        Err(_) => Ordering::Greater,
    }
}

fn run(state: &mut State, request: &Event) -> bool {
    let Some(test) = state.downcast_ref::<DefaultTest>() else {
        return false;
    };
    let Some(unit) = request.unit_by_name(&test.field) else {
        return false;
    };
    if unit.code() != test.code {
        return false;
    }
    let cmp = unit.value().compare(&test.value);
    match test.op {
        CmpOp::Eq => cmp.satisfies(),
        CmpOp::Ne => !cmp.satisfies(),
        CmpOp::Lt => cmp.order == Ordering::Less,
        CmpOp::Le => cmp.order != Ordering::Greater,
        CmpOp::Gt => cmp.order == Ordering::Greater,
        CmpOp::Ge => cmp.order != Ordering::Less,
    }
}

pub(super) fn module() -> Module {
    let hooks = ModuleHooks {
        test_start: Some(Box::new(|tokens, _| {
            parse_args(tokens).map(|t| Box::new(t) as State)
        })),
        test_cache: Some(Box::new(cache)),
        test_run: Some(Box::new(|state, _, request| run(state, request))),
        test_stop: Some(Box::new(|_, _| {})),
        ..Default::default()
    };
    Module::new("default", "1.0", hooks)
}
