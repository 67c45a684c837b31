//! The `log` module: an action that appends the wire-encoded request
//! record to a sink.
//!
//! Argument forms: `file "<path>"` or `stderr`. The file is opened in
//! append mode at rule load; a failure to open is a system error that
//! aborts the parse. A write failure at evaluation time is reported via
//! the engine's warning log and fails closed to a no-op.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::Write;

use raudit_proto::{Event, wire};

use crate::error::{Result, RuleError};
use crate::module::{Module, ModuleHooks, State};
use crate::token::Tokenizer;

use super::expect_text;

enum Sink {
    Stderr,
    File { path: String, file: File },
}

struct LogAction {
    sink: Sink,
}

impl LogAction {
    fn key(&self) -> (&'static str, &str) {
        match &self.sink {
            Sink::Stderr => ("stderr", ""),
            Sink::File { path, .. } => ("file", path),
        }
    }
}

fn parse_args(tokens: &mut Tokenizer) -> Result<LogAction> {
    let kind = expect_text(tokens, "'file' or 'stderr'")?;
    let sink = match kind.text.as_str() {
        "stderr" => Sink::Stderr,
        "file" => {
            let path = expect_text(tokens, "log file path")?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path.text)?;
            Sink::File {
                path: path.text,
                file,
            }
        }
        other => {
            return Err(RuleError::usage(
                kind.line,
                format!("expected 'file' or 'stderr', found '{other}'"),
            ));
        }
    };
    Ok(LogAction { sink })
}

/// Cache comparison must not reopen the file, so it parses the sink spec
/// without touching the filesystem.
fn parse_key(tokens: &mut Tokenizer) -> Result<(&'static str, String)> {
    let kind = expect_text(tokens, "'file' or 'stderr'")?;
    match kind.text.as_str() {
        "stderr" => Ok(("stderr", String::new())),
        "file" => {
            let path = expect_text(tokens, "log file path")?;
            Ok(("file", path.text))
        }
        other => Err(RuleError::usage(
            kind.line,
            format!("expected 'file' or 'stderr', found '{other}'"),
        )),
    }
}

fn run(state: &mut State, request: &Event) -> bool {
    let Some(action) = state.downcast_mut::<LogAction>() else {
        return false;
    };
    let mut buf = Vec::with_capacity(256);
    if let Err(e) = wire::to_buffer(request, &mut buf) {
        log::warn!("log action: cannot encode request: {e}");
        return false;
    }
    let outcome = match &mut action.sink {
        Sink::Stderr => std::io::stderr().lock().write_all(&buf),
        Sink::File { file, .. } => file.write_all(&buf),
    };
    if let Err(e) = outcome {
        log::warn!("log action: write failed: {e}");
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
            let Some(existing) = state.downcast_ref::<LogAction>() else {
                return Ordering::Less;
            };
            match parse_key(tokens) {
                Ok((kind, path)) => existing.key().cmp(&(kind, path.as_str())),
                Err(_) => Ordering::Greater,
            }
        })),
        action_run: Some(Box::new(|state, _, request, _reply| run(state, request))),
        action_stop: Some(Box::new(|_, _| {})),
        ..Default::default()
    };
    Module::new("log", "1.0", hooks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raudit_proto::{EventKind, Value};

    #[test]
    fn test_file_sink_appends_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let source = format!("file \"{}\"", path.display());
        let mut tokens = Tokenizer::from_source(&source).unwrap();
        let mut state: State = Box::new(parse_args(&mut tokens).unwrap());

        let mut ev = Event::new(EventKind::Request);
        ev.append_unit("service", Value::String("httpd".into()))
            .unwrap();
        assert!(run(&mut state, &ev));
        assert!(run(&mut state, &ev));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with('?'));
        assert!(contents.contains("service:string=\"httpd\""));
    }

    #[test]
    fn test_unknown_sink_is_usage_error() {
        let mut tokens = Tokenizer::from_source("syslog").unwrap();
        assert!(matches!(
            parse_args(&mut tokens),
            Err(RuleError::Usage { .. })
        ));
    }

    #[test]
    fn test_unwritable_path_is_system_error() {
        let mut tokens =
            Tokenizer::from_source("file \"/nonexistent-dir/audit.log\"").unwrap();
        assert!(matches!(
            parse_args(&mut tokens),
            Err(RuleError::System(_))
        ));
    }
}
